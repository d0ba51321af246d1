// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Results returned by the coordinator's reserve and cancel operations.

use crate::base::{CourseId, ReservationId, UserId};
use crate::reservation::{Reservation, ReservationStatus};
use chrono::{DateTime, Utc};
use serde::ser::{Serialize, SerializeStruct, Serializer};

/// Outcome of a successful reserve.
///
/// Exactly one of [`remaining_slots`](Self::remaining_slots) and
/// [`waitlist_position`](Self::waitlist_position) is present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationOutcome {
    reservation: Reservation,
    remaining_slots: Option<u32>,
}

impl ReservationOutcome {
    pub(crate) fn confirmed(reservation: Reservation, remaining_slots: u32) -> Self {
        debug_assert!(reservation.is_confirmed());
        Self {
            reservation,
            remaining_slots: Some(remaining_slots),
        }
    }

    pub(crate) fn waitlisted(reservation: Reservation) -> Self {
        debug_assert!(reservation.is_waitlisted());
        Self {
            reservation,
            remaining_slots: None,
        }
    }

    /// The reservation as it was committed.
    pub fn reservation(&self) -> &Reservation {
        &self.reservation
    }

    /// Returns the new reservation's id.
    pub fn reservation_id(&self) -> ReservationId {
        self.reservation.id()
    }

    /// Returns the course reserved.
    pub fn course_id(&self) -> CourseId {
        self.reservation.course_id()
    }

    /// Returns whether the reservation was confirmed or waitlisted.
    pub fn status(&self) -> ReservationStatus {
        self.reservation.status()
    }

    /// Returns true if the course was full.
    pub fn is_waitlisted(&self) -> bool {
        self.reservation.is_waitlisted()
    }

    /// Position taken on the waitlist, if the course was full.
    pub fn waitlist_position(&self) -> Option<u32> {
        self.reservation.waitlist_position()
    }

    /// Seats still free after this reservation took one.
    pub fn remaining_slots(&self) -> Option<u32> {
        self.remaining_slots
    }
}

impl Serialize for ReservationOutcome {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut state = serializer.serialize_struct("ReservationOutcome", 4)?;
        state.serialize_field("reservation_id", &self.reservation_id())?;
        state.serialize_field("course_id", &self.course_id())?;
        state.serialize_field("status", &self.status())?;
        match (self.waitlist_position(), self.remaining_slots) {
            (Some(position), _) => state.serialize_field("waitlist_position", &position)?,
            (None, Some(remaining)) => state.serialize_field("remaining_slots", &remaining)?,
            (None, None) => {}
        }
        state.end()
    }
}

/// Outcome of a successful cancel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CancellationOutcome {
    cancelled: Reservation,
    cancelled_at: DateTime<Utc>,
    promoted: Option<Reservation>,
}

impl CancellationOutcome {
    pub(crate) fn new(
        cancelled: Reservation,
        cancelled_at: DateTime<Utc>,
        promoted: Option<Reservation>,
    ) -> Self {
        Self {
            cancelled,
            cancelled_at,
            promoted,
        }
    }

    /// The reservation after cancellation.
    pub fn reservation(&self) -> &Reservation {
        &self.cancelled
    }

    /// Returns the cancelled reservation's id.
    pub fn reservation_id(&self) -> ReservationId {
        self.cancelled.id()
    }

    /// Returns the course the seat was released in.
    pub fn course_id(&self) -> CourseId {
        self.cancelled.course_id()
    }

    /// Returns when the cancellation took effect.
    pub fn cancelled_at(&self) -> DateTime<Utc> {
        self.cancelled_at
    }

    /// The waitlisted reservation that took the vacated seat, if any.
    pub fn promoted(&self) -> Option<&Reservation> {
        self.promoted.as_ref()
    }
}

#[derive(serde::Serialize)]
struct PromotedReservation {
    reservation_id: ReservationId,
    user_id: UserId,
}

impl Serialize for CancellationOutcome {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut state = serializer.serialize_struct("CancellationOutcome", 4)?;
        state.serialize_field("reservation_id", &self.reservation_id())?;
        state.serialize_field("course_id", &self.course_id())?;
        state.serialize_field("cancelled_at", &self.cancelled_at)?;
        if let Some(promoted) = &self.promoted {
            state.serialize_field(
                "promoted_reservation",
                &PromotedReservation {
                    reservation_id: promoted.id(),
                    user_id: promoted.user_id(),
                },
            )?;
        }
        state.end()
    }
}
