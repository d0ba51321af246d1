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

//! Reservation ledger.
//!
//! Holds the record-level state machine for a single reservation. Nothing in
//! here looks at sibling reservations; capacity and waitlist ordering are the
//! coordinator's job.
//!
//! # Example
//!
//! ```
//! use chrono::Utc;
//! use course_booking_rs::{CourseId, Reservation, ReservationId, ReservationStatus, UserId};
//!
//! let now = Utc::now();
//! let mut reservation =
//!     Reservation::pending(ReservationId(1), CourseId(1), UserId(7), now).waitlist(1)?;
//! assert_eq!(reservation.waitlist_position(), Some(1));
//!
//! reservation.confirm()?;
//! assert_eq!(reservation.status(), ReservationStatus::Confirmed);
//! assert_eq!(reservation.waitlist_position(), None);
//! # Ok::<(), course_booking_rs::ReservationError>(())
//! ```

use crate::ReservationError;
use crate::base::{CourseId, ReservationId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

//  (new) ──confirm──────────────────────────► Confirmed ──cancel──► Cancelled
//    │                                            ▲
//    └──waitlist(p)──► Waitlisted ──confirm───────┘
//                          │
//                          └──cancel──► Cancelled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReservationStatus {
    Confirmed,
    Waitlisted,
    Cancelled,
}

impl ReservationStatus {
    /// Active reservations block the user from reserving the same course again.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Confirmed | Self::Waitlisted)
    }
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Confirmed => "confirmed",
            Self::Waitlisted => "waitlisted",
            Self::Cancelled => "cancelled",
        };
        f.write_str(label)
    }
}

/// A reservation that has been allocated an id but not yet placed.
///
/// The only ways out are [`confirm`](Self::confirm) and
/// [`waitlist`](Self::waitlist).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingReservation {
    id: ReservationId,
    course_id: CourseId,
    user_id: UserId,
    reserved_at: DateTime<Utc>,
}

impl PendingReservation {
    /// Places the reservation on a confirmed seat.
    pub fn confirm(self) -> Reservation {
        self.place(ReservationStatus::Confirmed, None)
    }

    /// Places the reservation on the waitlist at `position`.
    ///
    /// # Errors
    ///
    /// [`ReservationError::InvalidWaitlistPosition`] if `position` is zero.
    pub fn waitlist(self, position: u32) -> Result<Reservation, ReservationError> {
        if position == 0 {
            return Err(ReservationError::InvalidWaitlistPosition(position));
        }
        Ok(self.place(ReservationStatus::Waitlisted, Some(position)))
    }

    fn place(self, status: ReservationStatus, waitlist_position: Option<u32>) -> Reservation {
        let reservation = Reservation {
            id: self.id,
            course_id: self.course_id,
            user_id: self.user_id,
            status,
            waitlist_position,
            reserved_at: self.reserved_at,
            cancelled_at: None,
        };
        reservation.assert_invariants();
        reservation
    }
}

/// A user's claim on a seat (or waitlist slot) in a course.
///
/// Only built through [`PendingReservation`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reservation {
    #[serde(rename = "reservation_id")]
    id: ReservationId,
    course_id: CourseId,
    user_id: UserId,
    status: ReservationStatus,
    waitlist_position: Option<u32>,
    reserved_at: DateTime<Utc>,
    cancelled_at: Option<DateTime<Utc>>,
}

impl Reservation {
    /// Starts a new reservation that must be confirmed or waitlisted next.
    pub fn pending(
        id: ReservationId,
        course_id: CourseId,
        user_id: UserId,
        reserved_at: DateTime<Utc>,
    ) -> PendingReservation {
        PendingReservation {
            id,
            course_id,
            user_id,
            reserved_at,
        }
    }

    /// Returns the reservation id.
    pub fn id(&self) -> ReservationId {
        self.id
    }

    /// Returns the course this reservation belongs to.
    pub fn course_id(&self) -> CourseId {
        self.course_id
    }

    /// Returns the user holding this reservation.
    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    /// Returns the current status.
    pub fn status(&self) -> ReservationStatus {
        self.status
    }

    /// Present only while the reservation is waitlisted.
    pub fn waitlist_position(&self) -> Option<u32> {
        self.waitlist_position
    }

    /// Returns when the reservation was made.
    pub fn reserved_at(&self) -> DateTime<Utc> {
        self.reserved_at
    }

    /// Present only once the reservation is cancelled.
    pub fn cancelled_at(&self) -> Option<DateTime<Utc>> {
        self.cancelled_at
    }

    /// Returns true while confirmed or waitlisted.
    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    /// Returns true if the reservation holds a seat.
    pub fn is_confirmed(&self) -> bool {
        self.status == ReservationStatus::Confirmed
    }

    /// Returns true if the reservation is queued for a seat.
    pub fn is_waitlisted(&self) -> bool {
        self.status == ReservationStatus::Waitlisted
    }

    /// Returns true once the reservation is cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.status == ReservationStatus::Cancelled
    }

    /// Promotes a waitlisted reservation to a confirmed seat.
    ///
    /// # Errors
    ///
    /// [`ReservationError::InvalidTransition`] unless the reservation is waitlisted.
    pub fn confirm(&mut self) -> Result<(), ReservationError> {
        if self.status != ReservationStatus::Waitlisted {
            return Err(ReservationError::InvalidTransition {
                from: self.status,
                to: ReservationStatus::Confirmed,
            });
        }
        self.status = ReservationStatus::Confirmed;
        self.waitlist_position = None;
        self.assert_invariants();
        Ok(())
    }

    /// Cancels the reservation at `at`, releasing its seat or waitlist slot.
    ///
    /// # Errors
    ///
    /// [`ReservationError::AlreadyCancelled`] if the reservation is already cancelled.
    pub fn cancel(&mut self, at: DateTime<Utc>) -> Result<(), ReservationError> {
        if self.status == ReservationStatus::Cancelled {
            return Err(ReservationError::AlreadyCancelled(self.id));
        }
        self.status = ReservationStatus::Cancelled;
        self.waitlist_position = None;
        self.cancelled_at = Some(at);
        self.assert_invariants();
        Ok(())
    }

    /// Moves a waitlisted reservation one slot towards the head of the queue.
    ///
    /// # Errors
    ///
    /// [`ReservationError::InvalidTransition`] if not waitlisted,
    /// [`ReservationError::InvalidWaitlistPosition`] if already at the head.
    pub(crate) fn advance(&mut self) -> Result<(), ReservationError> {
        match self.waitlist_position {
            Some(position) if self.status == ReservationStatus::Waitlisted => {
                if position <= 1 {
                    return Err(ReservationError::InvalidWaitlistPosition(position));
                }
                self.waitlist_position = Some(position - 1);
                Ok(())
            }
            _ => Err(ReservationError::InvalidTransition {
                from: self.status,
                to: ReservationStatus::Waitlisted,
            }),
        }
    }

    fn assert_invariants(&self) {
        debug_assert_eq!(
            self.status == ReservationStatus::Waitlisted,
            self.waitlist_position.is_some(),
            "Invariant violated: reservation {} is {} with position {:?}",
            self.id,
            self.status,
            self.waitlist_position
        );
        debug_assert_eq!(
            self.status == ReservationStatus::Cancelled,
            self.cancelled_at.is_some(),
            "Invariant violated: reservation {} is {} with cancelled_at {:?}",
            self.id,
            self.status,
            self.cancelled_at
        );
        debug_assert_ne!(
            self.waitlist_position,
            Some(0),
            "Invariant violated: waitlist positions start at 1"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 7, hour, 0, 0).unwrap()
    }

    fn pending() -> PendingReservation {
        Reservation::pending(ReservationId(1), CourseId(10), UserId(100), at(9))
    }

    #[test]
    fn pending_confirm_has_no_position() {
        let reservation = pending().confirm();
        assert_eq!(reservation.status(), ReservationStatus::Confirmed);
        assert_eq!(reservation.waitlist_position(), None);
        assert_eq!(reservation.reserved_at(), at(9));
        assert_eq!(reservation.cancelled_at(), None);
    }

    #[test]
    fn pending_waitlist_records_position() {
        let reservation = pending().waitlist(3).unwrap();
        assert_eq!(reservation.status(), ReservationStatus::Waitlisted);
        assert_eq!(reservation.waitlist_position(), Some(3));
    }

    #[test]
    fn waitlist_rejects_position_zero() {
        assert_eq!(
            pending().waitlist(0),
            Err(ReservationError::InvalidWaitlistPosition(0))
        );
    }

    #[test]
    fn confirm_from_waitlist_clears_position() {
        let mut reservation = pending().waitlist(1).unwrap();
        reservation.confirm().unwrap();
        assert!(reservation.is_confirmed());
        assert_eq!(reservation.waitlist_position(), None);
    }

    #[test]
    fn confirm_twice_is_rejected() {
        let mut reservation = pending().confirm();
        assert_eq!(
            reservation.confirm(),
            Err(ReservationError::InvalidTransition {
                from: ReservationStatus::Confirmed,
                to: ReservationStatus::Confirmed,
            })
        );
    }

    #[test]
    fn cancelled_cannot_be_confirmed() {
        let mut reservation = pending().waitlist(2).unwrap();
        reservation.cancel(at(10)).unwrap();
        assert_eq!(
            reservation.confirm(),
            Err(ReservationError::InvalidTransition {
                from: ReservationStatus::Cancelled,
                to: ReservationStatus::Confirmed,
            })
        );
    }

    #[test]
    fn cancel_sets_timestamp_and_clears_position() {
        let mut reservation = pending().waitlist(4).unwrap();
        reservation.cancel(at(11)).unwrap();
        assert!(reservation.is_cancelled());
        assert!(!reservation.is_active());
        assert_eq!(reservation.waitlist_position(), None);
        assert_eq!(reservation.cancelled_at(), Some(at(11)));
    }

    #[test]
    fn cancel_twice_leaves_record_untouched() {
        let mut reservation = pending().confirm();
        reservation.cancel(at(11)).unwrap();
        let snapshot = reservation.clone();

        assert_eq!(
            reservation.cancel(at(12)),
            Err(ReservationError::AlreadyCancelled(ReservationId(1)))
        );
        assert_eq!(reservation, snapshot);
    }

    #[test]
    fn active_statuses() {
        assert!(ReservationStatus::Confirmed.is_active());
        assert!(ReservationStatus::Waitlisted.is_active());
        assert!(!ReservationStatus::Cancelled.is_active());
    }

    #[test]
    fn advance_moves_towards_head() {
        let mut reservation = pending().waitlist(3).unwrap();
        reservation.advance().unwrap();
        assert_eq!(reservation.waitlist_position(), Some(2));
    }

    #[test]
    fn advance_rejects_head_and_non_waitlisted() {
        let mut head = pending().waitlist(1).unwrap();
        assert_eq!(
            head.advance(),
            Err(ReservationError::InvalidWaitlistPosition(1))
        );
        assert_eq!(head.waitlist_position(), Some(1));

        let mut corrupt = pending().waitlist(1).unwrap();
        corrupt.waitlist_position = Some(0);
        assert_eq!(
            corrupt.advance(),
            Err(ReservationError::InvalidWaitlistPosition(0))
        );
        assert_eq!(corrupt.waitlist_position(), Some(0));

        let mut confirmed = pending().confirm();
        assert!(matches!(
            confirmed.advance(),
            Err(ReservationError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn serializes_with_reservation_id_field() {
        let reservation = pending().waitlist(2).unwrap();
        let parsed: serde_json::Value = serde_json::to_value(&reservation).unwrap();
        assert_eq!(parsed["reservation_id"], 1);
        assert_eq!(parsed["course_id"], 10);
        assert_eq!(parsed["user_id"], 100);
        assert_eq!(parsed["status"], "waitlisted");
        assert_eq!(parsed["waitlist_position"], 2);
        assert!(parsed["cancelled_at"].is_null());
    }
}
