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

//! Error types for reservation processing.

use crate::base::{CourseId, ReservationId};
use crate::course::CourseStatus;
use crate::reservation::ReservationStatus;
use thiserror::Error;

/// Broad category of a [`ReservationError`], used by adapters to pick a
/// user-facing status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A referenced course or reservation does not exist.
    NotFound,
    /// A business precondition does not hold.
    Conflict,
    /// The caller does not own the reservation.
    Forbidden,
    /// The store could not serve the request right now. Safe to retry.
    Transient,
    /// The request or an internal transition is malformed.
    Invalid,
}

/// Reservation processing errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReservationError {
    /// No course exists with the given id
    #[error("course {0} not found")]
    CourseNotFound(CourseId),

    /// Course exists but is not accepting reservations
    #[error("course {course_id} is not open for reservations (status: {status})")]
    CourseNotAvailable {
        course_id: CourseId,
        status: CourseStatus,
    },

    /// User already holds an active reservation for the course
    #[error("user already holds reservation {reservation_id} for this course ({status})")]
    AlreadyReserved {
        reservation_id: ReservationId,
        status: ReservationStatus,
    },

    /// No reservation exists with the given id
    #[error("reservation {0} not found")]
    ReservationNotFound(ReservationId),

    /// Reservation belongs to a different user
    #[error("not permitted to modify reservation {0}")]
    Unauthorized(ReservationId),

    /// Reservation has already been cancelled
    #[error("reservation {0} is already cancelled")]
    AlreadyCancelled(ReservationId),

    /// Ledger transition not permitted from the current status
    #[error("cannot move reservation from {from} to {to}")]
    InvalidTransition {
        from: ReservationStatus,
        to: ReservationStatus,
    },

    /// Waitlist positions start at 1
    #[error("invalid waitlist position {0}")]
    InvalidWaitlistPosition(u32),

    /// Course lock was not granted within the configured timeout
    #[error("timed out waiting for the lock on course {0}")]
    LockTimeout(CourseId),

    /// Course id is already registered
    #[error("course {0} already exists")]
    DuplicateCourse(CourseId),

    /// Capacity is zero or below the confirmed seat count
    #[error("invalid capacity {capacity} for course {course_id}")]
    InvalidCapacity { course_id: CourseId, capacity: u32 },
}

impl ReservationError {
    /// Classifies the error for callers that map it to a response.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::CourseNotFound(_) | Self::ReservationNotFound(_) => ErrorKind::NotFound,
            Self::CourseNotAvailable { .. }
            | Self::AlreadyReserved { .. }
            | Self::AlreadyCancelled(_)
            | Self::DuplicateCourse(_) => ErrorKind::Conflict,
            Self::Unauthorized(_) => ErrorKind::Forbidden,
            Self::LockTimeout(_) => ErrorKind::Transient,
            Self::InvalidTransition { .. }
            | Self::InvalidWaitlistPosition(_)
            | Self::InvalidCapacity { .. } => ErrorKind::Invalid,
        }
    }

    /// Whether the caller may retry the same request unchanged.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }
}
