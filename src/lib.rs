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

//! # Course Booking
//!
//! This library provides a seat allocation engine for finite-capacity course
//! sessions: confirmed seats, strictly ordered waitlists, and automatic
//! promotion when a confirmed seat is released.
//!
//! ## Core Components
//!
//! - [`Coordinator`]: Runs reserve and cancel as atomic, course-locked operations
//! - [`Reservation`]: Record-level state machine (confirmed, waitlisted, cancelled)
//! - [`Course`]: Course session with capacity and status
//! - [`ReservationError`]: Error types for reservation processing failures
//!
//! ## Example
//!
//! ```
//! use chrono::Utc;
//! use course_booking_rs::{Coordinator, Course, CourseId, ReservationStatus, UserId};
//!
//! let coordinator = Coordinator::new();
//! coordinator
//!     .add_course(Course::new(CourseId(1), "Intro to Rust", 1, Utc::now()))
//!     .unwrap();
//!
//! // First user takes the only seat
//! let first = coordinator.reserve(CourseId(1), UserId(10)).unwrap();
//! assert_eq!(first.remaining_slots(), Some(0));
//!
//! // Second user is waitlisted
//! let second = coordinator.reserve(CourseId(1), UserId(20)).unwrap();
//! assert_eq!(second.waitlist_position(), Some(1));
//!
//! // Cancelling the seat promotes the waitlisted user
//! let cancelled = coordinator.cancel(first.reservation_id(), UserId(10)).unwrap();
//! let promoted = cancelled.promoted().unwrap();
//! assert_eq!(promoted.user_id(), UserId(20));
//! assert_eq!(promoted.status(), ReservationStatus::Confirmed);
//! ```
//!
//! ## Thread Safety
//!
//! Each course has its own lock. Operations on the same course are serialized,
//! so two concurrent reserves can never both take the last seat, while
//! operations on different courses run in parallel.

mod base;
pub mod catalog;
mod clock;
mod config;
mod coordinator;
mod course;
pub mod error;
pub mod journal;
mod outcome;
pub mod reservation;
mod store;

pub use base::{CourseId, ReservationId, UserId};
pub use catalog::{CourseQuery, CourseSummary, SortField, SortOrder};
pub use clock::{Clock, FixedClock, SystemClock};
pub use config::{EngineConfig, JOURNAL_ENV, LOCK_TIMEOUT_ENV};
pub use coordinator::Coordinator;
pub use course::{Course, CourseStatus};
pub use error::{ErrorKind, ReservationError};
pub use journal::{AllocationEvent, EventKind, Journal};
pub use outcome::{CancellationOutcome, ReservationOutcome};
pub use reservation::{PendingReservation, Reservation, ReservationStatus};
