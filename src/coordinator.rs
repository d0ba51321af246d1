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

//! Allocation coordinator.
//!
//! The [`Coordinator`] runs the two mutating operations of the engine, reserve
//! and cancel, each as one transaction under the course-scoped lock:
//!
//! - **Reserve**: confirm a seat if one is free, otherwise append the user to
//!   the course waitlist.
//! - **Cancel**: release the reservation; a vacated seat goes to the head of the
//!   waitlist, and the waitlist is renumbered so positions stay `1..=N`.
//!
//! # Thread Safety
//!
//! Operations on the same course serialize on that course's lock; operations on
//! different courses run in parallel. Nothing is cached between operations:
//! counts and positions are always re-read under the lock.

use crate::base::{CourseId, ReservationId, UserId};
use crate::catalog::{self, CourseQuery, CourseSummary};
use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::course::{Course, CourseStatus};
use crate::journal::{AllocationEvent, EventKind, Journal};
use crate::outcome::{CancellationOutcome, ReservationOutcome};
use crate::reservation::Reservation;
use crate::store::{CourseStore, CourseTransaction};
use crate::ReservationError;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::info;

/// Seat allocation engine for a set of courses.
///
/// # Invariants
///
/// - Confirmed reservations per course never exceed its capacity.
/// - Waitlist positions per course are exactly `1..=N` for `N` waitlisted reservations.
/// - A user holds at most one confirmed or waitlisted reservation per course.
/// - Reservations are never deleted; cancelling is a status change.
pub struct Coordinator {
    store: CourseStore,
    clock: Arc<dyn Clock>,
    /// Present only when [`EngineConfig::journal`] is set.
    journal: Option<Journal>,
}

impl Coordinator {
    /// Creates an engine with default configuration and the system clock.
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    /// Creates an engine with the given configuration and the system clock.
    pub fn with_config(config: EngineConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Creates an engine that stamps reservations with `clock`.
    pub fn with_clock(config: EngineConfig, clock: Arc<dyn Clock>) -> Self {
        Coordinator {
            store: CourseStore::new(&config),
            clock,
            journal: config.journal.then(Journal::new),
        }
    }

    /// Registers a course.
    ///
    /// # Errors
    ///
    /// - [`ReservationError::DuplicateCourse`] - Course id is already registered.
    /// - [`ReservationError::InvalidCapacity`] - Capacity is zero.
    pub fn add_course(&self, course: Course) -> Result<(), ReservationError> {
        self.store.add_course(course)
    }

    /// Changes a course's status. Existing reservations are left untouched.
    pub fn set_course_status(
        &self,
        course_id: CourseId,
        status: CourseStatus,
    ) -> Result<Course, ReservationError> {
        self.store.set_course_status(course_id, status)
    }

    /// Changes a course's capacity. Raising it does not promote anyone; the
    /// freed seats go to whoever reserves next.
    ///
    /// # Errors
    ///
    /// [`ReservationError::InvalidCapacity`] if `capacity` is zero or lower than
    /// the number of confirmed seats.
    pub fn set_course_capacity(
        &self,
        course_id: CourseId,
        capacity: u32,
    ) -> Result<Course, ReservationError> {
        self.store.set_course_capacity(course_id, capacity)
    }

    /// Reserves a seat in `course_id` for `user_id`.
    ///
    /// | Course state | Result |
    /// |--------------|--------|
    /// | Seat free | Confirmed, with `remaining_slots` after this one |
    /// | Full | Waitlisted at `max(position) + 1` |
    ///
    /// # Errors
    ///
    /// - [`ReservationError::CourseNotFound`] - No such course.
    /// - [`ReservationError::CourseNotAvailable`] - Course is not open.
    /// - [`ReservationError::AlreadyReserved`] - User already holds an active reservation.
    /// - [`ReservationError::LockTimeout`] - Course lock not granted in time (retryable).
    pub fn reserve(
        &self,
        course_id: CourseId,
        user_id: UserId,
    ) -> Result<ReservationOutcome, ReservationError> {
        let slot = self.store.slot(course_id)?;
        let mut tx = self.store.begin(&slot)?;

        let course = tx.course();
        if !course.is_open() {
            return Err(ReservationError::CourseNotAvailable {
                course_id,
                status: course.status,
            });
        }
        let capacity = course.capacity;

        // Authoritative only because the course lock is held.
        if let Some(existing) = tx.active_for(user_id) {
            return Err(ReservationError::AlreadyReserved {
                reservation_id: existing.id(),
                status: existing.status(),
            });
        }

        let confirmed = tx.confirmed_count();
        let now = self.clock.now();
        let pending = tx.pending(user_id, now);

        let outcome = if confirmed < capacity {
            ReservationOutcome::confirmed(pending.confirm(), capacity - confirmed - 1)
        } else {
            let position = tx.max_waitlist_position() + 1;
            ReservationOutcome::waitlisted(pending.waitlist(position)?)
        };
        tx.insert(outcome.reservation().clone());

        let reservation = outcome.reservation();
        match outcome.remaining_slots() {
            Some(remaining_slots) => {
                info!(
                    reservation_id = %reservation.id(),
                    %user_id,
                    %course_id,
                    remaining_slots,
                    "reservation confirmed"
                );
                self.record(EventKind::Confirmed, reservation, None, Some(remaining_slots), now);
            }
            None => {
                info!(
                    reservation_id = %reservation.id(),
                    %user_id,
                    %course_id,
                    waitlist_position = ?reservation.waitlist_position(),
                    "course full, reservation waitlisted"
                );
                self.record(
                    EventKind::Waitlisted,
                    reservation,
                    reservation.waitlist_position(),
                    None,
                    now,
                );
            }
        }

        tx.commit();
        Ok(outcome)
    }

    /// Cancels a reservation on behalf of its owner.
    ///
    /// Cancelling a confirmed seat promotes the head of the waitlist (if any).
    /// Cancelling a waitlisted reservation closes its gap in the waitlist.
    ///
    /// # Errors
    ///
    /// - [`ReservationError::ReservationNotFound`] - No such reservation.
    /// - [`ReservationError::Unauthorized`] - `user_id` does not own it.
    /// - [`ReservationError::AlreadyCancelled`] - Already cancelled; nothing changes.
    /// - [`ReservationError::LockTimeout`] - Course lock not granted in time (retryable).
    pub fn cancel(
        &self,
        reservation_id: ReservationId,
        user_id: UserId,
    ) -> Result<CancellationOutcome, ReservationError> {
        // The course id of a reservation never changes, so it is safe to
        // resolve before taking the lock.
        let course_id = self.store.course_of(reservation_id)?;
        let slot = self.store.slot(course_id)?;
        let mut tx = self.store.begin(&slot)?;

        let reservation = tx
            .reservation(reservation_id)
            .ok_or(ReservationError::ReservationNotFound(reservation_id))?;
        if reservation.user_id() != user_id {
            return Err(ReservationError::Unauthorized(reservation_id));
        }
        if reservation.is_cancelled() {
            return Err(ReservationError::AlreadyCancelled(reservation_id));
        }
        let was_confirmed = reservation.is_confirmed();
        let original_position = reservation.waitlist_position();

        let now = self.clock.now();
        let cancelled = tx.update(reservation_id, |r| {
            r.cancel(now)?;
            Ok(r.clone())
        })?;

        let promoted = match original_position {
            _ if was_confirmed => Self::promote_first_waitlisted(&mut tx)?,
            Some(position) => {
                Self::renumber(&mut tx, position)?;
                None
            }
            None => None,
        };

        info!(
            %reservation_id,
            %user_id,
            %course_id,
            was_confirmed,
            "reservation cancelled"
        );
        self.record(EventKind::Cancelled, &cancelled, original_position, None, now);

        if let Some((promoted, previous_position)) = &promoted {
            info!(
                reservation_id = %promoted.id(),
                user_id = %promoted.user_id(),
                %course_id,
                previous_position,
                "waitlisted reservation promoted"
            );
            self.record(
                EventKind::Promoted,
                promoted,
                Some(*previous_position),
                None,
                now,
            );
        }

        tx.commit();
        Ok(CancellationOutcome::new(
            cancelled,
            now,
            promoted.map(|(reservation, _)| reservation),
        ))
    }

    /// Confirms the head of the waitlist and closes the gap it leaves.
    ///
    /// Returns the promoted reservation and the position it held.
    fn promote_first_waitlisted(
        tx: &mut CourseTransaction<'_>,
    ) -> Result<Option<(Reservation, u32)>, ReservationError> {
        let Some((head_id, previous_position)) = tx.waitlist_head() else {
            return Ok(None);
        };
        let promoted = tx.update(head_id, |r| {
            r.confirm()?;
            Ok(r.clone())
        })?;
        Self::renumber(tx, previous_position)?;
        Ok(Some((promoted, previous_position)))
    }

    /// Moves every waitlisted reservation behind `removed` one slot forward.
    fn renumber(tx: &mut CourseTransaction<'_>, removed: u32) -> Result<usize, ReservationError> {
        tx.update_where(
            |r| r.is_waitlisted() && r.waitlist_position().is_some_and(|p| p > removed),
            Reservation::advance,
        )
    }

    fn record(
        &self,
        kind: EventKind,
        reservation: &Reservation,
        waitlist_position: Option<u32>,
        remaining_slots: Option<u32>,
        at: DateTime<Utc>,
    ) {
        let Some(journal) = &self.journal else {
            return;
        };
        journal.push(AllocationEvent {
            kind,
            reservation_id: reservation.id(),
            course_id: reservation.course_id(),
            user_id: reservation.user_id(),
            waitlist_position,
            remaining_slots,
            at,
        });
    }

    /// Retrieves a course by id.
    pub fn course(&self, course_id: CourseId) -> Result<Course, ReservationError> {
        let slot = self.store.slot(course_id)?;
        self.store.read(&slot, |book| book.course().clone())
    }

    /// Retrieves a reservation by id, in whatever state it is now.
    pub fn reservation(&self, reservation_id: ReservationId) -> Result<Reservation, ReservationError> {
        let course_id = self.store.course_of(reservation_id)?;
        let slot = self.store.slot(course_id)?;
        self.store
            .read(&slot, |book| book.reservation(reservation_id).cloned())?
            .ok_or(ReservationError::ReservationNotFound(reservation_id))
    }

    /// Every reservation of a course, including cancelled ones, in creation order.
    pub fn course_reservations(&self, course_id: CourseId) -> Result<Vec<Reservation>, ReservationError> {
        let slot = self.store.slot(course_id)?;
        self.store
            .read(&slot, |book| book.reservations().cloned().collect())
    }

    /// Waitlisted reservations of a course, head first.
    pub fn waitlist(&self, course_id: CourseId) -> Result<Vec<Reservation>, ReservationError> {
        let slot = self.store.slot(course_id)?;
        self.store
            .read(&slot, |book| book.waitlist().into_iter().cloned().collect())
    }

    /// Every reservation of every course, ordered by course then creation.
    pub fn reservations(&self) -> Result<Vec<Reservation>, ReservationError> {
        let mut all = Vec::new();
        for slot in self.store.slots() {
            self.store
                .read(&slot, |book| all.extend(book.reservations().cloned()))?;
        }
        Ok(all)
    }

    /// Seat usage of one course, whatever its status.
    pub fn availability(&self, course_id: CourseId) -> Result<CourseSummary, ReservationError> {
        let slot = self.store.slot(course_id)?;
        self.store.read(&slot, CourseSummary::from_book)
    }

    /// Open courses matching `query`, with their seat usage.
    pub fn list_courses(&self, query: &CourseQuery) -> Result<Vec<CourseSummary>, ReservationError> {
        catalog::list_courses(&self.store, query)
    }

    /// Committed allocation events, in commit order per course. `None` unless
    /// the engine was configured with the journal on.
    pub fn journal(&self) -> Option<&Journal> {
        self.journal.as_ref()
    }
}

impl Default for Coordinator {
    fn default() -> Self {
        Self::new()
    }
}
