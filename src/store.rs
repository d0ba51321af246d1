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

//! Embedded transactional store for courses and their reservations.
//!
//! Every course lives in its own [`CourseSlot`] behind a [`parking_lot::Mutex`].
//! Holding that mutex is the course-scoped lock: all reads that feed a decision
//! and all writes for one course happen while it is held, so operations on the
//! same course are linearized and operations on different courses never touch
//! the same lock.
//!
//! Writes go through a [`CourseTransaction`], which keeps an undo log. A
//! transaction that is dropped without [`commit`](CourseTransaction::commit)
//! restores every reservation it touched before the lock is released, so no
//! other operation can observe a partial promotion or renumber.

use crate::ReservationError;
use crate::base::{CourseId, ReservationId, UserId};
use crate::config::EngineConfig;
use crate::course::{Course, CourseStatus};
use crate::reservation::{PendingReservation, Reservation};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::{Mutex, MutexGuard};
use std::collections::BTreeMap;
use std::ops::Deref;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

/// A course together with every reservation ever made against it.
#[derive(Debug)]
pub(crate) struct CourseBook {
    course: Course,
    /// Keyed by id, which is also creation order.
    reservations: BTreeMap<ReservationId, Reservation>,
}

impl CourseBook {
    fn new(course: Course) -> Self {
        Self {
            course,
            reservations: BTreeMap::new(),
        }
    }

    pub(crate) fn course(&self) -> &Course {
        &self.course
    }

    pub(crate) fn reservation(&self, id: ReservationId) -> Option<&Reservation> {
        self.reservations.get(&id)
    }

    pub(crate) fn reservations(&self) -> impl Iterator<Item = &Reservation> {
        self.reservations.values()
    }

    /// The user's confirmed or waitlisted reservation, if any.
    pub(crate) fn active_for(&self, user_id: UserId) -> Option<&Reservation> {
        self.reservations
            .values()
            .find(|r| r.user_id() == user_id && r.is_active())
    }

    pub(crate) fn confirmed_count(&self) -> u32 {
        self.count_where(Reservation::is_confirmed)
    }

    pub(crate) fn waitlisted_count(&self) -> u32 {
        self.count_where(Reservation::is_waitlisted)
    }

    /// Highest waitlist position currently held, `0` when nobody is waiting.
    pub(crate) fn max_waitlist_position(&self) -> u32 {
        self.reservations
            .values()
            .filter_map(Reservation::waitlist_position)
            .max()
            .unwrap_or(0)
    }

    /// Id and position of the waitlisted reservation with the lowest position.
    pub(crate) fn waitlist_head(&self) -> Option<(ReservationId, u32)> {
        self.reservations
            .values()
            .filter(|r| r.is_waitlisted())
            .filter_map(|r| r.waitlist_position().map(|position| (position, r.id())))
            .min()
            .map(|(position, id)| (id, position))
    }

    /// Waitlisted reservations ordered by position.
    pub(crate) fn waitlist(&self) -> Vec<&Reservation> {
        let mut waitlist: Vec<&Reservation> = self
            .reservations
            .values()
            .filter(|r| r.is_waitlisted())
            .collect();
        waitlist.sort_by_key(|r| r.waitlist_position());
        waitlist
    }

    fn count_where(&self, predicate: impl Fn(&Reservation) -> bool) -> u32 {
        let count = self.reservations.values().filter(|r| predicate(r)).count();
        u32::try_from(count).unwrap_or(u32::MAX)
    }

    fn assert_invariants(&self) {
        debug_assert!(
            self.confirmed_count() <= self.course.capacity,
            "Invariant violated: course {} has {} confirmed seats for capacity {}",
            self.course.id,
            self.confirmed_count(),
            self.course.capacity
        );
        if cfg!(debug_assertions) {
            let positions: Vec<u32> = self
                .waitlist()
                .iter()
                .filter_map(|r| r.waitlist_position())
                .collect();
            let expected: Vec<u32> = (1..=self.waitlisted_count()).collect();
            debug_assert_eq!(
                positions, expected,
                "Invariant violated: waitlist of course {} is not dense",
                self.course.id
            );
        }
    }
}

/// Lock-protected home of one course.
#[derive(Debug)]
pub(crate) struct CourseSlot {
    course_id: CourseId,
    book: Mutex<CourseBook>,
}

impl CourseSlot {
    fn lock(&self, timeout: Option<Duration>) -> Result<MutexGuard<'_, CourseBook>, ReservationError> {
        let guard = match timeout {
            Some(timeout) => self.book.try_lock_for(timeout).ok_or_else(|| {
                warn!(course_id = %self.course_id, ?timeout, "course lock wait timed out");
                ReservationError::LockTimeout(self.course_id)
            })?,
            None => self.book.lock(),
        };
        debug!(course_id = %self.course_id, "course lock acquired");
        Ok(guard)
    }
}

/// All courses known to the engine plus the reservation id index.
#[derive(Debug)]
pub(crate) struct CourseStore {
    courses: DashMap<CourseId, Arc<CourseSlot>>,
    /// Reservation id to owning course. Only committed reservations appear here.
    index: DashMap<ReservationId, CourseId>,
    next_reservation_id: AtomicU64,
    lock_timeout: Option<Duration>,
}

impl CourseStore {
    pub(crate) fn new(config: &EngineConfig) -> Self {
        Self {
            courses: DashMap::new(),
            index: DashMap::new(),
            next_reservation_id: AtomicU64::new(1),
            lock_timeout: config.lock_timeout(),
        }
    }

    /// # Errors
    ///
    /// - [`ReservationError::InvalidCapacity`] - Capacity is zero.
    /// - [`ReservationError::DuplicateCourse`] - Course id is already registered.
    pub(crate) fn add_course(&self, course: Course) -> Result<(), ReservationError> {
        if course.capacity == 0 {
            return Err(ReservationError::InvalidCapacity {
                course_id: course.id,
                capacity: course.capacity,
            });
        }

        // Entry API keeps check-and-insert atomic against concurrent registration.
        match self.courses.entry(course.id) {
            Entry::Occupied(_) => Err(ReservationError::DuplicateCourse(course.id)),
            Entry::Vacant(entry) => {
                entry.insert(Arc::new(CourseSlot {
                    course_id: course.id,
                    book: Mutex::new(CourseBook::new(course)),
                }));
                Ok(())
            }
        }
    }

    /// Looks up a course slot. The shard guard is released before returning
    /// so callers never hold a map lock while waiting on a course lock.
    pub(crate) fn slot(&self, course_id: CourseId) -> Result<Arc<CourseSlot>, ReservationError> {
        self.courses
            .get(&course_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(ReservationError::CourseNotFound(course_id))
    }

    /// Every course slot, ordered by course id.
    pub(crate) fn slots(&self) -> Vec<Arc<CourseSlot>> {
        let mut slots: Vec<Arc<CourseSlot>> = self
            .courses
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        slots.sort_by_key(|slot| slot.course_id);
        slots
    }

    pub(crate) fn course_of(&self, reservation_id: ReservationId) -> Result<CourseId, ReservationError> {
        self.index
            .get(&reservation_id)
            .map(|entry| *entry.value())
            .ok_or(ReservationError::ReservationNotFound(reservation_id))
    }

    /// Opens a transaction on `slot`, blocking until its course lock is granted
    /// or the configured timeout expires.
    pub(crate) fn begin<'a>(
        &'a self,
        slot: &'a CourseSlot,
    ) -> Result<CourseTransaction<'a>, ReservationError> {
        Ok(CourseTransaction {
            store: self,
            book: slot.lock(self.lock_timeout)?,
            undo: Vec::new(),
            committed: false,
        })
    }

    /// Runs `f` against a consistent snapshot of one course.
    pub(crate) fn read<T>(
        &self,
        slot: &CourseSlot,
        f: impl FnOnce(&CourseBook) -> T,
    ) -> Result<T, ReservationError> {
        let book = slot.lock(self.lock_timeout)?;
        Ok(f(&book))
    }

    pub(crate) fn set_course_status(
        &self,
        course_id: CourseId,
        status: CourseStatus,
    ) -> Result<Course, ReservationError> {
        let slot = self.slot(course_id)?;
        let mut book = slot.lock(self.lock_timeout)?;
        book.course.status = status;
        Ok(book.course.clone())
    }

    /// # Errors
    ///
    /// [`ReservationError::InvalidCapacity`] if `capacity` is zero or below the
    /// number of confirmed seats.
    pub(crate) fn set_course_capacity(
        &self,
        course_id: CourseId,
        capacity: u32,
    ) -> Result<Course, ReservationError> {
        let slot = self.slot(course_id)?;
        let mut book = slot.lock(self.lock_timeout)?;
        if capacity == 0 || capacity < book.confirmed_count() {
            return Err(ReservationError::InvalidCapacity { course_id, capacity });
        }
        book.course.capacity = capacity;
        Ok(book.course.clone())
    }

    fn next_reservation_id(&self) -> ReservationId {
        ReservationId(self.next_reservation_id.fetch_add(1, Ordering::Relaxed))
    }
}

/// Prior state needed to reverse one write.
#[derive(Debug)]
enum Undo {
    Inserted(ReservationId),
    Updated(Reservation),
}

/// Write access to one course while its lock is held.
///
/// Dereferences to the course book for reads. Dropping the transaction
/// without calling [`commit`](Self::commit) rolls back.
pub(crate) struct CourseTransaction<'a> {
    store: &'a CourseStore,
    book: MutexGuard<'a, CourseBook>,
    undo: Vec<Undo>,
    committed: bool,
}

impl CourseTransaction<'_> {
    /// Allocates the next reservation id for a new record in this course.
    pub(crate) fn pending(&self, user_id: UserId, reserved_at: DateTime<Utc>) -> PendingReservation {
        Reservation::pending(
            self.store.next_reservation_id(),
            self.book.course.id,
            user_id,
            reserved_at,
        )
    }

    pub(crate) fn insert(&mut self, reservation: Reservation) {
        debug_assert_eq!(reservation.course_id(), self.book.course.id);
        let id = reservation.id();
        self.undo.push(Undo::Inserted(id));
        self.book.reservations.insert(id, reservation);
    }

    /// Applies `f` to one reservation. A failing `f` leaves the record as it was.
    pub(crate) fn update<T>(
        &mut self,
        id: ReservationId,
        f: impl FnOnce(&mut Reservation) -> Result<T, ReservationError>,
    ) -> Result<T, ReservationError> {
        let reservation = self
            .book
            .reservations
            .get_mut(&id)
            .ok_or(ReservationError::ReservationNotFound(id))?;
        let before = reservation.clone();
        match f(&mut *reservation) {
            Ok(value) => {
                self.undo.push(Undo::Updated(before));
                Ok(value)
            }
            Err(e) => {
                *reservation = before;
                Err(e)
            }
        }
    }

    /// Applies `f` to every reservation matching `filter` in a single pass.
    ///
    /// Returns how many records were changed. On error, records already changed
    /// stay in the undo log and are restored when the transaction is dropped.
    pub(crate) fn update_where(
        &mut self,
        filter: impl Fn(&Reservation) -> bool,
        f: impl Fn(&mut Reservation) -> Result<(), ReservationError>,
    ) -> Result<usize, ReservationError> {
        let mut changed = 0;
        for reservation in self.book.reservations.values_mut().filter(|r| filter(r)) {
            let before = reservation.clone();
            if let Err(e) = f(&mut *reservation) {
                *reservation = before;
                return Err(e);
            }
            self.undo.push(Undo::Updated(before));
            changed += 1;
        }
        Ok(changed)
    }

    /// Makes every write visible and publishes new reservation ids.
    pub(crate) fn commit(mut self) {
        self.book.assert_invariants();
        let course_id = self.book.course.id;
        for entry in &self.undo {
            if let Undo::Inserted(id) = entry {
                self.store.index.insert(*id, course_id);
            }
        }
        debug!(%course_id, writes = self.undo.len(), "transaction committed");
        self.committed = true;
    }
}

impl Deref for CourseTransaction<'_> {
    type Target = CourseBook;

    fn deref(&self) -> &CourseBook {
        &self.book
    }
}

impl Drop for CourseTransaction<'_> {
    fn drop(&mut self) {
        if self.committed || self.undo.is_empty() {
            return;
        }
        debug!(
            course_id = %self.book.course.id,
            writes = self.undo.len(),
            "rolling back transaction"
        );
        // Newest first, so a record updated twice ends at its oldest state.
        while let Some(entry) = self.undo.pop() {
            match entry {
                Undo::Inserted(id) => {
                    self.book.reservations.remove(&id);
                }
                Undo::Updated(before) => {
                    self.book.reservations.insert(before.id(), before);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::thread;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 1, 8, 0, 0).unwrap()
    }

    fn store_with_course(capacity: u32) -> CourseStore {
        let store = CourseStore::new(&EngineConfig::default().with_lock_timeout_ms(50));
        store
            .add_course(Course::new(CourseId(1), "Rust", capacity, at()))
            .unwrap();
        store
    }

    #[test]
    fn add_course_rejects_duplicates_and_zero_capacity() {
        let store = store_with_course(2);
        assert_eq!(
            store.add_course(Course::new(CourseId(1), "Again", 2, at())),
            Err(ReservationError::DuplicateCourse(CourseId(1)))
        );
        assert_eq!(
            store.add_course(Course::new(CourseId(2), "Empty", 0, at())),
            Err(ReservationError::InvalidCapacity {
                course_id: CourseId(2),
                capacity: 0,
            })
        );
    }

    #[test]
    fn unknown_course_and_reservation_are_reported() {
        let store = store_with_course(1);
        assert!(matches!(
            store.slot(CourseId(9)),
            Err(ReservationError::CourseNotFound(CourseId(9)))
        ));
        assert_eq!(
            store.course_of(ReservationId(42)),
            Err(ReservationError::ReservationNotFound(ReservationId(42)))
        );
    }

    #[test]
    fn commit_publishes_new_reservations() {
        let store = store_with_course(2);
        let slot = store.slot(CourseId(1)).unwrap();

        let mut tx = store.begin(&slot).unwrap();
        let reservation = tx.pending(UserId(5), at()).confirm();
        let id = reservation.id();
        tx.insert(reservation);
        tx.commit();

        assert_eq!(store.course_of(id), Ok(CourseId(1)));
        let confirmed = store.read(&slot, CourseBook::confirmed_count).unwrap();
        assert_eq!(confirmed, 1);
    }

    #[test]
    fn dropped_transaction_rolls_back_every_write() {
        let store = store_with_course(2);
        let slot = store.slot(CourseId(1)).unwrap();

        let mut tx = store.begin(&slot).unwrap();
        let first = tx.pending(UserId(1), at()).confirm();
        let first_id = first.id();
        tx.insert(first);
        let waiting = tx.pending(UserId(2), at()).waitlist(1).unwrap();
        tx.insert(waiting);
        tx.commit();

        let mut tx = store.begin(&slot).unwrap();
        tx.update(first_id, |r| r.cancel(at())).unwrap();
        let extra = tx.pending(UserId(3), at()).confirm();
        let extra_id = extra.id();
        tx.insert(extra);
        drop(tx);

        let (first, extra, confirmed) = store
            .read(&slot, |book| {
                (
                    book.reservation(first_id).cloned(),
                    book.reservation(extra_id).cloned(),
                    book.confirmed_count(),
                )
            })
            .unwrap();
        assert!(first.unwrap().is_confirmed());
        assert!(extra.is_none());
        assert_eq!(confirmed, 1);
        assert!(store.course_of(extra_id).is_err());
    }

    #[test]
    fn failed_update_leaves_record_unchanged() {
        let store = store_with_course(1);
        let slot = store.slot(CourseId(1)).unwrap();

        let mut tx = store.begin(&slot).unwrap();
        let reservation = tx.pending(UserId(1), at()).confirm();
        let id = reservation.id();
        tx.insert(reservation);

        let result = tx.update(id, |r| r.confirm());
        assert!(matches!(
            result,
            Err(ReservationError::InvalidTransition { .. })
        ));
        assert!(tx.reservation(id).unwrap().is_confirmed());
        tx.commit();
    }

    #[test]
    fn update_where_failure_is_undone_on_drop() {
        let store = store_with_course(1);
        let slot = store.slot(CourseId(1)).unwrap();

        // Inserted tail first, so the head is visited last by `update_where`.
        let mut tx = store.begin(&slot).unwrap();
        for (user, position) in [(1, 3), (2, 2), (3, 1)] {
            let reservation = tx.pending(UserId(user), at()).waitlist(position).unwrap();
            tx.insert(reservation);
        }
        tx.commit();

        let mut tx = store.begin(&slot).unwrap();
        let result = tx.update_where(Reservation::is_waitlisted, Reservation::advance);
        assert!(result.is_err());
        drop(tx);

        let positions: Vec<Option<u32>> = store
            .read(&slot, |book| {
                book.waitlist().iter().map(|r| r.waitlist_position()).collect()
            })
            .unwrap();
        assert_eq!(positions, vec![Some(1), Some(2), Some(3)]);
    }

    #[test]
    fn held_lock_times_out_as_retryable() {
        let store = Arc::new(store_with_course(1));
        let slot = store.slot(CourseId(1)).unwrap();
        let tx = store.begin(&slot).unwrap();

        let contender = {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                let slot = store.slot(CourseId(1)).unwrap();
                store.begin(&slot).map(|_| ())
            })
        };
        let result = contender.join().unwrap();
        drop(tx);

        assert_eq!(result, Err(ReservationError::LockTimeout(CourseId(1))));
        assert!(result.unwrap_err().is_retryable());
    }

    #[test]
    fn capacity_cannot_drop_below_confirmed_seats() {
        let store = store_with_course(3);
        let slot = store.slot(CourseId(1)).unwrap();
        let mut tx = store.begin(&slot).unwrap();
        for user in 1..=2 {
            let reservation = tx.pending(UserId(user), at()).confirm();
            tx.insert(reservation);
        }
        tx.commit();

        assert_eq!(
            store.set_course_capacity(CourseId(1), 1),
            Err(ReservationError::InvalidCapacity {
                course_id: CourseId(1),
                capacity: 1,
            })
        );
        assert_eq!(store.set_course_capacity(CourseId(1), 2).unwrap().capacity, 2);
    }

    #[test]
    fn status_changes_are_visible_to_readers() {
        let store = store_with_course(3);
        let course = store
            .set_course_status(CourseId(1), CourseStatus::Closed)
            .unwrap();
        assert_eq!(course.status, CourseStatus::Closed);

        let slot = store.slot(CourseId(1)).unwrap();
        let status = store.read(&slot, |book| book.course().status).unwrap();
        assert_eq!(status, CourseStatus::Closed);
    }
}
