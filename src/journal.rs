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

//! Ordered journal of committed allocation events.
//!
//! Events for a course are pushed while its lock is still held, so for any one
//! course the journal order is the commit order.

use crate::base::{CourseId, ReservationId, UserId};
use chrono::{DateTime, Utc};
use crossbeam::queue::SegQueue;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    /// New reservation took a seat.
    Confirmed,
    /// New reservation joined the waitlist.
    Waitlisted,
    Cancelled,
    /// Waitlisted reservation took a vacated seat.
    Promoted,
}

/// One committed state change.
///
/// Flat so it writes straight to CSV. `waitlist_position` is the position taken
/// (`Waitlisted`) or left (`Promoted`, `Cancelled` from the waitlist).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationEvent {
    pub kind: EventKind,
    pub reservation_id: ReservationId,
    pub course_id: CourseId,
    pub user_id: UserId,
    pub waitlist_position: Option<u32>,
    pub remaining_slots: Option<u32>,
    pub at: DateTime<Utc>,
}

/// Lock-free, append-only event log.
#[derive(Debug, Default)]
pub struct Journal {
    events: SegQueue<AllocationEvent>,
}

impl Journal {
    /// Creates an empty journal.
    pub fn new() -> Self {
        Self {
            events: SegQueue::new(),
        }
    }

    /// Appends an event.
    pub fn push(&self, event: AllocationEvent) {
        self.events.push(event);
    }

    /// Returns the number of undrained events.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Returns true if no events are waiting to be drained.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Removes and returns every event recorded so far, oldest first.
    pub fn drain(&self) -> Vec<AllocationEvent> {
        std::iter::from_fn(|| self.events.pop()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn event(kind: EventKind, id: u64) -> AllocationEvent {
        AllocationEvent {
            kind,
            reservation_id: ReservationId(id),
            course_id: CourseId(1),
            user_id: UserId(id as u32),
            waitlist_position: None,
            remaining_slots: None,
            at: Utc.with_ymd_and_hms(2026, 1, 7, 9, 0, 0).unwrap(),
        }
    }

    #[test]
    fn drain_preserves_insertion_order() {
        let journal = Journal::new();
        journal.push(event(EventKind::Confirmed, 1));
        journal.push(event(EventKind::Waitlisted, 2));
        journal.push(event(EventKind::Cancelled, 1));
        journal.push(event(EventKind::Promoted, 2));
        assert_eq!(journal.len(), 4);

        let kinds: Vec<EventKind> = journal.drain().into_iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![
                EventKind::Confirmed,
                EventKind::Waitlisted,
                EventKind::Cancelled,
                EventKind::Promoted,
            ]
        );
        assert!(journal.is_empty());
    }

    #[test]
    fn kind_serializes_lowercase() {
        let json = serde_json::to_string(&EventKind::Promoted).unwrap();
        assert_eq!(json, "\"promoted\"");
    }
}
