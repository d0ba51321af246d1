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

//! Course catalog: open courses with live seat counts.
//!
//! Every summary is read under its course lock, so the counts in one summary
//! are consistent with each other. Summaries of different courses are taken one
//! after another and may reflect different moments.

use crate::ReservationError;
use crate::course::Course;
use crate::store::{CourseBook, CourseStore};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// A course with its current seat usage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CourseSummary {
    #[serde(flatten)]
    pub course: Course,
    pub confirmed_count: u32,
    pub waitlisted_count: u32,
    pub remaining_slots: u32,
}

impl CourseSummary {
    pub(crate) fn from_book(book: &CourseBook) -> Self {
        let confirmed_count = book.confirmed_count();
        Self {
            course: book.course().clone(),
            confirmed_count,
            waitlisted_count: book.waitlisted_count(),
            remaining_slots: book.course().capacity.saturating_sub(confirmed_count),
        }
    }

    /// Returns true if at least one seat is free.
    pub fn has_available_slots(&self) -> bool {
        self.remaining_slots > 0
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    #[default]
    ScheduledAt,
    Name,
    Capacity,
    RemainingSlots,
    /// Registration order.
    Id,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

/// Filters and ordering for [`Coordinator::list_courses`](crate::Coordinator::list_courses).
///
/// Only open courses are ever listed. Both dates are inclusive.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CourseQuery {
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub available_only: bool,
    pub sort_by: SortField,
    pub sort_order: SortOrder,
}

impl CourseQuery {
    fn matches(&self, summary: &CourseSummary) -> bool {
        let course = &summary.course;
        let day = course.scheduled_at.date_naive();
        course.is_open()
            && self.start_date.is_none_or(|start| day >= start)
            && self.end_date.is_none_or(|end| day <= end)
            && (!self.available_only || summary.has_available_slots())
    }

    fn compare(&self, a: &CourseSummary, b: &CourseSummary) -> Ordering {
        let ordering = match self.sort_by {
            SortField::ScheduledAt => a.course.scheduled_at.cmp(&b.course.scheduled_at),
            SortField::Name => a.course.name.cmp(&b.course.name),
            SortField::Capacity => a.course.capacity.cmp(&b.course.capacity),
            SortField::RemainingSlots => a.remaining_slots.cmp(&b.remaining_slots),
            SortField::Id => Ordering::Equal,
        };
        let ordering = match self.sort_order {
            SortOrder::Asc => ordering,
            SortOrder::Desc => ordering.reverse(),
        };
        let by_id = a.course.id.cmp(&b.course.id);
        match (self.sort_by, self.sort_order) {
            (SortField::Id, SortOrder::Desc) => by_id.reverse(),
            _ => ordering.then(by_id),
        }
    }
}

pub(crate) fn list_courses(
    store: &CourseStore,
    query: &CourseQuery,
) -> Result<Vec<CourseSummary>, ReservationError> {
    let mut summaries = Vec::new();
    for slot in store.slots() {
        let summary = store.read(&slot, CourseSummary::from_book)?;
        if query.matches(&summary) {
            summaries.push(summary);
        }
    }
    summaries.sort_by(|a, b| query.compare(a, b));
    Ok(summaries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::CourseId;
    use crate::config::EngineConfig;
    use crate::course::CourseStatus;
    use chrono::{TimeZone, Utc};

    fn course(id: u32, name: &str, capacity: u32, day: u32) -> Course {
        let scheduled_at = Utc.with_ymd_and_hms(2026, 5, day, 23, 30, 0).unwrap();
        Course::new(CourseId(id), name, capacity, scheduled_at)
    }

    fn store() -> CourseStore {
        let store = CourseStore::new(&EngineConfig::default());
        store.add_course(course(1, "Go", 10, 3)).unwrap();
        store.add_course(course(2, "Axum", 30, 1)).unwrap();
        store.add_course(course(3, "Tokio", 20, 2)).unwrap();
        store
            .add_course(course(4, "Closed", 5, 2).with_status(CourseStatus::Closed))
            .unwrap();
        store
    }

    fn ids(summaries: &[CourseSummary]) -> Vec<u32> {
        summaries.iter().map(|s| s.course.id.0).collect()
    }

    #[test]
    fn default_query_lists_open_courses_by_schedule() {
        let summaries = list_courses(&store(), &CourseQuery::default()).unwrap();
        assert_eq!(ids(&summaries), vec![2, 3, 1]);
        assert!(summaries.iter().all(|s| s.remaining_slots == s.course.capacity));
    }

    #[test]
    fn date_bounds_are_inclusive() {
        let query = CourseQuery {
            start_date: NaiveDate::from_ymd_opt(2026, 5, 2),
            end_date: NaiveDate::from_ymd_opt(2026, 5, 2),
            ..CourseQuery::default()
        };
        let summaries = list_courses(&store(), &query).unwrap();
        assert_eq!(ids(&summaries), vec![3]);
    }

    #[test]
    fn sorts_by_name_and_capacity() {
        let by_name = CourseQuery {
            sort_by: SortField::Name,
            ..CourseQuery::default()
        };
        assert_eq!(ids(&list_courses(&store(), &by_name).unwrap()), vec![2, 1, 3]);

        let by_capacity_desc = CourseQuery {
            sort_by: SortField::Capacity,
            sort_order: SortOrder::Desc,
            ..CourseQuery::default()
        };
        assert_eq!(
            ids(&list_courses(&store(), &by_capacity_desc).unwrap()),
            vec![2, 3, 1]
        );

        let by_id_desc = CourseQuery {
            sort_by: SortField::Id,
            sort_order: SortOrder::Desc,
            ..CourseQuery::default()
        };
        assert_eq!(ids(&list_courses(&store(), &by_id_desc).unwrap()), vec![3, 2, 1]);
    }

    #[test]
    fn query_deserializes_from_snake_case() {
        let query: CourseQuery = serde_json::from_str(
            r#"{"start_date":"2026-05-01","sort_by":"remaining_slots","sort_order":"desc","available_only":true}"#,
        )
        .unwrap();
        assert_eq!(query.sort_by, SortField::RemainingSlots);
        assert_eq!(query.sort_order, SortOrder::Desc);
        assert!(query.available_only);
        assert_eq!(query.end_date, None);
    }
}
