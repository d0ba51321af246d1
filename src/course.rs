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

//! Course sessions.
//!
//! Courses are owned by an external management process. The allocation core
//! reads `capacity` and `status` under the course lock and never changes them.

use crate::base::CourseId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a course. Only [`CourseStatus::Open`] accepts reservations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CourseStatus {
    Open,
    Closed,
    Cancelled,
    Completed,
}

impl fmt::Display for CourseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Open => "open",
            Self::Closed => "closed",
            Self::Cancelled => "cancelled",
            Self::Completed => "completed",
        };
        f.write_str(label)
    }
}

/// A finite-capacity course session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Course {
    pub id: CourseId,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub capacity: u32,
    pub status: CourseStatus,
    pub scheduled_at: DateTime<Utc>,
    #[serde(default = "Course::default_duration")]
    pub duration_minutes: u32,
}

impl Course {
    const DEFAULT_DURATION_MINUTES: u32 = 60;

    /// Creates an open course with the default duration and no description.
    pub fn new(
        id: CourseId,
        name: impl Into<String>,
        capacity: u32,
        scheduled_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            description: None,
            capacity,
            status: CourseStatus::Open,
            scheduled_at,
            duration_minutes: Self::DEFAULT_DURATION_MINUTES,
        }
    }

    /// Sets the initial status.
    pub fn with_status(mut self, status: CourseStatus) -> Self {
        self.status = status;
        self
    }

    /// Sets the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Sets the session length in minutes.
    pub fn with_duration(mut self, minutes: u32) -> Self {
        self.duration_minutes = minutes;
        self
    }

    /// Returns true if the course accepts new reservations.
    pub fn is_open(&self) -> bool {
        self.status == CourseStatus::Open
    }

    fn default_duration() -> u32 {
        Self::DEFAULT_DURATION_MINUTES
    }
}
