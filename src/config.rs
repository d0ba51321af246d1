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

//! Engine configuration.
//!
//! Loaded from environment variables with defaults; the CLI overrides
//! individual fields from its flags.

use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// Environment variable holding the lock wait timeout in milliseconds.
pub const LOCK_TIMEOUT_ENV: &str = "COURSE_BOOKING_LOCK_TIMEOUT_MS";

/// Environment variable that turns the allocation journal on (`1` or `true`).
pub const JOURNAL_ENV: &str = "COURSE_BOOKING_JOURNAL";

/// Runtime settings for the allocation engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// How long an operation waits for a course lock before failing with a
    /// retryable [`LockTimeout`](crate::ReservationError::LockTimeout).
    /// `0` waits indefinitely.
    pub lock_timeout_ms: u64,
    /// Record committed allocations in the [`Journal`](crate::Journal).
    /// Off by default; the journal is unbounded until drained.
    pub journal: bool,
}

impl EngineConfig {
    pub const DEFAULT_LOCK_TIMEOUT_MS: u64 = 5_000;

    /// Load configuration from environment variables.
    ///
    /// Unset or unparsable values fall back to the defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            lock_timeout_ms: env::var(LOCK_TIMEOUT_ENV)
                .ok()
                .and_then(|s| s.trim().parse().ok())
                .unwrap_or(defaults.lock_timeout_ms),
            journal: env::var(JOURNAL_ENV)
                .ok()
                .map(|s| parse_flag(&s))
                .unwrap_or(defaults.journal),
        }
    }

    /// Sets the lock wait timeout; `0` waits indefinitely.
    pub fn with_lock_timeout_ms(mut self, lock_timeout_ms: u64) -> Self {
        self.lock_timeout_ms = lock_timeout_ms;
        self
    }

    /// Turns journal recording on or off.
    pub fn with_journal(mut self, journal: bool) -> Self {
        self.journal = journal;
        self
    }

    /// `None` means wait for the lock without a deadline.
    pub fn lock_timeout(&self) -> Option<Duration> {
        (self.lock_timeout_ms > 0).then(|| Duration::from_millis(self.lock_timeout_ms))
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: Self::DEFAULT_LOCK_TIMEOUT_MS,
            journal: false,
        }
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(value.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on")
}
