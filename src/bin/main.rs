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

use chrono::{DateTime, Utc};
use clap::Parser;
use course_booking_rs::{
    AllocationEvent, Coordinator, Course, CourseId, CourseStatus, EngineConfig, Journal,
    Reservation, ReservationId, UserId,
};
use csv::{ReaderBuilder, Trim, Writer};
use serde::Deserialize;
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::process;
use tracing::{debug, error, warn};
use tracing_subscriber::EnvFilter;

/// Course Booking - Replay reservation commands against a course catalog
///
/// Loads courses from a CSV file, applies reserve/cancel commands in order,
/// and writes the resulting reservations to stdout.
#[derive(Parser, Debug)]
#[command(name = "course-booking")]
#[command(about = "Replays reservation commands against a course catalog", long_about = None)]
struct Args {
    /// Path to CSV file with courses
    ///
    /// Expected format: id,name,capacity,status,scheduled_at,duration_minutes
    #[arg(long, value_name = "FILE")]
    courses: PathBuf,

    /// Path to CSV file with commands
    ///
    /// Expected format: op,target,user
    /// Example: cargo run -- --courses courses.csv commands.csv > reservations.csv
    #[arg(value_name = "FILE")]
    commands: PathBuf,

    /// Milliseconds to wait for a course lock (0 waits forever)
    ///
    /// Defaults to $COURSE_BOOKING_LOCK_TIMEOUT_MS, or 5000.
    #[arg(long, value_name = "MS")]
    lock_timeout_ms: Option<u64>,

    /// Also write the allocation journal as CSV to this file
    #[arg(long, value_name = "FILE")]
    journal: Option<PathBuf>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("course_booking_rs=info,course_booking=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut config = EngineConfig::from_env();
    if let Some(lock_timeout_ms) = args.lock_timeout_ms {
        config = config.with_lock_timeout_ms(lock_timeout_ms);
    }
    if args.journal.is_some() {
        config = config.with_journal(true);
    }
    let coordinator = Coordinator::with_config(config);

    let courses = open(&args.courses);
    if let Err(e) = load_courses(&coordinator, BufReader::new(courses)) {
        error!("Error loading courses: {}", e);
        process::exit(1);
    }

    let commands = open(&args.commands);
    if let Err(e) = process_commands(&coordinator, BufReader::new(commands)) {
        error!("Error processing commands: {}", e);
        process::exit(1);
    }

    let reservations = match coordinator.reservations() {
        Ok(reservations) => reservations,
        Err(e) => {
            error!("Error collecting reservations: {}", e);
            process::exit(1);
        }
    };
    if let Err(e) = write_reservations(&reservations, std::io::stdout()) {
        error!("Error writing output: {}", e);
        process::exit(1);
    }

    if let Some(path) = args.journal {
        let result = File::create(&path)
            .map_err(csv::Error::from)
            .and_then(|file| {
                let events = coordinator.journal().map(Journal::drain).unwrap_or_default();
                write_journal(&events, file)
            });
        if let Err(e) = result {
            error!("Error writing journal '{}': {}", path.display(), e);
            process::exit(1);
        }
    }
}

fn open(path: &Path) -> File {
    match File::open(path) {
        Ok(f) => f,
        Err(e) => {
            error!("Error opening file '{}': {}", path.display(), e);
            process::exit(1);
        }
    }
}

/// Raw course row.
///
/// Fields: `id, name, capacity, status, scheduled_at, duration_minutes`
#[derive(Debug, Deserialize)]
struct CourseRecord {
    id: u32,
    name: String,
    capacity: u32,
    status: String,
    scheduled_at: DateTime<Utc>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    duration_minutes: Option<u32>,
}

/// Case-insensitive course status; `None` for anything unrecognized.
fn parse_status(status: &str) -> Option<CourseStatus> {
    match status.to_lowercase().as_str() {
        "open" => Some(CourseStatus::Open),
        "closed" => Some(CourseStatus::Closed),
        "cancelled" => Some(CourseStatus::Cancelled),
        "completed" => Some(CourseStatus::Completed),
        _ => None,
    }
}

impl CourseRecord {
    /// Returns `None` if the status is not a known course status.
    fn into_course(self) -> Option<Course> {
        let status = parse_status(&self.status)?;
        let mut course = Course::new(CourseId(self.id), self.name, self.capacity, self.scheduled_at)
            .with_status(status);
        if let Some(minutes) = self.duration_minutes {
            course = course.with_duration(minutes);
        }
        Some(course)
    }
}

/// Raw command row.
///
/// Fields: `op, target, user`
#[derive(Debug, Deserialize)]
struct CommandRecord {
    op: String,
    target: u64,
    user: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Reserve { course_id: CourseId, user_id: UserId },
    Cancel { reservation_id: ReservationId, user_id: UserId },
}

impl CommandRecord {
    /// Returns `None` for unknown operations or out-of-range course ids.
    fn into_command(self) -> Option<Command> {
        let user_id = UserId(self.user);
        match self.op.to_lowercase().as_str() {
            "reserve" => Some(Command::Reserve {
                course_id: CourseId(u32::try_from(self.target).ok()?),
                user_id,
            }),
            "cancel" => Some(Command::Cancel {
                reservation_id: ReservationId(self.target),
                user_id,
            }),
            _ => None,
        }
    }
}

fn reader<R: Read>(reader: R) -> csv::Reader<R> {
    ReaderBuilder::new()
        .trim(Trim::All)
        .flexible(true)
        .has_headers(true)
        .from_reader(reader)
}

/// Registers every valid course row. Malformed rows and rejected courses are
/// skipped with a warning.
///
/// # Errors
///
/// Returns a CSV error if the reader fails or the CSV structure is invalid.
pub fn load_courses<R: Read>(coordinator: &Coordinator, input: R) -> Result<(), csv::Error> {
    for result in reader(input).deserialize::<CourseRecord>() {
        match result {
            Ok(record) => {
                let (course_id, status) = (record.id, record.status.clone());
                let Some(course) = record.into_course() else {
                    warn!(course_id, %status, "Skipping course with unknown status");
                    continue;
                };
                if let Err(e) = coordinator.add_course(course) {
                    warn!(%course_id, "Skipping course: {}", e);
                }
            }
            Err(e) => warn!("Skipping malformed course row: {}", e),
        }
    }
    Ok(())
}

/// Applies commands in file order.
///
/// Rejected commands (full course, duplicate reservation, wrong owner, ...) are
/// part of normal traffic: they are logged and the replay continues.
///
/// # CSV Format
///
/// ```csv
/// op,target,user
/// reserve,1,100
/// reserve,1,101
/// cancel,1,100
/// ```
///
/// For `reserve` the target is a course id, for `cancel` a reservation id.
///
/// # Errors
///
/// Returns a CSV error if the reader fails or the CSV structure is invalid.
pub fn process_commands<R: Read>(coordinator: &Coordinator, input: R) -> Result<(), csv::Error> {
    for result in reader(input).deserialize::<CommandRecord>() {
        let record = match result {
            Ok(record) => record,
            Err(e) => {
                warn!("Skipping malformed command row: {}", e);
                continue;
            }
        };
        let Some(command) = record.into_command() else {
            warn!("Skipping invalid command record");
            continue;
        };

        let result = match command {
            Command::Reserve { course_id, user_id } => {
                coordinator.reserve(course_id, user_id).map(|_| ())
            }
            Command::Cancel {
                reservation_id,
                user_id,
            } => coordinator.cancel(reservation_id, user_id).map(|_| ()),
        };
        if let Err(e) = result {
            debug!(?command, retryable = e.is_retryable(), "Command rejected: {}", e);
        }
    }
    Ok(())
}

/// Writes reservations as CSV.
///
/// # CSV Format
///
/// Columns: `reservation_id, course_id, user_id, status, waitlist_position, reserved_at, cancelled_at`
///
/// # Errors
///
/// Returns a CSV error if writing fails.
pub fn write_reservations<W: Write>(reservations: &[Reservation], writer: W) -> Result<(), csv::Error> {
    let mut wtr = Writer::from_writer(writer);
    for reservation in reservations {
        wtr.serialize(reservation)?;
    }
    wtr.flush()?;
    Ok(())
}

/// Writes journal events as CSV.
///
/// # Errors
///
/// Returns a CSV error if writing fails.
pub fn write_journal<W: Write>(events: &[AllocationEvent], writer: W) -> Result<(), csv::Error> {
    let mut wtr = Writer::from_writer(writer);
    for event in events {
        wtr.serialize(event)?;
    }
    wtr.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use course_booking_rs::ReservationStatus;
    use std::io::Cursor;

    const COURSES: &str = "id,name,capacity,status,scheduled_at,duration_minutes\n\
                           1,Rust,2,open,2026-03-01T10:00:00Z,90\n\
                           2,Go,1,closed,2026-03-02T10:00:00Z,\n";

    fn coordinator() -> Coordinator {
        let coordinator = Coordinator::with_config(EngineConfig::default().with_journal(true));
        load_courses(&coordinator, Cursor::new(COURSES)).unwrap();
        coordinator
    }

    fn statuses(coordinator: &Coordinator, course: u32) -> Vec<(u32, ReservationStatus)> {
        coordinator
            .course_reservations(CourseId(course))
            .unwrap()
            .iter()
            .map(|r| (r.user_id().0, r.status()))
            .collect()
    }

    #[test]
    fn load_courses_reads_all_columns() {
        let coordinator = coordinator();
        let rust = coordinator.course(CourseId(1)).unwrap();
        assert_eq!(rust.capacity, 2);
        assert_eq!(rust.duration_minutes, 90);
        let go = coordinator.course(CourseId(2)).unwrap();
        assert_eq!(go.status, CourseStatus::Closed);
        assert_eq!(go.duration_minutes, 60);
    }

    #[test]
    fn course_status_is_case_insensitive_and_never_defaults() {
        let coordinator = Coordinator::new();
        let courses = "id,name,capacity,status,scheduled_at,duration_minutes\n\
                       1,Rust,2,Closed,2026-03-01T10:00:00Z,\n\
                       2,Go,2,archived,2026-03-02T10:00:00Z,\n\
                       3,Zig,2,,2026-03-03T10:00:00Z,\n\
                       4,Elm,2,OPEN,2026-03-04T10:00:00Z,\n";
        load_courses(&coordinator, Cursor::new(courses)).unwrap();

        assert_eq!(coordinator.course(CourseId(1)).unwrap().status, CourseStatus::Closed);
        assert!(coordinator.course(CourseId(2)).is_err());
        assert!(coordinator.course(CourseId(3)).is_err());
        assert_eq!(coordinator.course(CourseId(4)).unwrap().status, CourseStatus::Open);

        let commands = "op,target,user\nreserve,1,10\nreserve,2,10\nreserve,4,10\n";
        process_commands(&coordinator, Cursor::new(commands)).unwrap();
        assert!(statuses(&coordinator, 1).is_empty());
        assert_eq!(statuses(&coordinator, 4), vec![(10, ReservationStatus::Confirmed)]);
    }

    #[test]
    fn parse_status_rejects_unknown_values() {
        assert_eq!(parse_status("cancelled"), Some(CourseStatus::Cancelled));
        assert_eq!(parse_status("Completed"), Some(CourseStatus::Completed));
        assert_eq!(parse_status("archived"), None);
        assert_eq!(parse_status(""), None);
    }

    #[test]
    fn reserve_beyond_capacity_waitlists() {
        let coordinator = coordinator();
        let commands = "op,target,user\n\
                        reserve,1,10\n\
                        reserve,1,11\n\
                        reserve,1,12\n";
        process_commands(&coordinator, Cursor::new(commands)).unwrap();

        assert_eq!(
            statuses(&coordinator, 1),
            vec![
                (10, ReservationStatus::Confirmed),
                (11, ReservationStatus::Confirmed),
                (12, ReservationStatus::Waitlisted),
            ]
        );
    }

    #[test]
    fn cancel_promotes_waitlisted_user() {
        let coordinator = coordinator();
        let commands = "op,target,user\n\
                        reserve,1,10\n\
                        reserve,1,11\n\
                        reserve,1,12\n\
                        cancel,1,10\n";
        process_commands(&coordinator, Cursor::new(commands)).unwrap();

        assert_eq!(
            statuses(&coordinator, 1),
            vec![
                (10, ReservationStatus::Cancelled),
                (11, ReservationStatus::Confirmed),
                (12, ReservationStatus::Confirmed),
            ]
        );
    }

    #[test]
    fn rejected_and_malformed_commands_are_skipped() {
        let coordinator = coordinator();
        let commands = "op,target,user\n\
                        reserve,2,10\n\
                        reserve,9,10\n\
                        refund,1,10\n\
                        reserve,one,10\n\
                        reserve,1,10\n\
                        cancel,1,99\n";
        process_commands(&coordinator, Cursor::new(commands)).unwrap();

        assert!(statuses(&coordinator, 2).is_empty());
        assert_eq!(statuses(&coordinator, 1), vec![(10, ReservationStatus::Confirmed)]);
    }

    #[test]
    fn parse_with_whitespace() {
        let coordinator = coordinator();
        let commands = "op,target,user\n reserve , 1 , 10 \n";
        process_commands(&coordinator, Cursor::new(commands)).unwrap();
        assert_eq!(statuses(&coordinator, 1), vec![(10, ReservationStatus::Confirmed)]);
    }

    #[test]
    fn write_reservations_to_csv() {
        let coordinator = coordinator();
        let commands = "op,target,user\n\
                        reserve,1,10\n\
                        reserve,1,11\n\
                        reserve,1,12\n";
        process_commands(&coordinator, Cursor::new(commands)).unwrap();

        let mut output = Vec::new();
        write_reservations(&coordinator.reservations().unwrap(), &mut output).unwrap();

        let output = String::from_utf8(output).unwrap();
        let mut lines = output.lines();
        assert_eq!(
            lines.next(),
            Some("reservation_id,course_id,user_id,status,waitlist_position,reserved_at,cancelled_at")
        );
        let last = lines.last().unwrap();
        assert!(last.starts_with("3,1,12,waitlisted,1,"), "unexpected row: {last}");
        assert!(last.ends_with(','), "waitlisted row has no cancelled_at: {last}");
    }

    #[test]
    fn write_journal_to_csv() {
        let coordinator = coordinator();
        let commands = "op,target,user\nreserve,1,10\ncancel,1,10\n";
        process_commands(&coordinator, Cursor::new(commands)).unwrap();

        let mut output = Vec::new();
        write_journal(&coordinator.journal().unwrap().drain(), &mut output).unwrap();

        let output = String::from_utf8(output).unwrap();
        let kinds: Vec<&str> = output
            .lines()
            .skip(1)
            .filter_map(|line| line.split(',').next())
            .collect();
        assert_eq!(kinds, vec!["confirmed", "cancelled"]);
    }
}
