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

//! REST API server for the course reservation engine.
//!
//! Run with: `cargo run --example server`
//!
//! The caller is identified by the `x-user-id` header.
//!
//! ```bash
//! # Reserve a seat
//! curl -X POST http://localhost:3000/courses/1/reservations -H "x-user-id: 42"
//!
//! # Cancel it
//! curl -X DELETE http://localhost:3000/reservations/1 -H "x-user-id: 42"
//!
//! # Browse open courses with free seats, soonest first
//! curl "http://localhost:3000/courses?available_only=true&sort_by=scheduled_at"
//!
//! # Course availability
//! curl http://localhost:3000/courses/1
//! ```

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use chrono::{Duration, Utc};
use course_booking_rs::{
    CancellationOutcome, Coordinator, Course, CourseId, CourseQuery, CourseSummary, EngineConfig,
    ErrorKind, ReservationError, ReservationId, ReservationOutcome, UserId,
};
use serde::Serialize;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

const USER_HEADER: &str = "x-user-id";

// === Response DTOs ===

/// Response body for errors.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
    pub retryable: bool,
}

// === Application State ===

#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<Coordinator>,
}

// === Error Handling ===

pub enum AppError {
    MissingUser,
    Reservation(ReservationError),
}

impl From<ReservationError> for AppError {
    fn from(err: ReservationError) -> Self {
        AppError::Reservation(err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, error, retryable) = match self {
            AppError::MissingUser => (
                StatusCode::UNAUTHORIZED,
                "MISSING_USER",
                format!("missing or malformed {USER_HEADER} header"),
                false,
            ),
            AppError::Reservation(err) => {
                let (status, code) = match err.kind() {
                    ErrorKind::NotFound => (StatusCode::NOT_FOUND, "NOT_FOUND"),
                    ErrorKind::Invalid => (StatusCode::BAD_REQUEST, "INVALID"),
                    ErrorKind::Conflict => (StatusCode::CONFLICT, "CONFLICT"),
                    ErrorKind::Forbidden => (StatusCode::FORBIDDEN, "FORBIDDEN"),
                    ErrorKind::Transient => (StatusCode::SERVICE_UNAVAILABLE, "LOCK_TIMEOUT"),
                };
                (status, code, err.to_string(), err.is_retryable())
            }
        };

        (
            status,
            Json(ErrorResponse {
                error,
                code: code.to_string(),
                retryable,
            }),
        )
            .into_response()
    }
}

fn current_user(headers: &HeaderMap) -> Result<UserId, AppError> {
    headers
        .get(USER_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse().ok())
        .map(UserId)
        .ok_or(AppError::MissingUser)
}

// === Handlers ===

async fn create_reservation(
    State(state): State<AppState>,
    Path(course_id): Path<u32>,
    headers: HeaderMap,
) -> Result<(StatusCode, Json<ReservationOutcome>), AppError> {
    let user_id = current_user(&headers)?;
    let outcome = state.coordinator.reserve(CourseId(course_id), user_id)?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

async fn cancel_reservation(
    State(state): State<AppState>,
    Path(reservation_id): Path<u64>,
    headers: HeaderMap,
) -> Result<Json<CancellationOutcome>, AppError> {
    let user_id = current_user(&headers)?;
    let outcome = state
        .coordinator
        .cancel(ReservationId(reservation_id), user_id)?;
    Ok(Json(outcome))
}

async fn list_courses(
    State(state): State<AppState>,
    Query(query): Query<CourseQuery>,
) -> Result<Json<Vec<CourseSummary>>, AppError> {
    Ok(Json(state.coordinator.list_courses(&query)?))
}

async fn get_course(
    State(state): State<AppState>,
    Path(course_id): Path<u32>,
) -> Result<Json<CourseSummary>, AppError> {
    Ok(Json(state.coordinator.availability(CourseId(course_id))?))
}

// === Router ===

fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/courses", get(list_courses))
        .route("/courses/{id}", get(get_course))
        .route("/courses/{id}/reservations", post(create_reservation))
        .route("/reservations/{id}", delete(cancel_reservation))
        .with_state(state)
}

fn seed(coordinator: &Coordinator) -> Result<(), ReservationError> {
    let tomorrow = Utc::now() + Duration::days(1);
    coordinator.add_course(
        Course::new(CourseId(1), "Morning Yoga", 2, tomorrow).with_description("Small group"),
    )?;
    coordinator.add_course(Course::new(
        CourseId(2),
        "Spin Class",
        20,
        tomorrow + Duration::hours(3),
    ))?;
    coordinator.add_course(
        Course::new(CourseId(3), "Weekend Bootcamp", 12, tomorrow + Duration::days(4))
            .with_duration(90),
    )?;
    Ok(())
}

// === Main ===

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("course_booking_rs=info,server=info")),
        )
        .init();

    let coordinator = Coordinator::with_config(EngineConfig::from_env());
    seed(&coordinator)?;
    let state = AppState {
        coordinator: Arc::new(coordinator),
    };

    let app = create_router(state);

    let listener = TcpListener::bind("127.0.0.1:3000").await?;
    info!(addr = %listener.local_addr()?, "course booking server listening");
    println!("Endpoints:");
    println!("  POST   /courses/:id/reservations - Reserve a seat (x-user-id header)");
    println!("  DELETE /reservations/:id         - Cancel a reservation (x-user-id header)");
    println!("  GET    /courses                  - Browse open courses");
    println!("  GET    /courses/:id              - Course availability");

    axum::serve(listener, app).await?;
    Ok(())
}
