use std::collections::HashSet;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use serde::Serialize;
use time::Date;
use time::format_description::well_known::Rfc3339;

use crate::app::auth::api_error;
use crate::calendar::{DayCell, month_grid, parse_month};
use crate::clock;
use crate::gate;
use crate::ports::TimeProvider;
use crate::state::AppState;
use crate::store::{Challenge, Message, day_format, format_day, parse_day};

#[derive(Debug, Deserialize)]
pub(crate) struct CalendarQuery {
    month: Option<String>,
}

#[derive(Serialize)]
struct CalendarResponse {
    month: String,
    #[serde(with = "day_format")]
    reference_day: Date,
    days: Vec<DayCell>,
}

/// The month grid, defaulting to the month of the current reference day. The
/// reference day is recomputed on every call, never cached.
pub(crate) async fn calendar_view<T: TimeProvider>(
    State(state): State<AppState<T>>,
    Query(query): Query<CalendarQuery>,
) -> Response {
    let reference = state.reference_day();
    let (year, month) = match query.month.as_deref() {
        Some(raw) => match parse_month(raw) {
            Some(parsed) => parsed,
            None => return api_error(StatusCode::BAD_REQUEST, "malformed month"),
        },
        None => (reference.year(), reference.month()),
    };

    let (message_days, challenge_days) = match content_days(&state) {
        Ok(days) => days,
        Err(response) => return response,
    };
    let days = match month_grid(
        year,
        month,
        &state.config.trip,
        reference,
        &message_days,
        &challenge_days,
    ) {
        Ok(days) => days,
        Err(err) => {
            eprintln!("failed to lay out month {year}-{month}: {err}");
            return api_error(StatusCode::INTERNAL_SERVER_ERROR, "internal error");
        }
    };

    Json(CalendarResponse {
        month: format!("{year:04}-{:02}", month as u8),
        reference_day: reference,
        days,
    })
    .into_response()
}

fn content_days<T: TimeProvider>(
    state: &AppState<T>,
) -> Result<(HashSet<Date>, HashSet<Date>), Response> {
    let messages = state.store.list_messages().map_err(|err| {
        eprintln!("failed to list messages: {err}");
        api_error(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
    })?;
    let challenges = state.store.list_challenges().map_err(|err| {
        eprintln!("failed to list challenges: {err}");
        api_error(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
    })?;
    Ok((
        messages.iter().map(|message| message.date).collect(),
        challenges.iter().map(|challenge| challenge.date).collect(),
    ))
}

#[derive(Serialize)]
struct DayResponse {
    #[serde(with = "day_format")]
    date: Date,
    messages: Vec<Message>,
    challenges: Vec<Challenge>,
}

/// Content for a single day. Locked and out-of-range days both answer 403, so
/// a clock glitch fails closed instead of leaking tomorrow's message.
pub(crate) async fn day_view<T: TimeProvider>(
    State(state): State<AppState<T>>,
    Path(date): Path<String>,
) -> Response {
    let Some(day) = parse_day(&date) else {
        return api_error(StatusCode::BAD_REQUEST, "malformed date");
    };
    let reference = state.reference_day();
    if !gate::is_clickable(day, &state.config.trip, reference) {
        return api_error(StatusCode::FORBIDDEN, "day is locked");
    }

    let messages = match state.store.messages_on(day) {
        Ok(messages) => messages,
        Err(err) => {
            eprintln!("failed to load messages for {}: {err}", format_day(day));
            return api_error(StatusCode::INTERNAL_SERVER_ERROR, "internal error");
        }
    };
    let challenges = match state.store.challenges_on(day) {
        Ok(challenges) => challenges,
        Err(err) => {
            eprintln!("failed to load challenges for {}: {err}", format_day(day));
            return api_error(StatusCode::INTERNAL_SERVER_ERROR, "internal error");
        }
    };

    Json(DayResponse {
        date: day,
        messages,
        challenges,
    })
    .into_response()
}

#[derive(Serialize)]
struct ClockResponse {
    server_time: String,
    #[serde(with = "day_format")]
    reference_day: Date,
}

pub(crate) async fn clock_debug<T: TimeProvider>(State(state): State<AppState<T>>) -> Response {
    let zoned = clock::zoned_now(&state.time, state.config.reference_zone);
    let server_time = match zoned.format(&Rfc3339) {
        Ok(formatted) => formatted,
        Err(err) => {
            eprintln!("failed to format server time: {err}");
            return api_error(StatusCode::INTERNAL_SERVER_ERROR, "internal error");
        }
    };
    Json(ClockResponse {
        server_time,
        reference_day: state.reference_day(),
    })
    .into_response()
}
