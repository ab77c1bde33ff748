use axum::Extension;
use axum::Json;
use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use time::Date;

use crate::app::auth::api_error;
use crate::app::require_admin;
use crate::auth::Identity;
use crate::gate;
use crate::media::{self, MediaCategory};
use crate::ports::TimeProvider;
use crate::recorder::{self, RecordError};
use crate::state::AppState;
use crate::store::{Message, MessageKind, RecordKind, parse_day, record_id};

pub(crate) async fn message_list<T: TimeProvider>(
    State(state): State<AppState<T>>,
    identity: Option<Extension<Identity>>,
) -> Response {
    if let Err(response) = require_admin(&state, identity.as_deref()) {
        return response;
    }
    match state.store.list_messages() {
        Ok(messages) => Json(messages).into_response(),
        Err(err) => {
            eprintln!("failed to list messages: {err}");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
        }
    }
}

struct MessageForm {
    text: Option<String>,
    date: Option<String>,
    kind: Option<String>,
    media: Option<MediaField>,
}

struct MediaField {
    bytes: Vec<u8>,
    content_type: Option<String>,
    filename: Option<String>,
}

async fn read_message_form(multipart: &mut Multipart) -> Result<MessageForm, Response> {
    let mut form = MessageForm {
        text: None,
        date: None,
        kind: None,
        media: None,
    };
    while let Some(field) = multipart.next_field().await.map_err(|err| {
        eprintln!("failed to read multipart field: {err}");
        api_error(StatusCode::BAD_REQUEST, "malformed multipart body")
    })? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "text" => form.text = Some(read_text_field(field).await?),
            "date" => form.date = Some(read_text_field(field).await?),
            "type" => form.kind = Some(read_text_field(field).await?),
            "media" => {
                let content_type = field.content_type().map(|value| value.to_string());
                let filename = field.file_name().map(|value| value.to_string());
                let bytes = field.bytes().await.map_err(|err| {
                    eprintln!("failed to read media field: {err}");
                    api_error(StatusCode::BAD_REQUEST, "malformed multipart body")
                })?;
                form.media = Some(MediaField {
                    bytes: bytes.to_vec(),
                    content_type,
                    filename,
                });
            }
            _ => {}
        }
    }
    Ok(form)
}

async fn read_text_field(field: axum::extract::multipart::Field<'_>) -> Result<String, Response> {
    field.text().await.map_err(|err| {
        eprintln!("failed to read multipart field: {err}");
        api_error(StatusCode::BAD_REQUEST, "malformed multipart body")
    })
}

#[derive(Serialize)]
struct CreatedResponse {
    id: String,
}

/// Publishes a dated message. Everything is validated before the first byte is
/// written, so a rejected request leaves no partial state. The media upload
/// (if any) lands before the document; a crash in the gap leaves an orphaned
/// file, which is accepted.
pub(crate) async fn message_create<T: TimeProvider>(
    State(state): State<AppState<T>>,
    identity: Option<Extension<Identity>>,
    mut multipart: Multipart,
) -> Response {
    if let Err(response) = require_admin(&state, identity.as_deref()) {
        return response;
    }
    let form = match read_message_form(&mut multipart).await {
        Ok(form) => form,
        Err(response) => return response,
    };

    let text = match form.text.as_deref().map(str::trim) {
        Some(text) if !text.is_empty() => text.to_string(),
        _ => return api_error(StatusCode::BAD_REQUEST, "text is required"),
    };
    let date = match validate_date(&state, form.date.as_deref()) {
        Ok(date) => date,
        Err(response) => return response,
    };
    let kind = match form.kind.as_deref().unwrap_or("text") {
        "text" => MessageKind::Text,
        "image" => MessageKind::Image,
        "video" => MessageKind::Video,
        _ => return api_error(StatusCode::BAD_REQUEST, "unknown message type"),
    };

    let wanted_category = match kind {
        MessageKind::Text => None,
        MessageKind::Image => Some(MediaCategory::Image),
        MessageKind::Video => Some(MediaCategory::Video),
    };
    if wanted_category.is_some() && form.media.is_none() {
        return api_error(StatusCode::BAD_REQUEST, "message type requires a media file");
    }

    let created_at = state.time.now();
    let id = record_id(RecordKind::Message, date, created_at);

    let media_url = match form.media {
        Some(field) => {
            let stored = match media::store_media(
                state.store.root(),
                RecordKind::Message,
                &id,
                None,
                &field.bytes,
                field.content_type.as_deref(),
                field.filename.as_deref(),
            ) {
                Ok(stored) => stored,
                Err(err) => {
                    eprintln!("failed to store media for {id}: {err}");
                    return api_error(StatusCode::BAD_REQUEST, format!("media rejected: {err}"));
                }
            };
            if let Some(wanted) = wanted_category
                && stored.media_type.category() != wanted
            {
                return api_error(
                    StatusCode::BAD_REQUEST,
                    "media file does not match the message type",
                );
            }
            Some(stored.url)
        }
        None => None,
    };

    let message = Message {
        id: id.clone(),
        text,
        date,
        kind,
        media_url,
        created_at,
        views: Vec::new(),
    };
    if let Err(err) = state.store.create_message(&message) {
        eprintln!("failed to create message {id}: {err}");
        return api_error(StatusCode::INTERNAL_SERVER_ERROR, "internal error");
    }
    (StatusCode::CREATED, Json(CreatedResponse { id })).into_response()
}

pub(crate) fn validate_date<T: TimeProvider>(
    state: &AppState<T>,
    raw: Option<&str>,
) -> Result<Date, Response> {
    let Some(raw) = raw else {
        return Err(api_error(StatusCode::BAD_REQUEST, "date is required"));
    };
    let Some(date) = parse_day(raw) else {
        return Err(api_error(StatusCode::BAD_REQUEST, "malformed date"));
    };
    if !gate::is_in_range(date, &state.config.trip) {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "date is outside the trip window",
        ));
    }
    Ok(date)
}

#[derive(Serialize)]
struct ViewResponse {
    recorded: bool,
}

/// Best-effort view recording: a missing message is logged and answered with
/// `recorded: false` so a stale client never sees an error page over it.
pub(crate) async fn message_record_view<T: TimeProvider>(
    State(state): State<AppState<T>>,
    identity: Option<Extension<Identity>>,
    Path(id): Path<String>,
) -> Response {
    let Some(Extension(identity)) = identity else {
        return api_error(StatusCode::UNAUTHORIZED, "unauthorized");
    };
    match recorder::record_view(&state.store, &state.time, &id, &identity) {
        Ok(recorded) => Json(ViewResponse { recorded }).into_response(),
        Err(RecordError::NotFound) => {
            eprintln!("view on unknown message {id}");
            Json(ViewResponse { recorded: false }).into_response()
        }
        Err(err) => {
            eprintln!("failed to record view on {id}: {err}");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
        }
    }
}

#[derive(Serialize)]
struct DedupResponse {
    kept: usize,
    removed: usize,
}

pub(crate) async fn message_deduplicate_views<T: TimeProvider>(
    State(state): State<AppState<T>>,
    identity: Option<Extension<Identity>>,
    Path(id): Path<String>,
) -> Response {
    if let Err(response) = require_admin(&state, identity.as_deref()) {
        return response;
    }
    match recorder::deduplicate_views(&state.store, &id) {
        Ok(outcome) => Json(DedupResponse {
            kept: outcome.kept,
            removed: outcome.removed,
        })
        .into_response(),
        Err(RecordError::NotFound) => api_error(StatusCode::NOT_FOUND, "message not found"),
        Err(err) => {
            eprintln!("failed to deduplicate views on {id}: {err}");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
        }
    }
}
