use axum::Extension;
use axum::Json;
use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use serde::Serialize;
use std::collections::BTreeMap;

use crate::app::auth::api_error;
use crate::app::messages::validate_date;
use crate::app::require_admin;
use crate::auth::Identity;
use crate::ports::TimeProvider;
use crate::recorder::{self, RecordError, ResponseUpload};
use crate::state::AppState;
use crate::store::{Challenge, RecordKind, record_id};

pub(crate) async fn challenge_list<T: TimeProvider>(
    State(state): State<AppState<T>>,
    identity: Option<Extension<Identity>>,
) -> Response {
    if let Err(response) = require_admin(&state, identity.as_deref()) {
        return response;
    }
    match state.store.list_challenges() {
        Ok(challenges) => Json(challenges).into_response(),
        Err(err) => {
            eprintln!("failed to list challenges: {err}");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct ChallengeRequest {
    prompt: String,
    date: String,
}

#[derive(Serialize)]
struct CreatedResponse {
    id: String,
}

pub(crate) async fn challenge_create<T: TimeProvider>(
    State(state): State<AppState<T>>,
    identity: Option<Extension<Identity>>,
    Json(request): Json<ChallengeRequest>,
) -> Response {
    if let Err(response) = require_admin(&state, identity.as_deref()) {
        return response;
    }
    let prompt = request.prompt.trim();
    if prompt.is_empty() {
        return api_error(StatusCode::BAD_REQUEST, "prompt is required");
    }
    let date = match validate_date(&state, Some(&request.date)) {
        Ok(date) => date,
        Err(response) => return response,
    };

    let created_at = state.time.now();
    let id = record_id(RecordKind::Challenge, date, created_at);
    let challenge = Challenge {
        id: id.clone(),
        prompt: prompt.to_string(),
        date,
        created_at,
        responses: BTreeMap::new(),
    };
    if let Err(err) = state.store.create_challenge(&challenge) {
        eprintln!("failed to create challenge {id}: {err}");
        return api_error(StatusCode::INTERNAL_SERVER_ERROR, "internal error");
    }
    (StatusCode::CREATED, Json(CreatedResponse { id })).into_response()
}

/// Submits (or replaces) the caller's response to a challenge. Multipart with
/// an optional `text` part and an optional `file` part.
pub(crate) async fn challenge_respond<T: TimeProvider>(
    State(state): State<AppState<T>>,
    identity: Option<Extension<Identity>>,
    Path(id): Path<String>,
    mut multipart: Multipart,
) -> Response {
    let identity = identity.map(|Extension(identity)| identity);

    let mut text: Option<String> = None;
    let mut upload: Option<ResponseUpload> = None;
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(err) => {
                eprintln!("failed to read multipart field: {err}");
                return api_error(StatusCode::BAD_REQUEST, "malformed multipart body");
            }
        };
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "text" => match field.text().await {
                Ok(value) => text = Some(value),
                Err(err) => {
                    eprintln!("failed to read multipart field: {err}");
                    return api_error(StatusCode::BAD_REQUEST, "malformed multipart body");
                }
            },
            "file" => {
                let content_type = field.content_type().map(|value| value.to_string());
                let filename = field.file_name().map(|value| value.to_string());
                match field.bytes().await {
                    Ok(bytes) => {
                        upload = Some(ResponseUpload {
                            bytes: bytes.to_vec(),
                            content_type,
                            filename,
                        })
                    }
                    Err(err) => {
                        eprintln!("failed to read file field: {err}");
                        return api_error(StatusCode::BAD_REQUEST, "malformed multipart body");
                    }
                }
            }
            _ => {}
        }
    }

    match recorder::record_response(
        &state.store,
        state.store.root(),
        &state.time,
        &id,
        identity.as_ref(),
        text,
        upload,
    ) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(RecordError::NotFound) => api_error(StatusCode::NOT_FOUND, "challenge not found"),
        Err(RecordError::Unauthenticated) => api_error(StatusCode::UNAUTHORIZED, "unauthorized"),
        Err(RecordError::Validation(message)) => api_error(StatusCode::BAD_REQUEST, message),
        Err(RecordError::Upload(err)) => {
            api_error(StatusCode::BAD_REQUEST, format!("file rejected: {err}"))
        }
        Err(err) => {
            eprintln!("failed to record response on {id}: {err}");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
        }
    }
}
