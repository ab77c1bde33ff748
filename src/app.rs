use crate::adapters;
use crate::auth as auth_service;
use crate::config;
use crate::ports::TimeProvider;
use crate::state::AppState;
use crate::store::ContentStore;

use axum::Router;
use axum::http::StatusCode;
use axum::middleware;
use axum::response::Response;
use axum::routing::get;
use axum::routing::post;

use std::sync::Arc;

mod auth;
mod calendar;
mod challenges;
mod media;
mod messages;

pub fn app(config: config::AppConfig) -> Router {
    app_with_time(config, adapters::SystemTimeProvider)
}

pub(crate) fn app_with_time<T: TimeProvider>(config: config::AppConfig, time: T) -> Router {
    let auth = auth_service::AuthState::from_config(&config)
        .unwrap_or_else(|err| panic!("invalid auth configuration: {err}"));
    let users = match auth_service::load_users(&config.root) {
        Ok(users) => users,
        Err(err) => {
            eprintln!("{err}");
            auth_service::UserRegistry::default()
        }
    };
    let store = ContentStore::new(config.root.clone());
    let state = AppState {
        config,
        auth,
        users: Arc::new(users),
        store,
        time,
    };
    Router::new()
        .route("/login", post(auth::login_submit::<T>))
        .route("/logout", post(auth::logout::<T>))
        .route("/api/calendar", get(calendar::calendar_view::<T>))
        .route("/api/day/{date}", get(calendar::day_view::<T>))
        .route(
            "/api/messages",
            get(messages::message_list::<T>).post(messages::message_create::<T>),
        )
        .route(
            "/api/messages/{id}/view",
            post(messages::message_record_view::<T>),
        )
        .route(
            "/api/messages/{id}/views/deduplicate",
            post(messages::message_deduplicate_views::<T>),
        )
        .route(
            "/api/challenges",
            get(challenges::challenge_list::<T>).post(challenges::challenge_create::<T>),
        )
        .route(
            "/api/challenges/{id}/response",
            post(challenges::challenge_respond::<T>),
        )
        .route("/media/{*path}", get(media::media_file::<T>))
        .route("/api/debug/clock", get(calendar::clock_debug::<T>))
        .route("/health", get(health))
        .with_state(state.clone())
        .layer(middleware::from_fn_with_state(
            state,
            auth::auth_middleware::<T>,
        ))
}

/// Admin gate for content management routes. With auth disabled the app runs
/// open, so every caller passes.
pub(crate) fn require_admin<T: TimeProvider>(
    state: &AppState<T>,
    identity: Option<&auth_service::Identity>,
) -> Result<(), Response> {
    if state.auth.is_none() {
        return Ok(());
    }
    match identity {
        Some(identity) if auth_service::is_admin(identity, &state.config.admin_emails) => Ok(()),
        Some(_) => Err(auth::api_error(StatusCode::FORBIDDEN, "forbidden")),
        None => Err(auth::api_error(StatusCode::UNAUTHORIZED, "unauthorized")),
    }
}

pub(crate) async fn health() -> &'static str {
    "ok"
}
