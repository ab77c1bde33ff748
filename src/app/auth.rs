use axum::Json;
use axum::body::Body;
use axum::extract::Form;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::http::HeaderValue;
use axum::http::Request;
use axum::http::StatusCode;
use axum::http::header::{COOKIE, SET_COOKIE};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use serde::Serialize;

use crate::auth::verify_password;
use crate::ports::TimeProvider;
use crate::state::AppState;

#[derive(Serialize)]
pub(crate) struct ErrorBody {
    pub(crate) error: String,
}

pub(crate) fn api_error(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorBody {
            error: message.into(),
        }),
    )
        .into_response()
}

/// Resolves the session cookie to a known user and stashes the identity as a
/// request extension. Requests without a valid session get a JSON 401. When
/// auth is disabled the whole app runs open, with no identity attached.
pub(crate) async fn auth_middleware<T: TimeProvider>(
    State(state): State<AppState<T>>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let auth = match &state.auth {
        Some(auth) => auth,
        None => return next.run(req).await,
    };

    let path = req.uri().path();
    if is_auth_bypass_path(path) {
        return next.run(req).await;
    }

    if let Some(token) = auth_cookie(req.headers(), auth.cookie_name())
        && let Ok(uid) = auth.verify_token(token)
        && let Some(user) = state.users.by_uid(&uid)
    {
        req.extensions_mut().insert(user.identity());
        return next.run(req).await;
    }

    api_error(StatusCode::UNAUTHORIZED, "unauthorized")
}

fn is_auth_bypass_path(path: &str) -> bool {
    path == "/login" || path == "/logout" || path == "/health"
}

fn auth_cookie<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    for header in headers.get_all(COOKIE).iter() {
        if let Ok(raw) = header.to_str()
            && let Some(value) = cookie_from_header(raw, name)
        {
            return Some(value);
        }
    }
    None
}

fn cookie_from_header<'a>(header: &'a str, name: &str) -> Option<&'a str> {
    for part in header.split(';') {
        let trimmed = part.trim();
        if let Some((cookie_name, cookie_value)) = trimmed.split_once('=')
            && cookie_name == name
        {
            return Some(cookie_value);
        }
    }
    None
}

#[derive(Debug, Deserialize)]
pub(crate) struct LoginForm {
    name: String,
    password: String,
}

pub(crate) async fn login_submit<T: TimeProvider>(
    State(state): State<AppState<T>>,
    Form(form): Form<LoginForm>,
) -> Response {
    let Some(auth) = state.auth.as_ref() else {
        return api_error(StatusCode::NOT_FOUND, "auth is not enabled");
    };
    let name = form.name.trim();
    let password = form.password;
    if name.is_empty() || password.trim().is_empty() {
        return api_error(StatusCode::UNAUTHORIZED, "invalid username or password");
    }

    let Some(user) = state.users.by_name(name) else {
        return api_error(StatusCode::UNAUTHORIZED, "invalid username or password");
    };
    if !verify_password(&password, &user.password_hash) {
        return api_error(StatusCode::UNAUTHORIZED, "invalid username or password");
    }

    let token = match auth.issue_token(&user.uid) {
        Ok(token) => token,
        Err(err) => {
            eprintln!("failed to issue auth token: {err}");
            return api_error(StatusCode::INTERNAL_SERVER_ERROR, "failed to sign in");
        }
    };

    let mut response = Json(user.identity()).into_response();
    let cookie = auth.auth_cookie(&token);
    response.headers_mut().append(
        SET_COOKIE,
        HeaderValue::from_str(&cookie).expect("auth cookie header"),
    );
    response
}

pub(crate) async fn logout<T: TimeProvider>(State(state): State<AppState<T>>) -> Response {
    let Some(auth) = state.auth.as_ref() else {
        return api_error(StatusCode::NOT_FOUND, "auth is not enabled");
    };
    let mut response = StatusCode::NO_CONTENT.into_response();
    let cookie = auth.clear_cookie();
    response.headers_mut().append(
        SET_COOKIE,
        HeaderValue::from_str(&cookie).expect("logout cookie header"),
    );
    response
}
