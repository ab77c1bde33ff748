use axum::extract::Path as AxumPath;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Response;

use crate::media;
use crate::ports::TimeProvider;
use crate::state::AppState;

pub(crate) async fn media_file<T: TimeProvider>(
    State(state): State<AppState<T>>,
    AxumPath(path): AxumPath<String>,
) -> Result<Response, (StatusCode, &'static str)> {
    let Some(content_type) = media::content_type_for_path(&path) else {
        return Err((StatusCode::NOT_FOUND, "not found"));
    };

    let resolved = match media::resolve_media_path(state.store.root(), &path) {
        Ok(path) => path,
        Err(media::MediaError::NotFound) | Err(media::MediaError::BadPath) => {
            return Err((StatusCode::NOT_FOUND, "not found"));
        }
        Err(media::MediaError::Io(err)) => {
            eprintln!("failed to resolve media path {path}: {err}");
            return Err((StatusCode::INTERNAL_SERVER_ERROR, "internal error"));
        }
        Err(err) => {
            eprintln!("failed to resolve media path {path}: {err:?}");
            return Err((StatusCode::INTERNAL_SERVER_ERROR, "internal error"));
        }
    };

    let bytes = match std::fs::read(&resolved) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Err((StatusCode::NOT_FOUND, "not found"));
        }
        Err(err) => {
            eprintln!("failed to read media file {resolved:?}: {err}");
            return Err((StatusCode::INTERNAL_SERVER_ERROR, "internal error"));
        }
    };

    Ok(Response::builder()
        .status(StatusCode::OK)
        .header("content-type", content_type)
        .header("cache-control", "private, max-age=86400")
        .body(bytes.into())
        .unwrap())
}
