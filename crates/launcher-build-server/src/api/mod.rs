pub mod builds;

use axum::http::StatusCode;
use axum::Json;
use launcher_builder::BuildError;

pub type ApiError = (StatusCode, Json<serde_json::Value>);

pub(crate) fn error_response(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(serde_json::json!({ "error": message.into() })),
    )
}

/// Map a pipeline error raised while handling a request to an HTTP error.
pub(crate) fn build_error_response(err: &BuildError) -> ApiError {
    let status = match err {
        BuildError::InvalidRequest(_) | BuildError::Download(_) => StatusCode::BAD_REQUEST,
        BuildError::InvalidState(_) => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error_response(status, err.to_string())
}
