use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::debug;

/// Errors returned by the JSON routes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// The requested repository is not in the current snapshot.
    NotFound(String),
    /// A path or query parameter could not be parsed.
    BadRequest(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(message) => (StatusCode::NOT_FOUND, message),
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
        };
        debug!(component = "http", status = status.as_u16(), %message, "request rejected");
        (
            status,
            Json(json!({
                "error": status.canonical_reason().unwrap_or("error"),
                "message": message,
            })),
        )
            .into_response()
    }
}
