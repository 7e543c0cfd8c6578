use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use ffstage_core::error::CoreError;

/// Application-level error type for staging HTTP handlers.
///
/// Wraps [`CoreError`] for domain errors and adds HTTP-specific variants.
/// Responses are short plain-text bodies; the consumer is the external
/// tool's HTTP client, not a browser.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// A domain-level error from `ffstage_core`.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// A request the staging server does not serve.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// An internal error with a human-readable message.
    #[error("Internal error: {0}")]
    InternalError(String),
}

/// Convenience type alias for handler return values.
pub type AppResult<T> = Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            AppError::Core(CoreError::NotFound(id)) => {
                tracing::debug!(staged_id = %id, "Staged buffer not found");
                (StatusCode::NOT_FOUND, "404 Not Found")
            }
            AppError::Core(CoreError::Validation(msg)) | AppError::BadRequest(msg) => {
                tracing::debug!(reason = %msg, "Bad request");
                (StatusCode::BAD_REQUEST, "400 Bad Request")
            }
            AppError::InternalError(msg) => {
                tracing::error!(error = %msg, "Internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "500 Internal Server Error",
                )
            }
        };

        (
            status,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            body,
        )
            .into_response()
    }
}
