//! Read-only HTTP view of the buffer registry.
//!
//! The external tool fetches its inputs from here, seeking with `Range`
//! requests where the input format needs it.

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::header::{self, HeaderMap};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use ffstage_core::error::CoreError;
use ffstage_core::extension::content_type_for;
use ffstage_core::range::{parse_range_header, RangeResolution};

use crate::error::{AppError, AppResult};
use crate::state::AppState;

const TEXT_PLAIN: &str = "text/plain; charset=utf-8";

/// Mount the staging routes. Unmatched paths answer 400.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(bad_request))
        .route("/health", get(health_check))
        .route("/filelist", get(file_list))
        .route("/{id}", get(serve_buffer))
        .fallback(bad_request)
}

/// GET /health -- constant liveness response.
async fn health_check() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, TEXT_PLAIN)], "OK")
}

/// GET /filelist -- every staged identifier, one per line.
async fn file_list(State(state): State<AppState>) -> impl IntoResponse {
    let ids = state.registry.list_ids().await;
    ([(header::CONTENT_TYPE, TEXT_PLAIN)], ids.join("\n"))
}

async fn bad_request() -> AppError {
    AppError::BadRequest("unsupported staging path".into())
}

/// GET /{id}
///
/// Serves a staged buffer in full (200) or, with a `Range: bytes=...`
/// header, the requested slice (206). Unparseable ranges are ignored.
async fn serve_buffer(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> AppResult<Response> {
    let staged = state
        .registry
        .get(&id)
        .await
        .ok_or_else(|| CoreError::NotFound(id.clone()))?;

    let total = staged.data.len() as u64;
    let content_type = content_type_for(&id);

    let range = headers
        .get(header::RANGE)
        .and_then(|value| value.to_str().ok())
        .and_then(parse_range_header);

    let Some(range) = range else {
        return build(
            Response::builder()
                .status(StatusCode::OK)
                .header(header::CONTENT_TYPE, content_type)
                .header(header::CONTENT_LENGTH, total.to_string())
                .header(header::ACCEPT_RANGES, "bytes")
                .body(Body::from(staged.data)),
        );
    };

    match range.resolve(total) {
        RangeResolution::Satisfiable { start, end } => {
            tracing::debug!(staged_id = %id, start, end, total, "Serving byte range");
            let slice = staged.data.slice(start as usize..=end as usize);
            build(
                Response::builder()
                    .status(StatusCode::PARTIAL_CONTENT)
                    .header(header::CONTENT_TYPE, content_type)
                    .header(header::CONTENT_LENGTH, slice.len().to_string())
                    .header(header::CONTENT_RANGE, format!("bytes {start}-{end}/{total}"))
                    .header(header::ACCEPT_RANGES, "bytes")
                    .body(Body::from(slice)),
            )
        }
        RangeResolution::Unsatisfiable => build(
            Response::builder()
                .status(StatusCode::RANGE_NOT_SATISFIABLE)
                .header(header::CONTENT_RANGE, format!("bytes */{total}"))
                .header(header::ACCEPT_RANGES, "bytes")
                .body(Body::empty()),
        ),
    }
}

fn build(builder: Result<Response, axum::http::Error>) -> AppResult<Response> {
    builder.map_err(|e| AppError::InternalError(e.to_string()))
}
