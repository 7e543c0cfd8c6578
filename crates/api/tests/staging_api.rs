//! Integration tests for the staging HTTP server.

mod common;

use axum::http::StatusCode;
use bytes::Bytes;
use common::{body_bytes, body_text, build_test_app, get, get_range};

fn sample() -> Bytes {
    Bytes::from((0u8..100).collect::<Vec<u8>>())
}

// ---------------------------------------------------------------------------
// Test: GET /health returns a constant OK
// ---------------------------------------------------------------------------

#[tokio::test]
async fn health_returns_ok() {
    let (_state, app) = build_test_app();
    let response = get(app, "/health").await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "OK");
}

// ---------------------------------------------------------------------------
// Test: unknown identifier returns 404
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unknown_id_returns_404() {
    let (_state, app) = build_test_app();
    let response = get(app, "/does-not-exist.png").await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

// ---------------------------------------------------------------------------
// Test: full GET returns the whole buffer with typed headers
// ---------------------------------------------------------------------------

#[tokio::test]
async fn full_get_returns_whole_buffer() {
    let (state, app) = build_test_app();
    let id = state.registry.register(sample(), "png").await;

    let response = get(app, &format!("/{id}")).await;

    assert_eq!(response.status(), StatusCode::OK);
    let headers = response.headers();
    assert_eq!(headers["content-type"], "image/png");
    assert_eq!(headers["content-length"], "100");
    assert_eq!(headers["accept-ranges"], "bytes");
    assert_eq!(body_bytes(response).await, sample().to_vec());
}

// ---------------------------------------------------------------------------
// Test: bounded range returns 206 with inclusive end
// ---------------------------------------------------------------------------

#[tokio::test]
async fn bounded_range_returns_partial_content() {
    let (state, app) = build_test_app();
    let id = state.registry.register(sample(), "wav").await;

    let response = get_range(app, &format!("/{id}"), "bytes=10-19").await;

    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(response.headers()["content-range"], "bytes 10-19/100");
    assert_eq!(response.headers()["content-length"], "10");
    assert_eq!(body_bytes(response).await, (10u8..20).collect::<Vec<u8>>());
}

// ---------------------------------------------------------------------------
// Test: open-ended and suffix ranges
// ---------------------------------------------------------------------------

#[tokio::test]
async fn open_ended_range_runs_to_last_byte() {
    let (state, app) = build_test_app();
    let id = state.registry.register(sample(), "mp4").await;

    let response = get_range(app, &format!("/{id}"), "bytes=90-").await;

    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(response.headers()["content-range"], "bytes 90-99/100");
    assert_eq!(body_bytes(response).await, (90u8..100).collect::<Vec<u8>>());
}

#[tokio::test]
async fn suffix_range_returns_tail() {
    let (state, app) = build_test_app();
    let id = state.registry.register(sample(), "mp4").await;

    let response = get_range(app, &format!("/{id}"), "bytes=-5").await;

    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(response.headers()["content-range"], "bytes 95-99/100");
    assert_eq!(body_bytes(response).await, (95u8..100).collect::<Vec<u8>>());
}

// ---------------------------------------------------------------------------
// Test: range past the end returns 416
// ---------------------------------------------------------------------------

#[tokio::test]
async fn range_past_end_returns_416() {
    let (state, app) = build_test_app();
    let id = state.registry.register(sample(), "png").await;

    let response = get_range(app, &format!("/{id}"), "bytes=100-").await;

    assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
    assert_eq!(response.headers()["content-range"], "bytes */100");
}

// ---------------------------------------------------------------------------
// Test: unparseable Range header is ignored
// ---------------------------------------------------------------------------

#[tokio::test]
async fn malformed_range_serves_full_body() {
    let (state, app) = build_test_app();
    let id = state.registry.register(sample(), "png").await;

    let response = get_range(app, &format!("/{id}"), "items=1-2").await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_bytes(response).await.len(), 100);
}

// ---------------------------------------------------------------------------
// Test: /filelist lists every staged identifier
// ---------------------------------------------------------------------------

#[tokio::test]
async fn filelist_lists_staged_ids() {
    let (state, app) = build_test_app();
    let a = state.registry.register(Bytes::from_static(b"a"), "png").await;
    let b = state.registry.register(Bytes::from_static(b"b"), "wav").await;

    let body = body_text(get(app, "/filelist").await).await;

    let mut listed: Vec<&str> = body.lines().collect();
    listed.sort_unstable();
    let mut expected = vec![a.as_str(), b.as_str()];
    expected.sort_unstable();
    assert_eq!(listed, expected);
}

#[tokio::test]
async fn filelist_empty_registry_is_empty_body() {
    let (_state, app) = build_test_app();
    let response = get(app, "/filelist").await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "");
}

// ---------------------------------------------------------------------------
// Test: root and nested paths are rejected with 400
// ---------------------------------------------------------------------------

#[tokio::test]
async fn root_path_returns_400() {
    let (_state, app) = build_test_app();
    assert_eq!(get(app, "/").await.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn nested_path_returns_400() {
    let (_state, app) = build_test_app();
    assert_eq!(get(app, "/a/b").await.status(), StatusCode::BAD_REQUEST);
}

// ---------------------------------------------------------------------------
// Test: deleted buffers stop being served
// ---------------------------------------------------------------------------

#[tokio::test]
async fn deleted_buffer_returns_404() {
    let (state, app) = build_test_app();
    let id = state.registry.register(sample(), "png").await;
    state.registry.delete(&id).await;

    assert_eq!(get(app, &format!("/{id}")).await.status(), StatusCode::NOT_FOUND);
}

// ---------------------------------------------------------------------------
// Test: x-request-id header is present in response
// ---------------------------------------------------------------------------

#[tokio::test]
async fn response_contains_x_request_id_header() {
    let (_state, app) = build_test_app();
    let response = get(app, "/health").await;

    let request_id = response
        .headers()
        .get("x-request-id")
        .expect("Response must contain an x-request-id header");
    assert_eq!(request_id.to_str().unwrap().len(), 36);
}
