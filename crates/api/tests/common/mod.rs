#![allow(dead_code)]

use std::net::SocketAddr;
use std::os::unix::fs::PermissionsExt;

use axum::body::Body;
use axum::http::{Request, Response};
use axum::Router;
use http_body_util::BodyExt;
use tokio::net::TcpListener;
use tower::ServiceExt;

use ffstage_api::config::ServerConfig;
use ffstage_api::router::{build_session_router, build_staging_router};
use ffstage_api::state::AppState;

/// Build a test `ServerConfig` with safe defaults.
///
/// Ports are left at 0; [`spawn_servers`] binds ephemeral listeners and
/// points the staging base URL at the real address.
pub fn test_config(ffmpeg_bin: &str) -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        staging_port: 0,
        session_port: 0,
        staging_base_url: "http://127.0.0.1:0/".to_string(),
        ffmpeg_bin: ffmpeg_bin.to_string(),
        job_timeout_secs: 30,
        max_concurrent_jobs: 2,
        request_timeout_secs: 30,
        retain_staged: false,
    }
}

/// State plus the staging router, for `oneshot` tests that never spawn the
/// external tool.
pub fn build_test_app() -> (AppState, Router) {
    let state = AppState::new(test_config("ffmpeg"));
    let app = build_staging_router(state.clone());
    (state, app)
}

/// Both listeners running on ephemeral ports.
pub struct TestServers {
    pub state: AppState,
    pub staging_addr: SocketAddr,
    pub session_url: String,
}

/// Bind and serve both routers in the background.
pub async fn spawn_servers(ffmpeg_bin: &str) -> TestServers {
    let staging_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let staging_addr = staging_listener.local_addr().unwrap();
    let session_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let session_addr = session_listener.local_addr().unwrap();

    let mut config = test_config(ffmpeg_bin);
    config.staging_port = staging_addr.port();
    config.session_port = session_addr.port();
    config.staging_base_url = format!("http://{staging_addr}/");

    let state = AppState::new(config);

    let staging = build_staging_router(state.clone());
    tokio::spawn(async move {
        axum::serve(staging_listener, staging).await.unwrap();
    });
    let session = build_session_router(state.clone());
    tokio::spawn(async move {
        axum::serve(session_listener, session).await.unwrap();
    });

    TestServers {
        state,
        staging_addr,
        session_url: format!("ws://{session_addr}/"),
    }
}

/// Write an executable shell script standing in for the external tool.
pub fn fake_tool(dir: &tempfile::TempDir, body: &str) -> String {
    let path = dir.path().join("fake-ffmpeg");
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("write script");
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
        .expect("chmod script");
    path.to_str().expect("path").to_string()
}

/// Send a GET request to the given URI and return the response.
pub async fn get(app: Router, uri: &str) -> Response<Body> {
    send(app, Request::get(uri).body(Body::empty()).unwrap()).await
}

/// Send a GET request with a `Range` header.
pub async fn get_range(app: Router, uri: &str, range: &str) -> Response<Body> {
    let request = Request::get(uri)
        .header("range", range)
        .body(Body::empty())
        .unwrap();
    send(app, request).await
}

async fn send(app: Router, request: Request<Body>) -> Response<Body> {
    app.oneshot(request).await.unwrap()
}

/// Collect a response body into bytes.
pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    response
        .into_body()
        .collect()
        .await
        .unwrap()
        .to_bytes()
        .to_vec()
}

/// Collect a response body into a string.
pub async fn body_text(response: Response<Body>) -> String {
    String::from_utf8(body_bytes(response).await).unwrap()
}
