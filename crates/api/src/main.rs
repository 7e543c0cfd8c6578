use std::net::SocketAddr;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ffstage_api::config::ServerConfig;
use ffstage_api::router::{build_session_router, build_staging_router};
use ffstage_api::state::AppState;
use ffstage_api::ws;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "ffstage_api=debug,ffstage_core=debug,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = ServerConfig::from_env();
    tracing::info!(
        host = %config.host,
        staging_port = config.staging_port,
        session_port = config.session_port,
        ffmpeg = %config.ffmpeg_bin,
        max_concurrent_jobs = config.max_concurrent_jobs,
        retain_staged = config.retain_staged,
        "Loaded server configuration"
    );
    if config.retain_staged {
        tracing::warn!("FFMPEG_VERBOSE is set: staged buffers will not be cleaned up");
    }

    // --- App state ---
    let state = AppState::new(config.clone());

    // --- Heartbeat ---
    let heartbeat_handle = ws::start_heartbeat(state.sessions.clone());

    // --- Listeners ---
    // Staging must be up before any session can hand the tool a URL.
    let staging_addr = socket_addr(&config.host, config.staging_port);
    let staging_listener = tokio::net::TcpListener::bind(staging_addr)
        .await
        .expect("Failed to bind staging address");
    tracing::info!(addr = %staging_addr, "Staging server listening");

    let session_addr = socket_addr(&config.host, config.session_port);
    let session_listener = tokio::net::TcpListener::bind(session_addr)
        .await
        .expect("Failed to bind session address");
    tracing::info!(addr = %session_addr, "Session server listening");

    let shutdown = CancellationToken::new();

    let staging_server = axum::serve(staging_listener, build_staging_router(state.clone()))
        .with_graceful_shutdown(shutdown.clone().cancelled_owned());
    let session_server = axum::serve(session_listener, build_session_router(state.clone()))
        .with_graceful_shutdown(shutdown.clone().cancelled_owned());

    // Upgraded sessions are not drained by axum; close them ourselves once
    // the signal arrives so both servers can finish.
    let signal_task = {
        let shutdown = shutdown.clone();
        let state = state.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            state.transcoder.shutdown();
            shutdown.cancel();
            let count = state.sessions.connection_count().await;
            tracing::info!(count, "Closing remaining sessions");
            state.sessions.shutdown_all().await;
        })
    };

    let (staging_result, session_result) = tokio::join!(
        async { staging_server.await },
        async { session_server.await },
    );
    if let Err(e) = staging_result {
        tracing::error!(error = %e, "Staging server error");
    }
    if let Err(e) = session_result {
        tracing::error!(error = %e, "Session server error");
    }

    // --- Post-shutdown cleanup ---
    tracing::info!("Servers stopped accepting connections, cleaning up");
    let _ = tokio::time::timeout(Duration::from_secs(5), signal_task).await;

    heartbeat_handle.abort();
    tracing::info!("Heartbeat task stopped");

    let dropped = state.registry.clear().await;
    tracing::info!(dropped, "Buffer registry cleared");

    tracing::info!("Graceful shutdown complete");
}

fn socket_addr(host: &str, port: u16) -> SocketAddr {
    SocketAddr::new(host.parse().expect("Invalid HOST address"), port)
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
