use std::sync::Arc;

use ffstage_core::registry::BufferRegistry;
use ffstage_core::transcode::Transcoder;

use crate::config::ServerConfig;
use crate::ws::SessionManager;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// This is cheaply cloneable (inner data is behind `Arc`).
#[derive(Clone)]
pub struct AppState {
    /// Staged buffers, read by the staging routes.
    pub registry: Arc<BufferRegistry>,
    /// External-tool supervisor used by sessions.
    pub transcoder: Arc<Transcoder>,
    /// Live session connections.
    pub sessions: Arc<SessionManager>,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
}

impl AppState {
    /// Build the state graph from configuration. The registry is shared by
    /// the transcoder (writer) and the staging routes (reader).
    pub fn new(config: ServerConfig) -> Self {
        let registry = Arc::new(BufferRegistry::new());
        let transcoder = Arc::new(Transcoder::new(
            config.transcoder_config(),
            Arc::clone(&registry),
        ));
        Self {
            registry,
            transcoder,
            sessions: Arc::new(SessionManager::new()),
            config: Arc::new(config),
        }
    }
}
