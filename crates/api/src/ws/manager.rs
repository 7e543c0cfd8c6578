use std::collections::HashMap;

use axum::body::Bytes;
use axum::extract::ws::{close_code, CloseFrame, Message, Utf8Bytes};
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;

/// Channel sender half for pushing frames to a session's socket.
pub type SessionSender = mpsc::UnboundedSender<Message>;

/// Bookkeeping for one live session.
pub struct SessionHandle {
    /// Channel sender for outbound frames to this session.
    pub sender: SessionSender,
    /// Cancelled to abort the session's in-flight job.
    pub cancel: CancellationToken,
    /// When this connection was established.
    pub connected_at: chrono::DateTime<chrono::Utc>,
}

/// Tracks every live session connection.
///
/// Thread-safe via interior `RwLock`; designed to be wrapped in `Arc` and
/// shared across the application.
pub struct SessionManager {
    sessions: RwLock<HashMap<String, SessionHandle>>,
}

impl SessionManager {
    /// Create a new, empty session manager.
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Register a new session.
    ///
    /// Returns the sender (for the session's own outbound frames) and the
    /// receiver the caller forwards to the WebSocket sink.
    pub async fn add(
        &self,
        session_id: String,
        cancel: CancellationToken,
    ) -> (SessionSender, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = SessionHandle {
            sender: tx.clone(),
            cancel,
            connected_at: chrono::Utc::now(),
        };
        self.sessions.write().await.insert(session_id, handle);
        (tx, rx)
    }

    /// Remove a session by its ID.
    pub async fn remove(&self, session_id: &str) {
        if let Some(handle) = self.sessions.write().await.remove(session_id) {
            let lifetime_ms = (chrono::Utc::now() - handle.connected_at).num_milliseconds();
            tracing::debug!(session_id, lifetime_ms, "Session removed");
        }
    }

    /// Return the current number of live sessions.
    pub async fn connection_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Cancel every in-flight job, send a Close frame to every session, then
    /// clear the map.
    ///
    /// Used during graceful shutdown.
    pub async fn shutdown_all(&self) {
        let mut sessions = self.sessions.write().await;
        let count = sessions.len();
        for handle in sessions.values() {
            handle.cancel.cancel();
            let _ = handle.sender.send(Message::Close(Some(CloseFrame {
                code: close_code::AWAY,
                reason: Utf8Bytes::from_static("server shutting down"),
            })));
        }
        sessions.clear();
        tracing::info!(count, "Closed all sessions");
    }

    /// Send a Ping frame to every live session.
    ///
    /// Used by the heartbeat task to keep idle connections open while a
    /// long job runs.
    pub async fn ping_all(&self) {
        let sessions = self.sessions.read().await;
        for handle in sessions.values() {
            let _ = handle.sender.send(Message::Ping(Bytes::new()));
        }
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}
