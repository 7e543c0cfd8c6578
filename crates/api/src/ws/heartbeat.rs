use std::sync::Arc;
use std::time::Duration;

use crate::ws::manager::SessionManager;

/// Interval between heartbeat pings (in seconds).
const HEARTBEAT_INTERVAL_SECS: u64 = 30;

/// Spawn a background task that sends periodic Ping frames to all live
/// sessions.
///
/// The returned `JoinHandle` is aborted during shutdown.
pub fn start_heartbeat(sessions: Arc<SessionManager>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(HEARTBEAT_INTERVAL_SECS));

        loop {
            interval.tick().await;
            let count = sessions.connection_count().await;
            tracing::debug!(count, "Session heartbeat ping");
            sessions.ping_all().await;
        }
    })
}
