//! Session protocol server: one WebSocket connection per session, each
//! running at most one transcoding job.
//!
//! Provides the wire protocol, the per-connection state machine, session
//! tracking and heartbeat monitoring.

mod handler;
mod heartbeat;
pub mod manager;
pub mod protocol;

pub use handler::{ws_handler, SessionState};
pub use heartbeat::start_heartbeat;
pub use manager::SessionManager;
