//! ffstage server library.
//!
//! Exposes the building blocks of both network surfaces (config, state,
//! error handling, the staging routes and the session WebSocket
//! infrastructure) so integration tests and the binary entrypoint can both
//! access them.

pub mod config;
pub mod error;
pub mod router;
pub mod routes;
pub mod state;
pub mod ws;
