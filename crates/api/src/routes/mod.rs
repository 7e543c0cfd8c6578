//! Route trees for the two listeners.
//!
//! ```text
//! Staging listener
//!   GET /            400
//!   GET /health      liveness
//!   GET /filelist    staged identifiers, newline-joined
//!   GET /{id}        staged buffer (Range-capable)
//!
//! Session listener
//!   GET /            WebSocket upgrade, one session per connection
//! ```

pub mod session;
pub mod staging;
