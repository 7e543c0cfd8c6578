use axum::routing::get;
use axum::Router;

use crate::state::AppState;
use crate::ws;

/// Mount the session WebSocket endpoint. Clients connect to the bare
/// listener address, so the upgrade is served on `/` and on any other path.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(ws::ws_handler))
        .fallback(ws::ws_handler)
}
