// Public API for integration tests and potential library usage

pub mod api;
pub mod broadcast;
pub mod clock;
pub mod config;
pub mod cooldown;
pub mod llm;
pub mod protocol;
pub mod scoring;
pub mod state;
pub mod store;
pub mod types;
pub mod ws;

#[cfg(test)]
mod testing;

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

/// HTTP and WebSocket routes, without the tracing/CORS layers added in `main`
pub fn router(state: Arc<state::AppState>) -> Router {
    Router::new()
        .route("/ws", get(ws::ws_handler))
        .route("/api/sessions", post(api::create_session))
        .route("/api/sessions/join", post(api::join_session))
        .route("/api/sessions/{id}", get(api::get_session))
        .with_state(state)
}
