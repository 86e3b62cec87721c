pub mod error;
pub mod messages;
pub mod middleware;
pub mod rooms;
pub mod state;

use axum::{
    Router, middleware as axum_middleware,
    routing::{get, post},
};

use crate::middleware::require_auth;
use crate::state::AppState;

/// REST routes over the chat core. Every route requires a bearer token.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route(
            "/opportunities/{opportunity_id}/messages",
            get(messages::get_messages).post(messages::send_message),
        )
        .route("/opportunities/{opportunity_id}/chat-room", post(rooms::ensure_room))
        .layer(axum_middleware::from_fn_with_state(state.clone(), require_auth))
        .with_state(state)
}
