pub mod config;

use axum::{
    Router,
    extract::{Path, Query, State, WebSocketUpgrade},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::debug;
use uuid::Uuid;

use pledge_api::error::reject;
use pledge_api::state::AppState;
use pledge_gateway::auth::resolve_actor;
use pledge_gateway::connection;

/// REST routes plus the chat WebSocket, with CORS and request tracing.
pub fn app(state: AppState) -> Router {
    let ws_route = Router::new()
        .route("/opportunities/{opportunity_id}/chat", get(ws_upgrade))
        .with_state(state.clone());

    Router::new()
        .merge(pledge_api::router(state))
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

#[derive(Debug, Deserialize)]
struct WsQuery {
    token: Option<String>,
}

/// Browsers cannot set headers on a WebSocket handshake, so the token rides
/// in the query string. It is verified before upgrading.
async fn ws_upgrade(
    State(state): State<AppState>,
    Path(opportunity_id): Path<Uuid>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Result<impl IntoResponse, StatusCode> {
    let token = query.token.ok_or(StatusCode::UNAUTHORIZED)?;
    let claims = state.verifier.verify(&token).map_err(|e| {
        debug!("rejected gateway token: {}", e);
        StatusCode::UNAUTHORIZED
    })?;
    let actor = resolve_actor(&state.backend, &claims).await.map_err(reject)?;

    let backend = state.backend.clone();
    let config = state.config.clone();
    Ok(ws.on_upgrade(move |socket| {
        connection::handle_connection(socket, backend, config, opportunity_id, actor)
    }))
}
