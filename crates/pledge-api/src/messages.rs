use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::debug;
use uuid::Uuid;

use pledge_chat::messages::annotate;
use pledge_chat::{ChatError, Composer};
use pledge_gateway::auth::resolve_actor;
use pledge_types::api::{Claims, HistoryResponse, MessageResponse, SendMessageRequest};
use pledge_types::models::Opportunity;

use crate::error::reject;
use crate::state::AppState;

pub(crate) async fn load_opportunity(
    state: &AppState,
    opportunity_id: Uuid,
) -> Result<Opportunity, StatusCode> {
    state
        .backend
        .opportunities
        .opportunity(opportunity_id)
        .await
        .map_err(reject)?
        .ok_or_else(|| reject(ChatError::NotFound(format!("opportunity {}", opportunity_id))))
}

/// Whole room history, owner-flagged. An opportunity without a room yet has
/// an empty history.
pub async fn get_messages(
    State(state): State<AppState>,
    Path(opportunity_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<HistoryResponse>, StatusCode> {
    let opportunity = load_opportunity(&state, opportunity_id).await?;
    let room = state.resolver().find_room(opportunity_id).await.map_err(reject)?;

    let messages = match &room {
        Some(room) => state
            .adapter()
            .list_messages(room.id, Some(opportunity.created_by))
            .await
            .map_err(reject)?,
        None => Vec::new(),
    };

    debug!(%opportunity_id, actor_id = %claims.sub, count = messages.len(), "served chat history");

    Ok(Json(HistoryResponse {
        room_id: room.map(|room| room.id),
        opportunity_title: opportunity.title,
        messages: messages.into_iter().map(MessageResponse::from).collect(),
    }))
}

/// Creates the room on first use, then appends. Returns the stored row.
pub async fn send_message(
    State(state): State<AppState>,
    Path(opportunity_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let opportunity = load_opportunity(&state, opportunity_id).await?;
    let actor = resolve_actor(&state.backend, &claims).await.map_err(reject)?;

    let composer = Composer::new(opportunity_id, actor.id, state.resolver(), state.adapter());
    let message = composer.send(&req.message).await.map_err(reject)?;

    let view = annotate(message, actor.display_name, Some(opportunity.created_by));
    Ok((StatusCode::CREATED, Json(MessageResponse::from(view))))
}
