use axum::{
    Extension, Json,
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::info;
use uuid::Uuid;

use pledge_chat::Announcement;
use pledge_chat::config::DEFAULT_ANNOUNCEMENT;
use pledge_types::api::{Claims, EnsureRoomRequest, EnsureRoomResponse};

use crate::error::reject;
use crate::state::AppState;

/// Makes sure the opportunity has its room, posting the assignment
/// announcement if this call created it. The body is optional.
pub async fn ensure_room(
    State(state): State<AppState>,
    Path(opportunity_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    body: Bytes,
) -> Result<impl IntoResponse, StatusCode> {
    let req: EnsureRoomRequest = if body.is_empty() {
        EnsureRoomRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|_| StatusCode::BAD_REQUEST)?
    };

    let text = req
        .announcement
        .unwrap_or_else(|| DEFAULT_ANNOUNCEMENT.to_string());

    let announcement = Announcement {
        actor_id: Some(claims.sub),
        text,
    };
    let ensured = state
        .resolver()
        .ensure_room(opportunity_id, Some(announcement))
        .await
        .map_err(reject)?;

    if ensured.created {
        info!(%opportunity_id, room_id = %ensured.room.id, actor_id = %claims.sub, "room ensured with announcement");
    }

    let status = if ensured.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((
        status,
        Json(EnsureRoomResponse {
            room_id: ensured.room.id,
            created: ensured.created,
        }),
    ))
}
