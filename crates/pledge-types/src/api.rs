use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::ViewMessage;

// -- Bearer token claims --

/// Claims of the access tokens minted by the external identity platform.
/// Shared by the REST middleware and the WebSocket upgrade.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub aud: Option<String>,
    pub exp: usize,
}

// -- Errors --

/// Coarse failure classes reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Authentication,
    NotFound,
    Validation,
    Transport,
}

// -- Messages --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendMessageRequest {
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageResponse {
    pub id: Uuid,
    pub chat_room_id: Uuid,
    pub sender_id: Option<Uuid>,
    pub sender_name: String,
    pub message: String,
    pub is_system_message: bool,
    pub is_nonprofit_owner: bool,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl From<ViewMessage> for MessageResponse {
    fn from(view: ViewMessage) -> Self {
        Self {
            id: view.message.id,
            chat_room_id: view.message.chat_room_id,
            sender_id: view.message.sender_id,
            sender_name: view.sender_display_name,
            message: view.message.body,
            is_system_message: view.message.is_system_message,
            is_nonprofit_owner: view.is_from_opportunity_owner,
            created_at: view.message.created_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HistoryResponse {
    pub room_id: Option<Uuid>,
    pub opportunity_title: String,
    pub messages: Vec<MessageResponse>,
}

// -- Rooms --

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EnsureRoomRequest {
    #[serde(default)]
    pub announcement: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EnsureRoomResponse {
    pub room_id: Uuid,
    pub created: bool,
}
