use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::ErrorKind;
use crate::models::{ChatMessage, ChatRoom, ViewMessage};

/// Change notifications pushed by the store's realtime feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum FeedEvent {
    /// A row was appended to `chat_messages`
    MessageInserted(ChatMessage),

    /// A row was appended to `chat_rooms`
    RoomCreated(ChatRoom),
}

/// Events sent over the chat WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayEvent {
    /// The session finished loading
    Ready {
        room_id: Option<Uuid>,
        opportunity_title: String,
        messages: Vec<ViewMessage>,
        unread_count: usize,
    },

    /// The session failed to load and must be reopened
    LoadFailed { kind: ErrorKind, reason: String },

    /// A message joined the session's view
    MessageCreate { message: ViewMessage },

    /// The unread counter changed
    UnreadCount { count: usize },

    /// A message from someone else arrived while the chat was in background
    Notification {
        title: String,
        preview: String,
        created_at: chrono::DateTime<chrono::Utc>,
    },

    /// The store accepted a send; the message itself follows via `MessageCreate`
    SendAccepted { client_ref: String, message_id: Uuid },

    /// A send failed; the client keeps its draft and may retry
    SendFailed {
        client_ref: String,
        kind: ErrorKind,
        reason: String,
    },
}

/// Commands sent FROM client TO server over WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayCommand {
    /// Post a message to the opportunity's room
    Send { client_ref: String, body: String },

    /// Mark everything currently held as read
    MarkRead,

    /// Report whether the chat is currently visible
    Visibility { foreground: bool },
}
