//! Seams between the chat core and the durable store behind it.

use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use pledge_types::models::{ChatMessage, ChatRoom, Opportunity, SenderProfile};

use crate::error::ChatResult;
use crate::feed::Subscription;

/// `chat_rooms`: at most one row per opportunity.
#[async_trait]
pub trait RoomStore: Send + Sync {
    async fn find_room(&self, opportunity_id: Uuid) -> ChatResult<Option<ChatRoom>>;

    /// Fails with `Conflict` when another caller already bound a room to
    /// the opportunity and with `NotFound` when the opportunity is unknown.
    async fn insert_room(&self, opportunity_id: Uuid) -> ChatResult<ChatRoom>;
}

/// A stored message joined with its sender's profile, if any.
#[derive(Debug, Clone)]
pub struct StoredMessage {
    pub message: ChatMessage,
    pub sender: Option<SenderProfile>,
}

#[derive(Debug, Clone)]
pub struct NewMessage {
    pub chat_room_id: Uuid,
    pub sender_id: Option<Uuid>,
    pub body: String,
    pub is_system_message: bool,
}

/// `chat_messages`, append-only.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Whole history of a room, `created_at` ascending then `id`.
    async fn list_messages(&self, room_id: Uuid) -> ChatResult<Vec<StoredMessage>>;

    /// Fails with `NotFound` when the room does not exist.
    async fn insert_message(&self, new: NewMessage) -> ChatResult<ChatMessage>;

    async fn sender_profile(&self, user_id: Uuid) -> ChatResult<Option<SenderProfile>>;
}

#[async_trait]
pub trait OpportunityDirectory: Send + Sync {
    async fn opportunity(&self, opportunity_id: Uuid) -> ChatResult<Option<Opportunity>>;
}

/// Realtime push of store changes.
pub trait ChangeFeed: Send + Sync {
    fn subscribe_room(&self, room_id: Uuid) -> ChatResult<Subscription>;

    fn watch_room_creation(&self, opportunity_id: Uuid) -> ChatResult<Subscription>;
}

/// Everything a chat session needs from the outside world.
#[derive(Clone)]
pub struct ChatBackend {
    pub rooms: Arc<dyn RoomStore>,
    pub messages: Arc<dyn MessageStore>,
    pub opportunities: Arc<dyn OpportunityDirectory>,
    pub feed: Arc<dyn ChangeFeed>,
}

impl ChatBackend {
    /// Backend whose every seam is served by one store.
    pub fn from_store<S>(store: Arc<S>) -> Self
    where
        S: RoomStore + MessageStore + OpportunityDirectory + ChangeFeed + 'static,
    {
        Self {
            rooms: store.clone(),
            messages: store.clone(),
            opportunities: store.clone(),
            feed: store,
        }
    }
}
