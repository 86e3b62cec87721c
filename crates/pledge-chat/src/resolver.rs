use std::sync::Arc;

use tracing::{debug, info, warn};
use uuid::Uuid;

use pledge_types::models::ChatRoom;

use crate::error::{ChatError, ChatResult};
use crate::messages::MessageStoreAdapter;
use crate::store::RoomStore;

/// A system message posted when a room is first created.
#[derive(Debug, Clone)]
pub struct Announcement {
    /// Actor whose action created the room
    pub actor_id: Option<Uuid>,
    pub text: String,
}

#[derive(Debug, Clone)]
pub struct EnsuredRoom {
    pub room: ChatRoom,
    /// Whether this call created the room
    pub created: bool,
}

/// Maps an opportunity to its single chat room, creating it on demand.
#[derive(Clone)]
pub struct RoomResolver {
    rooms: Arc<dyn RoomStore>,
    messages: MessageStoreAdapter,
}

impl RoomResolver {
    pub fn new(rooms: Arc<dyn RoomStore>, messages: MessageStoreAdapter) -> Self {
        Self { rooms, messages }
    }

    pub async fn find_room(&self, opportunity_id: Uuid) -> ChatResult<Option<ChatRoom>> {
        self.rooms.find_room(opportunity_id).await
    }

    /// Looks the room up and creates it if missing. Losing a creation race
    /// to another caller is not an error: the winner's room is returned.
    pub async fn resolve_or_create(&self, opportunity_id: Uuid) -> ChatResult<EnsuredRoom> {
        if let Some(room) = self.rooms.find_room(opportunity_id).await? {
            return Ok(EnsuredRoom { room, created: false });
        }

        match self.rooms.insert_room(opportunity_id).await {
            Ok(room) => {
                info!(%opportunity_id, room_id = %room.id, "chat room created");
                Ok(EnsuredRoom { room, created: true })
            }
            Err(ChatError::Conflict(_)) => {
                debug!(%opportunity_id, "chat room created concurrently, re-fetching");
                let room = self.rooms.find_room(opportunity_id).await?.ok_or_else(|| {
                    ChatError::NotFound(format!("chat room for opportunity {}", opportunity_id))
                })?;
                Ok(EnsuredRoom { room, created: false })
            }
            Err(e) => Err(e),
        }
    }

    /// [`Self::resolve_or_create`], posting `announcement` only if this call
    /// created the room. The announcement text is checked only when the room
    /// is still missing, and before it is created.
    pub async fn ensure_room(
        &self,
        opportunity_id: Uuid,
        announcement: Option<Announcement>,
    ) -> ChatResult<EnsuredRoom> {
        if let Some(room) = self.rooms.find_room(opportunity_id).await? {
            return Ok(EnsuredRoom { room, created: false });
        }
        if let Some(announcement) = &announcement {
            self.messages.validate_body(&announcement.text)?;
        }

        let ensured = self.resolve_or_create(opportunity_id).await?;

        if ensured.created {
            if let Some(announcement) = announcement {
                self.messages
                    .append_message(ensured.room.id, announcement.actor_id, &announcement.text, true)
                    .await
                    .inspect_err(|e| {
                        warn!(room_id = %ensured.room.id, "failed to post room announcement: {}", e);
                    })?;
            }
        }

        Ok(ensured)
    }
}
