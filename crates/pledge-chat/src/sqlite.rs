use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, error};
use uuid::Uuid;

use pledge_db::models::{MessageRow, OpportunityRow, ProfileRow, RoomInsert, RoomRow};
use pledge_db::{Database, format_timestamp, parse_timestamp};
use pledge_types::models::{ChatMessage, ChatRoom, Opportunity, Profile, SenderProfile};

use crate::error::{ChatError, ChatResult};
use crate::feed::{FeedHub, Subscription};
use crate::store::{
    ChangeFeed, ChatBackend, MessageStore, NewMessage, OpportunityDirectory, RoomStore,
    StoredMessage,
};

/// The chat store over SQLite. Every successful insert is published to the
/// [`FeedHub`] once the row is committed.
#[derive(Clone)]
pub struct SqliteChatStore {
    db: Arc<Database>,
    feed: FeedHub,
}

impl SqliteChatStore {
    pub fn new(db: Arc<Database>, feed: FeedHub) -> Self {
        Self { db, feed }
    }

    pub fn feed(&self) -> &FeedHub {
        &self.feed
    }

    pub fn backend(self: &Arc<Self>) -> ChatBackend {
        ChatBackend::from_store(self.clone())
    }

    /// Runs `f` against the database off the async runtime.
    async fn blocking<F, T>(&self, f: F) -> ChatResult<T>
    where
        F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| {
                error!("spawn_blocking join error: {}", e);
                ChatError::from(e)
            })?
            .map_err(ChatError::from)
    }

    pub async fn profile(&self, user_id: Uuid) -> ChatResult<Option<Profile>> {
        let id = user_id.to_string();
        self.blocking(move |db| db.get_profile(&id)?.map(profile_from_row).transpose())
            .await
    }

    pub async fn add_profile(
        &self,
        email: &str,
        first_name: Option<&str>,
        last_name: Option<&str>,
    ) -> ChatResult<Profile> {
        let profile = Profile {
            id: Uuid::new_v4(),
            email: email.to_string(),
            first_name: first_name.map(str::to_string),
            last_name: last_name.map(str::to_string),
            created_at: Utc::now(),
        };
        let row = profile.clone();
        self.blocking(move |db| {
            db.insert_profile(
                &row.id.to_string(),
                &row.email,
                row.first_name.as_deref(),
                row.last_name.as_deref(),
                &format_timestamp(row.created_at),
            )
        })
        .await?;
        Ok(profile)
    }

    pub async fn add_opportunity(&self, title: &str, created_by: Uuid) -> ChatResult<Opportunity> {
        let opportunity = Opportunity {
            id: Uuid::new_v4(),
            title: title.to_string(),
            created_by,
            created_at: Utc::now(),
        };
        let row = opportunity.clone();
        self.blocking(move |db| {
            db.insert_opportunity(
                &row.id.to_string(),
                &row.title,
                &row.created_by.to_string(),
                &format_timestamp(row.created_at),
            )
        })
        .await?;
        Ok(opportunity)
    }
}

#[async_trait]
impl RoomStore for SqliteChatStore {
    async fn find_room(&self, opportunity_id: Uuid) -> ChatResult<Option<ChatRoom>> {
        let opp = opportunity_id.to_string();
        self.blocking(move |db| db.get_room_by_opportunity(&opp)?.map(room_from_row).transpose())
            .await
    }

    async fn insert_room(&self, opportunity_id: Uuid) -> ChatResult<ChatRoom> {
        let id = Uuid::new_v4().to_string();
        let opp = opportunity_id.to_string();
        let created_at = format_timestamp(Utc::now());

        let outcome = self
            .blocking(move |db| db.create_room(&id, &opp, &created_at))
            .await?;

        match outcome {
            RoomInsert::Created(row) => {
                let room = room_from_row(row)?;
                self.feed.publish_room(room.clone());
                Ok(room)
            }
            RoomInsert::AlreadyExists => {
                debug!(%opportunity_id, "room insert lost to an existing room");
                Err(ChatError::Conflict(opportunity_id))
            }
            RoomInsert::MissingOpportunity => {
                Err(ChatError::NotFound(format!("opportunity {}", opportunity_id)))
            }
        }
    }
}

#[async_trait]
impl MessageStore for SqliteChatStore {
    async fn list_messages(&self, room_id: Uuid) -> ChatResult<Vec<StoredMessage>> {
        let room = room_id.to_string();
        self.blocking(move |db| {
            db.get_messages(&room)?
                .into_iter()
                .map(stored_from_row)
                .collect()
        })
        .await
    }

    async fn insert_message(&self, new: NewMessage) -> ChatResult<ChatMessage> {
        let room_id = new.chat_room_id;
        let id = Uuid::new_v4().to_string();
        let room = room_id.to_string();
        let sender = new.sender_id.map(|s| s.to_string());
        let created_at = format_timestamp(Utc::now());

        let row = self
            .blocking(move |db| {
                db.insert_message(
                    &id,
                    &room,
                    sender.as_deref(),
                    &new.body,
                    new.is_system_message,
                    &created_at,
                )
            })
            .await?
            .ok_or_else(|| ChatError::NotFound(format!("chat room {}", room_id)))?;

        let message = stored_from_row(row)?.message;
        self.feed.publish_message(message.clone());
        Ok(message)
    }

    async fn sender_profile(&self, user_id: Uuid) -> ChatResult<Option<SenderProfile>> {
        Ok(self.profile(user_id).await?.map(|p| p.sender_profile()))
    }
}

#[async_trait]
impl OpportunityDirectory for SqliteChatStore {
    async fn opportunity(&self, opportunity_id: Uuid) -> ChatResult<Option<Opportunity>> {
        let id = opportunity_id.to_string();
        self.blocking(move |db| db.get_opportunity(&id)?.map(opportunity_from_row).transpose())
            .await
    }
}

impl ChangeFeed for SqliteChatStore {
    fn subscribe_room(&self, room_id: Uuid) -> ChatResult<Subscription> {
        Ok(self.feed.subscribe_room(room_id))
    }

    fn watch_room_creation(&self, opportunity_id: Uuid) -> ChatResult<Subscription> {
        Ok(self.feed.watch_room_creation(opportunity_id))
    }
}

fn parse_id(raw: &str, column: &str) -> anyhow::Result<Uuid> {
    raw.parse::<Uuid>()
        .with_context(|| format!("Corrupt {} '{}'", column, raw))
}

fn room_from_row(row: RoomRow) -> anyhow::Result<ChatRoom> {
    Ok(ChatRoom {
        id: parse_id(&row.id, "chat_rooms.id")?,
        opportunity_id: parse_id(&row.opportunity_id, "chat_rooms.opportunity_id")?,
        created_at: parse_timestamp(&row.created_at)?,
    })
}

fn opportunity_from_row(row: OpportunityRow) -> anyhow::Result<Opportunity> {
    Ok(Opportunity {
        id: parse_id(&row.id, "opportunities.id")?,
        title: row.title,
        created_by: parse_id(&row.created_by, "opportunities.created_by")?,
        created_at: parse_timestamp(&row.created_at)?,
    })
}

fn profile_from_row(row: ProfileRow) -> anyhow::Result<Profile> {
    Ok(Profile {
        id: parse_id(&row.id, "profiles.id")?,
        email: row.email,
        first_name: row.first_name,
        last_name: row.last_name,
        created_at: parse_timestamp(&row.created_at)?,
    })
}

fn stored_from_row(row: MessageRow) -> anyhow::Result<StoredMessage> {
    let sender_id = row
        .sender_id
        .as_deref()
        .map(|raw| parse_id(raw, "chat_messages.sender_id"))
        .transpose()?;

    // A sender without a profile row joins as all-NULL columns
    let has_profile = row.sender_email.is_some()
        || row.sender_first_name.is_some()
        || row.sender_last_name.is_some();
    let sender = has_profile.then(|| SenderProfile {
        first_name: row.sender_first_name,
        last_name: row.sender_last_name,
        email: row.sender_email,
    });

    Ok(StoredMessage {
        message: ChatMessage {
            id: parse_id(&row.id, "chat_messages.id")?,
            chat_room_id: parse_id(&row.chat_room_id, "chat_messages.chat_room_id")?,
            sender_id,
            body: row.message,
            is_system_message: row.is_system_message,
            created_at: parse_timestamp(&row.created_at)?,
        },
        sender,
    })
}
