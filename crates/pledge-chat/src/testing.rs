//! In-memory backend with call counters and failure injection.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use pledge_types::models::{ChatMessage, ChatRoom, Opportunity, SenderProfile};

use crate::error::{ChatError, ChatResult};
use crate::feed::{FeedHub, Subscription};
use crate::store::{
    ChangeFeed, ChatBackend, MessageStore, NewMessage, OpportunityDirectory, RoomStore,
    StoredMessage,
};

#[derive(Default)]
struct FakeState {
    opportunities: HashMap<Uuid, Opportunity>,
    profiles: HashMap<Uuid, SenderProfile>,
    rooms: Vec<ChatRoom>,
    messages: Vec<ChatMessage>,
    fail_lists: bool,
    fail_inserts: bool,
    fail_profiles: bool,
    race_next_room_insert: bool,
    list_delay: Option<Duration>,
    profile_delay: Option<Duration>,
}

#[derive(Default)]
pub struct FakeStore {
    state: Mutex<FakeState>,
    pub feed: FeedHub,
    insert_message_calls: AtomicUsize,
    insert_room_calls: AtomicUsize,
    list_calls: AtomicUsize,
    profile_calls: AtomicUsize,
}

impl FakeStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn backend(self: &Arc<Self>) -> ChatBackend {
        ChatBackend::from_store(self.clone())
    }

    pub fn add_opportunity(&self, owner: Uuid, title: &str) -> Uuid {
        let id = Uuid::new_v4();
        self.state.lock().unwrap().opportunities.insert(
            id,
            Opportunity {
                id,
                title: title.to_string(),
                created_by: owner,
                created_at: Utc::now(),
            },
        );
        id
    }

    pub fn add_profile(&self, id: Uuid, first_name: &str, last_name: &str) {
        self.state.lock().unwrap().profiles.insert(
            id,
            SenderProfile {
                first_name: Some(first_name.to_string()),
                last_name: Some(last_name.to_string()),
                email: Some(format!("{}@example.org", first_name.to_lowercase())),
            },
        );
    }

    /// Seeds a room without publishing it.
    pub fn add_room(&self, opportunity_id: Uuid) -> ChatRoom {
        let room = ChatRoom {
            id: Uuid::new_v4(),
            opportunity_id,
            created_at: Utc::now(),
        };
        self.state.lock().unwrap().rooms.push(room.clone());
        room
    }

    /// Seeds history without publishing it.
    pub fn add_message(
        &self,
        room_id: Uuid,
        sender_id: Option<Uuid>,
        body: &str,
        created_at: DateTime<Utc>,
    ) -> ChatMessage {
        let message = ChatMessage {
            id: Uuid::new_v4(),
            chat_room_id: room_id,
            sender_id,
            body: body.to_string(),
            is_system_message: sender_id.is_none(),
            created_at,
        };
        self.state.lock().unwrap().messages.push(message.clone());
        message
    }

    /// Pushes `message` through the feed as if it had just been inserted.
    pub fn deliver(&self, message: ChatMessage) {
        self.feed.publish_message(message);
    }

    pub fn rooms_for(&self, opportunity_id: Uuid) -> usize {
        self.state
            .lock()
            .unwrap()
            .rooms
            .iter()
            .filter(|room| room.opportunity_id == opportunity_id)
            .count()
    }

    pub fn messages_in(&self, room_id: Uuid) -> Vec<ChatMessage> {
        self.state
            .lock()
            .unwrap()
            .messages
            .iter()
            .filter(|m| m.chat_room_id == room_id)
            .cloned()
            .collect()
    }

    pub fn insert_message_calls(&self) -> usize {
        self.insert_message_calls.load(Ordering::SeqCst)
    }

    pub fn insert_room_calls(&self) -> usize {
        self.insert_room_calls.load(Ordering::SeqCst)
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn fail_lists(&self, fail: bool) {
        self.state.lock().unwrap().fail_lists = fail;
    }

    pub fn fail_inserts(&self, fail: bool) {
        self.state.lock().unwrap().fail_inserts = fail;
    }

    pub fn fail_profiles(&self, fail: bool) {
        self.state.lock().unwrap().fail_profiles = fail;
    }

    /// The next room insert finds that another actor just created the room.
    pub fn race_next_room_insert(&self) {
        self.state.lock().unwrap().race_next_room_insert = true;
    }

    pub fn delay_lists(&self, delay: Duration) {
        self.state.lock().unwrap().list_delay = Some(delay);
    }

    pub fn delay_profiles(&self, delay: Duration) {
        self.state.lock().unwrap().profile_delay = Some(delay);
    }

    pub fn profile_calls(&self) -> usize {
        self.profile_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RoomStore for FakeStore {
    async fn find_room(&self, opportunity_id: Uuid) -> ChatResult<Option<ChatRoom>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .rooms
            .iter()
            .find(|room| room.opportunity_id == opportunity_id)
            .cloned())
    }

    async fn insert_room(&self, opportunity_id: Uuid) -> ChatResult<ChatRoom> {
        self.insert_room_calls.fetch_add(1, Ordering::SeqCst);
        let room = {
            let mut state = self.state.lock().unwrap();
            if !state.opportunities.contains_key(&opportunity_id) {
                return Err(ChatError::NotFound(format!("opportunity {}", opportunity_id)));
            }
            if state.race_next_room_insert {
                state.race_next_room_insert = false;
                let winner = ChatRoom {
                    id: Uuid::new_v4(),
                    opportunity_id,
                    created_at: Utc::now(),
                };
                state.rooms.push(winner);
                return Err(ChatError::Conflict(opportunity_id));
            }
            if state.rooms.iter().any(|room| room.opportunity_id == opportunity_id) {
                return Err(ChatError::Conflict(opportunity_id));
            }
            let room = ChatRoom {
                id: Uuid::new_v4(),
                opportunity_id,
                created_at: Utc::now(),
            };
            state.rooms.push(room.clone());
            room
        };
        self.feed.publish_room(room.clone());
        Ok(room)
    }
}

#[async_trait]
impl MessageStore for FakeStore {
    async fn list_messages(&self, room_id: Uuid) -> ChatResult<Vec<StoredMessage>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let delay = self.state.lock().unwrap().list_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let state = self.state.lock().unwrap();
        if state.fail_lists {
            return Err(ChatError::Transport("connection reset".into()));
        }
        let mut rows: Vec<StoredMessage> = state
            .messages
            .iter()
            .filter(|m| m.chat_room_id == room_id)
            .map(|m| StoredMessage {
                message: m.clone(),
                sender: m.sender_id.and_then(|id| state.profiles.get(&id).cloned()),
            })
            .collect();
        rows.sort_by_key(|row| row.message.order_key());
        Ok(rows)
    }

    async fn insert_message(&self, new: NewMessage) -> ChatResult<ChatMessage> {
        self.insert_message_calls.fetch_add(1, Ordering::SeqCst);
        let message = {
            let mut state = self.state.lock().unwrap();
            if state.fail_inserts {
                return Err(ChatError::Transport("connection reset".into()));
            }
            if !state.rooms.iter().any(|room| room.id == new.chat_room_id) {
                return Err(ChatError::NotFound(format!("chat room {}", new.chat_room_id)));
            }
            let message = ChatMessage {
                id: Uuid::new_v4(),
                chat_room_id: new.chat_room_id,
                sender_id: new.sender_id,
                body: new.body,
                is_system_message: new.is_system_message,
                created_at: Utc::now(),
            };
            state.messages.push(message.clone());
            message
        };
        self.feed.publish_message(message.clone());
        Ok(message)
    }

    async fn sender_profile(&self, user_id: Uuid) -> ChatResult<Option<SenderProfile>> {
        self.profile_calls.fetch_add(1, Ordering::SeqCst);
        let delay = self.state.lock().unwrap().profile_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let state = self.state.lock().unwrap();
        if state.fail_profiles {
            return Err(ChatError::Transport("connection reset".into()));
        }
        Ok(state.profiles.get(&user_id).cloned())
    }
}

#[async_trait]
impl OpportunityDirectory for FakeStore {
    async fn opportunity(&self, opportunity_id: Uuid) -> ChatResult<Option<Opportunity>> {
        Ok(self.state.lock().unwrap().opportunities.get(&opportunity_id).cloned())
    }
}

impl ChangeFeed for FakeStore {
    fn subscribe_room(&self, room_id: Uuid) -> ChatResult<Subscription> {
        Ok(self.feed.subscribe_room(room_id))
    }

    fn watch_room_creation(&self, opportunity_id: Uuid) -> ChatResult<Subscription> {
        Ok(self.feed.watch_room_creation(opportunity_id))
    }
}
