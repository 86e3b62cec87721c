use std::sync::Arc;

use tracing::debug;
use uuid::Uuid;

use pledge_types::models::{ChatMessage, SenderProfile, ViewMessage, display_name_for};

use crate::error::{ChatError, ChatResult};
use crate::store::{MessageStore, NewMessage, StoredMessage};

/// Validating, enriching front of the message log.
#[derive(Clone)]
pub struct MessageStoreAdapter {
    store: Arc<dyn MessageStore>,
    max_chars: usize,
}

impl MessageStoreAdapter {
    pub fn new(store: Arc<dyn MessageStore>, max_chars: usize) -> Self {
        Self { store, max_chars }
    }

    /// Rejects blank bodies and bodies longer than the configured cap.
    pub fn validate_body(&self, body: &str) -> ChatResult<()> {
        validate_body(body, self.max_chars)
    }

    /// Room history, oldest first, annotated with sender names and owner
    /// flags. Read state is left unset; sessions assign it.
    pub async fn list_messages(
        &self,
        room_id: Uuid,
        owner_id: Option<Uuid>,
    ) -> ChatResult<Vec<ViewMessage>> {
        let mut rows = self.store.list_messages(room_id).await?;
        rows.sort_by_key(|row| row.message.order_key());

        debug!(%room_id, count = rows.len(), "listed chat history");
        Ok(rows.into_iter().map(|row| enrich(row, owner_id)).collect())
    }

    pub async fn append_message(
        &self,
        room_id: Uuid,
        sender_id: Option<Uuid>,
        body: &str,
        is_system_message: bool,
    ) -> ChatResult<ChatMessage> {
        self.validate_body(body)?;

        let message = self
            .store
            .insert_message(NewMessage {
                chat_room_id: room_id,
                sender_id,
                body: body.to_string(),
                is_system_message,
            })
            .await?;

        debug!(
            %room_id,
            message_id = %message.id,
            chars = body.chars().count(),
            is_system_message,
            "message appended"
        );
        Ok(message)
    }

    pub async fn sender_profile(&self, user_id: Uuid) -> ChatResult<Option<SenderProfile>> {
        self.store.sender_profile(user_id).await
    }
}

pub fn validate_body(body: &str, max_chars: usize) -> ChatResult<()> {
    if body.trim().is_empty() {
        return Err(ChatError::Validation("message is empty".into()));
    }

    let chars = body.chars().count();
    if chars > max_chars {
        return Err(ChatError::Validation(format!(
            "message is {} characters, limit is {}",
            chars, max_chars
        )));
    }

    Ok(())
}

pub fn enrich(row: StoredMessage, owner_id: Option<Uuid>) -> ViewMessage {
    let sender_display_name = display_name_for(row.sender.as_ref());
    annotate(row.message, sender_display_name, owner_id)
}

pub fn annotate(message: ChatMessage, sender_display_name: String, owner_id: Option<Uuid>) -> ViewMessage {
    let is_from_opportunity_owner = owner_id.is_some() && message.sender_id == owner_id;
    ViewMessage {
        message,
        sender_display_name,
        is_from_opportunity_owner,
        is_read: false,
    }
}
