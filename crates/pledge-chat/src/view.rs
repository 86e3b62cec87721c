use std::collections::HashSet;

use uuid::Uuid;

use pledge_types::models::ViewMessage;

/// Messages held by one chat session, sorted by `(created_at, id)` with no
/// duplicate ids. `unread_count` always equals the number of messages whose
/// `is_read` is false.
#[derive(Debug, Clone, Default)]
pub struct ChatSessionView {
    messages: Vec<ViewMessage>,
    ids: HashSet<Uuid>,
    unread_count: usize,
}

impl ChatSessionView {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[ViewMessage] {
        &self.messages
    }

    pub fn unread_count(&self) -> usize {
        self.unread_count
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.ids.contains(&id)
    }

    /// Places `message` at its sorted position. Returns false, leaving the
    /// view untouched, if a message with the same id is already held.
    pub fn insert(&mut self, message: ViewMessage) -> bool {
        if !self.ids.insert(message.id()) {
            return false;
        }

        if !message.is_read {
            self.unread_count += 1;
        }

        let key = message.message.order_key();
        let at = self.messages.partition_point(|held| held.message.order_key() <= key);
        self.messages.insert(at, message);
        true
    }

    /// Returns whether anything was unread.
    pub fn mark_all_read(&mut self) -> bool {
        if self.unread_count == 0 {
            return false;
        }
        for message in &mut self.messages {
            message.is_read = true;
        }
        self.unread_count = 0;
        true
    }
}
