use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use uuid::Uuid;

/// A message from someone else that arrived while the chat was not visible.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageNotification {
    pub opportunity_id: Uuid,
    pub opportunity_title: String,
    pub message_id: Uuid,
    pub sender_display_name: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

impl MessageNotification {
    pub fn title(&self) -> String {
        format!("New message from {}", self.sender_display_name)
    }

    /// The body, cut to `max_chars` characters with a trailing `...`.
    pub fn preview(&self, max_chars: usize) -> String {
        if self.body.chars().count() <= max_chars {
            return self.body.clone();
        }
        let mut cut: String = self.body.chars().take(max_chars).collect();
        cut.push_str("...");
        cut
    }
}

/// Receives notify-worthy events; presentation is up to the implementor.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, notification: MessageNotification);
}

/// Forwards notifications to a channel, e.g. a connection's outbound queue.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    tx: mpsc::UnboundedSender<MessageNotification>,
}

impl ChannelNotifier {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<MessageNotification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl NotificationSink for ChannelNotifier {
    fn notify(&self, notification: MessageNotification) {
        // Receiver gone means the connection is closing; nothing to tell.
        let _ = self.tx.send(notification);
    }
}
