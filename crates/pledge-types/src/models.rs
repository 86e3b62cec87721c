use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Label used when a sender has neither a name nor an email on file.
pub const UNKNOWN_USER: &str = "Unknown User";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    pub id: Uuid,
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Profile {
    pub fn sender_profile(&self) -> SenderProfile {
        SenderProfile {
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
            email: Some(self.email.clone()),
        }
    }
}

/// The slice of a profile joined onto chat messages.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SenderProfile {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
}

impl SenderProfile {
    /// "First Last", then the email, then [`UNKNOWN_USER`].
    pub fn display_name(&self) -> String {
        let full_name = [self.first_name.as_deref(), self.last_name.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join(" ");

        if !full_name.is_empty() {
            return full_name;
        }

        match self.email.as_deref().map(str::trim) {
            Some(email) if !email.is_empty() => email.to_string(),
            _ => UNKNOWN_USER.to_string(),
        }
    }
}

pub fn display_name_for(profile: Option<&SenderProfile>) -> String {
    profile
        .map(SenderProfile::display_name)
        .unwrap_or_else(|| UNKNOWN_USER.to_string())
}

/// Read-only opportunity metadata consumed by the chat layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Opportunity {
    pub id: Uuid,
    pub title: String,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
}

/// One room per opportunity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRoom {
    pub id: Uuid,
    pub opportunity_id: Uuid,
    pub created_at: DateTime<Utc>,
}

/// Messages are immutable once stored. Within a room they are totally
/// ordered by `created_at`, ties broken by `id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: Uuid,
    pub chat_room_id: Uuid,
    pub sender_id: Option<Uuid>,
    pub body: String,
    pub is_system_message: bool,
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    pub fn is_from(&self, actor_id: Uuid) -> bool {
        self.sender_id == Some(actor_id)
    }

    pub fn order_key(&self) -> (DateTime<Utc>, Uuid) {
        (self.created_at, self.id)
    }
}

/// The authenticated user a chat session acts for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: Uuid,
    pub display_name: String,
}

impl Actor {
    pub fn new(id: Uuid, display_name: impl Into<String>) -> Self {
        Self {
            id,
            display_name: display_name.into(),
        }
    }
}

/// A message as held by a chat session: annotated for display and read state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewMessage {
    #[serde(flatten)]
    pub message: ChatMessage,
    pub sender_display_name: String,
    pub is_from_opportunity_owner: bool,
    pub is_read: bool,
}

impl ViewMessage {
    pub fn id(&self) -> Uuid {
        self.message.id
    }
}
