use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

pub use pledge_types::api::ErrorKind;

pub type ChatResult<T> = Result<T, ChatError>;

#[derive(Debug, Clone, Error)]
pub enum ChatError {
    #[error("no authenticated actor")]
    Authentication,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid message: {0}")]
    Validation(String),

    #[error("store unavailable: {0}")]
    Transport(String),

    #[error("chat session did not load within {0:?}")]
    Timeout(Duration),

    /// A concurrent caller bound a room to this opportunity first.
    #[error("chat room for opportunity {0} already exists")]
    Conflict(Uuid),
}

impl ChatError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ChatError::Authentication => ErrorKind::Authentication,
            ChatError::NotFound(_) => ErrorKind::NotFound,
            ChatError::Validation(_) => ErrorKind::Validation,
            ChatError::Transport(_) | ChatError::Timeout(_) | ChatError::Conflict(_) => {
                ErrorKind::Transport
            }
        }
    }

    /// Whether a failed send may be retried as-is once the cause clears.
    pub fn is_recoverable_on_send(&self) -> bool {
        !matches!(self, ChatError::Authentication)
    }
}

impl From<anyhow::Error> for ChatError {
    fn from(e: anyhow::Error) -> Self {
        ChatError::Transport(e.to_string())
    }
}

impl From<tokio::task::JoinError> for ChatError {
    fn from(e: tokio::task::JoinError) -> Self {
        ChatError::Transport(format!("store task failed: {}", e))
    }
}
