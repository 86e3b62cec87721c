use std::sync::Arc;

use pledge_chat::messages::MessageStoreAdapter;
use pledge_chat::{ChatBackend, ChatConfig, RoomResolver};
use pledge_gateway::auth::TokenVerifier;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub backend: ChatBackend,
    pub config: ChatConfig,
    pub verifier: TokenVerifier,
}

impl AppStateInner {
    pub fn adapter(&self) -> MessageStoreAdapter {
        MessageStoreAdapter::new(self.backend.messages.clone(), self.config.max_message_chars)
    }

    pub fn resolver(&self) -> RoomResolver {
        RoomResolver::new(self.backend.rooms.clone(), self.adapter())
    }
}
