//! Group chat for volunteer opportunities: one room per opportunity, an
//! append-only message log, a realtime change feed and a per-session
//! controller that keeps an ordered, de-duplicated view with unread state.

pub mod config;
pub mod error;
pub mod feed;
pub mod messages;
pub mod notify;
pub mod resolver;
pub mod session;
pub mod sqlite;
pub mod store;
pub mod view;

#[cfg(test)]
mod testing;

pub use config::ChatConfig;
pub use error::{ChatError, ChatResult};
pub use feed::{FeedHub, Subscription};
pub use messages::MessageStoreAdapter;
pub use notify::{MessageNotification, NotificationSink};
pub use resolver::{Announcement, EnsuredRoom, RoomResolver};
pub use session::{ChatSession, Composer, SessionEvent, SessionState};
pub use sqlite::SqliteChatStore;
pub use store::ChatBackend;
pub use view::ChatSessionView;
