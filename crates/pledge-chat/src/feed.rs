use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::task::{Context, Poll};

use futures_util::Stream;
use tokio::sync::mpsc;
use tracing::{debug, trace};
use uuid::Uuid;

use pledge_types::events::FeedEvent;
use pledge_types::models::{ChatMessage, ChatRoom};

use crate::error::ChatResult;
use crate::store::ChangeFeed;

/// key (room or opportunity id) -> registration id -> sender
type Registrations = HashMap<Uuid, HashMap<u64, mpsc::UnboundedSender<FeedEvent>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Topic {
    /// Message inserts, keyed by room id
    Room,
    /// Room creation, keyed by opportunity id
    Opportunity,
}

/// In-process realtime feed. Stores publish after every successful insert;
/// sessions hold [`Subscription`]s.
#[derive(Clone, Default)]
pub struct FeedHub {
    inner: Arc<FeedHubInner>,
}

#[derive(Default)]
struct FeedHubInner {
    next_id: AtomicU64,
    rooms: Mutex<Registrations>,
    opportunities: Mutex<Registrations>,
}

impl FeedHubInner {
    fn registrations(&self, topic: Topic) -> &Mutex<Registrations> {
        match topic {
            Topic::Room => &self.rooms,
            Topic::Opportunity => &self.opportunities,
        }
    }

    fn remove(&self, topic: Topic, key: Uuid, id: u64) {
        let mut registrations = self
            .registrations(topic)
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(subscribers) = registrations.get_mut(&key) {
            subscribers.remove(&id);
            if subscribers.is_empty() {
                registrations.remove(&key);
            }
        }
    }
}

impl FeedHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver a newly stored message to every subscriber of its room.
    pub fn publish_message(&self, message: ChatMessage) {
        let room_id = message.chat_room_id;
        self.publish(Topic::Room, room_id, FeedEvent::MessageInserted(message));
    }

    /// Deliver a newly created room to everyone watching its opportunity.
    pub fn publish_room(&self, room: ChatRoom) {
        let opportunity_id = room.opportunity_id;
        self.publish(Topic::Opportunity, opportunity_id, FeedEvent::RoomCreated(room));
    }

    pub fn subscribe_room(&self, room_id: Uuid) -> Subscription {
        self.register(Topic::Room, room_id)
    }

    pub fn watch_room_creation(&self, opportunity_id: Uuid) -> Subscription {
        self.register(Topic::Opportunity, opportunity_id)
    }

    /// Number of registrations that have not been cancelled yet.
    pub fn live_registrations(&self) -> usize {
        [Topic::Room, Topic::Opportunity]
            .into_iter()
            .map(|topic| {
                self.inner
                    .registrations(topic)
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .values()
                    .map(HashMap::len)
                    .sum::<usize>()
            })
            .sum()
    }

    fn register(&self, topic: Topic, key: Uuid) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();

        self.inner
            .registrations(topic)
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key)
            .or_default()
            .insert(id, tx);

        debug!(?topic, %key, id, "feed registration added");

        let hub: Weak<FeedHubInner> = Arc::downgrade(&self.inner);
        Subscription::new(rx, move || {
            if let Some(inner) = hub.upgrade() {
                inner.remove(topic, key, id);
                debug!(?topic, %key, id, "feed registration removed");
            }
        })
    }

    fn publish(&self, topic: Topic, key: Uuid, event: FeedEvent) {
        let mut registrations = self
            .inner
            .registrations(topic)
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let Some(subscribers) = registrations.get_mut(&key) else {
            trace!(?topic, %key, "no subscribers");
            return;
        };

        // Drop registrations whose receiver went away without unsubscribing
        subscribers.retain(|_, tx| tx.send(event.clone()).is_ok());
        if subscribers.is_empty() {
            registrations.remove(&key);
        }
    }
}

impl ChangeFeed for FeedHub {
    fn subscribe_room(&self, room_id: Uuid) -> ChatResult<Subscription> {
        Ok(FeedHub::subscribe_room(self, room_id))
    }

    fn watch_room_creation(&self, opportunity_id: Uuid) -> ChatResult<Subscription> {
        Ok(FeedHub::watch_room_creation(self, opportunity_id))
    }
}

/// A cancellable stream of feed events for one room or opportunity.
///
/// Cancelling is idempotent and also happens on drop, so a registration
/// never outlives its owner.
pub struct Subscription {
    rx: mpsc::UnboundedReceiver<FeedEvent>,
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub fn new<F>(rx: mpsc::UnboundedReceiver<FeedEvent>, cancel: F) -> Self
    where
        F: FnOnce() + Send + Sync + 'static,
    {
        Self {
            rx,
            cancel: Some(Box::new(cancel)),
        }
    }

    pub fn is_active(&self) -> bool {
        self.cancel.is_some()
    }

    /// Next event, or `None` once cancelled or the feed closed.
    /// Cancel safe.
    pub async fn recv(&mut self) -> Option<FeedEvent> {
        if !self.is_active() {
            return None;
        }
        self.rx.recv().await
    }

    pub fn unsubscribe(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
            self.rx.close();
        }
    }
}

impl Stream for Subscription {
    type Item = FeedEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if !this.is_active() {
            return Poll::Ready(None);
        }
        this.rx.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}
