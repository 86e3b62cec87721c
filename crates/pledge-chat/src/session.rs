use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use pledge_types::events::FeedEvent;
use pledge_types::models::{
    Actor, ChatMessage, ChatRoom, Opportunity, UNKNOWN_USER, ViewMessage, display_name_for,
};

use crate::config::ChatConfig;
use crate::error::{ChatError, ChatResult};
use crate::feed::Subscription;
use crate::messages::{MessageStoreAdapter, annotate};
use crate::notify::{MessageNotification, NotificationSink};
use crate::resolver::RoomResolver;
use crate::store::ChatBackend;
use crate::view::ChatSessionView;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Loading,
    Ready,
    /// Loading failed or live updates stopped; reopen to recover
    Failed,
}

/// Changes to a session's view, in the order they happened.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// A message joined the view
    MessageAdded(ViewMessage),
    /// The unread counter went up
    UnreadChanged(usize),
    /// The opportunity's room was created after the session opened
    RoomAttached(ChatRoom),
    /// The change feed ended; nothing more will arrive until reopened
    FeedLost(ChatError),
}

/// Chat state for one opportunity on behalf of one actor.
///
/// `open` loads the room's history and subscribes to its feed, `next_event`
/// reconciles feed deliveries into the view, `close` tears it all down.
/// Sends go through a [`Composer`] so they can run while events are being
/// processed.
pub struct ChatSession {
    opportunity_id: Uuid,
    backend: ChatBackend,
    config: ChatConfig,
    notifier: Arc<dyn NotificationSink>,
    adapter: MessageStoreAdapter,
    resolver: RoomResolver,
    state: SessionState,
    live: Option<Live>,
    foreground: bool,
    in_flight: Arc<AtomicUsize>,
}

/// Everything that exists only between open and close.
struct Live {
    actor: Actor,
    opportunity: Opportunity,
    room: Option<ChatRoom>,
    view: ChatSessionView,
    subscription: Option<Subscription>,
    room_watch: Option<Subscription>,
    /// Room announced by the feed but not attached yet
    pending_room: Option<ChatRoom>,
    /// Feed messages taken off the subscription but not in the view yet
    inbox: VecDeque<ChatMessage>,
    events: VecDeque<SessionEvent>,
    display_names: HashMap<Uuid, String>,
}

impl Live {
    fn new(actor: Actor, opportunity: Opportunity) -> Self {
        Self {
            actor,
            opportunity,
            room: None,
            view: ChatSessionView::new(),
            subscription: None,
            room_watch: None,
            pending_room: None,
            inbox: VecDeque::new(),
            events: VecDeque::new(),
            display_names: HashMap::new(),
        }
    }

    fn owner_id(&self) -> Option<Uuid> {
        Some(self.opportunity.created_by)
    }

    fn attach(&mut self, room: ChatRoom, subscription: Subscription) {
        if let Some(mut watch) = self.room_watch.take() {
            watch.unsubscribe();
        }
        self.pending_room = None;
        self.room = Some(room);
        self.subscription = Some(subscription);
    }

    fn remember_sender(&mut self, message: &ViewMessage) {
        if let Some(sender_id) = message.message.sender_id {
            if message.sender_display_name != UNKNOWN_USER {
                self.display_names
                    .entry(sender_id)
                    .or_insert_with(|| message.sender_display_name.clone());
            }
        }
    }

    /// History rule: unread means written by someone else after `cutoff`.
    fn admit_history(&mut self, mut message: ViewMessage, cutoff: DateTime<Utc>) {
        let from_other = !message.message.is_from(self.actor.id);
        message.is_read = !(from_other && message.message.created_at > cutoff);
        self.remember_sender(&message);
        self.view.insert(message);
    }

    /// Live rule: messages from others are unread unless the chat is in the
    /// foreground. Returns the notification to raise, if any.
    fn admit_live(&mut self, mut message: ViewMessage, foreground: bool) -> Option<MessageNotification> {
        if self.view.contains(message.id()) {
            debug!(message_id = %message.id(), "duplicate feed delivery ignored");
            return None;
        }

        let from_other = !message.message.is_from(self.actor.id);
        let notify = from_other && !foreground;
        message.is_read = !notify;

        self.remember_sender(&message);
        self.events.push_back(SessionEvent::MessageAdded(message.clone()));

        let notification = notify.then(|| MessageNotification {
            opportunity_id: self.opportunity.id,
            opportunity_title: self.opportunity.title.clone(),
            message_id: message.message.id,
            sender_display_name: message.sender_display_name.clone(),
            body: message.message.body.clone(),
            created_at: message.message.created_at,
        });

        self.view.insert(message);
        if notify {
            self.events.push_back(SessionEvent::UnreadChanged(self.view.unread_count()));
        }
        notification
    }

    fn unsubscribe_all(&mut self) {
        if let Some(mut subscription) = self.subscription.take() {
            subscription.unsubscribe();
        }
        if let Some(mut watch) = self.room_watch.take() {
            watch.unsubscribe();
        }
    }
}

impl ChatSession {
    pub fn new(
        backend: ChatBackend,
        opportunity_id: Uuid,
        notifier: Arc<dyn NotificationSink>,
        config: ChatConfig,
    ) -> Self {
        let adapter = MessageStoreAdapter::new(backend.messages.clone(), config.max_message_chars);
        let resolver = RoomResolver::new(backend.rooms.clone(), adapter.clone());
        Self {
            opportunity_id,
            backend,
            config,
            notifier,
            adapter,
            resolver,
            state: SessionState::Idle,
            live: None,
            foreground: false,
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Idle → Loading → Ready. Without an actor the session stays Idle.
    /// Any failure, including the load timeout, leaves it Failed with no
    /// feed registration behind.
    pub async fn open(&mut self, actor: Option<Actor>) -> ChatResult<()> {
        let actor = actor.ok_or(ChatError::Authentication)?;

        if self.state != SessionState::Idle {
            debug!(opportunity_id = %self.opportunity_id, "reopening chat session");
            self.close();
        }

        self.state = SessionState::Loading;
        info!(opportunity_id = %self.opportunity_id, actor_id = %actor.id, "opening chat session");

        let timeout = self.config.load_timeout;
        let loading = load(
            &self.backend,
            &self.adapter,
            &self.resolver,
            self.opportunity_id,
            self.config.unread_window,
            actor,
        );
        let result = match tokio::time::timeout(timeout, loading).await {
            Ok(result) => result,
            Err(_) => Err(ChatError::Timeout(timeout)),
        };

        match result {
            Ok(live) => {
                info!(
                    opportunity_id = %self.opportunity_id,
                    room_id = ?live.room.as_ref().map(|room| room.id),
                    messages = live.view.messages().len(),
                    unread = live.view.unread_count(),
                    "chat session ready"
                );
                self.live = Some(live);
                self.state = SessionState::Ready;
                Ok(())
            }
            Err(e) => {
                warn!(opportunity_id = %self.opportunity_id, "chat session failed to load: {}", e);
                self.state = SessionState::Failed;
                Err(e)
            }
        }
    }

    /// Ready → Idle. Safe to call in any state.
    pub fn close(&mut self) {
        if let Some(mut live) = self.live.take() {
            live.unsubscribe_all();
            info!(opportunity_id = %self.opportunity_id, actor_id = %live.actor.id, "chat session closed");
        }
        self.state = SessionState::Idle;
    }

    /// Waits for the next change to the view.
    ///
    /// Returns `None` when the session is not Ready or has nothing left to
    /// wait on. Cancel safe: a delivery interrupted mid-reconciliation is
    /// picked up again by the next call.
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        loop {
            if self.state != SessionState::Ready {
                return None;
            }
            let live = self.live.as_mut()?;

            if let Some(event) = live.events.pop_front() {
                return Some(event);
            }

            if let Some(message) = live.inbox.front().cloned() {
                self.reconcile(message).await;
                continue;
            }

            if let Some(room) = live.pending_room.clone() {
                if let Err(e) = self.attach_late(room).await {
                    return Some(self.feed_lost(e));
                }
                continue;
            }

            let delivered = if let Some(subscription) = live.subscription.as_mut() {
                subscription.recv().await
            } else if let Some(watch) = live.room_watch.as_mut() {
                watch.recv().await
            } else {
                return None;
            };

            let current_room = live.room.as_ref().map(|room| room.id);
            match delivered {
                Some(FeedEvent::MessageInserted(message)) => {
                    if Some(message.chat_room_id) == current_room {
                        live.inbox.push_back(message);
                    }
                }
                Some(FeedEvent::RoomCreated(room)) => {
                    if room.opportunity_id == self.opportunity_id && current_room.is_none() {
                        live.pending_room = Some(room);
                    }
                }
                None => {
                    return Some(self.feed_lost(ChatError::Transport("change feed closed".into())));
                }
            }
        }
    }

    /// Moves the inbox head into the view.
    async fn reconcile(&mut self, message: ChatMessage) {
        let Some(live) = self.live.as_ref() else {
            return;
        };

        let display_name = if live.view.contains(message.id) {
            None
        } else {
            let cached = message
                .sender_id
                .and_then(|sender_id| live.display_names.get(&sender_id).cloned());
            match cached {
                Some(name) => Some(name),
                None => Some(lookup_sender_name(&self.adapter, message.sender_id).await),
            }
        };

        let Some(live) = self.live.as_mut() else {
            return;
        };
        if live.inbox.front().map(|m| m.id) == Some(message.id) {
            live.inbox.pop_front();
        }

        if let Some(display_name) = display_name {
            let owner_id = live.owner_id();
            let view_message = annotate(message, display_name, owner_id);
            if let Some(notification) = live.admit_live(view_message, self.foreground) {
                self.notifier.notify(notification);
            }
        }
    }

    async fn attach_late(&mut self, room: ChatRoom) -> ChatResult<()> {
        let owner_id = self.live.as_ref().and_then(Live::owner_id);
        let (messages, subscription) =
            fetch_attachment(&self.adapter, &self.backend, room.id, owner_id).await?;

        let Some(live) = self.live.as_mut() else {
            return Ok(());
        };
        info!(opportunity_id = %self.opportunity_id, room_id = %room.id, "chat room attached");
        live.attach(room.clone(), subscription);
        live.events.push_back(SessionEvent::RoomAttached(room));

        for message in messages {
            if let Some(notification) = live.admit_live(message, self.foreground) {
                self.notifier.notify(notification);
            }
        }
        Ok(())
    }

    fn feed_lost(&mut self, error: ChatError) -> SessionEvent {
        warn!(opportunity_id = %self.opportunity_id, "chat feed lost: {}", error);
        if let Some(live) = self.live.as_mut() {
            live.unsubscribe_all();
        }
        self.state = SessionState::Failed;
        SessionEvent::FeedLost(error)
    }

    /// A handle for posting messages as this session's actor.
    ///
    /// Fails with `Authentication` only before any actor was given; a
    /// session that failed to load must be reopened.
    pub fn composer(&self) -> ChatResult<Composer> {
        let live = match (self.state, self.live.as_ref()) {
            (SessionState::Ready, Some(live)) => live,
            (SessionState::Idle, _) => return Err(ChatError::Authentication),
            _ => return Err(ChatError::Transport("chat session must be reopened".into())),
        };
        Ok(Composer {
            opportunity_id: self.opportunity_id,
            actor_id: live.actor.id,
            resolver: self.resolver.clone(),
            adapter: self.adapter.clone(),
            in_flight: self.in_flight.clone(),
        })
    }

    /// Shorthand for `self.composer()?.send(body)`.
    pub async fn send(&self, body: &str) -> ChatResult<ChatMessage> {
        self.composer()?.send(body).await
    }

    /// Returns whether anything was unread.
    pub fn mark_as_read(&mut self) -> bool {
        self.live
            .as_mut()
            .map(|live| live.view.mark_all_read())
            .unwrap_or(false)
    }

    /// Coming to the foreground marks everything read. Returns whether the
    /// unread count changed.
    pub fn set_foreground(&mut self, foreground: bool) -> bool {
        self.foreground = foreground;
        foreground && self.mark_as_read()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn opportunity_id(&self) -> Uuid {
        self.opportunity_id
    }

    pub fn opportunity(&self) -> Option<&Opportunity> {
        self.live.as_ref().map(|live| &live.opportunity)
    }

    pub fn actor(&self) -> Option<&Actor> {
        self.live.as_ref().map(|live| &live.actor)
    }

    pub fn room(&self) -> Option<&ChatRoom> {
        self.live.as_ref().and_then(|live| live.room.as_ref())
    }

    pub fn messages(&self) -> &[ViewMessage] {
        self.live.as_ref().map(|live| live.view.messages()).unwrap_or(&[])
    }

    pub fn unread_count(&self) -> usize {
        self.live.as_ref().map(|live| live.view.unread_count()).unwrap_or(0)
    }

    pub fn is_foreground(&self) -> bool {
        self.foreground
    }

    /// True while at least one send is waiting on the store.
    pub fn is_sending(&self) -> bool {
        self.in_flight.load(Ordering::Acquire) > 0
    }
}

async fn load(
    backend: &ChatBackend,
    adapter: &MessageStoreAdapter,
    resolver: &RoomResolver,
    opportunity_id: Uuid,
    unread_window: chrono::Duration,
    actor: Actor,
) -> ChatResult<Live> {
    let opportunity = backend
        .opportunities
        .opportunity(opportunity_id)
        .await?
        .ok_or_else(|| ChatError::NotFound(format!("opportunity {}", opportunity_id)))?;

    let mut live = Live::new(actor, opportunity);

    let room = match resolver.find_room(opportunity_id).await? {
        Some(room) => Some(room),
        None => {
            live.room_watch = Some(backend.feed.watch_room_creation(opportunity_id)?);
            // Created between the lookup and the watch?
            resolver.find_room(opportunity_id).await?
        }
    };

    if let Some(room) = room {
        let (messages, subscription) =
            fetch_attachment(adapter, backend, room.id, live.owner_id()).await?;
        live.attach(room, subscription);

        let cutoff = Utc::now() - unread_window;
        for message in messages {
            live.admit_history(message, cutoff);
        }
    }

    Ok(live)
}

/// History, then the subscription, then a catch-up read for anything
/// inserted in between. Duplicates are dropped by the view.
async fn fetch_attachment(
    adapter: &MessageStoreAdapter,
    backend: &ChatBackend,
    room_id: Uuid,
    owner_id: Option<Uuid>,
) -> ChatResult<(Vec<ViewMessage>, Subscription)> {
    let mut messages = adapter.list_messages(room_id, owner_id).await?;
    let subscription = backend.feed.subscribe_room(room_id)?;
    messages.extend(adapter.list_messages(room_id, owner_id).await?);
    Ok((messages, subscription))
}

async fn lookup_sender_name(adapter: &MessageStoreAdapter, sender_id: Option<Uuid>) -> String {
    let Some(sender_id) = sender_id else {
        return UNKNOWN_USER.to_string();
    };
    match adapter.sender_profile(sender_id).await {
        Ok(profile) => display_name_for(profile.as_ref()),
        Err(e) => {
            warn!(%sender_id, "sender profile lookup failed: {}", e);
            UNKNOWN_USER.to_string()
        }
    }
}

/// Posts messages for one actor into one opportunity's room.
///
/// Cloneable and independent of the session's event processing. Sends are
/// never retried here: a failed send is reported and the caller decides.
#[derive(Clone)]
pub struct Composer {
    opportunity_id: Uuid,
    actor_id: Uuid,
    resolver: RoomResolver,
    adapter: MessageStoreAdapter,
    in_flight: Arc<AtomicUsize>,
}

impl Composer {
    /// A composer outside any session, e.g. for a one-shot HTTP send.
    pub fn new(
        opportunity_id: Uuid,
        actor_id: Uuid,
        resolver: RoomResolver,
        adapter: MessageStoreAdapter,
    ) -> Self {
        Self {
            opportunity_id,
            actor_id,
            resolver,
            adapter,
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Validates locally, resolves or creates the room, then appends. The
    /// stored message reaches the session through the feed, not from here.
    pub async fn send(&self, body: &str) -> ChatResult<ChatMessage> {
        self.adapter.validate_body(body)?;

        let _sending = InFlight::enter(&self.in_flight);
        let room = self.resolver.resolve_or_create(self.opportunity_id).await?.room;
        let message = self
            .adapter
            .append_message(room.id, Some(self.actor_id), body, false)
            .await
            .inspect_err(|e| {
                warn!(room_id = %room.id, actor_id = %self.actor_id, "send failed: {}", e);
            })?;

        Ok(message)
    }
}

struct InFlight(Arc<AtomicUsize>);

impl InFlight {
    fn enter(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self(counter.clone())
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::Duration as Age;
    use tokio::sync::mpsc;

    use super::*;
    use crate::error::ErrorKind;
    use crate::notify::ChannelNotifier;
    use crate::testing::FakeStore;

    struct Fixture {
        store: Arc<FakeStore>,
        owner: Uuid,
        opportunity: Uuid,
    }

    impl Fixture {
        fn new() -> Self {
            let store = FakeStore::new();
            let owner = Uuid::new_v4();
            store.add_profile(owner, "Dana", "Reyes");
            let opportunity = store.add_opportunity(owner, "Food bank shift");
            Self { store, owner, opportunity }
        }

        fn session(&self) -> (ChatSession, mpsc::UnboundedReceiver<MessageNotification>) {
            self.session_with(ChatConfig::default())
        }

        fn session_with(
            &self,
            config: ChatConfig,
        ) -> (ChatSession, mpsc::UnboundedReceiver<MessageNotification>) {
            let (notifier, rx) = ChannelNotifier::new();
            let session = ChatSession::new(
                self.store.backend(),
                self.opportunity,
                Arc::new(notifier),
                config,
            );
            (session, rx)
        }

        fn volunteer(&self, first_name: &str) -> Actor {
            let id = Uuid::new_v4();
            self.store.add_profile(id, first_name, "Volunteer");
            Actor::new(id, format!("{} Volunteer", first_name))
        }
    }

    /// Collects events until the session has been quiet for a moment.
    async fn settle(session: &mut ChatSession) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        while let Ok(Some(event)) =
            tokio::time::timeout(Duration::from_millis(50), session.next_event()).await
        {
            events.push(event);
        }
        events
    }

    fn bodies(session: &ChatSession) -> Vec<&str> {
        session.messages().iter().map(|m| m.message.body.as_str()).collect()
    }

    #[tokio::test]
    async fn open_without_actor_stays_idle() {
        let fx = Fixture::new();
        let (mut session, _rx) = fx.session();

        let err = session.open(None).await.unwrap_err();
        assert!(matches!(err, ChatError::Authentication));
        assert_eq!(session.state(), SessionState::Idle);
        assert_eq!(fx.store.list_calls(), 0);

        let err = session.send("hello").await.unwrap_err();
        assert!(matches!(err, ChatError::Authentication));
    }

    #[tokio::test]
    async fn unknown_opportunity_fails_load() {
        let fx = Fixture::new();
        let (notifier, _rx) = ChannelNotifier::new();
        let mut session = ChatSession::new(
            fx.store.backend(),
            Uuid::new_v4(),
            Arc::new(notifier),
            ChatConfig::default(),
        );

        let err = session.open(Some(fx.volunteer("Ana"))).await.unwrap_err();
        assert!(matches!(err, ChatError::NotFound(_)));
        assert_eq!(session.state(), SessionState::Failed);
        assert_eq!(fx.store.feed.live_registrations(), 0);
    }

    #[tokio::test]
    async fn missing_room_loads_empty() {
        let fx = Fixture::new();
        let (mut session, _rx) = fx.session();

        session.open(Some(fx.volunteer("Ana"))).await.unwrap();
        assert_eq!(session.state(), SessionState::Ready);
        assert!(session.room().is_none());
        assert!(session.messages().is_empty());
        assert_eq!(session.unread_count(), 0);
        assert_eq!(session.opportunity().map(|o| o.title.as_str()), Some("Food bank shift"));
        // waiting for the room to be created
        assert_eq!(fx.store.feed.live_registrations(), 1);
    }

    #[tokio::test]
    async fn history_unread_counts_recent_messages_from_others() {
        let fx = Fixture::new();
        let me = fx.volunteer("Ana");
        let other = fx.volunteer("Ben");
        let room = fx.store.add_room(fx.opportunity);
        let now = Utc::now();

        fx.store.add_message(room.id, Some(other.id), "old news", now - Age::hours(30));
        fx.store.add_message(room.id, Some(me.id), "mine", now - Age::hours(2));
        fx.store.add_message(room.id, Some(other.id), "fresh", now - Age::hours(1));
        fx.store.add_message(room.id, Some(fx.owner), "from owner", now - Age::minutes(5));

        let (mut session, _rx) = fx.session();
        session.open(Some(me.clone())).await.unwrap();

        assert_eq!(bodies(&session), ["old news", "mine", "fresh", "from owner"]);
        assert_eq!(session.unread_count(), 2);
        let unread: Vec<_> = session
            .messages()
            .iter()
            .filter(|m| !m.is_read)
            .map(|m| m.message.body.as_str())
            .collect();
        assert_eq!(unread, ["fresh", "from owner"]);

        let names: Vec<_> = session.messages().iter().map(|m| m.sender_display_name.as_str()).collect();
        assert_eq!(names, ["Ben Volunteer", "Ana Volunteer", "Ben Volunteer", "Dana Reyes"]);
        let owner_flags: Vec<_> = session.messages().iter().map(|m| m.is_from_opportunity_owner).collect();
        assert_eq!(owner_flags, [false, false, false, true]);
    }

    #[tokio::test]
    async fn unread_window_is_configurable() {
        let fx = Fixture::new();
        let other = fx.volunteer("Ben");
        let room = fx.store.add_room(fx.opportunity);
        fx.store.add_message(room.id, Some(other.id), "an hour ago", Utc::now() - Age::hours(1));

        let config = ChatConfig {
            unread_window: Age::minutes(30),
            ..ChatConfig::default()
        };
        let (mut session, _rx) = fx.session_with(config);
        session.open(Some(fx.volunteer("Ana"))).await.unwrap();
        assert_eq!(session.unread_count(), 0);
    }

    #[tokio::test]
    async fn blank_send_never_reaches_store() {
        let fx = Fixture::new();
        let (mut session, _rx) = fx.session();
        session.open(Some(fx.volunteer("Ana"))).await.unwrap();

        for body in ["", "   ", "\n\t "] {
            let err = session.send(body).await.unwrap_err();
            assert!(matches!(err, ChatError::Validation(_)));
        }
        let err = session.send(&"x".repeat(501)).await.unwrap_err();
        assert!(matches!(err, ChatError::Validation(_)));

        assert_eq!(fx.store.insert_message_calls(), 0);
        assert_eq!(fx.store.insert_room_calls(), 0);
        assert_eq!(fx.store.rooms_for(fx.opportunity), 0);
        assert_eq!(session.state(), SessionState::Ready);
    }

    #[tokio::test]
    async fn first_send_creates_room_and_reaches_other_sessions() {
        let fx = Fixture::new();
        let u1 = fx.volunteer("Ana");
        let u2 = fx.volunteer("Ben");

        let (mut s2, mut notifications) = fx.session();
        s2.open(Some(u2)).await.unwrap();
        let (mut s1, _rx1) = fx.session();
        s1.open(Some(u1.clone())).await.unwrap();

        let sent = s1.send("Hello").await.unwrap();
        assert_eq!(fx.store.rooms_for(fx.opportunity), 1);
        assert_eq!(fx.store.insert_room_calls(), 1);

        let stored = fx.store.messages_in(sent.chat_room_id);
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].body, "Hello");
        assert_eq!(stored[0].sender_id, Some(u1.id));
        assert!(!stored[0].is_system_message);

        let events = settle(&mut s2).await;
        assert!(matches!(events.first(), Some(SessionEvent::RoomAttached(room)) if room.id == sent.chat_room_id));
        assert!(events.iter().any(|e| matches!(e, SessionEvent::UnreadChanged(1))));
        assert_eq!(s2.unread_count(), 1);
        assert_eq!(s2.messages().len(), 1);
        assert!(!s2.messages()[0].is_from_opportunity_owner);
        assert_eq!(s2.messages()[0].sender_display_name, "Ana Volunteer");

        let notification = notifications.try_recv().unwrap();
        assert_eq!(notification.title(), "New message from Ana Volunteer");
        assert_eq!(notification.opportunity_title, "Food bank shift");
        assert!(notifications.try_recv().is_err());

        // the sender's own session sees the canonical row, already read
        settle(&mut s1).await;
        assert_eq!(s1.messages().len(), 1);
        assert_eq!(s1.messages()[0].id(), sent.id);
        assert_eq!(s1.unread_count(), 0);
    }

    #[tokio::test]
    async fn duplicate_and_out_of_order_deliveries_settle_sorted() {
        let fx = Fixture::new();
        let other = fx.volunteer("Ben");
        let room = fx.store.add_room(fx.opportunity);
        let now = Utc::now();
        let history: Vec<_> = (0..3)
            .map(|i| fx.store.add_message(room.id, Some(other.id), &format!("h{}", i), now - Age::minutes(30 - i)))
            .collect();

        let (mut session, _rx) = fx.session();
        session.open(Some(fx.volunteer("Ana"))).await.unwrap();
        assert_eq!(session.unread_count(), 3);

        let late = fx.store.add_message(room.id, Some(other.id), "late", now);
        let early = fx.store.add_message(room.id, Some(other.id), "early", now - Age::hours(1));
        for message in [late.clone(), history[1].clone(), early.clone(), late, early] {
            fx.store.deliver(message);
        }
        settle(&mut session).await;

        assert_eq!(bodies(&session), ["early", "h0", "h1", "h2", "late"]);
        assert_eq!(session.unread_count(), 5);
        assert_eq!(session.unread_count(), session.messages().iter().filter(|m| !m.is_read).count());
    }

    #[tokio::test]
    async fn mark_as_read_holds_until_someone_else_writes() {
        let fx = Fixture::new();
        let me = fx.volunteer("Ana");
        let other = fx.volunteer("Ben");
        let room = fx.store.add_room(fx.opportunity);
        fx.store.add_message(room.id, Some(other.id), "hi", Utc::now());

        let (mut session, _rx) = fx.session();
        session.open(Some(me.clone())).await.unwrap();
        assert_eq!(session.unread_count(), 1);

        assert!(session.mark_as_read());
        assert_eq!(session.unread_count(), 0);
        assert!(session.messages().iter().all(|m| m.is_read));

        session.send("my reply").await.unwrap();
        settle(&mut session).await;
        assert_eq!(session.unread_count(), 0);

        let answer = fx.store.add_message(room.id, Some(other.id), "answer", Utc::now());
        fx.store.deliver(answer);
        settle(&mut session).await;
        assert_eq!(session.unread_count(), 1);
    }

    #[tokio::test]
    async fn owner_messages_are_flagged() {
        let fx = Fixture::new();
        let room = fx.store.add_room(fx.opportunity);
        let (mut owner_session, _rx) = fx.session();
        owner_session.open(Some(Actor::new(fx.owner, "Dana Reyes"))).await.unwrap();
        let (mut session, _rx2) = fx.session();
        let me = fx.volunteer("Ana");
        session.open(Some(me)).await.unwrap();

        owner_session.send("Thanks for signing up").await.unwrap();
        session.send("Glad to help").await.unwrap();
        settle(&mut session).await;

        let owner_flag = |body: &str| {
            session
                .messages()
                .iter()
                .find(|m| m.message.body == body)
                .map(|m| m.is_from_opportunity_owner)
        };
        assert_eq!(owner_flag("Thanks for signing up"), Some(true));
        assert_eq!(owner_flag("Glad to help"), Some(false));
        assert_eq!(fx.store.messages_in(room.id).len(), 2);
    }

    #[tokio::test]
    async fn reopen_reloads_same_history() {
        let fx = Fixture::new();
        let me = fx.volunteer("Ana");
        let room = fx.store.add_room(fx.opportunity);
        let now = Utc::now();
        for (i, body) in ["one", "two", "three"].into_iter().enumerate() {
            fx.store.add_message(room.id, Some(me.id), body, now - Age::minutes(10 - i as i64));
        }

        let (mut session, _rx) = fx.session();
        session.open(Some(me.clone())).await.unwrap();
        let first: Vec<Uuid> = session.messages().iter().map(ViewMessage::id).collect();
        assert_eq!(first.len(), 3);

        session.close();
        assert_eq!(session.state(), SessionState::Idle);
        assert!(session.messages().is_empty());
        assert_eq!(fx.store.feed.live_registrations(), 0);

        session.open(Some(me)).await.unwrap();
        let second: Vec<Uuid> = session.messages().iter().map(ViewMessage::id).collect();
        assert_eq!(first, second);
        assert_eq!(bodies(&session), ["one", "two", "three"]);
        assert_eq!(fx.store.feed.live_registrations(), 1);
    }

    #[tokio::test]
    async fn slow_load_times_out_without_leaking_registrations() {
        let fx = Fixture::new();
        fx.store.add_room(fx.opportunity);
        fx.store.delay_lists(Duration::from_millis(500));
        let config = ChatConfig {
            load_timeout: Duration::from_millis(50),
            ..ChatConfig::default()
        };
        let (mut session, _rx) = fx.session_with(config);
        let me = fx.volunteer("Ana");

        let err = session.open(Some(me.clone())).await.unwrap_err();
        assert!(matches!(err, ChatError::Timeout(_)));
        assert_eq!(session.state(), SessionState::Failed);
        assert_eq!(fx.store.feed.live_registrations(), 0);
        assert!(session.next_event().await.is_none());

        fx.store.delay_lists(Duration::ZERO);
        session.open(Some(me)).await.unwrap();
        assert_eq!(session.state(), SessionState::Ready);
    }

    #[tokio::test]
    async fn store_failure_during_load_is_fatal() {
        let fx = Fixture::new();
        fx.store.add_room(fx.opportunity);
        fx.store.fail_lists(true);
        let (mut session, _rx) = fx.session();

        let err = session.open(Some(fx.volunteer("Ana"))).await.unwrap_err();
        assert!(matches!(err, ChatError::Transport(_)));
        assert_eq!(session.state(), SessionState::Failed);

        // The actor is known; the caller must reopen, not sign in again
        let err = session.send("hi").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transport);
        assert_eq!(fx.store.insert_message_calls(), 0);
    }

    #[tokio::test]
    async fn send_after_load_timeout_asks_for_reopen() {
        let fx = Fixture::new();
        fx.store.add_room(fx.opportunity);
        fx.store.delay_lists(Duration::from_millis(200));
        let (mut session, _rx) = fx.session_with(ChatConfig {
            load_timeout: Duration::from_millis(20),
            ..ChatConfig::default()
        });

        let err = session.open(Some(fx.volunteer("Ana"))).await.unwrap_err();
        assert!(matches!(err, ChatError::Timeout(_)));
        let err = session.composer().err().unwrap();
        assert_eq!(err.kind(), ErrorKind::Transport);
    }

    #[tokio::test]
    async fn next_event_survives_cancellation_during_sender_lookup() {
        let fx = Fixture::new();
        let room = fx.store.add_room(fx.opportunity);
        let (mut session, _rx) = fx.session();
        session.open(Some(fx.volunteer("Ana"))).await.unwrap();

        let bea = fx.volunteer("Bea");
        fx.store.delay_profiles(Duration::from_millis(200));
        fx.store.deliver(ChatMessage {
            id: Uuid::new_v4(),
            chat_room_id: room.id,
            sender_id: Some(bea.id),
            body: "running late".into(),
            is_system_message: false,
            created_at: Utc::now(),
        });

        let interrupted =
            tokio::time::timeout(Duration::from_millis(20), session.next_event()).await;
        assert!(interrupted.is_err());
        assert_eq!(fx.store.profile_calls(), 1);
        assert!(session.messages().is_empty());

        let event = tokio::time::timeout(Duration::from_secs(2), session.next_event())
            .await
            .unwrap();
        match event {
            Some(SessionEvent::MessageAdded(message)) => {
                assert_eq!(message.sender_display_name, "Bea Volunteer");
            }
            other => panic!("unexpected event: {:?}", other),
        }

        let rest = settle(&mut session).await;
        assert!(!rest.iter().any(|e| matches!(e, SessionEvent::MessageAdded(_))));
        assert_eq!(bodies(&session), ["running late"]);
        assert_eq!(session.unread_count(), 1);
    }

    #[tokio::test]
    async fn failed_send_leaves_session_ready() {
        let fx = Fixture::new();
        fx.store.add_room(fx.opportunity);
        let (mut session, _rx) = fx.session();
        session.open(Some(fx.volunteer("Ana"))).await.unwrap();

        fx.store.fail_inserts(true);
        let err = session.send("are we still on?").await.unwrap_err();
        assert!(matches!(err, ChatError::Transport(_)));
        assert!(err.is_recoverable_on_send());
        assert_eq!(session.state(), SessionState::Ready);
        assert!(!session.is_sending());

        fx.store.fail_inserts(false);
        session.send("are we still on?").await.unwrap();
        settle(&mut session).await;
        assert_eq!(bodies(&session), ["are we still on?"]);
    }

    #[tokio::test]
    async fn composer_sends_while_session_waits() {
        let fx = Fixture::new();
        fx.store.add_room(fx.opportunity);
        let (mut session, _rx) = fx.session();
        session.open(Some(fx.volunteer("Ana"))).await.unwrap();

        let composer = session.composer().unwrap();
        let send = tokio::spawn(async move { composer.send("sent from a task").await });
        let event = tokio::time::timeout(Duration::from_secs(1), session.next_event())
            .await
            .unwrap();
        assert!(matches!(event, Some(SessionEvent::MessageAdded(ref m)) if m.message.body == "sent from a task"));
        send.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn foreground_suppresses_notifications() {
        let fx = Fixture::new();
        let other = fx.volunteer("Ben");
        let room = fx.store.add_room(fx.opportunity);
        fx.store.add_message(room.id, Some(other.id), "earlier", Utc::now());

        let (mut session, mut notifications) = fx.session();
        session.open(Some(fx.volunteer("Ana"))).await.unwrap();
        assert!(!session.is_foreground());
        assert_eq!(session.unread_count(), 1);

        assert!(session.set_foreground(true));
        assert_eq!(session.unread_count(), 0);

        let live = fx.store.add_message(room.id, Some(other.id), "while looking", Utc::now());
        fx.store.deliver(live);
        let events = settle(&mut session).await;
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], SessionEvent::MessageAdded(ref m) if m.is_read));
        assert_eq!(session.unread_count(), 0);
        assert!(notifications.try_recv().is_err());

        assert!(!session.set_foreground(false));
        let away = fx.store.add_message(room.id, Some(other.id), "while away", Utc::now());
        fx.store.deliver(away);
        settle(&mut session).await;
        assert_eq!(session.unread_count(), 1);
        assert_eq!(notifications.try_recv().map(|n| n.body).ok().as_deref(), Some("while away"));
    }

    #[tokio::test]
    async fn unknown_sender_is_labelled() {
        let fx = Fixture::new();
        let room = fx.store.add_room(fx.opportunity);
        let (mut session, _rx) = fx.session();
        session.open(Some(fx.volunteer("Ana"))).await.unwrap();

        fx.store.fail_profiles(true);
        let message = fx.store.add_message(room.id, Some(Uuid::new_v4()), "who am I", Utc::now());
        fx.store.deliver(message);
        settle(&mut session).await;

        assert_eq!(session.messages()[0].sender_display_name, UNKNOWN_USER);
    }

    #[tokio::test]
    async fn close_is_idempotent_and_releases_feed() {
        let fx = Fixture::new();
        fx.store.add_room(fx.opportunity);
        let (mut session, _rx) = fx.session();
        session.open(Some(fx.volunteer("Ana"))).await.unwrap();
        assert_eq!(fx.store.feed.live_registrations(), 1);

        session.close();
        session.close();
        assert_eq!(fx.store.feed.live_registrations(), 0);
        assert!(session.next_event().await.is_none());
    }
}
