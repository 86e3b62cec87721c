use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use pledge_chat::notify::ChannelNotifier;
use pledge_chat::{
    ChatBackend, ChatConfig, ChatError, ChatSession, MessageNotification, SessionEvent,
};
use pledge_types::events::{GatewayCommand, GatewayEvent};
use pledge_types::models::{Actor, ChatMessage};

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

type WsSink = SplitSink<WebSocket, Message>;

/// Result of a send running on its own task.
struct SendOutcome {
    client_ref: String,
    result: Result<ChatMessage, ChatError>,
}

/// Drives one chat session for one pre-authenticated connection. The
/// session is closed on every exit path.
pub async fn handle_connection(
    socket: WebSocket,
    backend: ChatBackend,
    config: ChatConfig,
    opportunity_id: Uuid,
    actor: Actor,
) {
    let (mut sender, receiver) = socket.split();
    let actor_id = actor.id;

    let (notifier, notifications) = ChannelNotifier::new();
    let preview_chars = config.notification_preview_chars;
    let mut session = ChatSession::new(backend, opportunity_id, Arc::new(notifier), config);

    info!(%opportunity_id, %actor_id, "chat connection opened");

    match session.open(Some(actor)).await {
        Ok(()) => {
            if send_event(&mut sender, &ready_event(&session)).await.is_ok() {
                run_connection_loop(&mut session, sender, receiver, notifications, preview_chars)
                    .await;
            }
        }
        Err(e) => {
            let failed = GatewayEvent::LoadFailed {
                kind: e.kind(),
                reason: e.to_string(),
            };
            // The client may already be gone; nothing else to do either way.
            let _ = send_event(&mut sender, &failed).await;
        }
    }

    session.close();
    info!(%opportunity_id, %actor_id, "chat connection closed");
}

fn ready_event(session: &ChatSession) -> GatewayEvent {
    GatewayEvent::Ready {
        room_id: session.room().map(|room| room.id),
        opportunity_title: session
            .opportunity()
            .map(|opportunity| opportunity.title.clone())
            .unwrap_or_default(),
        messages: session.messages().to_vec(),
        unread_count: session.unread_count(),
    }
}

async fn run_connection_loop(
    session: &mut ChatSession,
    mut sender: WsSink,
    mut receiver: SplitStream<WebSocket>,
    mut notifications: mpsc::UnboundedReceiver<MessageNotification>,
    preview_chars: usize,
) {
    let (outcome_tx, mut outcomes) = mpsc::unbounded_channel::<SendOutcome>();

    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    heartbeat.tick().await;
    let mut missed_heartbeats: u8 = 0;
    let mut pong_received = true;

    loop {
        let outgoing = tokio::select! {
            event = session.next_event() => match event {
                Some(SessionEvent::FeedLost(e)) => {
                    let failed = GatewayEvent::LoadFailed { kind: e.kind(), reason: e.to_string() };
                    let _ = send_event(&mut sender, &failed).await;
                    break;
                }
                Some(event) => session_event(event),
                None => break,
            },
            Some(notification) = notifications.recv() => {
                Some(notification_event(&notification, preview_chars))
            }
            Some(outcome) = outcomes.recv() => Some(outcome_event(outcome)),
            msg = receiver.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<GatewayCommand>(&text) {
                        Ok(cmd) => handle_command(session, cmd, &outcome_tx),
                        Err(e) => {
                            // Raw frames may hold message bodies; log the shape only
                            warn!(len = text.len(), "bad command: {}", e);
                            None
                        }
                    }
                }
                Some(Ok(Message::Pong(_))) => {
                    pong_received = true;
                    None
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => None,
            },
            _ = heartbeat.tick() => {
                if std::mem::replace(&mut pong_received, false) {
                    missed_heartbeats = 0;
                } else {
                    missed_heartbeats += 1;
                    if missed_heartbeats >= 2 {
                        warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                        break;
                    }
                }
                if sender.send(Message::Ping(Bytes::new())).await.is_err() {
                    break;
                }
                None
            }
        };

        if let Some(event) = outgoing {
            if send_event(&mut sender, &event).await.is_err() {
                break;
            }
        }
    }
}

/// Applies a client command. Sends run on their own task so the loop keeps
/// delivering feed events meanwhile.
fn handle_command(
    session: &mut ChatSession,
    cmd: GatewayCommand,
    outcomes: &mpsc::UnboundedSender<SendOutcome>,
) -> Option<GatewayEvent> {
    match cmd {
        GatewayCommand::Send { client_ref, body } => {
            let composer = match session.composer() {
                Ok(composer) => composer,
                Err(e) => {
                    return Some(outcome_event(SendOutcome {
                        client_ref,
                        result: Err(e),
                    }));
                }
            };
            let outcomes = outcomes.clone();
            tokio::spawn(async move {
                let result = composer.send(&body).await;
                let _ = outcomes.send(SendOutcome { client_ref, result });
            });
            None
        }
        GatewayCommand::MarkRead => session
            .mark_as_read()
            .then_some(GatewayEvent::UnreadCount { count: 0 }),
        GatewayCommand::Visibility { foreground } => {
            debug!(opportunity_id = %session.opportunity_id(), foreground, "visibility changed");
            session
                .set_foreground(foreground)
                .then_some(GatewayEvent::UnreadCount { count: 0 })
        }
    }
}

fn session_event(event: SessionEvent) -> Option<GatewayEvent> {
    match event {
        SessionEvent::MessageAdded(message) => Some(GatewayEvent::MessageCreate { message }),
        SessionEvent::UnreadChanged(count) => Some(GatewayEvent::UnreadCount { count }),
        SessionEvent::RoomAttached(room) => {
            debug!(room_id = %room.id, "room attached to live connection");
            None
        }
        SessionEvent::FeedLost(e) => Some(GatewayEvent::LoadFailed {
            kind: e.kind(),
            reason: e.to_string(),
        }),
    }
}

fn notification_event(notification: &MessageNotification, preview_chars: usize) -> GatewayEvent {
    GatewayEvent::Notification {
        title: notification.title(),
        preview: notification.preview(preview_chars),
        created_at: notification.created_at,
    }
}

fn outcome_event(outcome: SendOutcome) -> GatewayEvent {
    match outcome.result {
        Ok(message) => GatewayEvent::SendAccepted {
            client_ref: outcome.client_ref,
            message_id: message.id,
        },
        Err(e) => GatewayEvent::SendFailed {
            client_ref: outcome.client_ref,
            kind: e.kind(),
            reason: e.to_string(),
        },
    }
}

async fn send_event(sender: &mut WsSink, event: &GatewayEvent) -> anyhow::Result<()> {
    let text = serde_json::to_string(event)?;
    sender.send(Message::Text(text.into())).await?;
    Ok(())
}
