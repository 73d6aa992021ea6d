//! One live client socket.
//!
//! A connection is split in two:
//!
//! - [`ConnectionHandle`] - the shared part: identity, subscription set,
//!   mailbox, lifecycle state. The hub holds it in its registry and reads the
//!   subscription set when deciding fan-out.
//! - [`Connection`] - the owned part that runs the two loops over a socket.
//!
//! ```text
//!            ┌──────────── reader loop ◄──── socket stream
//!            │   subscribe/unsubscribe ─► subscriptions (RwLock)
//!            │   typing.start ─► hub.broadcast_to_channel
//!            │   ping ─► mailbox (pong)
//!            ▼
//!   hub ─► mailbox ─► writer loop ─► socket sink
//!                       └─ keep-alive ping every `ping_interval`
//! ```
//!
//! Whichever loop stops first aborts the other, then the connection
//! unregisters itself from the hub exactly once.

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use axum::extract::ws::Message;
use futures::{Sink, SinkExt, Stream, StreamExt};
use thiserror::Error;
use tokio::task::JoinError;
use tokio::time::{Instant, MissedTickBehavior};
use uuid::Uuid;

use crate::config::WebSocketConfig;
use crate::domain::foundation::{AuthenticatedUser, ScopeId, UserId};
use crate::ports::MessageSubmitter;

use super::hub::HubHandle;
use super::mailbox::{mailbox, Frame, Mailbox, MailboxError, MailboxReceiver};
use super::messages::{ClientEvent, Envelope, ErrorCode, EventKind, ProtocolError};

/// Key of one accepted socket in the hub's registry. A user with several
/// tabs open holds one per tab.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Create a new random connection ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle of a connection. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum ConnectionState {
    Connecting = 0,
    Open = 1,
    Closing = 2,
    Closed = 3,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ConnectionState::Connecting,
            1 => ConnectionState::Open,
            2 => ConnectionState::Closing,
            _ => ConnectionState::Closed,
        }
    }
}

/// Timing and size limits for one connection.
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    pub mailbox_capacity: usize,
    pub write_timeout: Duration,
    pub ping_interval: Duration,
    /// Silence longer than this (no frame of any kind, pongs included) is
    /// treated as a dead peer.
    pub pong_wait: Duration,
    pub max_message_size: usize,
}

impl From<&WebSocketConfig> for ConnectionSettings {
    fn from(config: &WebSocketConfig) -> Self {
        Self {
            mailbox_capacity: config.mailbox_capacity,
            write_timeout: config.write_timeout(),
            ping_interval: config.ping_interval(),
            pong_wait: config.pong_wait(),
            max_message_size: config.max_message_size,
        }
    }
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self::from(&WebSocketConfig::default())
    }
}

// ============================================
// Shared handle
// ============================================

/// The part of a connection the hub can see.
#[derive(Debug)]
pub struct ConnectionHandle {
    id: ConnectionId,
    user: AuthenticatedUser,
    subscriptions: RwLock<HashSet<ScopeId>>,
    mailbox: Mailbox,
    state: AtomicU8,
    last_seen: Mutex<Instant>,
}

impl ConnectionHandle {
    pub fn new(user: AuthenticatedUser, mailbox: Mailbox) -> Self {
        Self {
            id: ConnectionId::new(),
            user,
            subscriptions: RwLock::new(HashSet::new()),
            mailbox,
            state: AtomicU8::new(ConnectionState::Connecting as u8),
            last_seen: Mutex::new(Instant::now()),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn user_id(&self) -> UserId {
        self.user.id
    }

    pub fn user(&self) -> &AuthenticatedUser {
        &self.user
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Move to `next` if it is ahead of the current state.
    ///
    /// Returns whether this call performed the transition.
    pub(crate) fn advance(&self, next: ConnectionState) -> bool {
        self.state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (next as u8 > current).then_some(next as u8)
            })
            .is_ok()
    }

    pub fn is_subscribed(&self, channel_id: ScopeId) -> bool {
        self.subscriptions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&channel_id)
    }

    /// Channels this connection currently listens to.
    pub fn subscriptions(&self) -> Vec<ScopeId> {
        self.subscriptions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .copied()
            .collect()
    }

    pub(crate) fn subscribe(&self, channel_id: ScopeId) -> bool {
        self.subscriptions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(channel_id)
    }

    pub(crate) fn unsubscribe(&self, channel_id: ScopeId) -> bool {
        self.subscriptions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&channel_id)
    }

    /// Non-blocking enqueue into this connection's mailbox.
    pub(crate) fn deliver(&self, frame: Frame) -> Result<(), MailboxError> {
        self.mailbox.try_push(frame)
    }

    /// Stop the writer loop. Called by the hub on unregistration.
    pub(crate) fn close_mailbox(&self) {
        self.mailbox.close();
    }

    fn touch(&self) {
        *self.last_seen.lock().unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    fn last_seen(&self) -> Instant {
        *self.last_seen.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Encode and enqueue a direct reply, bypassing the hub.
    ///
    /// A full mailbox drops the reply; the connection stays open.
    fn reply(&self, envelope: &Envelope) {
        let frame = match envelope.encode() {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(connection_id = %self.id, error = %e, "Failed to encode reply");
                return;
            }
        };
        if let Err(e) = self.deliver(Frame::from(frame)) {
            tracing::debug!(
                connection_id = %self.id,
                event_type = %envelope.kind,
                reason = %e,
                "Dropped direct reply"
            );
        }
    }

    fn reply_error(&self, code: ErrorCode, message: impl Into<String>) {
        match Envelope::error(code, message) {
            Ok(envelope) => self.reply(&envelope),
            Err(e) => {
                tracing::warn!(connection_id = %self.id, error = %e, "Failed to build error reply");
            }
        }
    }
}

// ============================================
// Connection runner
// ============================================

/// A connection that has been accepted but not yet started.
pub struct Connection {
    handle: Arc<ConnectionHandle>,
    inbox: MailboxReceiver,
    hub: HubHandle,
    submitter: Option<Arc<dyn MessageSubmitter>>,
    settings: ConnectionSettings,
}

impl Connection {
    /// Build a connection for an already-authenticated user. Subscriptions
    /// start empty.
    pub fn new(user: AuthenticatedUser, hub: HubHandle, settings: ConnectionSettings) -> Self {
        let (mailbox, inbox) = mailbox(settings.mailbox_capacity);
        Self {
            handle: Arc::new(ConnectionHandle::new(user, mailbox)),
            inbox,
            hub,
            submitter: None,
            settings,
        }
    }

    /// Route `message.send` frames to the business layer.
    pub fn with_submitter(mut self, submitter: Option<Arc<dyn MessageSubmitter>>) -> Self {
        self.submitter = submitter;
        self
    }

    pub fn handle(&self) -> Arc<ConnectionHandle> {
        Arc::clone(&self.handle)
    }

    /// Register with the hub, run both loops until either stops, then
    /// unregister.
    ///
    /// Generic over the transport so it runs on an axum socket in production
    /// and on in-memory channels in tests.
    pub async fn run<S, R, E>(self, sink: S, stream: R)
    where
        S: Sink<Message> + Send + Unpin + 'static,
        S::Error: fmt::Display + Send,
        R: Stream<Item = Result<Message, E>> + Send + Unpin + 'static,
        E: fmt::Display + Send + 'static,
    {
        let Connection {
            handle,
            inbox,
            hub,
            submitter,
            settings,
        } = self;

        if let Err(e) = hub.register(Arc::clone(&handle)).await {
            tracing::warn!(
                connection_id = %handle.id(),
                user_id = %handle.user_id(),
                error = %e,
                "Could not register connection"
            );
            handle.close_mailbox();
            handle.advance(ConnectionState::Closed);
            return;
        }
        handle.touch();

        let mut writer = tokio::spawn(write_loop(
            Arc::clone(&handle),
            inbox,
            sink,
            settings.clone(),
        ));
        let mut reader = tokio::spawn(read_loop(
            Arc::clone(&handle),
            stream,
            hub.clone(),
            submitter,
            settings.max_message_size,
        ));
        handle.advance(ConnectionState::Open);
        tracing::debug!(
            connection_id = %handle.id(),
            user_id = %handle.user_id(),
            "Connection open"
        );

        tokio::select! {
            result = &mut writer => {
                report_panic(handle.id(), "writer", result);
                reader.abort();
                report_panic(handle.id(), "reader", reader.await);
            }
            result = &mut reader => {
                report_panic(handle.id(), "reader", result);
                writer.abort();
                report_panic(handle.id(), "writer", writer.await);
            }
        }

        handle.advance(ConnectionState::Closing);
        handle.close_mailbox();
        if let Err(e) = hub.unregister(&handle).await {
            tracing::debug!(connection_id = %handle.id(), error = %e, "Hub gone before unregister");
        }
        handle.advance(ConnectionState::Closed);
        tracing::debug!(
            connection_id = %handle.id(),
            user_id = %handle.user_id(),
            "Connection closed"
        );
    }
}

/// Cancellation is the normal way a loop is stopped; only panics are news.
fn report_panic(connection_id: ConnectionId, task: &'static str, result: Result<(), JoinError>) {
    if let Err(e) = result {
        if e.is_panic() {
            tracing::error!(connection_id = %connection_id, task, error = %e, "Connection task panicked");
        }
    }
}

#[derive(Debug, Error)]
enum WriteError {
    #[error("write timed out")]
    Timeout,

    #[error("{0}")]
    Transport(String),
}

async fn send_with_timeout<S>(sink: &mut S, message: Message, limit: Duration) -> Result<(), WriteError>
where
    S: Sink<Message> + Unpin,
    S::Error: fmt::Display,
{
    match tokio::time::timeout(limit, sink.send(message)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(WriteError::Transport(e.to_string())),
        Err(_) => Err(WriteError::Timeout),
    }
}

/// Drain the mailbox to the socket and keep the peer alive.
async fn write_loop<S>(
    handle: Arc<ConnectionHandle>,
    mut inbox: MailboxReceiver,
    mut sink: S,
    settings: ConnectionSettings,
) where
    S: Sink<Message> + Unpin,
    S::Error: fmt::Display,
{
    let mut keep_alive = tokio::time::interval_at(
        Instant::now() + settings.ping_interval,
        settings.ping_interval,
    );
    keep_alive.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // Fires when the peer has been silent for `pong_wait`; any inbound frame
    // moves the deadline.
    let silence = tokio::time::sleep_until(handle.last_seen() + settings.pong_wait);
    tokio::pin!(silence);

    loop {
        tokio::select! {
            frame = inbox.recv() => {
                let Some(frame) = frame else {
                    tracing::debug!(connection_id = %handle.id(), "Mailbox closed");
                    break;
                };
                let message = Message::Text(frame.to_string());
                if let Err(e) = send_with_timeout(&mut sink, message, settings.write_timeout).await {
                    tracing::debug!(connection_id = %handle.id(), error = %e, "Write failed");
                    break;
                }
            }
            _ = &mut silence => {
                let deadline = handle.last_seen() + settings.pong_wait;
                if deadline <= Instant::now() {
                    tracing::debug!(connection_id = %handle.id(), "Peer silent too long");
                    break;
                }
                silence.as_mut().reset(deadline);
            }
            _ = keep_alive.tick() => {
                if let Err(e) = send_with_timeout(&mut sink, Message::Ping(Vec::new()), settings.write_timeout).await {
                    tracing::debug!(connection_id = %handle.id(), error = %e, "Ping failed");
                    break;
                }
            }
        }
    }

    handle.advance(ConnectionState::Closing);
    let _ = tokio::time::timeout(settings.write_timeout, sink.close()).await;
}

/// Read client frames until the socket closes or errors.
async fn read_loop<R, E>(
    handle: Arc<ConnectionHandle>,
    mut stream: R,
    hub: HubHandle,
    submitter: Option<Arc<dyn MessageSubmitter>>,
    max_message_size: usize,
) where
    R: Stream<Item = Result<Message, E>> + Unpin,
    E: fmt::Display,
{
    while let Some(incoming) = stream.next().await {
        let message = match incoming {
            Ok(message) => message,
            Err(e) => {
                tracing::debug!(connection_id = %handle.id(), error = %e, "Read error");
                break;
            }
        };
        handle.touch();

        match message {
            Message::Text(text) => {
                if text.len() > max_message_size {
                    let err = ProtocolError::TooLarge {
                        limit: max_message_size,
                    };
                    handle.reply_error(err.code(), err.to_string());
                    continue;
                }
                match ClientEvent::decode(&text) {
                    Ok(event) => dispatch(&handle, &hub, submitter.as_deref(), event).await,
                    Err(err) => {
                        tracing::debug!(
                            connection_id = %handle.id(),
                            error = %err,
                            "Rejected client frame"
                        );
                        handle.reply_error(err.code(), err.to_string());
                    }
                }
            }
            Message::Binary(_) => {
                let err = ProtocolError::BinaryFrame;
                handle.reply_error(err.code(), err.to_string());
            }
            // Transport-level keep-alive; answered by the websocket library.
            Message::Ping(_) | Message::Pong(_) => {}
            Message::Close(_) => {
                tracing::debug!(connection_id = %handle.id(), "Client sent close frame");
                break;
            }
        }
    }

    handle.advance(ConnectionState::Closing);
}

async fn dispatch(
    handle: &ConnectionHandle,
    hub: &HubHandle,
    submitter: Option<&dyn MessageSubmitter>,
    event: ClientEvent,
) {
    match event {
        ClientEvent::Subscribe(channel_id) => {
            handle.subscribe(channel_id);
            tracing::debug!(
                connection_id = %handle.id(),
                user_id = %handle.user_id(),
                channel_id = %channel_id,
                "Subscribed"
            );
        }
        ClientEvent::Unsubscribe(channel_id) => {
            handle.unsubscribe(channel_id);
            tracing::debug!(
                connection_id = %handle.id(),
                user_id = %handle.user_id(),
                channel_id = %channel_id,
                "Unsubscribed"
            );
        }
        ClientEvent::TypingStart(channel_id) => match Envelope::typing(channel_id, handle.user()) {
            Ok(envelope) => {
                if let Err(e) =
                    hub.broadcast_to_channel(channel_id, &envelope, Some(handle.user_id()))
                {
                    tracing::debug!(channel_id = %channel_id, error = %e, "Typing event dropped");
                }
            }
            Err(e) => {
                tracing::warn!(channel_id = %channel_id, error = %e, "Failed to build typing event");
            }
        },
        // Clients expire typing indicators on their own timer.
        ClientEvent::TypingStop(_) => {}
        ClientEvent::Ping => handle.reply(&Envelope::pong()),
        ClientEvent::MessageSend {
            channel_id,
            content,
            nonce,
        } => {
            let Some(submitter) = submitter else {
                let err = ProtocolError::Unsupported {
                    kind: EventKind::MessageSend,
                };
                handle.reply_error(err.code(), err.to_string());
                return;
            };
            if let Err(e) = submitter
                .submit(handle.user_id(), channel_id, content, nonce)
                .await
            {
                tracing::debug!(
                    connection_id = %handle.id(),
                    channel_id = %channel_id,
                    error = %e,
                    "message.send rejected"
                );
                handle.reply_error(ErrorCode::SendFailed, e.to_string());
            }
        }
    }
}
