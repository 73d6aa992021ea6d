//! Registry of live connections, run as a single actor task.
//!
//! The hub exclusively owns the `user → connections` map. Everything else
//! talks to it through a [`HubHandle`], which posts [`HubCommand`]s into a
//! bounded inbox. Commands are applied one at a time, so registration,
//! unregistration and fan-out never interleave.
//!
//! # Architecture
//!
//! ```text
//! user-a ─┬─ conn-1 {general, random}
//!         └─ conn-2 {general}
//! user-b ─── conn-3 {random}
//! ```
//!
//! A `message.new` for `general` reaches conn-1 and conn-2; `presence` for a
//! new user-c reaches all three.
//!
//! # Overflow
//!
//! - Channel broadcast into a full mailbox: the connection cannot keep up and
//!   is unregistered.
//! - Direct user send or presence into a full mailbox: the frame is dropped
//!   and the connection stays.
//! - Channel broadcast into a full hub inbox: the scope is recorded as lost.
//!   Before applying its next command the hub unregisters every connection
//!   that would have received it, so no live subscriber silently misses an
//!   event.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use thiserror::Error;
use tokio::sync::{mpsc, oneshot, Notify};

use crate::domain::foundation::{ScopeId, UserId};

use super::connection::{ConnectionHandle, ConnectionId};
use super::mailbox::{Frame, MailboxError};
use super::messages::{Envelope, PresenceStatus};

/// Errors from posting work to the hub.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("failed to encode envelope: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("hub is not running")]
    HubUnavailable,

    #[error("hub inbox is full")]
    InboxFull,
}

/// Requests processed by the hub's control loop.
#[derive(Debug)]
pub enum HubCommand {
    Register {
        connection: Arc<ConnectionHandle>,
        ack: oneshot::Sender<()>,
    },
    Unregister {
        connection: Arc<ConnectionHandle>,
        ack: oneshot::Sender<()>,
    },
    BroadcastToChannel {
        channel_id: ScopeId,
        frame: Frame,
        exclude: Option<UserId>,
    },
    SendToUser {
        user_id: UserId,
        frame: Frame,
    },
    OnlineUsers(oneshot::Sender<Vec<UserId>>),
    ConnectionCount {
        user_id: UserId,
        reply: oneshot::Sender<usize>,
    },
    Shutdown,
}

/// Channel broadcasts that never made it into the inbox, keyed by scope.
///
/// Holds at most one entry per scope, so it stays bounded however long the
/// inbox stays full.
#[derive(Debug, Default)]
struct LostBroadcasts {
    scopes: Mutex<HashMap<ScopeId, Option<UserId>>>,
    wake: Notify,
}

impl LostBroadcasts {
    fn record(&self, channel_id: ScopeId, exclude: Option<UserId>) {
        self.scopes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(channel_id)
            // Two losses with different exclusions widen to "everyone".
            .and_modify(|excluded| {
                if *excluded != exclude {
                    *excluded = None;
                }
            })
            .or_insert(exclude);
        self.wake.notify_one();
    }

    fn take(&self) -> HashMap<ScopeId, Option<UserId>> {
        std::mem::take(&mut *self.scopes.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

/// The control loop. Create with [`Hub::new`], then drive with [`Hub::run`].
pub struct Hub {
    connections: HashMap<UserId, HashMap<ConnectionId, Arc<ConnectionHandle>>>,
    inbox: mpsc::Receiver<HubCommand>,
    lost: Arc<LostBroadcasts>,
}

impl Hub {
    /// Create a hub whose inbox holds at most `inbox_capacity` commands.
    pub fn new(inbox_capacity: usize) -> (Self, HubHandle) {
        let (tx, rx) = mpsc::channel(inbox_capacity.max(1));
        let lost = Arc::new(LostBroadcasts::default());
        (
            Self {
                connections: HashMap::new(),
                inbox: rx,
                lost: Arc::clone(&lost),
            },
            HubHandle { tx, lost },
        )
    }

    /// Create a hub and run it on the current tokio runtime.
    pub fn spawn(inbox_capacity: usize) -> HubHandle {
        let (hub, handle) = Self::new(inbox_capacity);
        tokio::spawn(hub.run());
        handle
    }

    /// Process commands until shutdown or until every handle is dropped.
    pub async fn run(mut self) {
        tracing::info!("Relay hub started");

        loop {
            let command = tokio::select! {
                command = self.inbox.recv() => command,
                _ = self.lost.wake.notified() => {
                    self.resync_lost();
                    continue;
                }
            };
            let Some(command) = command else { break };
            // A loss recorded before this command was queued must be settled
            // before anything newer is delivered.
            self.resync_lost();

            match command {
                HubCommand::Register { connection, ack } => {
                    self.register(connection);
                    let _ = ack.send(());
                }
                HubCommand::Unregister { connection, ack } => {
                    self.unregister(&connection);
                    let _ = ack.send(());
                }
                HubCommand::BroadcastToChannel {
                    channel_id,
                    frame,
                    exclude,
                } => self.broadcast_to_channel(channel_id, frame, exclude),
                HubCommand::SendToUser { user_id, frame } => self.send_to_user(user_id, frame),
                HubCommand::OnlineUsers(reply) => {
                    let _ = reply.send(self.connections.keys().copied().collect());
                }
                HubCommand::ConnectionCount { user_id, reply } => {
                    let count = self.connections.get(&user_id).map_or(0, HashMap::len);
                    let _ = reply.send(count);
                }
                HubCommand::Shutdown => break,
            }
        }

        for connection in self.connections.values().flat_map(HashMap::values) {
            connection.close_mailbox();
        }
        self.connections.clear();
        tracing::info!("Relay hub stopped");
    }

    fn register(&mut self, connection: Arc<ConnectionHandle>) {
        let user_id = connection.user_id();
        let first = !self.connections.contains_key(&user_id);

        self.connections
            .entry(user_id)
            .or_default()
            .insert(connection.id(), Arc::clone(&connection));

        tracing::info!(
            user_id = %user_id,
            connection_id = %connection.id(),
            online_users = self.connections.len(),
            "User connected"
        );

        if first {
            self.broadcast_presence(user_id, PresenceStatus::Online);
        }
    }

    fn unregister(&mut self, connection: &ConnectionHandle) {
        let user_id = connection.user_id();
        connection.close_mailbox();

        let Some(user_connections) = self.connections.get_mut(&user_id) else {
            return;
        };
        if user_connections.remove(&connection.id()).is_none() {
            return;
        }

        let last = user_connections.is_empty();
        if last {
            self.connections.remove(&user_id);
        }

        tracing::info!(
            user_id = %user_id,
            connection_id = %connection.id(),
            online_users = self.connections.len(),
            "User disconnected"
        );

        if last {
            self.broadcast_presence(user_id, PresenceStatus::Offline);
        }
    }

    fn broadcast_to_channel(&mut self, channel_id: ScopeId, frame: Frame, exclude: Option<UserId>) {
        let mut dead = Vec::new();

        for (user_id, user_connections) in &self.connections {
            if exclude == Some(*user_id) {
                continue;
            }
            for connection in user_connections.values() {
                if !connection.is_subscribed(channel_id) {
                    continue;
                }
                if let Err(e) = connection.deliver(Arc::clone(&frame)) {
                    dead.push((Arc::clone(connection), e));
                }
            }
        }

        for (connection, reason) in dead {
            if reason == MailboxError::Full {
                tracing::warn!(
                    user_id = %connection.user_id(),
                    connection_id = %connection.id(),
                    channel_id = %channel_id,
                    "Mailbox full, dropping connection"
                );
            }
            self.unregister(&connection);
        }
    }

    /// Unregister every connection that would have received a lost
    /// broadcast. The closed socket tells the client to reconnect and
    /// re-fetch.
    fn resync_lost(&mut self) {
        let lost = self.lost.take();
        if lost.is_empty() {
            return;
        }

        let mut stale = Vec::new();
        for (user_id, user_connections) in &self.connections {
            for connection in user_connections.values() {
                let missed = lost.iter().any(|(channel_id, exclude)| {
                    *exclude != Some(*user_id) && connection.is_subscribed(*channel_id)
                });
                if missed {
                    stale.push(Arc::clone(connection));
                }
            }
        }

        for connection in stale {
            tracing::warn!(
                user_id = %connection.user_id(),
                connection_id = %connection.id(),
                "Broadcast lost on full hub inbox, dropping subscriber"
            );
            self.unregister(&connection);
        }
    }

    fn send_to_user(&self, user_id: UserId, frame: Frame) {
        let Some(user_connections) = self.connections.get(&user_id) else {
            return;
        };
        for connection in user_connections.values() {
            if let Err(e) = connection.deliver(Arc::clone(&frame)) {
                tracing::debug!(
                    user_id = %user_id,
                    connection_id = %connection.id(),
                    reason = %e,
                    "Dropped direct frame"
                );
            }
        }
    }

    /// Tell every other user's connections that `user_id` changed status.
    fn broadcast_presence(&self, user_id: UserId, status: PresenceStatus) {
        let frame = match Envelope::presence(user_id, status).and_then(|e| e.encode()) {
            Ok(frame) => Frame::from(frame),
            Err(e) => {
                tracing::warn!(user_id = %user_id, error = %e, "Failed to encode presence");
                return;
            }
        };

        for (other, user_connections) in &self.connections {
            if *other == user_id {
                continue;
            }
            for connection in user_connections.values() {
                let _ = connection.deliver(Arc::clone(&frame));
            }
        }
    }
}

/// Cloneable sender side of the hub.
#[derive(Debug, Clone)]
pub struct HubHandle {
    tx: mpsc::Sender<HubCommand>,
    lost: Arc<LostBroadcasts>,
}

impl HubHandle {
    /// Add a connection and wait until the hub has applied it.
    pub async fn register(&self, connection: Arc<ConnectionHandle>) -> Result<(), RelayError> {
        let (ack, done) = oneshot::channel();
        self.post(HubCommand::Register { connection, ack }).await?;
        done.await.map_err(|_| RelayError::HubUnavailable)
    }

    /// Remove a connection and close its mailbox. Safe to call more than once.
    pub async fn unregister(&self, connection: &Arc<ConnectionHandle>) -> Result<(), RelayError> {
        let (ack, done) = oneshot::channel();
        self.post(HubCommand::Unregister {
            connection: Arc::clone(connection),
            ack,
        })
        .await?;
        done.await.map_err(|_| RelayError::HubUnavailable)
    }

    /// Fan `envelope` out to every connection subscribed to `channel_id`,
    /// skipping all connections of `exclude`.
    ///
    /// Never waits. If the inbox is full the event is not queued and
    /// `InboxFull` is returned; every connection it would have reached is
    /// unregistered before the hub applies anything newer.
    pub fn broadcast_to_channel(
        &self,
        channel_id: ScopeId,
        envelope: &Envelope,
        exclude: Option<UserId>,
    ) -> Result<(), RelayError> {
        let frame = Frame::from(envelope.encode()?);
        let result = self.try_post(HubCommand::BroadcastToChannel {
            channel_id,
            frame,
            exclude,
        });
        if let Err(RelayError::InboxFull) = result {
            self.lost.record(channel_id, exclude);
        }
        result
    }

    /// Deliver `envelope` to every connection of one user, ignoring
    /// subscriptions.
    pub fn send_to_user(&self, user_id: UserId, envelope: &Envelope) -> Result<(), RelayError> {
        let frame = Frame::from(envelope.encode()?);
        self.try_post(HubCommand::SendToUser { user_id, frame })
    }

    /// Users with at least one registered connection.
    pub async fn online_users(&self) -> Result<Vec<UserId>, RelayError> {
        let (reply, rx) = oneshot::channel();
        self.post(HubCommand::OnlineUsers(reply)).await?;
        rx.await.map_err(|_| RelayError::HubUnavailable)
    }

    pub async fn connection_count(&self, user_id: UserId) -> Result<usize, RelayError> {
        let (reply, rx) = oneshot::channel();
        self.post(HubCommand::ConnectionCount { user_id, reply }).await?;
        rx.await.map_err(|_| RelayError::HubUnavailable)
    }

    /// Stop the hub and close every registered mailbox.
    pub async fn shutdown(&self) -> Result<(), RelayError> {
        self.post(HubCommand::Shutdown).await
    }

    async fn post(&self, command: HubCommand) -> Result<(), RelayError> {
        self.tx
            .send(command)
            .await
            .map_err(|_| RelayError::HubUnavailable)
    }

    fn try_post(&self, command: HubCommand) -> Result<(), RelayError> {
        self.tx.try_send(command).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => RelayError::InboxFull,
            mpsc::error::TrySendError::Closed(_) => RelayError::HubUnavailable,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::websocket::mailbox::{mailbox, MailboxReceiver};
    use crate::adapters::websocket::messages::EventKind;
    use crate::domain::foundation::{AuthenticatedUser, MessageId};
    use crate::domain::messaging::Message;

    fn connect(user_id: UserId, capacity: usize) -> (Arc<ConnectionHandle>, MailboxReceiver) {
        let (mailbox, rx) = mailbox(capacity);
        let user = AuthenticatedUser::new(user_id, "user", None);
        (Arc::new(ConnectionHandle::new(user, mailbox)), rx)
    }

    fn pending(rx: &mut MailboxReceiver) -> Vec<Envelope> {
        let mut out = Vec::new();
        while let Some(Some(frame)) = rx_try(rx) {
            out.push(serde_json::from_str(&frame).unwrap());
        }
        out
    }

    fn rx_try(rx: &mut MailboxReceiver) -> Option<Option<Frame>> {
        use futures::FutureExt;
        rx.recv().now_or_never()
    }

    /// Round-trip through the inbox so every earlier command has been applied.
    async fn settle(hub: &HubHandle) {
        hub.online_users().await.unwrap();
    }

    #[tokio::test]
    async fn first_connection_announces_presence_to_others_only() {
        let hub = Hub::spawn(16);
        let alice = UserId::new();
        let bob = UserId::new();

        let (a1, mut a1_rx) = connect(alice, 8);
        hub.register(a1).await.unwrap();
        let (b1, mut b1_rx) = connect(bob, 8);
        hub.register(b1).await.unwrap();

        let to_alice = pending(&mut a1_rx);
        assert_eq!(to_alice.len(), 1);
        assert_eq!(to_alice[0].kind, EventKind::Presence);
        assert_eq!(to_alice[0].payload.as_ref().unwrap()["status"], "online");
        assert!(pending(&mut b1_rx).is_empty());

        // Second tab for bob: no new presence.
        let (b2, _b2_rx) = connect(bob, 8);
        hub.register(b2).await.unwrap();
        assert!(pending(&mut a1_rx).is_empty());
        assert_eq!(hub.connection_count(bob).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn only_last_disconnect_announces_offline() {
        let hub = Hub::spawn(16);
        let alice = UserId::new();
        let bob = UserId::new();

        let (a1, mut a1_rx) = connect(alice, 8);
        hub.register(a1).await.unwrap();
        let (b1, _b1_rx) = connect(bob, 8);
        let (b2, _b2_rx) = connect(bob, 8);
        hub.register(Arc::clone(&b1)).await.unwrap();
        hub.register(Arc::clone(&b2)).await.unwrap();
        pending(&mut a1_rx);

        hub.unregister(&b1).await.unwrap();
        assert!(pending(&mut a1_rx).is_empty());

        hub.unregister(&b2).await.unwrap();
        let to_alice = pending(&mut a1_rx);
        assert_eq!(to_alice.len(), 1);
        assert_eq!(to_alice[0].payload.as_ref().unwrap()["status"], "offline");
        assert_eq!(hub.online_users().await.unwrap(), vec![alice]);
    }

    #[tokio::test]
    async fn unregister_twice_is_a_noop() {
        let hub = Hub::spawn(16);
        let alice = UserId::new();
        let (a1, mut a1_rx) = connect(alice, 8);
        let (b1, _b1_rx) = connect(UserId::new(), 8);
        hub.register(a1).await.unwrap();
        hub.register(Arc::clone(&b1)).await.unwrap();
        pending(&mut a1_rx);

        hub.unregister(&b1).await.unwrap();
        hub.unregister(&b1).await.unwrap();

        assert_eq!(pending(&mut a1_rx).len(), 1);
        assert_eq!(hub.online_users().await.unwrap(), vec![alice]);
    }

    #[tokio::test]
    async fn broadcast_respects_subscriptions_and_exclusion() {
        let hub = Hub::spawn(16);
        let general = ScopeId::new();
        let alice = UserId::new();
        let bob = UserId::new();

        let (a1, mut a1_rx) = connect(alice, 8);
        let (a2, mut a2_rx) = connect(alice, 8);
        let (b1, mut b1_rx) = connect(bob, 8);
        let (b2, mut b2_rx) = connect(bob, 8);
        a1.subscribe(general);
        a2.subscribe(general);
        b1.subscribe(general);
        for c in [a1, a2, b1, b2] {
            hub.register(c).await.unwrap();
        }
        for rx in [&mut a1_rx, &mut a2_rx, &mut b1_rx, &mut b2_rx] {
            pending(rx);
        }

        let msg = Message::text(general, alice, "hi");
        let env = Envelope::message_new(&msg).unwrap();
        hub.broadcast_to_channel(general, &env, Some(alice)).unwrap();
        settle(&hub).await;

        assert!(pending(&mut a1_rx).is_empty());
        assert!(pending(&mut a2_rx).is_empty());
        assert_eq!(pending(&mut b1_rx), vec![env]);
        assert!(pending(&mut b2_rx).is_empty());
    }

    #[tokio::test]
    async fn broadcast_overflow_unregisters_on_the_extra_frame() {
        let hub = Hub::spawn(16);
        let general = ScopeId::new();
        let slow = UserId::new();
        let (conn, _rx) = connect(slow, 2);
        conn.subscribe(general);
        hub.register(Arc::clone(&conn)).await.unwrap();

        let env = Envelope::message_deleted(general, MessageId::new()).unwrap();
        hub.broadcast_to_channel(general, &env, None).unwrap();
        hub.broadcast_to_channel(general, &env, None).unwrap();
        settle(&hub).await;
        assert_eq!(hub.connection_count(slow).await.unwrap(), 1);

        hub.broadcast_to_channel(general, &env, None).unwrap();
        settle(&hub).await;
        assert_eq!(hub.connection_count(slow).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn send_to_user_overflow_keeps_connection() {
        let hub = Hub::spawn(16);
        let alice = UserId::new();
        let (conn, mut rx) = connect(alice, 1);
        hub.register(conn).await.unwrap();

        hub.send_to_user(alice, &Envelope::pong()).unwrap();
        hub.send_to_user(alice, &Envelope::pong()).unwrap();
        settle(&hub).await;

        assert_eq!(hub.connection_count(alice).await.unwrap(), 1);
        assert_eq!(pending(&mut rx).len(), 1);
    }

    #[tokio::test]
    async fn send_to_user_reaches_every_tab() {
        let hub = Hub::spawn(16);
        let alice = UserId::new();
        let (a1, mut a1_rx) = connect(alice, 4);
        let (a2, mut a2_rx) = connect(alice, 4);
        hub.register(a1).await.unwrap();
        hub.register(a2).await.unwrap();

        hub.send_to_user(alice, &Envelope::pong()).unwrap();
        settle(&hub).await;

        assert_eq!(pending(&mut a1_rx).len(), 1);
        assert_eq!(pending(&mut a2_rx).len(), 1);
    }

    #[tokio::test]
    async fn shutdown_closes_mailboxes_and_stops_accepting() {
        let hub = Hub::spawn(16);
        let (conn, mut rx) = connect(UserId::new(), 4);
        hub.register(conn).await.unwrap();

        hub.shutdown().await.unwrap();

        assert!(rx.recv().await.is_none());
        tokio::task::yield_now().await;
        assert!(matches!(
            hub.online_users().await,
            Err(RelayError::HubUnavailable)
        ));
    }

    #[tokio::test]
    async fn broadcast_burst_is_delivered_or_resynced() {
        let hub = Hub::spawn(4);
        let alice = UserId::new();
        let mut tabs = Vec::new();
        for _ in 0..12 {
            let scope = ScopeId::new();
            let (conn, rx) = connect(alice, 4);
            conn.subscribe(scope);
            hub.register(conn).await.unwrap();
            tabs.push((scope, rx));
        }

        // No await between posts, so the hub cannot drain the inbox.
        let mut rejected = Vec::new();
        for (scope, _) in &tabs {
            let env = Envelope::message_deleted(*scope, MessageId::new()).unwrap();
            if let Err(e) = hub.broadcast_to_channel(*scope, &env, None) {
                assert!(matches!(e, RelayError::InboxFull));
                rejected.push(*scope);
            }
        }
        assert!(!rejected.is_empty());
        settle(&hub).await;

        for (scope, rx) in &mut tabs {
            let received = pending(rx);
            if rejected.contains(scope) {
                assert!(received.is_empty());
            } else {
                assert_eq!(received.len(), 1);
            }
        }
        assert_eq!(
            hub.connection_count(alice).await.unwrap(),
            tabs.len() - rejected.len()
        );
    }

    #[tokio::test]
    async fn lost_broadcast_spares_the_excluded_user() {
        let hub = Hub::spawn(1);
        let general = ScopeId::new();
        let alice = UserId::new();
        let bob = UserId::new();
        let (a1, _a1_rx) = connect(alice, 8);
        let (b1, _b1_rx) = connect(bob, 8);
        a1.subscribe(general);
        b1.subscribe(general);
        hub.register(a1).await.unwrap();
        hub.register(b1).await.unwrap();

        // The first post fills the single inbox slot.
        let elsewhere = Envelope::message_deleted(ScopeId::new(), MessageId::new()).unwrap();
        hub.broadcast_to_channel(ScopeId::new(), &elsewhere, None).unwrap();
        let env = Envelope::message_deleted(general, MessageId::new()).unwrap();
        assert!(matches!(
            hub.broadcast_to_channel(general, &env, Some(alice)),
            Err(RelayError::InboxFull)
        ));
        settle(&hub).await;

        assert_eq!(hub.connection_count(alice).await.unwrap(), 1);
        assert_eq!(hub.connection_count(bob).await.unwrap(), 0);
    }

    #[test]
    fn full_inbox_is_reported_without_waiting() {
        let (_hub, handle) = Hub::new(1);
        handle.send_to_user(UserId::new(), &Envelope::pong()).unwrap();
        assert!(matches!(
            handle.send_to_user(UserId::new(), &Envelope::pong()),
            Err(RelayError::InboxFull)
        ));
    }
}
