//! WebSocket relay for real-time message and presence events.
//!
//! This module keeps every open client connection informed of message and
//! presence changes happening elsewhere in the system.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                     Business services                                │
//! │   MessageService │ DmService  (persist first, then notify)          │
//! └─────────────────────────────────────────────────────────────────────┘
//!                                     │
//!                                     │ Notifier port
//!                                     ▼
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                        HubNotifier                                   │
//! │   - Builds Envelope from the finished record                        │
//! │   - Posts broadcast without waiting                                 │
//! └─────────────────────────────────────────────────────────────────────┘
//!                                     │
//!                                     │ HubCommand (bounded inbox)
//!                                     ▼
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                            Hub                                       │
//! │   user-a ─┬─ conn-1 {general}      user-b ─── conn-3 {random}       │
//! │           └─ conn-2 {general}                                        │
//! └─────────────────────────────────────────────────────────────────────┘
//!                                     │
//!                                     │ per-connection mailbox
//!                                     ▼
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                   Connection (reader + writer)                       │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Components
//!
//! - [`messages`] - Envelope, event kinds, payloads, client decoding
//! - [`mailbox`] - Bounded per-connection outbound queue
//! - [`connection`] - Reader/writer loops and connection lifecycle
//! - [`hub`] - Registry actor, fan-out, presence
//! - [`notifier`] - `Notifier` port implementation
//! - [`handler`] - Axum upgrade handler (the acceptor)

pub mod connection;
pub mod handler;
pub mod hub;
pub mod mailbox;
pub mod messages;
pub mod notifier;

pub use connection::{Connection, ConnectionHandle, ConnectionId, ConnectionSettings, ConnectionState};
pub use handler::{websocket_router, ws_handler, ConnectQuery, ConnectRejection, WebSocketState};
pub use hub::{Hub, HubCommand, HubHandle, RelayError};
pub use mailbox::{mailbox, Frame, Mailbox, MailboxError, MailboxReceiver};
pub use messages::{
    ClientEvent, Envelope, ErrorCode, ErrorPayload, EventKind, PresenceStatus, ProtocolError,
};
pub use notifier::HubNotifier;
