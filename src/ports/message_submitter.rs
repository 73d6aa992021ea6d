//! Message submission port for `message.send` frames.
//!
//! A client may post a channel message over its open socket instead of the
//! REST endpoint. The relay does not persist anything: it hands the content to
//! the business layer through this port, which performs the same permission
//! checks and writes as the HTTP path. The relay then learns about the stored
//! record like any other, through `Notifier::notify_new_message`.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::foundation::{ScopeId, UserId};

/// Why the business layer refused an inbound message.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SubmitError {
    #[error("not a member of this channel")]
    Forbidden,

    #[error("channel not found")]
    NotFound,

    #[error("{0}")]
    Rejected(String),

    #[error("message service unavailable: {0}")]
    Unavailable(String),
}

/// Persists messages sent over a websocket connection.
#[async_trait]
pub trait MessageSubmitter: Send + Sync {
    /// Store a new message from `sender` in `channel_id`.
    ///
    /// `nonce` is the client's correlation token, passed through untouched.
    async fn submit(
        &self,
        sender: UserId,
        channel_id: ScopeId,
        content: String,
        nonce: Option<String>,
    ) -> Result<(), SubmitError>;
}
