//! Per-connection outbound mailbox.
//!
//! A bounded FIFO of encoded frames plus a close signal. Enqueueing never
//! blocks: a full queue is reported to the caller, who decides whether that
//! means "drop the frame" or "drop the connection". The writer loop is the
//! only consumer and sees frames strictly in enqueue order.
//!
//! Closing is separate from dropping the senders because the connection's own
//! reader keeps a sender for direct replies (`pong`, `error`); the registry
//! must still be able to stop the writer while that clone is alive.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{mpsc, watch};

/// One encoded envelope, shared between every mailbox it is fanned out to.
pub type Frame = Arc<str>;

/// Why a frame could not be enqueued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MailboxError {
    #[error("mailbox full")]
    Full,

    #[error("mailbox closed")]
    Closed,
}

/// Creates a mailbox holding at most `capacity` pending frames.
pub fn mailbox(capacity: usize) -> (Mailbox, MailboxReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let (closed_tx, closed_rx) = watch::channel(false);
    (
        Mailbox {
            tx,
            closed: Arc::new(closed_tx),
        },
        MailboxReceiver {
            rx,
            closed: closed_rx,
        },
    )
}

/// Producer side. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Mailbox {
    tx: mpsc::Sender<Frame>,
    closed: Arc<watch::Sender<bool>>,
}

impl Mailbox {
    /// Enqueue without waiting.
    pub fn try_push(&self, frame: Frame) -> Result<(), MailboxError> {
        if self.is_closed() {
            return Err(MailboxError::Closed);
        }
        self.tx.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => MailboxError::Full,
            mpsc::error::TrySendError::Closed(_) => MailboxError::Closed,
        })
    }

    /// Close the mailbox. Pending frames are discarded and the receiver
    /// reports end-of-stream. Idempotent.
    pub fn close(&self) {
        self.closed.send_replace(true);
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow() || self.tx.is_closed()
    }
}

/// Consumer side, owned by the writer loop.
#[derive(Debug)]
pub struct MailboxReceiver {
    rx: mpsc::Receiver<Frame>,
    closed: watch::Receiver<bool>,
}

impl MailboxReceiver {
    /// Next frame in enqueue order, or `None` once the mailbox is closed.
    ///
    /// Cancel-safe, so it can sit in a `select!` next to a timer.
    pub async fn recv(&mut self) -> Option<Frame> {
        if *self.closed.borrow() {
            return None;
        }
        tokio::select! {
            biased;
            _ = self.closed.wait_for(|closed| *closed) => None,
            frame = self.rx.recv() => frame,
        }
    }
}
