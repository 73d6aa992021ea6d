//! Messaging records produced by the business services.
//!
//! These are persisted rows as the services return them after a successful
//! write. The relay only serializes them; it never loads or mutates them.

mod message;

pub use message::{DmMessage, Message};
