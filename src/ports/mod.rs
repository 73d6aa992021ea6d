//! Ports - Interfaces for external collaborators.
//!
//! Following hexagonal architecture, ports define the contracts between
//! the relay and the layers it deliberately does not own:
//!
//! - `Notifier` - Business services push finished message/DM actions in
//! - `SessionValidator` - Token verification before a socket is accepted
//! - `MessageSubmitter` - Persistence of messages sent over a socket

mod message_submitter;
mod notifier;
mod session_validator;

pub use message_submitter::{MessageSubmitter, SubmitError};
pub use notifier::Notifier;
pub use session_validator::SessionValidator;
