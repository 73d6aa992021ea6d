//! Foundation module - Shared domain primitives.
//!
//! Contains the identifiers, time values, and authentication types that
//! form the vocabulary of the relay.

mod auth;
mod ids;
mod timestamp;

pub use auth::{AuthError, AuthenticatedUser};
pub use ids::{MessageId, ScopeId, UserId};
pub use timestamp::Timestamp;
