//! Verified identity as the relay sees it.
//!
//! The relay never authenticates anyone itself: the acceptor hands it an
//! `AuthenticatedUser` produced by a `SessionValidator` and everything
//! downstream trusts that identity.

use super::UserId;
use thiserror::Error;

/// Authenticated user extracted from a validated token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser {
    /// The unique user identifier (token subject).
    pub id: UserId,

    /// Account handle, empty when the token carries none.
    pub username: String,

    /// Display name if the token carries one.
    pub display_name: Option<String>,
}

impl AuthenticatedUser {
    /// Creates a new authenticated user.
    pub fn new(id: UserId, username: impl Into<String>, display_name: Option<String>) -> Self {
        Self {
            id,
            username: username.into(),
            display_name,
        }
    }

    /// Returns the user's display name, or username as fallback.
    pub fn display_name_or_username(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.username)
    }
}

/// Why a connection attempt was refused. Token-library errors are folded
/// into these before they leave the auth adapter.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    /// No token was supplied with the connection request.
    #[error("Missing token")]
    MissingToken,

    /// The token is malformed or has an invalid signature.
    #[error("Invalid token")]
    InvalidToken,

    /// Well-formed and correctly signed, but past `exp`.
    #[error("Token expired")]
    TokenExpired,

    /// The authentication service is unavailable (network, config, etc.).
    #[error("Auth service unavailable: {0}")]
    ServiceUnavailable(String),
}

impl AuthError {
    /// Creates a service unavailable error with a message.
    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::ServiceUnavailable(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_name_or_username_prefers_display_name() {
        let user = AuthenticatedUser::new(UserId::new(), "alice", Some("Alice A.".to_string()));
        assert_eq!(user.display_name_or_username(), "Alice A.");
    }

    #[test]
    fn display_name_or_username_falls_back_to_username() {
        let user = AuthenticatedUser::new(UserId::new(), "bob", None);
        assert_eq!(user.display_name_or_username(), "bob");
    }

    #[test]
    fn auth_error_service_unavailable_displays_message() {
        let err = AuthError::service_unavailable("Connection refused");
        assert_eq!(format!("{}", err), "Auth service unavailable: Connection refused");
    }

    #[test]
    fn expired_and_invalid_render_distinct_messages() {
        assert_ne!(
            AuthError::TokenExpired.to_string(),
            AuthError::InvalidToken.to_string()
        );
    }
}
