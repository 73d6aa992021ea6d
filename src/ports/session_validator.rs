//! Bearer token verification, consulted once per connection attempt.
//!
//! Browsers cannot attach headers to a websocket handshake, so the acceptor
//! pulls the token from the query string and hands it here before upgrading.
//! The relay itself only ever sees the resulting `AuthenticatedUser`.

use async_trait::async_trait;

use crate::domain::foundation::{AuthError, AuthenticatedUser};

/// Turns an access token into a verified identity.
///
/// Implementations report a bad signature or malformed token as
/// `InvalidToken`, a past `exp` as `TokenExpired`, and anything transient
/// (key fetch, remote introspection) as `ServiceUnavailable` so the acceptor
/// can answer 503 instead of 401.
#[async_trait]
pub trait SessionValidator: Send + Sync {
    async fn validate(&self, token: &str) -> Result<AuthenticatedUser, AuthError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::foundation::UserId;
    use std::sync::Arc;

    /// Accepts exactly one token.
    struct SingleToken {
        token: &'static str,
        user: AuthenticatedUser,
    }

    #[async_trait]
    impl SessionValidator for SingleToken {
        async fn validate(&self, token: &str) -> Result<AuthenticatedUser, AuthError> {
            if token == self.token {
                Ok(self.user.clone())
            } else {
                Err(AuthError::InvalidToken)
            }
        }
    }

    #[tokio::test]
    async fn validator_is_usable_behind_arc_dyn() {
        let user = AuthenticatedUser::new(UserId::new(), "alice", None);
        let validator: Arc<dyn SessionValidator> = Arc::new(SingleToken {
            token: "t0k3n",
            user: user.clone(),
        });

        assert_eq!(validator.validate("t0k3n").await, Ok(user));
        assert_eq!(
            validator.validate("other").await,
            Err(AuthError::InvalidToken)
        );
    }
}
