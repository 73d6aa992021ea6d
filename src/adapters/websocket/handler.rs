//! WebSocket upgrade handler for relay connections.
//!
//! Handles the HTTP → WebSocket upgrade and hands the socket to the relay:
//! 1. Read the bearer token from `?token=`
//! 2. Validate it through the `SessionValidator` port
//! 3. Upgrade to WebSocket
//! 4. Build a [`Connection`] and run it until disconnect
//!
//! Browsers cannot set headers on a websocket handshake, which is why the
//! token travels in the query string.

use std::sync::Arc;

use axum::{
    extract::{ws::WebSocket, Query, State, WebSocketUpgrade},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use futures::StreamExt;
use serde::Deserialize;

use crate::domain::foundation::{AuthError, AuthenticatedUser};
use crate::ports::{MessageSubmitter, SessionValidator};

use super::connection::{Connection, ConnectionSettings};
use super::hub::HubHandle;

/// State required for WebSocket handling.
#[derive(Clone)]
pub struct WebSocketState {
    pub hub: HubHandle,
    pub validator: Arc<dyn SessionValidator>,
    /// Business-layer entry point for `message.send`; `None` answers those
    /// frames with `UNSUPPORTED_EVENT`.
    pub submitter: Option<Arc<dyn MessageSubmitter>>,
    pub settings: ConnectionSettings,
}

impl WebSocketState {
    pub fn new(
        hub: HubHandle,
        validator: Arc<dyn SessionValidator>,
        settings: ConnectionSettings,
    ) -> Self {
        Self {
            hub,
            validator,
            submitter: None,
            settings,
        }
    }

    pub fn with_submitter(mut self, submitter: Arc<dyn MessageSubmitter>) -> Self {
        self.submitter = Some(submitter);
        self
    }
}

#[derive(Debug, Deserialize)]
pub struct ConnectQuery {
    pub token: Option<String>,
}

/// Rejection returned before the upgrade happens.
#[derive(Debug, Clone)]
pub enum ConnectRejection {
    Auth(AuthError),
    UpgradeRequired,
}

impl IntoResponse for ConnectRejection {
    fn into_response(self) -> Response {
        let (status, message, code) = match &self {
            ConnectRejection::Auth(AuthError::MissingToken) => {
                (StatusCode::UNAUTHORIZED, "Missing token", "MISSING_TOKEN")
            }
            ConnectRejection::Auth(AuthError::TokenExpired) => {
                (StatusCode::UNAUTHORIZED, "Token expired", "AUTH_ERROR")
            }
            ConnectRejection::Auth(AuthError::InvalidToken) => {
                (StatusCode::UNAUTHORIZED, "Invalid token", "AUTH_ERROR")
            }
            ConnectRejection::Auth(AuthError::ServiceUnavailable(msg)) => {
                tracing::error!("Auth service unavailable: {}", msg);
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "Authentication service unavailable",
                    "AUTH_ERROR",
                )
            }
            ConnectRejection::UpgradeRequired => (
                StatusCode::UPGRADE_REQUIRED,
                "WebSocket upgrade required",
                "UPGRADE_REQUIRED",
            ),
        };

        (
            status,
            Json(serde_json::json!({
                "error": message,
                "code": code
            })),
        )
            .into_response()
    }
}

/// Handle WebSocket upgrade requests.
///
/// Route: `GET /ws?token=<jwt>`
///
/// The token is verified before the upgrade; a rejected caller gets a plain
/// HTTP error and never reaches the hub.
pub async fn ws_handler(
    State(state): State<WebSocketState>,
    Query(query): Query<ConnectQuery>,
    ws: Option<WebSocketUpgrade>,
) -> Result<Response, ConnectRejection> {
    let user = authenticate(state.validator.as_ref(), query.token.as_deref()).await?;
    let ws = ws.ok_or(ConnectRejection::UpgradeRequired)?;

    tracing::debug!(user_id = %user.id, "Upgrading connection");
    Ok(ws.on_upgrade(move |socket| accept(socket, user, state)))
}

async fn authenticate(
    validator: &dyn SessionValidator,
    token: Option<&str>,
) -> Result<AuthenticatedUser, ConnectRejection> {
    let token = token
        .filter(|t| !t.is_empty())
        .ok_or(ConnectRejection::Auth(AuthError::MissingToken))?;

    validator.validate(token).await.map_err(|e| {
        tracing::debug!(error = %e, "Rejected websocket connection");
        ConnectRejection::Auth(e)
    })
}

/// Run an upgraded socket as a relay connection.
async fn accept(socket: WebSocket, user: AuthenticatedUser, state: WebSocketState) {
    let (sink, stream) = socket.split();

    Connection::new(user, state.hub, state.settings)
        .with_submitter(state.submitter)
        .run(sink, stream)
        .await;
}

/// Create axum router for the WebSocket endpoint.
///
/// # Example
///
/// ```ignore
/// let app = Router::new()
///     .merge(websocket_router())
///     .with_state(ws_state);
/// ```
pub fn websocket_router() -> axum::Router<WebSocketState> {
    use axum::routing::get;

    axum::Router::new().route("/ws", get(ws_handler))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::auth::MockSessionValidator;
    use crate::adapters::websocket::hub::Hub;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn state_with(validator: MockSessionValidator) -> WebSocketState {
        let (_hub, handle) = Hub::new(8);
        WebSocketState::new(handle, Arc::new(validator), ConnectionSettings::default())
    }

    async fn status_and_code(state: WebSocketState, uri: &str) -> (StatusCode, String) {
        let response = websocket_router()
            .with_state(state)
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        (status, json["code"].as_str().unwrap_or_default().to_string())
    }

    #[tokio::test]
    async fn missing_token_is_unauthorized() {
        let state = state_with(MockSessionValidator::new());
        let (status, code) = status_and_code(state, "/ws").await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(code, "MISSING_TOKEN");
    }

    #[tokio::test]
    async fn empty_token_is_treated_as_missing() {
        let state = state_with(MockSessionValidator::new());
        let (status, code) = status_and_code(state, "/ws?token=").await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(code, "MISSING_TOKEN");
    }

    #[tokio::test]
    async fn unknown_token_is_unauthorized() {
        let state = state_with(MockSessionValidator::new());
        let (status, code) = status_and_code(state, "/ws?token=bogus").await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(code, "AUTH_ERROR");
    }

    #[tokio::test]
    async fn auth_outage_is_service_unavailable() {
        let validator = MockSessionValidator::new()
            .with_error(AuthError::service_unavailable("jwks fetch failed"));
        let (status, code) = status_and_code(state_with(validator), "/ws?token=t").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(code, "AUTH_ERROR");
    }

    #[tokio::test]
    async fn valid_token_without_upgrade_asks_for_upgrade() {
        let validator = MockSessionValidator::new().with_test_user("good", "alice");
        let (status, code) = status_and_code(state_with(validator), "/ws?token=good").await;
        assert_eq!(status, StatusCode::UPGRADE_REQUIRED);
        assert_eq!(code, "UPGRADE_REQUIRED");
    }
}
