//! Adapters - Implementations of port interfaces.
//!
//! Adapters connect the relay to the outside world:
//! - `auth` - `SessionValidator` implementations (JWT, mock)
//! - `http` - Application router and health check
//! - `websocket` - The real-time relay and its `Notifier` implementation

pub mod auth;
pub mod http;
pub mod websocket;

pub use auth::{JwtSessionValidator, MockSessionValidator};
pub use http::app_router;
pub use websocket::{Hub, HubHandle, HubNotifier, WebSocketState};
