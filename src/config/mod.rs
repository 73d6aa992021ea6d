//! Relay configuration, read from `PULSE__`-prefixed environment variables.
//!
//! Nested keys use `__`: `PULSE__WEBSOCKET__PING_INTERVAL_SECS=20` sets
//! `websocket.ping_interval_secs`. A `.env` file is honoured in development.
//!
//! ```no_run
//! use pulse::config::AppConfig;
//!
//! let config = AppConfig::load().expect("Failed to load configuration");
//! config.validate().expect("Invalid configuration");
//! ```

mod auth;
mod error;
mod server;
mod websocket;

pub use auth::{AuthConfig, MIN_PRODUCTION_SECRET_LEN};
pub use error::{ConfigError, ValidationError};
pub use server::{Environment, ServerConfig};
pub use websocket::WebSocketConfig;

use serde::Deserialize;

/// Root application configuration
///
/// Load using [`AppConfig::load()`] which reads from environment variables.
#[derive(Debug, Deserialize)]
pub struct AppConfig {
    /// Server configuration (host, port, environment)
    #[serde(default)]
    pub server: ServerConfig,

    /// Authentication configuration (token secret)
    pub auth: AuthConfig,

    /// Relay tuning (mailboxes, keep-alive, frame size)
    #[serde(default)]
    pub websocket: WebSocketConfig,
}

impl AppConfig {
    /// Read `.env` (if any) and the process environment.
    ///
    /// Fails when `PULSE__AUTH__JWT_SECRET` is absent or a value does not
    /// parse into its field type. Range checks live in [`AppConfig::validate`].
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(
                config::Environment::default()
                    .prefix("PULSE")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        self.server.validate()?;
        self.auth.validate(&self.server.environment)?;
        self.websocket.validate()?;
        Ok(())
    }

    pub fn is_production(&self) -> bool {
        self.server.is_production()
    }
}
