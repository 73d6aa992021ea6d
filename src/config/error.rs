//! Configuration error types

use thiserror::Error;

/// Errors that can occur during configuration loading
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration loading failed: {0}")]
    LoadError(#[from] config::ConfigError),

    #[error("Validation failed: {0}")]
    ValidationFailed(#[from] ValidationError),
}

/// Errors that can occur during configuration validation
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Required configuration missing: {0}")]
    MissingRequired(&'static str),

    #[error("Invalid port number")]
    InvalidPort,

    #[error("Invalid bind host: {0}")]
    InvalidHost(String),

    #[error("Invalid timeout: {0}")]
    InvalidTimeout(&'static str),

    #[error("Capacity must be greater than zero: {0}")]
    ZeroCapacity(&'static str),

    #[error("JWT secret must be at least {min} bytes in production")]
    SecretTooShort { min: usize },

    #[error("Ping interval must exceed the write timeout")]
    PingIntervalTooShort,

    #[error("Pong wait must exceed the ping interval")]
    PongWaitTooShort,
}
