//! Relay configuration (mailboxes, keep-alive, frame limits)

use serde::Deserialize;
use std::time::Duration;

use super::error::ValidationError;

/// WebSocket relay configuration
#[derive(Debug, Clone, Deserialize)]
pub struct WebSocketConfig {
    /// Outbound frames buffered per connection before it counts as slow
    #[serde(default = "default_mailbox_capacity")]
    pub mailbox_capacity: usize,

    /// Commands buffered in front of the hub control loop
    #[serde(default = "default_hub_inbox_capacity")]
    pub hub_inbox_capacity: usize,

    /// Upper bound on a single socket write, in seconds
    #[serde(default = "default_write_timeout")]
    pub write_timeout_secs: u64,

    /// Keep-alive ping period, in seconds
    #[serde(default = "default_ping_interval")]
    pub ping_interval_secs: u64,

    /// Silence tolerated before a peer is considered dead, in seconds
    #[serde(default = "default_pong_wait")]
    pub pong_wait_secs: u64,

    /// Largest inbound text frame accepted, in bytes
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
}

impl WebSocketConfig {
    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }

    pub fn pong_wait(&self) -> Duration {
        Duration::from_secs(self.pong_wait_secs)
    }

    /// Validate relay configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.mailbox_capacity == 0 {
            return Err(ValidationError::ZeroCapacity("mailbox_capacity"));
        }
        if self.hub_inbox_capacity == 0 {
            return Err(ValidationError::ZeroCapacity("hub_inbox_capacity"));
        }
        if self.max_message_size == 0 {
            return Err(ValidationError::ZeroCapacity("max_message_size"));
        }
        if self.write_timeout_secs == 0 {
            return Err(ValidationError::InvalidTimeout("write_timeout_secs"));
        }
        if self.ping_interval_secs <= self.write_timeout_secs {
            return Err(ValidationError::PingIntervalTooShort);
        }
        if self.pong_wait_secs <= self.ping_interval_secs {
            return Err(ValidationError::PongWaitTooShort);
        }
        Ok(())
    }
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            mailbox_capacity: default_mailbox_capacity(),
            hub_inbox_capacity: default_hub_inbox_capacity(),
            write_timeout_secs: default_write_timeout(),
            ping_interval_secs: default_ping_interval(),
            pong_wait_secs: default_pong_wait(),
            max_message_size: default_max_message_size(),
        }
    }
}

fn default_mailbox_capacity() -> usize {
    256
}

fn default_hub_inbox_capacity() -> usize {
    1024
}

fn default_write_timeout() -> u64 {
    10
}

fn default_ping_interval() -> u64 {
    30
}

fn default_pong_wait() -> u64 {
    60
}

fn default_max_message_size() -> usize {
    4096
}
