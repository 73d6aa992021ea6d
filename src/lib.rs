//! Pulse - real-time event relay for team messaging
//!
//! Keeps every open client connection informed, in order, of message and
//! presence changes made elsewhere in the system. Business services persist
//! first and then call the `Notifier` port; the relay fans the event out to
//! subscribed websocket connections.

pub mod adapters;
pub mod config;
pub mod domain;
pub mod ports;
