//! Domain layer containing the records the relay carries.
//!
//! # Module Organization
//!
//! - `foundation` - Shared domain primitives (IDs, timestamps, auth types)
//! - `messaging` - Finished channel messages and direct messages handed over
//!   by the business services

pub mod foundation;
pub mod messaging;
