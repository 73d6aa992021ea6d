//! Strongly-typed identifier value objects.
//!
//! Every identifier the relay handles is a v4 UUID on the wire. Wrapping each
//! kind in its own type keeps a `ScopeId` from being passed where a `UserId`
//! is expected when fan-out decisions are made.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }
    };
}

uuid_id! {
    /// A user account. Issued by the auth layer; the relay only ever sees
    /// verified values.
    UserId
}

uuid_id! {
    /// The room an event belongs to: a chat channel or a direct-message
    /// conversation. Both share the `channel_id` field on the wire, so the
    /// relay treats them uniformly.
    ScopeId
}

uuid_id! {
    /// A channel message or direct message.
    MessageId
}
