//! WebSocket message types for the real-time relay.
//!
//! Every frame on the wire, in both directions, is one JSON [`Envelope`]:
//!
//! ```json
//! {"type": "message.new", "channel_id": "…", "payload": {…}, "ts": 1736510400}
//! ```
//!
//! - Server → Client: built only through the typed constructors on
//!   [`Envelope`], so a scoped kind can never leave without its scope.
//! - Client → Server: decoded into a [`ClientEvent`] by
//!   [`ClientEvent::decode`], which rejects unknown kinds, server-only kinds,
//!   and missing scopes with a [`ProtocolError`].

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::domain::foundation::{AuthenticatedUser, MessageId, ScopeId, Timestamp, UserId};
use crate::domain::messaging::{DmMessage, Message};

// ============================================
// Event kinds
// ============================================

/// Every event type the relay understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    // Client → Server
    #[serde(rename = "message.send")]
    MessageSend,
    #[serde(rename = "typing.start")]
    TypingStart,
    #[serde(rename = "typing.stop")]
    TypingStop,
    #[serde(rename = "channel.subscribe")]
    ChannelSubscribe,
    #[serde(rename = "channel.unsubscribe")]
    ChannelUnsubscribe,
    #[serde(rename = "ping")]
    Ping,

    // Server → Client
    #[serde(rename = "message.new")]
    MessageNew,
    #[serde(rename = "message.edited")]
    MessageEdited,
    #[serde(rename = "message.deleted")]
    MessageDeleted,
    #[serde(rename = "dm.new")]
    DmNew,
    #[serde(rename = "dm.edited")]
    DmEdited,
    #[serde(rename = "dm.deleted")]
    DmDeleted,
    #[serde(rename = "typing")]
    Typing,
    #[serde(rename = "presence")]
    Presence,
    #[serde(rename = "pong")]
    Pong,
    #[serde(rename = "error")]
    Error,
}

impl EventKind {
    /// Resolve a wire name. Unknown names are reported verbatim.
    fn from_wire(name: &str) -> Result<Self, ProtocolError> {
        serde_json::from_value(Value::String(name.to_string()))
            .map_err(|_| ProtocolError::UnknownEvent(name.to_string()))
    }
}

/// Renders the wire name.
impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_value(self) {
            Ok(Value::String(name)) => f.write_str(&name),
            _ => Err(fmt::Error),
        }
    }
}

// ============================================
// Envelope
// ============================================

/// The base envelope for all WebSocket messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: EventKind,

    /// Channel or conversation the event belongs to; absent for
    /// connection-global events.
    #[serde(rename = "channel_id", default, skip_serializing_if = "Option::is_none")]
    pub channel_scope: Option<ScopeId>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,

    /// Unix seconds, stamped by the server at emission.
    #[serde(rename = "ts", default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

impl Envelope {
    /// Build a server → client envelope with the current timestamp.
    fn server<P: Serialize>(
        kind: EventKind,
        channel_scope: Option<ScopeId>,
        payload: &P,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            kind,
            channel_scope,
            payload: Some(serde_json::to_value(payload)?),
            timestamp: Some(Timestamp::now().as_unix_secs()),
        })
    }

    pub fn message_new(message: &Message) -> Result<Self, serde_json::Error> {
        Self::server(EventKind::MessageNew, Some(message.channel_id), message)
    }

    pub fn message_edited(message: &Message) -> Result<Self, serde_json::Error> {
        Self::server(EventKind::MessageEdited, Some(message.channel_id), message)
    }

    pub fn message_deleted(
        channel_id: ScopeId,
        message_id: MessageId,
    ) -> Result<Self, serde_json::Error> {
        Self::server(
            EventKind::MessageDeleted,
            Some(channel_id),
            &MessageDeletedPayload { id: message_id },
        )
    }

    pub fn dm_new(message: &DmMessage) -> Result<Self, serde_json::Error> {
        Self::server(EventKind::DmNew, Some(message.conversation_id), message)
    }

    pub fn dm_edited(message: &DmMessage) -> Result<Self, serde_json::Error> {
        Self::server(EventKind::DmEdited, Some(message.conversation_id), message)
    }

    pub fn dm_deleted(
        conversation_id: ScopeId,
        message_id: MessageId,
    ) -> Result<Self, serde_json::Error> {
        Self::server(
            EventKind::DmDeleted,
            Some(conversation_id),
            &MessageDeletedPayload { id: message_id },
        )
    }

    /// `user` started typing in `channel_id`.
    pub fn typing(channel_id: ScopeId, user: &AuthenticatedUser) -> Result<Self, serde_json::Error> {
        Self::server(
            EventKind::Typing,
            Some(channel_id),
            &TypingPayload {
                user_id: user.id,
                username: user.username.clone(),
                display_name: user.display_name_or_username().to_string(),
            },
        )
    }

    pub fn presence(user_id: UserId, status: PresenceStatus) -> Result<Self, serde_json::Error> {
        Self::server(EventKind::Presence, None, &PresencePayload { user_id, status })
    }

    pub fn pong() -> Self {
        Self {
            kind: EventKind::Pong,
            channel_scope: None,
            payload: None,
            timestamp: Some(Timestamp::now().as_unix_secs()),
        }
    }

    pub fn error(code: ErrorCode, message: impl Into<String>) -> Result<Self, serde_json::Error> {
        Self::server(
            EventKind::Error,
            None,
            &ErrorPayload {
                code,
                message: message.into(),
            },
        )
    }

    /// Serialize to the text frame that goes on the wire.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

// ============================================
// Payloads
// ============================================

/// Payload of `channel.subscribe` / `channel.unsubscribe`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelPayload {
    pub channel_id: ScopeId,
}

/// Payload of `message.send`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageSendPayload {
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageDeletedPayload {
    pub id: MessageId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypingPayload {
    pub user_id: UserId,
    pub username: String,
    pub display_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    Offline,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresencePayload {
    pub user_id: UserId,
    pub status: PresenceStatus,
}

/// Machine-readable error codes carried in `error` envelopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Frame could not be decoded as an envelope at all.
    InvalidMessage,
    /// Envelope decoded but its payload or scope is unusable.
    InvalidPayload,
    /// Unknown kind, or a server-only kind sent by a client.
    UnknownEvent,
    /// Valid kind this connection cannot act on.
    UnsupportedEvent,
    /// The business layer refused a `message.send`.
    SendFailed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: ErrorCode,
    pub message: String,
}

// ============================================
// Client → Server
// ============================================

/// A decoded, validated client request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    MessageSend {
        channel_id: ScopeId,
        content: String,
        nonce: Option<String>,
    },
    TypingStart(ScopeId),
    TypingStop(ScopeId),
    Subscribe(ScopeId),
    Unsubscribe(ScopeId),
    Ping,
}

/// Inbound frame before the kind is resolved, so unknown kinds can be
/// reported by name instead of as a generic decode failure.
#[derive(Debug, Deserialize)]
struct InboundFrame {
    #[serde(rename = "type")]
    kind: String,
    #[serde(rename = "channel_id", default)]
    channel_scope: Option<ScopeId>,
    #[serde(default)]
    payload: Option<Value>,
}

impl ClientEvent {
    /// Decode one text frame sent by a client.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let frame: InboundFrame = serde_json::from_str(text).map_err(ProtocolError::Malformed)?;
        let kind = EventKind::from_wire(&frame.kind)?;

        match kind {
            EventKind::ChannelSubscribe => {
                let p: ChannelPayload = parse_payload(kind, frame.payload)?;
                Ok(ClientEvent::Subscribe(p.channel_id))
            }
            EventKind::ChannelUnsubscribe => {
                let p: ChannelPayload = parse_payload(kind, frame.payload)?;
                Ok(ClientEvent::Unsubscribe(p.channel_id))
            }
            EventKind::TypingStart => Ok(ClientEvent::TypingStart(require_scope(
                kind,
                frame.channel_scope,
            )?)),
            EventKind::TypingStop => Ok(ClientEvent::TypingStop(require_scope(
                kind,
                frame.channel_scope,
            )?)),
            EventKind::MessageSend => {
                let channel_id = require_scope(kind, frame.channel_scope)?;
                let p: MessageSendPayload = parse_payload(kind, frame.payload)?;
                if p.content.trim().is_empty() {
                    return Err(ProtocolError::InvalidPayload { kind });
                }
                Ok(ClientEvent::MessageSend {
                    channel_id,
                    content: p.content,
                    nonce: p.nonce,
                })
            }
            EventKind::Ping => Ok(ClientEvent::Ping),
            server_only => Err(ProtocolError::UnknownEvent(server_only.to_string())),
        }
    }
}

fn require_scope(kind: EventKind, scope: Option<ScopeId>) -> Result<ScopeId, ProtocolError> {
    scope.ok_or(ProtocolError::MissingScope { kind })
}

fn parse_payload<T: serde::de::DeserializeOwned>(
    kind: EventKind,
    payload: Option<Value>,
) -> Result<T, ProtocolError> {
    let payload = payload.ok_or(ProtocolError::InvalidPayload { kind })?;
    serde_json::from_value(payload).map_err(|_| ProtocolError::InvalidPayload { kind })
}

/// Recoverable violations of the client protocol.
///
/// Each is answered with an `error` envelope; none closes the connection.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("invalid message: {0}")]
    Malformed(#[source] serde_json::Error),

    #[error("message exceeds {limit} bytes")]
    TooLarge { limit: usize },

    #[error("unknown event type: {0}")]
    UnknownEvent(String),

    #[error("invalid {kind} payload")]
    InvalidPayload { kind: EventKind },

    #[error("channel_id required for {kind} events")]
    MissingScope { kind: EventKind },

    #[error("binary frames are not supported")]
    BinaryFrame,

    #[error("{kind} is not supported on this connection")]
    Unsupported { kind: EventKind },
}

impl ProtocolError {
    /// The machine-readable code sent back to the client.
    pub fn code(&self) -> ErrorCode {
        match self {
            ProtocolError::Malformed(_) | ProtocolError::TooLarge { .. } => ErrorCode::InvalidMessage,
            ProtocolError::UnknownEvent(_) => ErrorCode::UnknownEvent,
            ProtocolError::InvalidPayload { .. } | ProtocolError::MissingScope { .. } => {
                ErrorCode::InvalidPayload
            }
            ProtocolError::BinaryFrame | ProtocolError::Unsupported { .. } => {
                ErrorCode::UnsupportedEvent
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn kinds_display_and_resolve_by_wire_name() {
        for (kind, name) in [
            (EventKind::ChannelSubscribe, "channel.subscribe"),
            (EventKind::DmDeleted, "dm.deleted"),
            (EventKind::Pong, "pong"),
        ] {
            assert_eq!(kind.to_string(), name);
            assert_eq!(EventKind::from_wire(name).unwrap(), kind);
        }
        assert!(EventKind::from_wire("Pong").is_err());
    }

    #[test]
    fn message_new_envelope_serializes_with_wire_names() {
        let msg = Message::text(ScopeId::new(), UserId::new(), "hi");
        let env = Envelope::message_new(&msg).unwrap();

        let json: Value = serde_json::from_str(&env.encode().unwrap()).unwrap();
        assert_eq!(json["type"], "message.new");
        assert_eq!(json["channel_id"], msg.channel_id.to_string());
        assert_eq!(json["payload"]["content"], "hi");
        assert!(json["ts"].is_i64());
    }

    #[test]
    fn presence_envelope_has_no_scope() {
        let user = UserId::new();
        let env = Envelope::presence(user, PresenceStatus::Offline).unwrap();

        let json: Value = serde_json::from_str(&env.encode().unwrap()).unwrap();
        assert!(json.get("channel_id").is_none());
        assert_eq!(json["payload"]["status"], "offline");
        assert_eq!(json["payload"]["user_id"], user.to_string());
    }

    #[test]
    fn pong_envelope_has_no_payload() {
        let json: Value = serde_json::from_str(&Envelope::pong().encode().unwrap()).unwrap();
        assert_eq!(json["type"], "pong");
        assert!(json.get("payload").is_none());
    }

    #[test]
    fn error_envelope_uses_screaming_codes() {
        let env = Envelope::error(ErrorCode::UnknownEvent, "unknown event type: x").unwrap();
        let json: Value = serde_json::from_str(&env.encode().unwrap()).unwrap();
        assert_eq!(json["payload"]["code"], "UNKNOWN_EVENT");
        assert_eq!(json["payload"]["message"], "unknown event type: x");
    }

    #[test]
    fn typing_envelope_falls_back_to_username() {
        let user = AuthenticatedUser::new(UserId::new(), "carol", None);
        let env = Envelope::typing(ScopeId::new(), &user).unwrap();
        let payload = env.payload.unwrap();
        assert_eq!(payload["username"], "carol");
        assert_eq!(payload["display_name"], "carol");
    }

    #[test]
    fn decode_subscribe() {
        let scope = ScopeId::new();
        let text = json!({"type": "channel.subscribe", "payload": {"channel_id": scope}}).to_string();
        assert_eq!(ClientEvent::decode(&text).unwrap(), ClientEvent::Subscribe(scope));
    }

    #[test]
    fn decode_subscribe_without_payload_is_invalid_payload() {
        let err = ClientEvent::decode(r#"{"type": "channel.unsubscribe"}"#).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidPayload);
    }

    #[test]
    fn decode_typing_requires_scope() {
        let err = ClientEvent::decode(r#"{"type": "typing.start"}"#).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::MissingScope {
                kind: EventKind::TypingStart
            }
        ));
        assert_eq!(err.code(), ErrorCode::InvalidPayload);
    }

    #[test]
    fn decode_message_send() {
        let scope = ScopeId::new();
        let text = json!({
            "type": "message.send",
            "channel_id": scope,
            "payload": {"content": "hi", "nonce": "n-1"}
        })
        .to_string();

        assert_eq!(
            ClientEvent::decode(&text).unwrap(),
            ClientEvent::MessageSend {
                channel_id: scope,
                content: "hi".to_string(),
                nonce: Some("n-1".to_string()),
            }
        );
    }

    #[test]
    fn decode_message_send_rejects_blank_content() {
        let text = json!({
            "type": "message.send",
            "channel_id": ScopeId::new(),
            "payload": {"content": "   "}
        })
        .to_string();
        assert_eq!(ClientEvent::decode(&text).unwrap_err().code(), ErrorCode::InvalidPayload);
    }

    #[test]
    fn decode_ping() {
        assert_eq!(ClientEvent::decode(r#"{"type": "ping"}"#).unwrap(), ClientEvent::Ping);
    }

    #[test]
    fn decode_unknown_kind_reports_name() {
        let err = ClientEvent::decode(r#"{"type": "teleport"}"#).unwrap_err();
        assert_eq!(err.code(), ErrorCode::UnknownEvent);
        assert_eq!(err.to_string(), "unknown event type: teleport");
    }

    #[test]
    fn decode_server_only_kind_is_unknown_event() {
        let err = ClientEvent::decode(r#"{"type": "presence"}"#).unwrap_err();
        assert_eq!(err.code(), ErrorCode::UnknownEvent);
    }

    #[test]
    fn decode_garbage_is_invalid_message() {
        let err = ClientEvent::decode("not json").unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidMessage);
    }

    #[test]
    fn decode_bad_scope_uuid_is_invalid_message() {
        let err = ClientEvent::decode(r#"{"type": "typing.start", "channel_id": "nope"}"#)
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidMessage);
    }

    mod prop {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn decode_never_panics_on_arbitrary_text(text in ".{0,256}") {
                let _ = ClientEvent::decode(&text);
            }

            #[test]
            fn unknown_kinds_are_always_reported_by_name(kind in "[a-z]{1,12}\\.[a-z]{1,12}") {
                prop_assume!(EventKind::from_wire(&kind).is_err());
                let text = json!({"type": kind}).to_string();
                let err = ClientEvent::decode(&text).unwrap_err();
                prop_assert_eq!(err.code(), ErrorCode::UnknownEvent);
                prop_assert!(err.to_string().ends_with(kind.as_str()));
            }
        }
    }
}
