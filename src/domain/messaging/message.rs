//! Channel messages and direct messages.

use serde::{Deserialize, Serialize};

use crate::domain::foundation::{MessageId, ScopeId, Timestamp, UserId};

fn default_message_type() -> String {
    "text".to_string()
}

/// A message posted to a workspace channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub channel_id: ScopeId,
    pub sender_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(rename = "type", default = "default_message_type")]
    pub message_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<MessageId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edited_at: Option<Timestamp>,
    /// Soft-delete marker; never leaves the server.
    #[serde(skip)]
    pub deleted_at: Option<Timestamp>,
    pub created_at: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_display_name: Option<String>,
}

impl Message {
    /// Creates a plain text message created now.
    pub fn text(channel_id: ScopeId, sender_id: UserId, content: impl Into<String>) -> Self {
        Self {
            id: MessageId::new(),
            channel_id,
            sender_id,
            content: Some(content.into()),
            message_type: default_message_type(),
            parent_id: None,
            edited_at: None,
            deleted_at: None,
            created_at: Timestamp::now(),
            sender_username: None,
            sender_display_name: None,
        }
    }
}

/// A message inside a direct-message conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DmMessage {
    pub id: MessageId,
    pub conversation_id: ScopeId,
    pub sender_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edited_at: Option<Timestamp>,
    #[serde(skip)]
    pub deleted_at: Option<Timestamp>,
    pub created_at: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_display_name: Option<String>,
}

impl DmMessage {
    /// Creates a direct message created now.
    pub fn text(conversation_id: ScopeId, sender_id: UserId, content: impl Into<String>) -> Self {
        Self {
            id: MessageId::new(),
            conversation_id,
            sender_id,
            content: Some(content.into()),
            edited_at: None,
            deleted_at: None,
            created_at: Timestamp::now(),
            sender_username: None,
            sender_display_name: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_serializes_type_field_and_hides_deletion() {
        let mut msg = Message::text(ScopeId::new(), UserId::new(), "hi");
        msg.deleted_at = Some(Timestamp::now());

        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "text");
        assert_eq!(json["content"], "hi");
        assert!(json.get("deleted_at").is_none());
        assert!(json.get("edited_at").is_none());
    }

    #[test]
    fn dm_message_carries_conversation_id() {
        let conversation = ScopeId::new();
        let dm = DmMessage::text(conversation, UserId::new(), "psst");

        let json = serde_json::to_value(&dm).unwrap();
        assert_eq!(json["conversation_id"], conversation.to_string());
        assert!(json.get("deleted_at").is_none());
    }
}
