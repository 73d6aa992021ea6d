//! Notifier adapter connecting business services to WebSocket clients.
//!
//! # Event Flow
//!
//! ```text
//! MessageService::create (row committed)
//!          │
//!          ▼
//! ┌────────────────────┐
//! │   HubNotifier      │
//! │  builds Envelope   │
//! └────────────────────┘
//!          │ try_send, never waits
//!          ▼
//! ┌────────────────────┐
//! │  Hub control loop  │
//! │  fans out to       │
//! │  subscribed conns  │
//! └────────────────────┘
//! ```
//!
//! New and edited records are not echoed to any connection of their sender;
//! the sender's client already has the record from its API response.
//! Deletions go to everyone subscribed.
//!
//! The notifier never waits on the hub. When the hub inbox is full the hub
//! drops the would-be recipients instead, and their clients re-fetch on
//! reconnect.

use crate::domain::foundation::{MessageId, ScopeId, UserId};
use crate::domain::messaging::{DmMessage, Message};
use crate::ports::Notifier;

use super::hub::HubHandle;
use super::messages::Envelope;

/// [`Notifier`] backed by the relay hub.
#[derive(Debug, Clone)]
pub struct HubNotifier {
    hub: HubHandle,
}

impl HubNotifier {
    pub fn new(hub: HubHandle) -> Self {
        Self { hub }
    }

    fn publish(
        &self,
        channel_id: ScopeId,
        envelope: Result<Envelope, serde_json::Error>,
        exclude: Option<UserId>,
    ) {
        let envelope = match envelope {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!(channel_id = %channel_id, error = %e, "Failed to build event");
                return;
            }
        };

        if let Err(e) = self.hub.broadcast_to_channel(channel_id, &envelope, exclude) {
            tracing::warn!(
                channel_id = %channel_id,
                event_type = %envelope.kind,
                error = %e,
                "Dropped real-time event"
            );
        }
    }
}

impl Notifier for HubNotifier {
    fn notify_new_message(&self, message: &Message) {
        self.publish(
            message.channel_id,
            Envelope::message_new(message),
            Some(message.sender_id),
        );
    }

    fn notify_edited_message(&self, message: &Message) {
        self.publish(
            message.channel_id,
            Envelope::message_edited(message),
            Some(message.sender_id),
        );
    }

    fn notify_deleted_message(&self, channel_id: ScopeId, message_id: MessageId) {
        self.publish(channel_id, Envelope::message_deleted(channel_id, message_id), None);
    }

    fn notify_new_dm(&self, message: &DmMessage) {
        self.publish(
            message.conversation_id,
            Envelope::dm_new(message),
            Some(message.sender_id),
        );
    }

    fn notify_edited_dm(&self, message: &DmMessage) {
        self.publish(
            message.conversation_id,
            Envelope::dm_edited(message),
            Some(message.sender_id),
        );
    }

    fn notify_deleted_dm(&self, conversation_id: ScopeId, message_id: MessageId) {
        self.publish(
            conversation_id,
            Envelope::dm_deleted(conversation_id, message_id),
            None,
        );
    }
}
