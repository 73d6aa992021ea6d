//! Notifier port - real-time fan-out of finished business actions.
//!
//! Business services call into this port *after* their own persistence has
//! committed. Every method is fire-and-forget: it returns immediately, never
//! waits on socket I/O, and cannot fail from the caller's point of view. A
//! notification that cannot be delivered is a missed real-time update, which
//! clients repair by re-fetching over the REST API.
//!
//! # Wiring
//!
//! ```ignore
//! let notifier: Arc<dyn Notifier> = Arc::new(HubNotifier::new(hub.clone()));
//! message_service.set_notifier(notifier.clone());
//! dm_service.set_notifier(notifier);
//! ```

use crate::domain::foundation::{MessageId, ScopeId};
use crate::domain::messaging::{DmMessage, Message};

/// Broadcasts real-time events about messages to connected clients.
pub trait Notifier: Send + Sync {
    /// A channel message was created.
    fn notify_new_message(&self, message: &Message);

    /// A channel message was edited.
    fn notify_edited_message(&self, message: &Message);

    /// A channel message was soft-deleted.
    fn notify_deleted_message(&self, channel_id: ScopeId, message_id: MessageId);

    /// A direct message was created.
    fn notify_new_dm(&self, message: &DmMessage);

    /// A direct message was edited.
    fn notify_edited_dm(&self, message: &DmMessage);

    /// A direct message was soft-deleted.
    fn notify_deleted_dm(&self, conversation_id: ScopeId, message_id: MessageId);
}
