//! Per-subscription plumbing shared by connections and the coordinator.

use crate::event::Event;
use tokio::sync::mpsc;

/// Generate a short unique subscription id.
pub fn generate_subscription_id() -> String {
    uuid::Uuid::new_v4().to_string()[..8].to_string()
}

/// Updates delivered on an open subscription.
#[derive(Debug, Clone)]
pub enum SubscriptionUpdate {
    /// A matching event arrived.
    Event(Event),
    /// The relay finished replaying stored events.
    EndOfStoredEvents,
}

/// Handle to an open subscription on a single relay.
///
/// Dropping the handle only stops delivery; send `CLOSE` via
/// `RelayConnection::unsubscribe` to release the relay side.
pub struct SubscriptionHandle {
    pub id: String,
    pub updates: mpsc::UnboundedReceiver<SubscriptionUpdate>,
}
