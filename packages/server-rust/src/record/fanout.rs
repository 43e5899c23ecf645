//! Fan-out Adapter: thin delegate to the Subscription Registry (§2 item 8).

use std::sync::Arc;

use topgun_core::OutboundMessage;

use super::registry::{SubscriberId, SubscriptionRegistry};

/// Wraps a [`SubscriptionRegistry`] behind the narrow surface the rest of
/// the core actually calls: broadcast a value, or tear a record's
/// subscribers down wholesale on deletion.
pub struct FanoutAdapter {
    registry: Arc<dyn SubscriptionRegistry>,
}

impl FanoutAdapter {
    #[must_use]
    pub fn new(registry: Arc<dyn SubscriptionRegistry>) -> Self {
        Self { registry }
    }

    /// §4.5 step 4 / §4.7 / §4.8: broadcast a value to every local
    /// subscriber of `name`, optionally excluding the sender that caused it.
    pub fn broadcast(&self, name: &str, message: OutboundMessage, exclude: Option<SubscriberId>) {
        self.registry.send_to_subscribers(name, message, exclude);
    }

    /// §4.8: tear down every local subscriber of a deleted record.
    pub fn unsubscribe_all(&self, name: &str) {
        self.registry.unsubscribe_all(name);
    }
}
