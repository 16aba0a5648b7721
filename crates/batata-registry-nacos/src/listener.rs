//! Naming event listener forwarding instance metadata to subscribed consumers

use std::sync::Arc;

use batata_registry_api::Subscriptions;
use tracing::debug;

use crate::naming::{EventListener, NamingEvent};

/// Listens to one service on behalf of a canonical key.
pub struct NacosListener {
    key: String,
    subscriptions: Arc<Subscriptions>,
}

impl NacosListener {
    pub fn new(key: &str, subscriptions: Arc<Subscriptions>) -> Self {
        Self {
            key: key.to_string(),
            subscriptions,
        }
    }
}

impl EventListener for NacosListener {
    /// Each instance is delivered on its own, keyed by its service name.
    fn on_event(&self, event: NamingEvent) {
        debug!(
            "Naming event for {} with {} instances",
            self.key,
            event.instances.len()
        );
        for instance in &event.instances {
            self.subscriptions
                .notify(&instance.service_name, &instance.metadata);
        }
    }
}
