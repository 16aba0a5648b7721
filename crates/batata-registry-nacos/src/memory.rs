//! In-process naming backend
//!
//! Holds service instances in memory and pushes a [`NamingEvent`] with the
//! service's current instances to its listeners whenever they change.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use batata_registry_api::Result;
use parking_lot::Mutex;
use tracing::debug;

use crate::naming::{EventListener, Instance, ListenerSet, NamingClient, NamingEvent};

#[derive(Default)]
pub struct MemoryNamingClient {
    /// key = service name
    services: Mutex<HashMap<String, Vec<Instance>>>,
    listeners: ListenerSet,
}

impl MemoryNamingClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current instances of `service_name`.
    pub fn instances(&self, service_name: &str) -> Vec<Instance> {
        self.services
            .lock()
            .get(service_name)
            .cloned()
            .unwrap_or_default()
    }

    pub fn listener_count(&self, service_name: &str) -> usize {
        self.listeners.get(service_name).len()
    }

    fn event(&self, service_name: &str) -> NamingEvent {
        NamingEvent {
            service_name: service_name.to_string(),
            instances: self.instances(service_name),
        }
    }
}

#[async_trait]
impl NamingClient for MemoryNamingClient {
    async fn register_instance(&self, service_name: &str, mut instance: Instance) -> Result<()> {
        instance.service_name = service_name.to_string();
        {
            let mut services = self.services.lock();
            let instances = services.entry(service_name.to_string()).or_default();
            match instances
                .iter_mut()
                .find(|i| i.same_address(&instance.ip, instance.port))
            {
                Some(existing) => *existing = instance,
                None => instances.push(instance),
            }
        }
        debug!("Registered instance for {}", service_name);
        self.listeners.publish(&self.event(service_name));
        Ok(())
    }

    async fn deregister_instance(
        &self,
        service_name: &str,
        ip: &str,
        port: u16,
        ephemeral: bool,
    ) -> Result<()> {
        let removed = {
            let mut services = self.services.lock();
            match services.get_mut(service_name) {
                Some(instances) => {
                    let before = instances.len();
                    // The server only removes an instance of the matching kind
                    instances
                        .retain(|i| !(i.same_address(ip, port) && i.ephemeral == ephemeral));
                    let removed = instances.len() != before;
                    if instances.is_empty() {
                        services.remove(service_name);
                    }
                    removed
                }
                None => false,
            }
        };
        if removed {
            debug!("Deregistered {}:{} from {}", ip, port, service_name);
            self.listeners.publish(&self.event(service_name));
        }
        Ok(())
    }

    async fn subscribe(&self, service_name: &str, listener: Arc<dyn EventListener>) -> Result<()> {
        self.listeners.add(service_name, listener.clone());
        let event = self.event(service_name);
        if !event.instances.is_empty() {
            listener.on_event(event);
        }
        Ok(())
    }

    async fn unsubscribe(
        &self,
        service_name: &str,
        listener: &Arc<dyn EventListener>,
    ) -> Result<()> {
        self.listeners.remove(service_name, listener);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::naming::FnEventListener;

    fn recording() -> (Arc<dyn EventListener>, Arc<Mutex<Vec<NamingEvent>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let events_clone = events.clone();
        let listener: Arc<dyn EventListener> = Arc::new(FnEventListener::new(move |event| {
            events_clone.lock().push(event);
        }));
        (listener, events)
    }

    #[tokio::test]
    async fn test_register_replaces_same_address() {
        let client = MemoryNamingClient::new();
        let mut first = Instance::new("10.0.0.1", 80);
        first.metadata.insert("v".to_string(), "1".to_string());
        let mut second = Instance::new("10.0.0.1", 80);
        second.metadata.insert("v".to_string(), "2".to_string());

        client.register_instance("svc", first).await.unwrap();
        client.register_instance("svc", second).await.unwrap();
        client
            .register_instance("svc", Instance::new("10.0.0.2", 80))
            .await
            .unwrap();

        let instances = client.instances("svc");
        assert_eq!(instances.len(), 2);
        assert_eq!(instances[0].metadata.get("v").map(String::as_str), Some("2"));
        assert_eq!(instances[0].service_name, "svc");
    }

    #[tokio::test]
    async fn test_events_pushed_on_change() {
        let client = MemoryNamingClient::new();
        let (listener, events) = recording();

        client.subscribe("svc", listener.clone()).await.unwrap();
        assert!(events.lock().is_empty());

        client
            .register_instance("svc", Instance::new("10.0.0.1", 80))
            .await
            .unwrap();
        client
            .deregister_instance("svc", "10.0.0.9", 80, true)
            .await
            .unwrap();
        client
            .deregister_instance("svc", "10.0.0.1", 80, true)
            .await
            .unwrap();

        {
            let events = events.lock();
            assert_eq!(events.len(), 2);
            assert_eq!(events[0].instances.len(), 1);
            assert!(events[1].instances.is_empty());
        }

        client.unsubscribe("svc", &listener).await.unwrap();
        assert_eq!(client.listener_count("svc"), 0);
        client
            .register_instance("svc", Instance::new("10.0.0.1", 80))
            .await
            .unwrap();
        assert_eq!(events.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_deregister_matches_instance_kind() {
        let client = MemoryNamingClient::new();
        let mut persistent = Instance::new("10.0.0.1", 80);
        persistent.ephemeral = false;
        client.register_instance("svc", persistent).await.unwrap();

        client
            .deregister_instance("svc", "10.0.0.1", 80, true)
            .await
            .unwrap();
        assert_eq!(client.instances("svc").len(), 1);

        client
            .deregister_instance("svc", "10.0.0.1", 80, false)
            .await
            .unwrap();
        assert!(client.instances("svc").is_empty());
    }

    #[tokio::test]
    async fn test_subscribe_receives_current_instances() {
        let client = MemoryNamingClient::new();
        client
            .register_instance("svc", Instance::new("10.0.0.1", 80))
            .await
            .unwrap();

        let (listener, events) = recording();
        client.subscribe("svc", listener).await.unwrap();

        let events = events.lock();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].service_name, "svc");
    }
}
