//! Naming model and the naming client seam used by the Nacos registry

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use batata_registry_api::Result;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

pub const DEFAULT_GROUP: &str = "DEFAULT_GROUP";
pub const DEFAULT_CLUSTER: &str = "DEFAULT";

const GROUP_SEPARATOR: &str = "@@";

/// A registered service instance.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Instance {
    pub instance_id: String,
    pub ip: String,
    pub port: u16,
    pub weight: f64,
    pub healthy: bool,
    pub enabled: bool,
    pub ephemeral: bool,
    pub cluster_name: String,
    pub service_name: String,
    pub metadata: HashMap<String, String>,
}

impl Instance {
    pub fn new(ip: &str, port: u16) -> Self {
        Self {
            ip: ip.to_string(),
            port,
            weight: 1.0,
            healthy: true,
            enabled: true,
            ephemeral: true,
            cluster_name: DEFAULT_CLUSTER.to_string(),
            ..Default::default()
        }
    }

    /// Generate instance key for map storage
    pub fn key(&self) -> String {
        format!("{}#{}#{}", self.ip, self.port, self.cluster_name)
    }

    pub fn same_address(&self, ip: &str, port: u16) -> bool {
        self.ip == ip && self.port == port
    }
}

/// Event delivered to naming listeners when a service's instance list changes.
#[derive(Clone, Debug)]
pub struct NamingEvent {
    pub service_name: String,
    pub instances: Vec<Instance>,
}

/// Trait for receiving naming service change events.
pub trait EventListener: Send + Sync + 'static {
    /// Called when the service's instance list has changed.
    fn on_event(&self, event: NamingEvent);
}

/// A simple listener that invokes a closure.
pub struct FnEventListener<F>
where
    F: Fn(NamingEvent) + Send + Sync + 'static,
{
    f: F,
}

impl<F> FnEventListener<F>
where
    F: Fn(NamingEvent) + Send + Sync + 'static,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> EventListener for FnEventListener<F>
where
    F: Fn(NamingEvent) + Send + Sync + 'static,
{
    fn on_event(&self, event: NamingEvent) {
        (self.f)(event);
    }
}

/// Client side of a flat service/instance naming backend.
#[async_trait]
pub trait NamingClient: Send + Sync {
    async fn register_instance(&self, service_name: &str, instance: Instance) -> Result<()>;

    async fn deregister_instance(
        &self,
        service_name: &str,
        ip: &str,
        port: u16,
        ephemeral: bool,
    ) -> Result<()>;

    /// Start delivering events for `service_name` to `listener`.
    async fn subscribe(&self, service_name: &str, listener: Arc<dyn EventListener>) -> Result<()>;

    async fn unsubscribe(&self, service_name: &str, listener: &Arc<dyn EventListener>)
    -> Result<()>;
}

/// Listeners grouped by service name.
#[derive(Default)]
pub struct ListenerSet {
    listeners: DashMap<String, Vec<Arc<dyn EventListener>>>,
}

impl ListenerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of listeners for the service after adding.
    pub fn add(&self, service_name: &str, listener: Arc<dyn EventListener>) -> usize {
        let mut listeners = self.listeners.entry(service_name.to_string()).or_default();
        if !listeners.iter().any(|l| Arc::ptr_eq(l, &listener)) {
            listeners.push(listener);
        }
        listeners.len()
    }

    /// Returns the number of listeners left for the service.
    pub fn remove(&self, service_name: &str, listener: &Arc<dyn EventListener>) -> usize {
        let remaining = match self.listeners.get_mut(service_name) {
            Some(mut listeners) => {
                listeners.retain(|l| !Arc::ptr_eq(l, listener));
                listeners.len()
            }
            None => return 0,
        };
        if remaining == 0 {
            self.listeners
                .remove_if(service_name, |_, listeners| listeners.is_empty());
        }
        remaining
    }

    pub fn get(&self, service_name: &str) -> Vec<Arc<dyn EventListener>> {
        self.listeners
            .get(service_name)
            .map(|l| l.value().clone())
            .unwrap_or_default()
    }

    /// Deliver `event` to every listener of its service, outside the map lock.
    pub fn publish(&self, event: &NamingEvent) {
        for listener in self.get(&event.service_name) {
            listener.on_event(event.clone());
        }
    }
}

/// Service name in its grouped wire form, e.g. `DEFAULT_GROUP@@orders`.
pub fn grouped_name(service_name: &str, group_name: &str) -> String {
    format!("{}{}{}", group_name, GROUP_SEPARATOR, service_name)
}

/// Strip a `GROUP@@` prefix from a service name returned by the server.
pub fn strip_group(service_name: &str) -> &str {
    match service_name.split_once(GROUP_SEPARATOR) {
        Some((_, name)) => name,
        None => service_name,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[test]
    fn test_fn_event_listener() {
        let called = Arc::new(AtomicBool::new(false));
        let called_clone = called.clone();

        let listener = FnEventListener::new(move |event: NamingEvent| {
            assert_eq!(event.service_name, "my-service");
            called_clone.store(true, Ordering::SeqCst);
        });

        listener.on_event(NamingEvent {
            service_name: "my-service".to_string(),
            instances: vec![],
        });

        assert!(called.load(Ordering::SeqCst));
    }

    #[test]
    fn test_instance_defaults() {
        let instance = Instance::new("10.0.0.1", 8080);
        assert_eq!(instance.weight, 1.0);
        assert!(instance.healthy && instance.enabled && instance.ephemeral);
        assert_eq!(instance.key(), "10.0.0.1#8080#DEFAULT");
        assert!(instance.same_address("10.0.0.1", 8080));
        assert!(!instance.same_address("10.0.0.1", 8081));
    }

    #[test]
    fn test_instance_wire_format() {
        let json = r#"{"instanceId":"10.0.0.1#8080#DEFAULT#DEFAULT_GROUP@@svc","ip":"10.0.0.1",
            "port":8080,"weight":1.0,"healthy":true,"enabled":true,"ephemeral":true,
            "clusterName":"DEFAULT","serviceName":"DEFAULT_GROUP@@svc",
            "metadata":{"port":"8080"},"instanceHeartBeatInterval":5000}"#;
        let instance: Instance = serde_json::from_str(json).unwrap();
        assert_eq!(instance.ip, "10.0.0.1");
        assert_eq!(instance.port, 8080);
        assert_eq!(instance.service_name, "DEFAULT_GROUP@@svc");
        assert_eq!(instance.metadata.get("port").map(String::as_str), Some("8080"));
    }

    #[test]
    fn test_group_names() {
        assert_eq!(grouped_name("svc", DEFAULT_GROUP), "DEFAULT_GROUP@@svc");
        assert_eq!(strip_group("DEFAULT_GROUP@@svc"), "svc");
        assert_eq!(strip_group("svc"), "svc");
        assert_eq!(
            strip_group("DEFAULT_GROUP@@nacos://h:1/a"),
            "nacos://h:1/a"
        );
    }

    #[test]
    fn test_listener_set() {
        let set = ListenerSet::new();
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();
        let listener: Arc<dyn EventListener> = Arc::new(FnEventListener::new(move |_| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        }));

        assert_eq!(set.add("svc", listener.clone()), 1);
        assert_eq!(set.add("svc", listener.clone()), 1);

        set.publish(&NamingEvent {
            service_name: "svc".to_string(),
            instances: vec![],
        });
        set.publish(&NamingEvent {
            service_name: "other".to_string(),
            instances: vec![],
        });
        assert_eq!(count.load(Ordering::SeqCst), 1);

        assert_eq!(set.remove("svc", &listener), 0);
        assert!(set.get("svc").is_empty());
        assert_eq!(set.remove("svc", &listener), 0);
    }
}
