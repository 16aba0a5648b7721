//! Nacos implementation of the registry

use std::sync::Arc;

use async_trait::async_trait;
use batata_registry_api::{
    KeyLocks, Registry, RegistryConfig, RegistryConsumer, RegistryData, RegistryError,
    RegistryInfo, RegistryMetrics, Result, Subscriptions,
};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::{debug, info};

use crate::http::{NacosHttpConfig, NacosHttpNamingClient};
use crate::listener::NacosListener;
use crate::naming::{EventListener, Instance, NamingClient};

pub const NACOS_TYPE: &str = "nacos";

/// Registry mapping each canonical key to a naming service of the same name,
/// with the registering process as its instance.
pub struct NacosRegistry {
    client: Arc<dyn NamingClient>,
    subscriptions: Arc<Subscriptions>,
    /// key = canonical service key
    listeners: DashMap<String, Arc<dyn EventListener>>,
    /// Held while a key's consumers and listener change together
    locks: KeyLocks,
    /// key = canonical service key, value = ephemeral flag it was registered with
    registered: DashMap<String, bool>,
}

impl NacosRegistry {
    /// Connect to the servers listed in `config` over HTTP.
    pub fn new(config: &RegistryConfig) -> Result<Self> {
        let http_config = NacosHttpConfig::from_registry_config(config)?;
        let client = NacosHttpNamingClient::new(http_config)
            .map_err(|e| RegistryError::Config(format!("{:#}", e)))?;
        info!("Nacos registry created for {}", config.server_lists);
        Ok(Self::with_client(
            Arc::new(client),
            Arc::new(RegistryMetrics::new()?),
        ))
    }

    pub fn with_client(client: Arc<dyn NamingClient>, metrics: Arc<RegistryMetrics>) -> Self {
        Self {
            client,
            subscriptions: Arc::new(Subscriptions::new(NACOS_TYPE, metrics)),
            listeners: DashMap::new(),
            locks: KeyLocks::new(),
            registered: DashMap::new(),
        }
    }

    pub fn subscriptions(&self) -> &Arc<Subscriptions> {
        &self.subscriptions
    }

    /// Whether a naming listener is held for `key`.
    pub fn has_listener(&self, key: &str) -> bool {
        self.listeners.contains_key(key)
    }

    async fn do_subscribe(&self, key: &str) -> Result<()> {
        let listener = match self.listeners.entry(key.to_string()) {
            Entry::Occupied(_) => return Ok(()),
            Entry::Vacant(entry) => {
                debug!("Creating nacos listener for {}", key);
                let listener: Arc<dyn EventListener> =
                    Arc::new(NacosListener::new(key, self.subscriptions.clone()));
                entry.insert(listener.clone());
                listener
            }
        };

        if let Err(e) = self.client.subscribe(key, listener.clone()).await {
            self.listeners
                .remove_if(key, |_, held| Arc::ptr_eq(held, &listener));
            return Err(e);
        }
        Ok(())
    }

    async fn do_unsubscribe(&self, key: &str) -> Result<()> {
        if let Some((_, listener)) = self.listeners.remove(key) {
            self.client.unsubscribe(key, &listener).await?;
            debug!("Released nacos listener for {}", key);
        }
        Ok(())
    }

    fn describe(&self, info: &RegistryInfo) -> String {
        self.subscriptions
            .path(info)
            .unwrap_or_else(|_| info.to_string())
    }
}

#[async_trait]
impl Registry for NacosRegistry {
    fn registry_type(&self) -> &'static str {
        NACOS_TYPE
    }

    async fn register(&self, info: &RegistryInfo, data: &RegistryData, ephemeral: bool) {
        let result: Result<()> = async {
            let service_name = self.subscriptions.path(info)?;
            let mut instance = Instance::new(&info.host, info.port);
            instance.ephemeral = ephemeral;
            instance.metadata = data.clone();
            self.client.register_instance(&service_name, instance).await?;
            self.registered.insert(service_name, ephemeral);
            Ok(())
        }
        .await;
        if let Err(e) = result {
            self.subscriptions
                .report_failure("register", &self.describe(info), &e);
        }
    }

    /// Instances this registry did not register are removed as ephemeral.
    async fn unregister(&self, info: &RegistryInfo) {
        let result: Result<()> = async {
            let service_name = self.subscriptions.path(info)?;
            let ephemeral = self
                .registered
                .get(&service_name)
                .map(|e| *e.value())
                .unwrap_or(true);
            self.client
                .deregister_instance(&service_name, &info.host, info.port, ephemeral)
                .await?;
            self.registered.remove(&service_name);
            Ok(())
        }
        .await;
        if let Err(e) = result {
            self.subscriptions
                .report_failure("unregister", &self.describe(info), &e);
        }
    }

    async fn subscribe(&self, info: &RegistryInfo, consumer: Arc<dyn RegistryConsumer>) {
        let key = match self.subscriptions.path(info) {
            Ok(key) => key,
            Err(e) => {
                self.subscriptions
                    .report_failure("subscribe", &self.describe(info), &e);
                return;
            }
        };

        let _guard = self.locks.lock(&key).await;
        self.subscriptions.subscribe(&key, consumer);
        if let Err(e) = self.do_subscribe(&key).await {
            self.subscriptions.report_failure("subscribe", &key, &e);
        }
    }

    async fn unsubscribe(&self, info: &RegistryInfo, consumer: &Arc<dyn RegistryConsumer>) {
        let key = match self.subscriptions.path(info) {
            Ok(key) => key,
            Err(e) => {
                self.subscriptions
                    .report_failure("unsubscribe", &self.describe(info), &e);
                return;
            }
        };

        let _guard = self.locks.lock(&key).await;
        if self.subscriptions.unsubscribe(&key, consumer) > 0 {
            return;
        }
        if let Err(e) = self.do_unsubscribe(&key).await {
            self.subscriptions.report_failure("unsubscribe", &key, &e);
        }
    }
}
