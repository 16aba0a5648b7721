//! ZooKeeper implementation of the registry

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use batata_registry_api::{
    KeyLocks, Registry, RegistryConfig, RegistryConsumer, RegistryData, RegistryError,
    RegistryInfo, RegistryMetrics, Result, Subscriptions,
};
use dashmap::DashMap;
use tracing::{debug, info, warn};

use crate::client::{CreateMode, ZkClient, ZkDataListener, ancestor_paths};
use crate::error::ZkError;
use crate::listener::{ZookeeperListener, decode_payload, encode_payload};
use crate::network::NetworkZkClient;

pub const ZOOKEEPER_TYPE: &str = "zookeeper";

const DEFAULT_SESSION_TIMEOUT_MS: u64 = 30000;
const DEFAULT_CONNECTION_TIMEOUT_MS: u64 = 3000;

/// Registry storing each registration as a node at the path formed by the
/// info's segments, e.g. `/shenyu/registry/service/test`.
pub struct ZookeeperRegistry {
    client: Arc<dyn ZkClient>,
    subscriptions: Arc<Subscriptions>,
    /// key = canonical service key
    listeners: DashMap<String, Arc<dyn ZkDataListener>>,
    /// Held while a key's consumers and watch change together
    locks: KeyLocks,
}

impl ZookeeperRegistry {
    /// Connect to the ensemble in `config.server_lists`, e.g.
    /// `zk1:2181,zk2:2181/chroot`, honoring the `sessionTimeout` and
    /// `connectionTimeout` properties in milliseconds.
    pub async fn new(config: &RegistryConfig) -> Result<Self> {
        let servers = config.server_addrs().join(",");
        if servers.is_empty() {
            return Err(RegistryError::Config(
                "zookeeper server list is empty".to_string(),
            ));
        }
        let session_timeout = config.prop_u64("sessionTimeout", DEFAULT_SESSION_TIMEOUT_MS)?;
        let connection_timeout =
            config.prop_u64("connectionTimeout", DEFAULT_CONNECTION_TIMEOUT_MS)?;

        let client = NetworkZkClient::connect(
            &servers,
            Duration::from_millis(session_timeout),
            Duration::from_millis(connection_timeout),
        )
        .await
        .map_err(|e| RegistryError::Config(format!("connect to {}: {}", servers, e)))?;
        info!("Zookeeper registry created for {}", servers);

        Ok(Self::with_client(
            Arc::new(client),
            Arc::new(RegistryMetrics::new()?),
        ))
    }

    pub fn with_client(client: Arc<dyn ZkClient>, metrics: Arc<RegistryMetrics>) -> Self {
        Self {
            client,
            subscriptions: Arc::new(Subscriptions::new(ZOOKEEPER_TYPE, metrics)),
            listeners: DashMap::new(),
            locks: KeyLocks::new(),
        }
    }

    pub fn subscriptions(&self) -> &Arc<Subscriptions> {
        &self.subscriptions
    }

    /// Whether a backend watch is held for `key`.
    pub fn has_listener(&self, key: &str) -> bool {
        self.listeners.contains_key(key)
    }

    /// Replace the leaf at `path`, creating missing ancestors as persistent
    /// nodes first.
    async fn create(&self, path: &str, data: &[u8], ephemeral: bool) -> Result<()> {
        self.remove(path).await?;

        for ancestor in self.missing_ancestors(path).await? {
            match self.client.create(&ancestor, &[], CreateMode::Persistent).await {
                // A concurrent registration may have created it already
                Ok(()) | Err(ZkError::NodeExists(_)) => {}
                Err(e) => return Err(e.into()),
            }
        }

        self.client
            .create(path, data, CreateMode::from_ephemeral(ephemeral))
            .await?;
        Ok(())
    }

    /// Missing ancestors of `path`, ordered root-to-leaf for creation.
    async fn missing_ancestors(&self, path: &str) -> Result<Vec<String>> {
        let mut missing = Vec::new();
        for ancestor in ancestor_paths(path) {
            if self.client.exists(ancestor).await? {
                break;
            }
            missing.push(ancestor.to_string());
        }
        missing.reverse();
        Ok(missing)
    }

    async fn remove(&self, path: &str) -> Result<()> {
        if self.client.exists(path).await? {
            match self.client.delete(path).await {
                Ok(()) | Err(ZkError::NoNode(_)) => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Ensure one listener watches the node of `key`, then hand the node's
    /// current value to `consumer`.
    async fn do_subscribe(
        &self,
        key: &str,
        path: &str,
        consumer: &Arc<dyn RegistryConsumer>,
    ) -> Result<()> {
        let listener = self
            .listeners
            .entry(key.to_string())
            .or_insert_with(|| {
                debug!("Creating zookeeper listener for {}", key);
                let listener: Arc<dyn ZkDataListener> =
                    Arc::new(ZookeeperListener::new(key, self.subscriptions.clone()));
                listener
            })
            .clone();
        self.client.subscribe_data_changes(path, listener).await?;

        match self.client.read_data(path).await? {
            Some(bytes) => match decode_payload(&bytes) {
                Ok(data) => {
                    self.subscriptions.notify_consumer(key, consumer, &data);
                }
                Err(e) => warn!("Ignoring undecodable data at {} for {}: {}", path, key, e),
            },
            None => debug!("Node {} does not exist yet, no catch-up for {}", path, key),
        }
        Ok(())
    }

    async fn do_unsubscribe(&self, key: &str, path: &str) -> Result<()> {
        if let Some((_, listener)) = self.listeners.remove(key) {
            self.client.unsubscribe_data_changes(path, &listener).await?;
            debug!("Released zookeeper listener for {}", key);
        }
        Ok(())
    }

    fn keys(&self, info: &RegistryInfo) -> Result<(String, String)> {
        Ok((self.subscriptions.path(info)?, info.node_path()?))
    }

    /// Key used when reporting a failure for `info`.
    fn describe(&self, info: &RegistryInfo) -> String {
        self.subscriptions
            .path(info)
            .unwrap_or_else(|_| info.to_string())
    }
}

#[async_trait]
impl Registry for ZookeeperRegistry {
    fn registry_type(&self) -> &'static str {
        ZOOKEEPER_TYPE
    }

    async fn register(&self, info: &RegistryInfo, data: &RegistryData, ephemeral: bool) {
        let result: Result<()> = async {
            let path = info.node_path()?;
            let bytes = encode_payload(data)?;
            self.create(&path, &bytes, ephemeral).await
        }
        .await;
        if let Err(e) = result {
            self.subscriptions
                .report_failure("register", &self.describe(info), &e);
        }
    }

    async fn unregister(&self, info: &RegistryInfo) {
        let result: Result<()> = async {
            let path = info.node_path()?;
            self.remove(&path).await
        }
        .await;
        if let Err(e) = result {
            self.subscriptions
                .report_failure("unregister", &self.describe(info), &e);
        }
    }

    async fn subscribe(&self, info: &RegistryInfo, consumer: Arc<dyn RegistryConsumer>) {
        let (key, path) = match self.keys(info) {
            Ok(keys) => keys,
            Err(e) => {
                self.subscriptions
                    .report_failure("subscribe", &self.describe(info), &e);
                return;
            }
        };

        let _guard = self.locks.lock(&key).await;
        self.subscriptions.subscribe(&key, consumer.clone());
        if let Err(e) = self.do_subscribe(&key, &path, &consumer).await {
            self.subscriptions.report_failure("subscribe", &key, &e);
        }
    }

    async fn unsubscribe(&self, info: &RegistryInfo, consumer: &Arc<dyn RegistryConsumer>) {
        let (key, path) = match self.keys(info) {
            Ok(keys) => keys,
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
        if let Err(e) = self.do_unsubscribe(&key, &path).await {
            self.subscriptions.report_failure("unsubscribe", &key, &e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryZkServer;
    use batata_registry_api::FnConsumer;

    fn registry(server: &MemoryZkServer) -> ZookeeperRegistry {
        ZookeeperRegistry::with_client(
            Arc::new(server.connect()),
            Arc::new(RegistryMetrics::new().unwrap()),
        )
    }

    #[tokio::test]
    async fn test_new_rejects_empty_server_list() {
        let config = RegistryConfig::new(ZOOKEEPER_TYPE, " ");
        assert!(matches!(
            ZookeeperRegistry::new(&config).await,
            Err(RegistryError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_new_rejects_bad_timeout() {
        let config = RegistryConfig::new(ZOOKEEPER_TYPE, "127.0.0.1:2181")
            .with_prop("sessionTimeout", "long");
        assert!(matches!(
            ZookeeperRegistry::new(&config).await,
            Err(RegistryError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_ancestors_ordered_top_down() {
        let server = MemoryZkServer::new();
        let registry = registry(&server);
        let client = server.connect();
        client
            .create("/shenyu", &[], CreateMode::Persistent)
            .await
            .unwrap();

        let missing = registry
            .missing_ancestors("/shenyu/registry/service/test")
            .await
            .unwrap();
        assert_eq!(missing, vec!["/shenyu/registry", "/shenyu/registry/service"]);
    }

    #[tokio::test]
    async fn test_invalid_info_is_counted_not_raised() {
        let server = MemoryZkServer::new();
        let registry = registry(&server);
        let info = RegistryInfo::new("127.0.0.1", 1);

        registry.register(&info, &RegistryData::new(), true).await;
        registry
            .subscribe(&info, Arc::new(FnConsumer::new(|_| {})))
            .await;

        let metrics = registry.subscriptions().metrics();
        assert_eq!(metrics.failure_count(ZOOKEEPER_TYPE, "register"), 1);
        assert_eq!(metrics.failure_count(ZOOKEEPER_TYPE, "subscribe"), 1);
        assert!(server.node_paths().is_empty());
    }
}
