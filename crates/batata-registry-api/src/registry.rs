//! Registry protocol implemented by every backend

use std::sync::Arc;

use async_trait::async_trait;

use crate::consumer::RegistryConsumer;
use crate::info::{RegistryData, RegistryInfo};

/// Registers this process with a coordination backend and subscribes to
/// peer data.
///
/// Registration is best-effort: backend failures are logged and counted by
/// the implementation, never returned. Each call completes its backend I/O
/// before returning.
#[async_trait]
pub trait Registry: Send + Sync {
    /// Scheme used in canonical keys, e.g. `zookeeper`.
    fn registry_type(&self) -> &'static str;

    /// Publish `data` under the key of `info`, replacing any existing entry.
    async fn register(&self, info: &RegistryInfo, data: &RegistryData, ephemeral: bool);

    /// Remove the entry for `info` if it exists.
    async fn unregister(&self, info: &RegistryInfo);

    /// Attach `consumer` to the key of `info`.
    async fn subscribe(&self, info: &RegistryInfo, consumer: Arc<dyn RegistryConsumer>);

    /// Detach `consumer` from the key of `info`.
    async fn unsubscribe(&self, info: &RegistryInfo, consumer: &Arc<dyn RegistryConsumer>);
}
