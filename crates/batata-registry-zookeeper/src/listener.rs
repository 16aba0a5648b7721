//! Node data listener forwarding changes to subscribed consumers

use std::sync::Arc;

use batata_registry_api::{RegistryData, Subscriptions};
use serde_json::Value;
use tracing::{debug, warn};

use crate::client::ZkDataListener;

/// Watches one node on behalf of a canonical key.
pub struct ZookeeperListener {
    key: String,
    subscriptions: Arc<Subscriptions>,
}

impl ZookeeperListener {
    pub fn new(key: &str, subscriptions: Arc<Subscriptions>) -> Self {
        Self {
            key: key.to_string(),
            subscriptions,
        }
    }
}

impl ZkDataListener for ZookeeperListener {
    fn handle_data_change(&self, path: &str, data: &[u8]) {
        match decode_payload(data) {
            Ok(payload) => {
                self.subscriptions.notify(&self.key, &payload);
            }
            Err(e) => warn!(
                "Ignoring undecodable data change at {} for {}: {}",
                path, self.key, e
            ),
        }
    }

    fn handle_data_deleted(&self, path: &str) {
        debug!("Node {} deleted, key={}", path, self.key);
    }
}

/// Serialize a payload as stored in a node.
pub fn encode_payload(data: &RegistryData) -> serde_json::Result<Vec<u8>> {
    serde_json::to_vec(data)
}

/// Decode node data into a payload.
///
/// Empty data (ancestor nodes) decodes to an empty payload. Non-string JSON
/// values are kept in their JSON text form.
pub fn decode_payload(data: &[u8]) -> serde_json::Result<RegistryData> {
    if data.is_empty() {
        return Ok(RegistryData::new());
    }
    let object: serde_json::Map<String, Value> = serde_json::from_slice(data)?;
    Ok(object
        .into_iter()
        .map(|(k, v)| {
            let v = match v {
                Value::String(s) => s,
                other => other.to_string(),
            };
            (k, v)
        })
        .collect())
}
