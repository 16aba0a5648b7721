//! Hierarchical node client seam
//!
//! `ZkClient` covers the subset of ZooKeeper client operations the
//! registry needs. Implementations own their session and deliver data
//! change callbacks on their own threads.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::ZkResult;

/// Node lifetime
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CreateMode {
    /// Remains until explicitly deleted
    Persistent,
    /// Removed when the creating session ends
    Ephemeral,
}

impl CreateMode {
    pub fn from_ephemeral(ephemeral: bool) -> Self {
        if ephemeral {
            CreateMode::Ephemeral
        } else {
            CreateMode::Persistent
        }
    }
}

/// Receives data changes for a watched node path.
pub trait ZkDataListener: Send + Sync + 'static {
    /// Called after the node is created or its data is replaced.
    fn handle_data_change(&self, path: &str, data: &[u8]);

    /// Called after the node is deleted.
    fn handle_data_deleted(&self, path: &str);
}

#[async_trait]
pub trait ZkClient: Send + Sync {
    async fn exists(&self, path: &str) -> ZkResult<bool>;

    /// Create a node. The parent must exist.
    async fn create(&self, path: &str, data: &[u8], mode: CreateMode) -> ZkResult<()>;

    /// Delete a node without children.
    async fn delete(&self, path: &str) -> ZkResult<()>;

    /// Node data, or `None` when the node does not exist.
    async fn read_data(&self, path: &str) -> ZkResult<Option<Vec<u8>>>;

    /// Watch `path` until unsubscribed. Registering the same listener for the
    /// same path again has no further effect.
    async fn subscribe_data_changes(
        &self,
        path: &str,
        listener: Arc<dyn ZkDataListener>,
    ) -> ZkResult<()>;

    async fn unsubscribe_data_changes(
        &self,
        path: &str,
        listener: &Arc<dyn ZkDataListener>,
    ) -> ZkResult<()>;
}

/// Parent path of a node, `None` for top-level nodes and the root.
pub fn parent_path(path: &str) -> Option<&str> {
    match path.rfind('/') {
        Some(0) | None => None,
        Some(index) => Some(&path[..index]),
    }
}

/// Ancestors of `path` ordered leaf-to-root, excluding the root itself.
pub fn ancestor_paths(path: &str) -> Vec<&str> {
    let mut ancestors = Vec::new();
    let mut current = parent_path(path);
    while let Some(p) = current {
        ancestors.push(p);
        current = parent_path(p);
    }
    ancestors
}
