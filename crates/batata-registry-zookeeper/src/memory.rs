//! In-process hierarchical node store
//!
//! `MemoryZkServer` keeps a node tree with ZooKeeper semantics (persistent
//! and session-bound ephemeral nodes, per-path data watches) for embedded
//! deployments and tests. Each `MemoryZkClient` obtained from
//! [`MemoryZkServer::connect`] is one session; closing or dropping it
//! removes the ephemeral nodes it created.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use crate::client::{CreateMode, ZkClient, ZkDataListener, parent_path};
use crate::error::{ZkError, ZkResult};

/// Mutation recorded by the store, in application order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ZkOp {
    Create { path: String, mode: CreateMode },
    Delete { path: String },
    SetData { path: String },
}

struct Node {
    data: Vec<u8>,
    /// Owning session for ephemeral nodes
    ephemeral_owner: Option<u64>,
}

struct Watch {
    session: u64,
    listener: Arc<dyn ZkDataListener>,
}

enum Event {
    Changed { path: String, data: Vec<u8> },
    Deleted { path: String },
}

/// Callback collected under the tree lock and run after it is released.
struct Pending {
    listener: Arc<dyn ZkDataListener>,
    event: Event,
}

#[derive(Default)]
struct Tree {
    nodes: BTreeMap<String, Node>,
    /// key = node path
    watches: HashMap<String, Vec<Watch>>,
    history: Vec<ZkOp>,
}

impl Tree {
    fn exists(&self, path: &str) -> bool {
        path == "/" || self.nodes.contains_key(path)
    }

    fn has_children(&self, path: &str) -> bool {
        let prefix = format!("{}/", path);
        self.nodes
            .range(prefix.clone()..)
            .next()
            .is_some_and(|(k, _)| k.starts_with(&prefix))
    }

    fn create(
        &mut self,
        path: &str,
        data: &[u8],
        mode: CreateMode,
        session: u64,
    ) -> ZkResult<Vec<Pending>> {
        validate_node_path(path)?;
        if self.exists(path) {
            return Err(ZkError::NodeExists(path.to_string()));
        }
        if let Some(parent) = parent_path(path) {
            match self.nodes.get(parent) {
                None => return Err(ZkError::NoNode(parent.to_string())),
                Some(node) if node.ephemeral_owner.is_some() => {
                    return Err(ZkError::NoChildrenForEphemerals(parent.to_string()));
                }
                Some(_) => {}
            }
        }

        let ephemeral_owner = match mode {
            CreateMode::Ephemeral => Some(session),
            CreateMode::Persistent => None,
        };
        self.nodes.insert(
            path.to_string(),
            Node {
                data: data.to_vec(),
                ephemeral_owner,
            },
        );
        self.history.push(ZkOp::Create {
            path: path.to_string(),
            mode,
        });
        Ok(self.changed(path, data))
    }

    fn delete(&mut self, path: &str) -> ZkResult<Vec<Pending>> {
        validate_node_path(path)?;
        if !self.nodes.contains_key(path) {
            return Err(ZkError::NoNode(path.to_string()));
        }
        if self.has_children(path) {
            return Err(ZkError::NotEmpty(path.to_string()));
        }
        self.nodes.remove(path);
        self.history.push(ZkOp::Delete {
            path: path.to_string(),
        });
        Ok(self.deleted(path))
    }

    fn set_data(&mut self, path: &str, data: &[u8]) -> ZkResult<Vec<Pending>> {
        let node = self
            .nodes
            .get_mut(path)
            .ok_or_else(|| ZkError::NoNode(path.to_string()))?;
        node.data = data.to_vec();
        self.history.push(ZkOp::SetData {
            path: path.to_string(),
        });
        Ok(self.changed(path, data))
    }

    /// Drop the watches of `session` and delete its ephemeral nodes.
    fn expire(&mut self, session: u64) -> Vec<Pending> {
        for watches in self.watches.values_mut() {
            watches.retain(|w| w.session != session);
        }
        self.watches.retain(|_, watches| !watches.is_empty());

        let owned: Vec<String> = self
            .nodes
            .iter()
            .filter(|(_, node)| node.ephemeral_owner == Some(session))
            .map(|(path, _)| path.clone())
            .collect();

        let mut pending = Vec::new();
        for path in owned {
            if let Ok(events) = self.delete(&path) {
                pending.extend(events);
            }
        }
        pending
    }

    fn changed(&self, path: &str, data: &[u8]) -> Vec<Pending> {
        self.listeners(path)
            .into_iter()
            .map(|listener| Pending {
                listener,
                event: Event::Changed {
                    path: path.to_string(),
                    data: data.to_vec(),
                },
            })
            .collect()
    }

    fn deleted(&self, path: &str) -> Vec<Pending> {
        self.listeners(path)
            .into_iter()
            .map(|listener| Pending {
                listener,
                event: Event::Deleted {
                    path: path.to_string(),
                },
            })
            .collect()
    }

    fn listeners(&self, path: &str) -> Vec<Arc<dyn ZkDataListener>> {
        self.watches
            .get(path)
            .map(|watches| watches.iter().map(|w| w.listener.clone()).collect())
            .unwrap_or_default()
    }
}

fn validate_node_path(path: &str) -> ZkResult<()> {
    if !path.starts_with('/') || path == "/" || path.ends_with('/') || path.contains("//") {
        return Err(ZkError::BadArguments(path.to_string()));
    }
    Ok(())
}

fn dispatch(pending: Vec<Pending>) {
    for p in pending {
        match &p.event {
            Event::Changed { path, data } => p.listener.handle_data_change(path, data),
            Event::Deleted { path } => p.listener.handle_data_deleted(path),
        }
    }
}

#[derive(Default)]
struct ServerInner {
    tree: Mutex<Tree>,
    next_session: AtomicU64,
}

/// Shared node tree. Cloning yields another handle to the same tree.
#[derive(Clone, Default)]
pub struct MemoryZkServer {
    inner: Arc<ServerInner>,
}

impl MemoryZkServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new session.
    pub fn connect(&self) -> MemoryZkClient {
        let session_id = self.inner.next_session.fetch_add(1, Ordering::SeqCst) + 1;
        debug!("Opened in-process zookeeper session {}", session_id);
        MemoryZkClient {
            server: self.inner.clone(),
            session_id,
            closed: AtomicBool::new(false),
        }
    }

    /// All node paths in lexical order.
    pub fn node_paths(&self) -> Vec<String> {
        self.inner.tree.lock().nodes.keys().cloned().collect()
    }

    /// Names of the direct children of `path`.
    pub fn children(&self, path: &str) -> Vec<String> {
        let prefix = if path == "/" {
            "/".to_string()
        } else {
            format!("{}/", path)
        };
        self.inner
            .tree
            .lock()
            .nodes
            .keys()
            .filter_map(|k| k.strip_prefix(&prefix))
            .filter(|rest| !rest.is_empty() && !rest.contains('/'))
            .map(str::to_string)
            .collect()
    }

    pub fn get(&self, path: &str) -> Option<Vec<u8>> {
        self.inner
            .tree
            .lock()
            .nodes
            .get(path)
            .map(|node| node.data.clone())
    }

    /// `Some(true)` for an ephemeral node, `None` if the node does not exist.
    pub fn is_ephemeral(&self, path: &str) -> Option<bool> {
        self.inner
            .tree
            .lock()
            .nodes
            .get(path)
            .map(|node| node.ephemeral_owner.is_some())
    }

    /// Replace node data as an outside writer would.
    pub fn set_data(&self, path: &str, data: &[u8]) -> ZkResult<()> {
        let pending = self.inner.tree.lock().set_data(path, data)?;
        dispatch(pending);
        Ok(())
    }

    /// Number of listeners watching `path`.
    pub fn watch_count(&self, path: &str) -> usize {
        self.inner
            .tree
            .lock()
            .watches
            .get(path)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Mutations applied so far.
    pub fn history(&self) -> Vec<ZkOp> {
        self.inner.tree.lock().history.clone()
    }

    pub fn clear_history(&self) {
        self.inner.tree.lock().history.clear();
    }
}

/// One session against a [`MemoryZkServer`].
pub struct MemoryZkClient {
    server: Arc<ServerInner>,
    session_id: u64,
    closed: AtomicBool,
}

impl MemoryZkClient {
    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// End the session: its ephemeral nodes are deleted and its watches dropped.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let pending = self.server.tree.lock().expire(self.session_id);
        debug!("Closed in-process zookeeper session {}", self.session_id);
        dispatch(pending);
    }

    pub fn set_data(&self, path: &str, data: &[u8]) -> ZkResult<()> {
        self.ensure_open()?;
        let pending = self.server.tree.lock().set_data(path, data)?;
        dispatch(pending);
        Ok(())
    }

    fn ensure_open(&self) -> ZkResult<()> {
        if self.is_closed() {
            return Err(ZkError::SessionClosed);
        }
        Ok(())
    }
}

impl Drop for MemoryZkClient {
    fn drop(&mut self) {
        self.close();
    }
}

#[async_trait]
impl ZkClient for MemoryZkClient {
    async fn exists(&self, path: &str) -> ZkResult<bool> {
        self.ensure_open()?;
        Ok(self.server.tree.lock().exists(path))
    }

    async fn create(&self, path: &str, data: &[u8], mode: CreateMode) -> ZkResult<()> {
        self.ensure_open()?;
        let pending = self
            .server
            .tree
            .lock()
            .create(path, data, mode, self.session_id)?;
        dispatch(pending);
        Ok(())
    }

    async fn delete(&self, path: &str) -> ZkResult<()> {
        self.ensure_open()?;
        let pending = self.server.tree.lock().delete(path)?;
        dispatch(pending);
        Ok(())
    }

    async fn read_data(&self, path: &str) -> ZkResult<Option<Vec<u8>>> {
        self.ensure_open()?;
        Ok(self
            .server
            .tree
            .lock()
            .nodes
            .get(path)
            .map(|node| node.data.clone()))
    }

    async fn subscribe_data_changes(
        &self,
        path: &str,
        listener: Arc<dyn ZkDataListener>,
    ) -> ZkResult<()> {
        self.ensure_open()?;
        let mut tree = self.server.tree.lock();
        let watches = tree.watches.entry(path.to_string()).or_default();
        if !watches.iter().any(|w| Arc::ptr_eq(&w.listener, &listener)) {
            watches.push(Watch {
                session: self.session_id,
                listener,
            });
        }
        Ok(())
    }

    async fn unsubscribe_data_changes(
        &self,
        path: &str,
        listener: &Arc<dyn ZkDataListener>,
    ) -> ZkResult<()> {
        self.ensure_open()?;
        let mut tree = self.server.tree.lock();
        if let Some(watches) = tree.watches.get_mut(path) {
            watches.retain(|w| !Arc::ptr_eq(&w.listener, listener));
            if watches.is_empty() {
                tree.watches.remove(path);
            }
        }
        Ok(())
    }
}
