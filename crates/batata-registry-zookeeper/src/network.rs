//! Client for a ZooKeeper ensemble
//!
//! Each watched path holds one persistent server watch. A background task
//! per watch reads the node after every change and fans the data out to the
//! path's listeners.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use zookeeper_client as zk;

use crate::client::{CreateMode, ZkClient, ZkDataListener};
use crate::error::{ZkError, ZkResult};

type Listeners = Arc<RwLock<Vec<Arc<dyn ZkDataListener>>>>;

struct PathWatch {
    listeners: Listeners,
    task: JoinHandle<()>,
}

/// `ZkClient` over one ZooKeeper session.
pub struct NetworkZkClient {
    client: zk::Client,
    /// key = node path
    watches: DashMap<String, PathWatch>,
}

impl NetworkZkClient {
    /// Open a session with the ensemble, e.g. `zk1:2181,zk2:2181/chroot`.
    pub async fn connect(
        servers: &str,
        session_timeout: Duration,
        connection_timeout: Duration,
    ) -> ZkResult<Self> {
        let client = zk::Client::connector()
            .session_timeout(session_timeout)
            .connection_timeout(connection_timeout)
            .connect(servers)
            .await
            .map_err(|e| zk_error(servers, e))?;
        info!("Connected to zookeeper {}", servers);

        Ok(Self {
            client,
            watches: DashMap::new(),
        })
    }

    /// Number of listeners on `path`.
    pub fn watch_count(&self, path: &str) -> usize {
        self.watches
            .get(path)
            .map(|watch| watch.listeners.read().len())
            .unwrap_or(0)
    }

    fn spawn_watch(
        &self,
        path: &str,
        mut watcher: zk::PersistentWatcher,
        listeners: Listeners,
    ) -> JoinHandle<()> {
        let client = self.client.clone();
        let path = path.to_string();

        tokio::spawn(async move {
            loop {
                let event = watcher.changed().await;
                match event.event_type {
                    zk::EventType::NodeCreated | zk::EventType::NodeDataChanged => {
                        match client.get_data(&path).await {
                            Ok((data, _)) => {
                                let snapshot = listeners.read().clone();
                                for listener in &snapshot {
                                    listener.handle_data_change(&path, &data);
                                }
                            }
                            // Deleted again before the read
                            Err(zk::Error::NoNode) => {}
                            Err(e) => warn!("Reading {} after change failed: {}", path, e),
                        }
                    }
                    zk::EventType::NodeDeleted => {
                        let snapshot = listeners.read().clone();
                        for listener in &snapshot {
                            listener.handle_data_deleted(&path);
                        }
                    }
                    zk::EventType::Session if event.session_state.is_terminated() => {
                        warn!(
                            "Watch on {} ended with session state {:?}",
                            path, event.session_state
                        );
                        break;
                    }
                    _ => {}
                }
            }
        })
    }
}

#[async_trait]
impl ZkClient for NetworkZkClient {
    async fn exists(&self, path: &str) -> ZkResult<bool> {
        let stat = self
            .client
            .check_stat(path)
            .await
            .map_err(|e| zk_error(path, e))?;
        Ok(stat.is_some())
    }

    async fn create(&self, path: &str, data: &[u8], mode: CreateMode) -> ZkResult<()> {
        let options = zk_mode(mode).with_acls(zk::Acls::anyone_all());
        self.client
            .create(path, data, &options)
            .await
            .map_err(|e| zk_error(path, e))?;
        Ok(())
    }

    async fn delete(&self, path: &str) -> ZkResult<()> {
        self.client
            .delete(path, None)
            .await
            .map_err(|e| zk_error(path, e))
    }

    async fn read_data(&self, path: &str) -> ZkResult<Option<Vec<u8>>> {
        match self.client.get_data(path).await {
            Ok((data, _)) => Ok(Some(data)),
            Err(zk::Error::NoNode) => Ok(None),
            Err(e) => Err(zk_error(path, e)),
        }
    }

    async fn subscribe_data_changes(
        &self,
        path: &str,
        listener: Arc<dyn ZkDataListener>,
    ) -> ZkResult<()> {
        if let Some(watch) = self.watches.get(path) {
            add_listener(&watch.listeners, listener);
            return Ok(());
        }

        let watcher = self
            .client
            .watch(path, zk::AddWatchMode::Persistent)
            .await
            .map_err(|e| zk_error(path, e))?;

        match self.watches.entry(path.to_string()) {
            // Another caller set the watch up meanwhile, ours is dropped
            Entry::Occupied(entry) => add_listener(&entry.get().listeners, listener),
            Entry::Vacant(entry) => {
                let listeners: Listeners = Arc::new(RwLock::new(vec![listener]));
                let task = self.spawn_watch(path, watcher, listeners.clone());
                entry.insert(PathWatch { listeners, task });
                debug!("Watching {}", path);
            }
        }
        Ok(())
    }

    async fn unsubscribe_data_changes(
        &self,
        path: &str,
        listener: &Arc<dyn ZkDataListener>,
    ) -> ZkResult<()> {
        let remaining = match self.watches.get(path) {
            Some(watch) => {
                let mut listeners = watch.listeners.write();
                listeners.retain(|l| !Arc::ptr_eq(l, listener));
                listeners.len()
            }
            None => return Ok(()),
        };

        if remaining > 0 {
            return Ok(());
        }
        if let Some((_, watch)) = self
            .watches
            .remove_if(path, |_, watch| watch.listeners.read().is_empty())
        {
            watch.task.abort();
            debug!("Stopped watching {}", path);
        }
        Ok(())
    }
}

impl Drop for NetworkZkClient {
    fn drop(&mut self) {
        for entry in self.watches.iter() {
            entry.value().task.abort();
        }
    }
}

fn add_listener(listeners: &Listeners, listener: Arc<dyn ZkDataListener>) {
    let mut listeners = listeners.write();
    if !listeners.iter().any(|l| Arc::ptr_eq(l, &listener)) {
        listeners.push(listener);
    }
}

fn zk_mode(mode: CreateMode) -> zk::CreateMode {
    match mode {
        CreateMode::Persistent => zk::CreateMode::Persistent,
        CreateMode::Ephemeral => zk::CreateMode::Ephemeral,
    }
}

fn zk_error(path: &str, err: zk::Error) -> ZkError {
    match err {
        zk::Error::NoNode => ZkError::NoNode(path.to_string()),
        zk::Error::NodeExists => ZkError::NodeExists(path.to_string()),
        zk::Error::NotEmpty => ZkError::NotEmpty(path.to_string()),
        zk::Error::NoChildrenForEphemerals => ZkError::NoChildrenForEphemerals(path.to_string()),
        zk::Error::BadArguments(reason) => ZkError::BadArguments(format!("{}: {}", path, reason)),
        zk::Error::SessionExpired | zk::Error::ClientClosed => ZkError::SessionClosed,
        other => ZkError::Connection(other.to_string()),
    }
}
