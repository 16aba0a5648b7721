//! Batata Registry ZooKeeper - hierarchical node registry backend
//!
//! This crate provides:
//! - `ZkClient`, the node client seam a ZooKeeper connection implements
//! - `NetworkZkClient`, a `ZkClient` over a ZooKeeper ensemble session
//! - `MemoryZkServer`, an in-process node tree with session-bound ephemerals
//! - `ZookeeperRegistry`, the `Registry` implementation over any `ZkClient`

pub mod client;
pub mod error;
pub mod listener;
pub mod memory;
pub mod network;
pub mod registry;

pub use client::{CreateMode, ZkClient, ZkDataListener};
pub use error::{ZkError, ZkResult};
pub use listener::ZookeeperListener;
pub use memory::{MemoryZkClient, MemoryZkServer, ZkOp};
pub use network::NetworkZkClient;
pub use registry::{ZOOKEEPER_TYPE, ZookeeperRegistry};
