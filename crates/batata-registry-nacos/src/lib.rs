//! Batata Registry Nacos - flat service/instance registry backend
//!
//! This crate provides:
//! - `NamingClient`, the naming client seam with its instance and event model
//! - `NacosHttpNamingClient`, a client for the Nacos HTTP Open API
//! - `MemoryNamingClient`, an in-process naming backend
//! - `NacosRegistry`, the `Registry` implementation over any `NamingClient`

pub mod http;
pub mod listener;
pub mod memory;
pub mod naming;
pub mod registry;

pub use http::{NacosHttpConfig, NacosHttpNamingClient};
pub use listener::NacosListener;
pub use memory::MemoryNamingClient;
pub use naming::{
    DEFAULT_CLUSTER, DEFAULT_GROUP, EventListener, FnEventListener, Instance, ListenerSet,
    NamingClient, NamingEvent,
};
pub use registry::{NACOS_TYPE, NacosRegistry};
