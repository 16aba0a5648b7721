//! Batata Registry API - backend-neutral registry client protocol
//!
//! This crate provides:
//! - `RegistryInfo` and canonical service key derivation
//! - The `Registry` trait implemented by each backend
//! - `Subscriptions`, the shared key -> consumer fan-out table
//! - `KeyLocks`, per-key critical sections for watch bookkeeping
//! - Configuration loading and Prometheus metrics for registry clients

pub mod config;
pub mod consumer;
pub mod error;
pub mod info;
pub mod lock;
pub mod metrics;
pub mod registry;
pub mod subscriptions;

pub use config::RegistryConfig;
pub use consumer::{FnConsumer, RegistryConsumer};
pub use error::{RegistryError, Result};
pub use info::{RegistryData, RegistryInfo, SEPARATOR};
pub use lock::{KeyGuard, KeyLocks};
pub use metrics::RegistryMetrics;
pub use registry::Registry;
pub use subscriptions::Subscriptions;
