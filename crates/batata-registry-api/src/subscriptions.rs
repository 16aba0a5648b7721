//! Subscription table and data fan-out shared by all registry backends
//!
//! Backends own a `Subscriptions` by `Arc` and hand clones of it to their
//! change listeners, which call [`Subscriptions::notify`] from backend-owned
//! threads while callers subscribe and unsubscribe concurrently.

use std::any::Any;
use std::fmt::Display;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, error, info, warn};

use crate::consumer::RegistryConsumer;
use crate::error::Result;
use crate::info::{RegistryData, RegistryInfo};
use crate::metrics::RegistryMetrics;

/// Key -> consumers table with per-shard locking.
pub struct Subscriptions {
    registry_type: &'static str,
    /// key = canonical service key
    subscribed: DashMap<String, Vec<Arc<dyn RegistryConsumer>>>,
    metrics: Arc<RegistryMetrics>,
}

impl Subscriptions {
    pub fn new(registry_type: &'static str, metrics: Arc<RegistryMetrics>) -> Self {
        Self {
            registry_type,
            subscribed: DashMap::new(),
            metrics,
        }
    }

    pub fn registry_type(&self) -> &'static str {
        self.registry_type
    }

    pub fn metrics(&self) -> &Arc<RegistryMetrics> {
        &self.metrics
    }

    /// Canonical key of `info` for this registry type.
    pub fn path(&self, info: &RegistryInfo) -> Result<String> {
        info.service_key(self.registry_type)
    }

    /// Add `consumer` to the set for `key`, creating the set if needed.
    ///
    /// Adding the same consumer twice keeps a single entry. Returns the number
    /// of consumers now attached to `key`.
    pub fn subscribe(&self, key: &str, consumer: Arc<dyn RegistryConsumer>) -> usize {
        let mut consumers = self.subscribed.entry(key.to_string()).or_default();
        if !consumers.iter().any(|c| Arc::ptr_eq(c, &consumer)) {
            consumers.push(consumer);
        }
        info!("subscribe {} success", key);
        consumers.len()
    }

    /// Remove `consumer` from the set for `key`.
    ///
    /// Returns the number of consumers left. An emptied set is dropped from
    /// the table, so later notifications for `key` are discarded.
    pub fn unsubscribe(&self, key: &str, consumer: &Arc<dyn RegistryConsumer>) -> usize {
        let remaining = match self.subscribed.get_mut(key) {
            Some(mut consumers) => {
                consumers.retain(|c| !Arc::ptr_eq(c, consumer));
                consumers.len()
            }
            None => return 0,
        };

        if remaining == 0 {
            self.subscribed.remove_if(key, |_, consumers| consumers.is_empty());
        }
        info!("unSubscribe {} success", key);
        remaining
    }

    /// Deliver `data` to every consumer of `key`.
    ///
    /// The consumer list is snapshotted first, so callbacks run without any
    /// table lock held and may subscribe or unsubscribe themselves. A
    /// panicking consumer is logged and skipped. Returns the number of
    /// consumers that completed.
    pub fn notify(&self, key: &str, data: &RegistryData) -> usize {
        let consumers = match self.subscribed.get(key) {
            Some(entry) => entry.value().clone(),
            None => {
                debug!("No subscriber for {}, dropping notification", key);
                return 0;
            }
        };

        let mut delivered = 0;
        for consumer in &consumers {
            if deliver(key, &**consumer, data) {
                delivered += 1;
            }
        }

        self.metrics
            .add_notifications(self.registry_type, delivered as u64);
        delivered
    }

    /// Deliver `data` to one consumer of `key` only, e.g. the current value
    /// for a consumer that just subscribed. Returns false if the consumer is
    /// no longer attached or panicked.
    pub fn notify_consumer(
        &self,
        key: &str,
        consumer: &Arc<dyn RegistryConsumer>,
        data: &RegistryData,
    ) -> bool {
        let attached = self
            .subscribed
            .get(key)
            .is_some_and(|consumers| consumers.iter().any(|c| Arc::ptr_eq(c, consumer)));
        if !attached {
            return false;
        }

        let delivered = deliver(key, &**consumer, data);
        if delivered {
            self.metrics.add_notifications(self.registry_type, 1);
        }
        delivered
    }

    /// Number of consumers attached to `key`.
    pub fn consumer_count(&self, key: &str) -> usize {
        self.subscribed.get(key).map(|c| c.len()).unwrap_or(0)
    }

    /// All keys with at least one consumer.
    pub fn keys(&self) -> Vec<String> {
        self.subscribed.iter().map(|e| e.key().clone()).collect()
    }

    /// Log and count a swallowed backend failure.
    pub fn report_failure(&self, operation: &str, key: &str, err: &dyn Display) {
        warn!(
            registry = self.registry_type,
            operation = operation,
            key = %key,
            "{} {} failed: {}",
            operation,
            key,
            err
        );
        self.metrics.increment_failure(self.registry_type, operation);
    }
}

fn deliver(key: &str, consumer: &dyn RegistryConsumer, data: &RegistryData) -> bool {
    match catch_unwind(AssertUnwindSafe(|| consumer.data(data))) {
        Ok(()) => true,
        Err(panic) => {
            error!(key = %key, "consumer panicked: {}", panic_message(&*panic));
            false
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
