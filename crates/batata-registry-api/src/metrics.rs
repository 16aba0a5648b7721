//! Prometheus metrics for registry operations
//!
//! Provides metrics collection for:
//! - Swallowed operation failures (counter)
//! - Delivered consumer notifications (counter)

use prometheus::{Encoder, IntCounterVec, Opts, Registry, TextEncoder};

/// Prometheus metrics collector for one registry client
pub struct RegistryMetrics {
    registry: Registry,

    /// Failed register/unregister/subscribe operations
    pub operation_failures: IntCounterVec,

    /// Data deliveries made to consumers
    pub notifications: IntCounterVec,
}

impl RegistryMetrics {
    /// Create a metrics collector backed by its own prometheus registry
    pub fn new() -> Result<Self, prometheus::Error> {
        Self::with_registry(Registry::new())
    }

    /// Create a metrics collector registered into the given prometheus registry
    pub fn with_registry(registry: Registry) -> Result<Self, prometheus::Error> {
        let operation_failures = IntCounterVec::new(
            Opts::new(
                "registry_operation_failures_total",
                "Total number of failed registry operations",
            ),
            &["registry", "operation"],
        )?;

        let notifications = IntCounterVec::new(
            Opts::new(
                "registry_notifications_total",
                "Total number of data notifications delivered to consumers",
            ),
            &["registry"],
        )?;

        registry.register(Box::new(operation_failures.clone()))?;
        registry.register(Box::new(notifications.clone()))?;

        Ok(Self {
            registry,
            operation_failures,
            notifications,
        })
    }

    /// Increment failed operation count
    pub fn increment_failure(&self, registry_type: &str, operation: &str) {
        self.operation_failures
            .with_label_values(&[registry_type, operation])
            .inc();
    }

    /// Add delivered notifications
    pub fn add_notifications(&self, registry_type: &str, count: u64) {
        self.notifications
            .with_label_values(&[registry_type])
            .inc_by(count);
    }

    /// Failure count for one operation
    pub fn failure_count(&self, registry_type: &str, operation: &str) -> u64 {
        self.operation_failures
            .with_label_values(&[registry_type, operation])
            .get()
    }

    /// Get metrics in Prometheus text format
    pub fn gather(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        if encoder.encode(&metric_families, &mut buffer).is_err() {
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_counter() {
        let metrics = RegistryMetrics::new().unwrap();
        metrics.increment_failure("zookeeper", "register");
        metrics.increment_failure("zookeeper", "register");

        assert_eq!(metrics.failure_count("zookeeper", "register"), 2);
        assert_eq!(metrics.failure_count("zookeeper", "unregister"), 0);
    }

    #[test]
    fn test_gather_contains_metric_names() {
        let metrics = RegistryMetrics::new().unwrap();
        metrics.increment_failure("nacos", "subscribe");
        metrics.add_notifications("nacos", 3);

        let text = metrics.gather();
        assert!(text.contains("registry_operation_failures_total"));
        assert!(text.contains("registry_notifications_total"));
    }

    #[test]
    fn test_shared_registry_rejects_duplicates() {
        let registry = Registry::new();
        assert!(RegistryMetrics::with_registry(registry.clone()).is_ok());
        assert!(RegistryMetrics::with_registry(registry).is_err());
    }
}
