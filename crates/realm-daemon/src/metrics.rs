//! Request counters, exported in Prometheus text format.

use prometheus::{Encoder, IntCounterVec, Opts, Registry, TextEncoder};
use thiserror::Error;

/// Errors from metrics registration or encoding.
#[derive(Debug, Error)]
pub enum MetricsError {
    /// A metric failed to register with the registry.
    #[error("failed to register metric: {0}")]
    Registration(#[from] prometheus::Error),
    /// Metrics output failed to encode.
    #[error("failed to encode metrics: {0}")]
    Encoding(String),
}

/// The realm's counters.
#[derive(Clone)]
pub struct RealmMetrics {
    request_count: IntCounterVec,
    tenant_log_count: IntCounterVec,
}

impl RealmMetrics {
    fn new(registry: &Registry) -> Result<Self, MetricsError> {
        let request_count = IntCounterVec::new(
            Opts::new("realm_request_count", "Completed protocol requests"),
            &["tenant", "type"],
        )?;
        registry.register(Box::new(request_count.clone()))?;

        let tenant_log_count = IntCounterVec::new(
            Opts::new("realm_tenant_log_count", "Completed tenant-log calls"),
            &["tenant", "type"],
        )?;
        registry.register(Box::new(tenant_log_count.clone()))?;

        Ok(Self {
            request_count,
            tenant_log_count,
        })
    }

    /// Counts one completed `/req` request.
    pub fn request_completed(&self, tenant: &str, request_type: &str) {
        self.request_count
            .with_label_values(&[tenant, request_type])
            .inc();
    }

    /// Counts one completed tenant-log call.
    pub fn tenant_log_completed(&self, tenant: &str, path: &str) {
        self.tenant_log_count.with_label_values(&[tenant, path]).inc();
    }

    /// Current count for a `/req` label pair; for tests.
    #[must_use]
    pub fn request_count(&self, tenant: &str, request_type: &str) -> u64 {
        self.request_count
            .with_label_values(&[tenant, request_type])
            .get()
    }
}

/// Owns the Prometheus registry and the realm's counters.
#[derive(Clone)]
pub struct MetricsRegistry {
    registry: Registry,
    realm: RealmMetrics,
}

impl MetricsRegistry {
    /// Creates a registry with all counters registered.
    ///
    /// # Errors
    ///
    /// Fails if a metric cannot register (e.g. a duplicate name).
    pub fn new() -> Result<Self, MetricsError> {
        let registry = Registry::new();
        let realm = RealmMetrics::new(&registry)?;
        Ok(Self { registry, realm })
    }

    /// Returns the realm counters.
    #[must_use]
    pub const fn realm(&self) -> &RealmMetrics {
        &self.realm
    }

    /// Encodes every metric in Prometheus text format, suitable for a
    /// scrape endpoint.
    ///
    /// # Errors
    ///
    /// Fails if encoding fails.
    pub fn encode_text(&self) -> Result<String, MetricsError> {
        let encoder = TextEncoder::new();
        let families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&families, &mut buffer)
            .map_err(|e| MetricsError::Encoding(e.to_string()))?;
        String::from_utf8(buffer).map_err(|e| MetricsError::Encoding(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_counter() {
        let registry = MetricsRegistry::new().unwrap();
        let metrics = registry.realm();

        metrics.request_completed("acme", "Recover2");
        metrics.request_completed("acme", "Recover2");
        metrics.request_completed("acme", "Delete");

        assert_eq!(metrics.request_count("acme", "Recover2"), 2);
        assert_eq!(metrics.request_count("acme", "Delete"), 1);
    }

    #[test]
    fn test_text_encoding_includes_counters() {
        let registry = MetricsRegistry::new().unwrap();
        registry.realm().request_completed("acme", "Register1");
        registry.realm().tenant_log_completed("acme", "/tenant_log");

        let output = registry.encode_text().unwrap();
        assert!(output.contains("realm_request_count"));
        assert!(output.contains("realm_tenant_log_count"));
    }
}
