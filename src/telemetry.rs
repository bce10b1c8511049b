//! Counters for broker and provisioning activity
//!
//! Recorded through the `metrics` facade; nothing is exported unless a
//! recorder is installed (see [`init_metrics_exporter`]).
//!
//! # Metrics
//!
//! - `tollgate_token_requests_total{service, source}`: `source` is `cache` or `exchange`
//! - `tollgate_token_exchanges_total{service, outcome}`
//! - `tollgate_token_exchange_seconds{service}`: histogram of exchange latency
//! - `tollgate_provider_objects_total{kind, action}`: `action` is `created` or `reused`
//! - `tollgate_invocations_total{capability, outcome}`

use std::time::Duration;

use metrics::{histogram, increment_counter};

/// Records a `get_token` call served from the cache.
pub fn record_cache_hit(service: &str) {
    increment_counter!(
        "tollgate_token_requests_total",
        "service" => service.to_string(),
        "source" => "cache"
    );
}

/// Records the result of one token exchange.
pub fn record_exchange(service: &str, outcome: &'static str, elapsed: Duration) {
    increment_counter!(
        "tollgate_token_requests_total",
        "service" => service.to_string(),
        "source" => "exchange"
    );
    increment_counter!(
        "tollgate_token_exchanges_total",
        "service" => service.to_string(),
        "outcome" => outcome
    );
    histogram!(
        "tollgate_token_exchange_seconds",
        elapsed.as_secs_f64(),
        "service" => service.to_string()
    );
}

/// Records a provider object being created or reused.
pub fn record_provider_object(kind: &'static str, created: bool) {
    increment_counter!(
        "tollgate_provider_objects_total",
        "kind" => kind,
        "action" => if created { "created" } else { "reused" }
    );
}

/// Records a capability invocation.
pub fn record_invocation(capability: &str, outcome: &'static str) {
    increment_counter!(
        "tollgate_invocations_total",
        "capability" => capability.to_string(),
        "outcome" => outcome
    );
}

/// Installs the Prometheus exporter when built with the `prometheus` feature.
///
/// Safe to call without the feature; it then does nothing.
pub fn init_metrics_exporter() {
    #[cfg(feature = "prometheus")]
    {
        use metrics_exporter_prometheus::PrometheusBuilder;
        if let Err(e) = PrometheusBuilder::new().install() {
            tracing::warn!("Failed to install Prometheus exporter: {}", e);
        }
    }
}
