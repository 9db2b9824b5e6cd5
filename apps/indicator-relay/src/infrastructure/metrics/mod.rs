//! Prometheus Metrics Module
//!
//! Exposes relay metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Proxies**: Probe verdicts and forced dead markings
//! - **Upstream**: Connect attempts and reconnects
//! - **Subscriptions**: Live subscription count and faults
//! - **Emissions**: Published and suppressed payloads, transform drops
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port. Recording
//! before [`init_metrics`] is a no-op.

use std::sync::OnceLock;

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use crate::application::ports::EventKind;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder.
///
/// Calling it again returns the handle installed first.
///
/// # Errors
///
/// Returns `BuildError` if another global recorder is already installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "relay_proxy_probes_total",
        "Proxy liveness probes by verdict"
    );
    describe_counter!(
        "relay_proxy_marked_dead_total",
        "Proxies marked dead after a transport error"
    );

    describe_counter!(
        "relay_upstream_connects_total",
        "Upstream connect attempts by result"
    );
    describe_counter!(
        "relay_upstream_reconnects_total",
        "Scheduled upstream reconnects"
    );

    describe_gauge!(
        "relay_subscriptions_live",
        "Subscriptions holding upstream resources"
    );
    describe_counter!(
        "relay_subscription_faults_total",
        "Chart or study faults"
    );

    describe_counter!(
        "relay_transform_errors_total",
        "Upstream payloads dropped as malformed"
    );
    describe_counter!("relay_emissions_total", "Published payloads by event");
    describe_counter!(
        "relay_emissions_suppressed_total",
        "Payloads withheld by invalid-result suppression"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Record a proxy probe verdict.
pub fn record_proxy_probe(alive: bool) {
    counter!(
        "relay_proxy_probes_total",
        "result" => if alive { "alive" } else { "dead" }
    )
    .increment(1);
}

/// Record a proxy marked dead without probing.
pub fn record_proxy_marked_dead() {
    counter!("relay_proxy_marked_dead_total").increment(1);
}

/// Record an upstream connect attempt.
pub fn record_upstream_connect(success: bool) {
    counter!(
        "relay_upstream_connects_total",
        "result" => if success { "success" } else { "failure" }
    )
    .increment(1);
}

/// Record a scheduled reconnect.
pub fn record_upstream_reconnect() {
    counter!("relay_upstream_reconnects_total").increment(1);
}

/// Update the live subscription count.
#[allow(clippy::cast_precision_loss)]
pub fn set_subscriptions_live(count: usize) {
    gauge!("relay_subscriptions_live").set(count as f64);
}

/// Record a chart or study fault.
pub fn record_subscription_fault() {
    counter!("relay_subscription_faults_total").increment(1);
}

/// Record a dropped malformed payload.
pub fn record_transform_error() {
    counter!("relay_transform_errors_total").increment(1);
}

/// Record a published payload.
pub fn record_emission(event: EventKind) {
    counter!("relay_emissions_total", "event" => event.as_str()).increment(1);
}

/// Record a suppressed payload.
pub fn record_emission_suppressed() {
    counter!("relay_emissions_suppressed_total").increment(1);
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_without_recorder_is_noop() {
        record_proxy_probe(true);
        record_proxy_marked_dead();
        record_upstream_connect(false);
        record_upstream_reconnect();
        set_subscriptions_live(3);
        record_subscription_fault();
        record_transform_error();
        record_emission(EventKind::LiveData);
        record_emission_suppressed();
    }

    #[test]
    fn handle_absent_before_init() {
        // Other tests never install a recorder.
        if PROMETHEUS_HANDLE.get().is_none() {
            assert!(get_metrics_handle().is_none());
        }
    }
}
