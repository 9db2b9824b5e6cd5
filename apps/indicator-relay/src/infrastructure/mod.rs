//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer.

/// Upstream charting platform WebSocket client.
pub mod upstream;

/// HTTP indicator definition lookup.
pub mod directory;

/// HTTP proxy liveness probe.
pub mod probe;

/// Broadcast channel adapter for downstream fan-out.
pub mod broadcast;

/// Settings store adapters.
pub mod persistence;

/// Configuration loading.
pub mod config;

/// Health, metrics and stream HTTP endpoint.
pub mod health;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// OpenTelemetry tracing integration.
pub mod telemetry;
