#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! Indicator Relay - Technical Analysis Feed
//!
//! Keeps one upstream charting session per symbol, each reached through an
//! outbound proxy, and runs one chart + study per
//! `(symbol, timeframe, indicator)` over it. Study payloads are normalized,
//! stored in a value tree and republished to downstream consumers, filtered
//! by per-symbol emission settings.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: relay types and pure rules
//!   - `market`: symbols, timeframes, indicators, subscription keys
//!   - `catalog`: indicator scripts and three-tier parameter resolution
//!   - `transform` / `pivot` / `validity`: payload normalization
//!   - `structured`: latest values per key
//!   - `subscription`: subscription state machine
//!
//! - **Application**: ports and services
//!   - `ports`: settings store, broadcast sink, upstream, directory, probe
//!   - `services`: proxy pool, connections, multiplexer, emission, relay
//!
//! - **Infrastructure**: adapters
//!   - `upstream`: proxied WebSocket client
//!   - `directory` / `probe`: HTTP adapters
//!   - `persistence`: in-memory and JSON file settings stores
//!   - `broadcast` / `health`: fan-out hub and its `/stream` endpoint
//!   - `config` / `metrics` / `telemetry`
//!
//! # Data Flow
//!
//! ```text
//!              ┌──────────┐   study updates   ┌─────────────┐
//! proxy ──────►│ upstream │──────────────────►│ multiplexer │
//! (per symbol) │ session  │                   └──────┬──────┘
//!              └──────────┘                          │ transform + store
//!                                                    ▼
//!                              ┌───────────┐   ┌──────────┐
//!              /stream ◄───────│ broadcast │◄──│ emission │◄── settings
//!                              └───────────┘   └──────────┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Relay types with no I/O.
pub mod domain;

/// Application layer - Services and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::market::{Indicator, Symbol, SubscriptionKey, Timeframe, Universe};
pub use domain::settings::{EmissionSettings, IndicatorSettings};
pub use domain::subscription::{SubscriptionState, SubscriptionStats};

// Relay
pub use application::services::{
    CredentialSet, IndicatorRelay, RelayDeps, RelayError, RelayHealth, RelayOptions,
};

// Infrastructure config
pub use infrastructure::config::{ConfigError, RelayConfig};

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Broadcast hub
pub use infrastructure::broadcast::{Broadcast, BroadcastConfig, BroadcastHub};

// Settings stores
pub use infrastructure::persistence::{InMemorySettingsStore, JsonFileSettingsStore};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
