//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - `ProxyPool`: proxy liveness cache and per-symbol assignment
//! - `ConnectionManager`: one upstream session per symbol, with backoff
//! - `SubscriptionMultiplexer`: one chart + study per subscription key
//! - `EmissionScheduler`: settings-filtered fan-out to the broadcast sink
//! - `SettingsCache`: in-memory view of the settings store
//! - `IndicatorRelay`: wires the above together and boots them

pub mod backoff;
pub mod connection_manager;
pub mod emission;
pub mod multiplexer;
pub mod proxy_pool;
pub mod relay;
pub mod settings_cache;

pub use backoff::BackoffConfig;
pub use connection_manager::{ConnectionEvent, ConnectionManager, ConnectionStatus, CredentialSet};
pub use emission::{EmissionScheduler, EmitScope};
pub use multiplexer::{MultiplexerConfig, SessionProvider, SetupScope, SubscriptionMultiplexer};
pub use proxy_pool::{ProxyPool, ProxyPoolConfig, ProxyPoolError, ProxyReport};
pub use relay::{IndicatorRelay, RelayDeps, RelayError, RelayHealth, RelayOptions};
pub use settings_cache::{SeedReport, SettingsCache, SettingsError};
