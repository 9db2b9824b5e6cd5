//! Application Ports (Driven)
//!
//! Interfaces the relay core uses to reach external systems. Infrastructure
//! adapters implement them; tests substitute in-process doubles.
//!
//! - `SettingsStorePort`: persisted indicator and emission settings
//! - `BroadcastPort`: fire-and-forget fan-out to downstream clients
//! - `UpstreamConnector` / `UpstreamSession`: the charting platform
//! - `IndicatorDirectoryPort`: upstream indicator definitions
//! - `ProxyProbePort`: outbound liveness probe through a proxy

mod broadcast_port;
mod indicator_directory_port;
mod proxy_probe_port;
mod settings_store_port;
mod upstream_port;

pub use broadcast_port::{BroadcastPort, EventKind};
pub use indicator_directory_port::{DirectoryError, IndicatorDefinition, IndicatorDirectoryPort};
#[cfg(test)]
pub use proxy_probe_port::MockProxyProbePort;
pub use proxy_probe_port::ProxyProbePort;
pub use settings_store_port::{SettingsStoreError, SettingsStorePort};
pub use upstream_port::{
    ChartEvent, ChartHandle, ChartId, ChartRequest, Credentials, StudyRequest, UpstreamConnector,
    UpstreamError, UpstreamSession,
};
