//! Proxy Probe Port (Driven Port)
//!
//! A lightweight outbound request made through a proxy to decide whether
//! the proxy is usable.

use std::time::Duration;

use async_trait::async_trait;

use crate::domain::proxy::ProxyAddress;

/// Port for probing proxy liveness.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProxyProbePort: Send + Sync {
    /// Whether a request through `proxy` succeeds within `timeout`.
    ///
    /// Never fails: every error is a `false` verdict.
    async fn probe(&self, proxy: &ProxyAddress, timeout: Duration) -> bool;
}
