//! Proxy Pool & Health Checker
//!
//! Tracks liveness of a static pool of outbound proxies and assigns one
//! proxy per symbol.
//!
//! # Liveness
//!
//! Verdicts come from [`ProxyProbePort`] and are cached per proxy for the
//! status TTL. There is no background sweep; a proxy is re-probed only when
//! someone asks about it after its verdict expired. [`ProxyPool::mark_dead`]
//! overwrites the cached verdict immediately.
//!
//! # Assignment
//!
//! [`ProxyPool::assign`] never fails. In order of preference it returns:
//!
//! 1. the symbol's current proxy, if alive;
//! 2. the first other alive proxy not held by another symbol;
//! 3. the first other alive proxy, shared;
//! 4. after waiting one TTL, the first proxy of the pool, dead or not.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;

use crate::application::ports::ProxyProbePort;
use crate::domain::market::Symbol;
use crate::domain::proxy::ProxyAddress;
use crate::infrastructure::metrics;

/// Proxy pool configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProxyPoolConfig {
    /// Timeout of one liveness probe.
    pub probe_timeout: Duration,
    /// How long a verdict is reused.
    pub status_ttl: Duration,
}

impl Default for ProxyPoolConfig {
    fn default() -> Self {
        Self {
            probe_timeout: Duration::from_secs(5),
            status_ttl: Duration::from_secs(10),
        }
    }
}

/// Proxy pool errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProxyPoolError {
    /// The pool needs at least one proxy.
    #[error("proxy pool is empty")]
    Empty,
}

#[derive(Debug, Clone, Copy)]
struct ProxyStatus {
    alive: bool,
    checked_at: Instant,
}

/// Liveness view of one proxy, for health reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyReport {
    /// Proxy address without credentials.
    pub proxy: String,
    /// Last verdict, if any.
    pub alive: Option<bool>,
    /// Symbols currently assigned to it.
    pub symbols: Vec<String>,
}

/// Static proxy pool with cached liveness.
pub struct ProxyPool {
    proxies: Vec<ProxyAddress>,
    probe: Arc<dyn ProxyProbePort>,
    config: ProxyPoolConfig,
    status: Mutex<HashMap<ProxyAddress, ProxyStatus>>,
    assignments: Mutex<HashMap<Symbol, ProxyAddress>>,
}

impl std::fmt::Debug for ProxyPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyPool")
            .field("proxies", &self.proxies)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ProxyPool {
    /// Create a pool.
    ///
    /// # Errors
    ///
    /// Returns `ProxyPoolError::Empty` when `proxies` is empty.
    pub fn new(
        proxies: Vec<ProxyAddress>,
        probe: Arc<dyn ProxyProbePort>,
        config: ProxyPoolConfig,
    ) -> Result<Self, ProxyPoolError> {
        if proxies.is_empty() {
            return Err(ProxyPoolError::Empty);
        }
        Ok(Self {
            proxies,
            probe,
            config,
            status: Mutex::new(HashMap::new()),
            assignments: Mutex::new(HashMap::new()),
        })
    }

    /// Pool members in configured order.
    #[must_use]
    pub fn proxies(&self) -> &[ProxyAddress] {
        &self.proxies
    }

    /// Whether `proxy` is usable, probing only if the cached verdict expired.
    pub async fn is_alive(&self, proxy: &ProxyAddress) -> bool {
        if let Some(status) = self.status.lock().get(proxy).copied()
            && status.checked_at.elapsed() < self.config.status_ttl
        {
            return status.alive;
        }

        let alive = self.probe.probe(proxy, self.config.probe_timeout).await;
        metrics::record_proxy_probe(alive);
        tracing::debug!(proxy = %proxy, alive, "Proxy probed");

        self.status.lock().insert(
            proxy.clone(),
            ProxyStatus {
                alive,
                checked_at: Instant::now(),
            },
        );
        alive
    }

    /// Record `proxy` as dead without probing, overriding any cached verdict.
    pub fn mark_dead(&self, proxy: &ProxyAddress) {
        self.status.lock().insert(
            proxy.clone(),
            ProxyStatus {
                alive: false,
                checked_at: Instant::now(),
            },
        );
        metrics::record_proxy_marked_dead();
        tracing::warn!(proxy = %proxy, "Proxy marked dead");
    }

    /// Pick a proxy for `symbol` and record the assignment.
    pub async fn assign(&self, symbol: &Symbol) -> ProxyAddress {
        let current = self.assignments.lock().get(symbol).cloned();

        if let Some(current) = &current
            && self.is_alive(current).await
        {
            return current.clone();
        }

        let mut shared = None;
        for proxy in &self.proxies {
            if current.as_ref() == Some(proxy) {
                continue;
            }
            if !self.is_alive(proxy).await {
                continue;
            }
            if !self.held_by_other(symbol, proxy) {
                return self.bind(symbol, proxy);
            }
            if shared.is_none() {
                shared = Some(proxy.clone());
            }
        }

        if let Some(proxy) = shared {
            tracing::info!(symbol = %symbol, proxy = %proxy, "Sharing proxy, no free proxy alive");
            return self.bind(symbol, &proxy);
        }

        tracing::warn!(
            symbol = %symbol,
            wait_ms = u64::try_from(self.config.status_ttl.as_millis()).unwrap_or(u64::MAX),
            "No alive proxy, forcing first proxy after wait"
        );
        tokio::time::sleep(self.config.status_ttl).await;
        let first = self.proxies[0].clone();
        self.bind(symbol, &first)
    }

    /// Currently assigned proxy of `symbol`.
    #[must_use]
    pub fn assignment(&self, symbol: &Symbol) -> Option<ProxyAddress> {
        self.assignments.lock().get(symbol).cloned()
    }

    /// Forget `symbol`'s assignment.
    pub fn release(&self, symbol: &Symbol) {
        self.assignments.lock().remove(symbol);
    }

    /// Liveness and assignment of every proxy.
    #[must_use]
    pub fn report(&self) -> Vec<ProxyReport> {
        let status = self.status.lock();
        let assignments = self.assignments.lock();
        self.proxies
            .iter()
            .map(|proxy| {
                let mut symbols: Vec<String> = assignments
                    .iter()
                    .filter(|(_, p)| *p == proxy)
                    .map(|(s, _)| s.to_string())
                    .collect();
                symbols.sort();
                ProxyReport {
                    proxy: proxy.to_string(),
                    alive: status.get(proxy).map(|s| s.alive),
                    symbols,
                }
            })
            .collect()
    }

    fn held_by_other(&self, symbol: &Symbol, proxy: &ProxyAddress) -> bool {
        self.assignments
            .lock()
            .iter()
            .any(|(s, p)| s != symbol && p == proxy)
    }

    fn bind(&self, symbol: &Symbol, proxy: &ProxyAddress) -> ProxyAddress {
        self.assignments
            .lock()
            .insert(symbol.clone(), proxy.clone());
        proxy.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::MockProxyProbePort;

    fn proxies() -> Vec<ProxyAddress> {
        ["http://a:1", "http://b:1", "http://c:1"]
            .iter()
            .map(|p| ProxyAddress::parse(p).unwrap())
            .collect()
    }

    fn config() -> ProxyPoolConfig {
        ProxyPoolConfig {
            probe_timeout: Duration::from_millis(50),
            status_ttl: Duration::from_secs(10),
        }
    }

    fn pool_with(alive_hosts: &'static [&'static str]) -> ProxyPool {
        let mut probe = MockProxyProbePort::new();
        probe
            .expect_probe()
            .returning(move |proxy, _| alive_hosts.contains(&proxy.host()));
        ProxyPool::new(proxies(), Arc::new(probe), config()).unwrap()
    }

    #[test]
    fn empty_pool_is_rejected() {
        let probe = MockProxyProbePort::new();
        let err = ProxyPool::new(Vec::new(), Arc::new(probe), config()).unwrap_err();
        assert_eq!(err, ProxyPoolError::Empty);
    }

    #[tokio::test(start_paused = true)]
    async fn verdict_is_cached_within_ttl() {
        let mut probe = MockProxyProbePort::new();
        probe.expect_probe().times(2).returning(|_, _| true);
        let pool = ProxyPool::new(proxies(), Arc::new(probe), config()).unwrap();
        let a = &proxies()[0];

        assert!(pool.is_alive(a).await);
        assert!(pool.is_alive(a).await);

        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(pool.is_alive(a).await);
    }

    #[tokio::test(start_paused = true)]
    async fn mark_dead_bypasses_ttl() {
        let mut probe = MockProxyProbePort::new();
        probe.expect_probe().times(1).returning(|_, _| true);
        let pool = ProxyPool::new(proxies(), Arc::new(probe), config()).unwrap();
        let a = &proxies()[0];

        assert!(pool.is_alive(a).await);
        pool.mark_dead(a);
        assert!(!pool.is_alive(a).await);
    }

    #[tokio::test(start_paused = true)]
    async fn symbols_get_distinct_proxies() {
        let pool = pool_with(&["a", "b", "c"]);
        let x = pool.assign(&Symbol::new("X")).await;
        let y = pool.assign(&Symbol::new("Y")).await;
        assert_ne!(x, y);
        assert_eq!(pool.assign(&Symbol::new("X")).await, x);
    }

    #[tokio::test(start_paused = true)]
    async fn dead_current_fails_over_to_other_proxy() {
        let pool = pool_with(&["a", "b", "c"]);
        let symbol = Symbol::new("X");
        let first = pool.assign(&symbol).await;
        assert_eq!(first.host(), "a");

        pool.mark_dead(&first);
        let second = pool.assign(&symbol).await;
        assert_eq!(second.host(), "b");
        assert_eq!(pool.assignment(&symbol), Some(second));
    }

    #[tokio::test(start_paused = true)]
    async fn shares_proxy_when_no_free_one_is_alive() {
        let pool = pool_with(&["a"]);
        let x = pool.assign(&Symbol::new("X")).await;
        let y = pool.assign(&Symbol::new("Y")).await;
        assert_eq!(x, y);
        assert_eq!(pool.report()[0].symbols, vec!["X", "Y"]);
    }

    #[tokio::test(start_paused = true)]
    async fn all_dead_forces_first_proxy_after_ttl() {
        let pool = pool_with(&[]);
        let start = Instant::now();
        let proxy = pool.assign(&Symbol::new("X")).await;
        assert_eq!(proxy.host(), "a");
        assert!(start.elapsed() >= config().status_ttl);
    }
}
