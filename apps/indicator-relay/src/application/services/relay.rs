//! Indicator Relay
//!
//! Wires the proxy pool, connection manager, subscription multiplexer,
//! settings cache and emission scheduler together and drives the boot
//! sequence:
//!
//! ```text
//! load settings ─► connect every symbol ─► setup(all) ─► periodic emission
//!      ▲ retry after a flat delay on failure
//! ```
//!
//! Upstream reconnects arrive as [`ConnectionEvent`]s; a reconnected symbol
//! gets all of its subscriptions rebuilt.
//!
//! The settings operations invoked by the HTTP layer live here too: saving
//! indicator settings rebuilds exactly that key, saving emission settings
//! re-emits everything under the new filter.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::backoff::BackoffConfig;
use super::connection_manager::{
    ConnectionEvent, ConnectionManager, ConnectionStatus, CredentialSet,
};
use super::emission::{EmissionScheduler, EmitScope};
use super::multiplexer::{MultiplexerConfig, SetupScope, SubscriptionMultiplexer};
use super::proxy_pool::{ProxyPool, ProxyPoolConfig, ProxyPoolError, ProxyReport};
use super::settings_cache::{SeedReport, SettingsCache, SettingsError};
use crate::application::ports::{
    BroadcastPort, IndicatorDirectoryPort, ProxyProbePort, SettingsStorePort, UpstreamConnector,
};
use crate::domain::market::{Symbol, Timeframe, Universe};
use crate::domain::proxy::ProxyAddress;
use crate::domain::settings::{EmissionSettings, IndicatorSettings};
use crate::domain::structured::StructuredData;
use crate::domain::subscription::SubscriptionStats;

/// Capacity of the connection event channel.
const EVENT_CHANNEL_CAPACITY: usize = 256;

// =============================================================================
// Configuration
// =============================================================================

/// Timing and sizing options.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RelayOptions {
    /// Proxy probing.
    pub proxy: ProxyPoolConfig,
    /// Upstream reconnect backoff.
    pub backoff: BackoffConfig,
    /// Subscription retry and history range.
    pub multiplexer: MultiplexerConfig,
    /// Period of the full re-emission.
    pub emission_interval: Duration,
    /// Period of the optional full subscription rebuild.
    pub full_rebuild_interval: Option<Duration>,
    /// Delay between failed boot attempts.
    pub boot_retry: Duration,
}

impl Default for RelayOptions {
    fn default() -> Self {
        Self {
            proxy: ProxyPoolConfig::default(),
            backoff: BackoffConfig::default(),
            multiplexer: MultiplexerConfig::default(),
            emission_interval: Duration::from_secs(5),
            full_rebuild_interval: None,
            boot_retry: Duration::from_secs(5),
        }
    }
}

/// External collaborators.
pub struct RelayDeps {
    /// Configured symbols, timeframes and indicators.
    pub universe: Universe,
    /// Persistent settings.
    pub store: Arc<dyn SettingsStorePort>,
    /// Downstream sink.
    pub broadcast: Arc<dyn BroadcastPort>,
    /// Upstream platform.
    pub connector: Arc<dyn UpstreamConnector>,
    /// Indicator definition lookup.
    pub directory: Arc<dyn IndicatorDirectoryPort>,
    /// Proxy liveness probe.
    pub probe: Arc<dyn ProxyProbePort>,
    /// Outbound proxy pool.
    pub proxies: Vec<ProxyAddress>,
    /// Upstream credentials.
    pub credentials: CredentialSet,
}

/// Relay errors.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// Settings operation failed; nothing changed.
    #[error(transparent)]
    Settings(#[from] SettingsError),

    /// Proxy pool could not be built.
    #[error(transparent)]
    ProxyPool(#[from] ProxyPoolError),

    /// The relay was shut down before the operation finished.
    #[error("relay is shutting down")]
    Cancelled,
}

/// Health snapshot.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayHealth {
    /// Per-symbol upstream connection.
    pub connections: Vec<ConnectionStatus>,
    /// Proxy liveness and assignment.
    pub proxies: Vec<ProxyReport>,
    /// Subscription counts.
    pub subscriptions: SubscriptionStats,
    /// Leaves in the value tree.
    pub values: usize,
}

// =============================================================================
// Relay
// =============================================================================

/// The real-time ingestion and relay pipeline.
pub struct IndicatorRelay {
    universe: Arc<Universe>,
    options: RelayOptions,
    pool: Arc<ProxyPool>,
    connections: Arc<ConnectionManager>,
    settings: Arc<SettingsCache>,
    data: Arc<StructuredData>,
    emitter: Arc<EmissionScheduler>,
    multiplexer: Arc<SubscriptionMultiplexer>,
    events: Mutex<Option<mpsc::Receiver<ConnectionEvent>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    cancel: CancellationToken,
}

impl IndicatorRelay {
    /// Build the relay. Nothing connects until [`IndicatorRelay::start`].
    ///
    /// # Errors
    ///
    /// Returns `RelayError::ProxyPool` when no proxy is configured.
    pub fn new(deps: RelayDeps, options: RelayOptions) -> Result<Arc<Self>, RelayError> {
        let cancel = CancellationToken::new();
        let universe = Arc::new(deps.universe);

        let pool = Arc::new(ProxyPool::new(deps.proxies, deps.probe, options.proxy)?);
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let connections = Arc::new(ConnectionManager::new(
            universe.symbols().to_vec(),
            Arc::clone(&pool),
            deps.connector,
            deps.credentials,
            options.backoff,
            event_tx,
            &cancel,
        ));

        let settings = Arc::new(SettingsCache::new(deps.store, Arc::clone(&universe)));
        let data = Arc::new(StructuredData::new());
        let emitter = Arc::new(EmissionScheduler::new(
            Arc::clone(&universe),
            Arc::clone(&data),
            Arc::clone(&settings),
            deps.broadcast,
        ));
        let multiplexer = Arc::new(SubscriptionMultiplexer::new(
            options.multiplexer,
            Arc::clone(&universe),
            connections.clone(),
            deps.directory,
            Arc::clone(&settings),
            Arc::clone(&data),
            Arc::clone(&emitter),
            &cancel,
        ));

        Ok(Arc::new(Self {
            universe,
            options,
            pool,
            connections,
            settings,
            data,
            emitter,
            multiplexer,
            events: Mutex::new(Some(event_rx)),
            tasks: Mutex::new(Vec::new()),
            cancel,
        }))
    }

    /// Run the boot sequence and spawn the background loops.
    ///
    /// Settings loading is retried every `boot_retry` until it succeeds.
    /// Connect failures do not re-run boot; each failed symbol falls into
    /// its own reconnect backoff instead.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::Cancelled` if shut down while booting.
    pub async fn start(self: &Arc<Self>) -> Result<SeedReport, RelayError> {
        let seeded = self.load_settings().await?;

        if let Some(events) = self.events.lock().take() {
            self.spawn(Arc::clone(self).run_events(events));
        }

        let connected = self.connections.connect_all().await;
        tracing::info!(
            connected,
            symbols = self.universe.symbols().len(),
            "Upstream sessions started"
        );

        let started = self.multiplexer.setup(SetupScope::All).await;
        tracing::info!(subscriptions = started, "Relay started");

        self.spawn(
            Arc::clone(&self.emitter)
                .run_periodic(self.options.emission_interval, self.cancel.child_token()),
        );
        if let Some(period) = self.options.full_rebuild_interval {
            self.spawn(Arc::clone(self).run_full_rebuild(period));
        }

        Ok(seeded)
    }

    /// Persist indicator settings and rebuild that key's subscription.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::Settings` when validation or the store write
    /// fails. The running subscription is untouched in that case.
    pub async fn save_indicator_settings(
        &self,
        record: IndicatorSettings,
    ) -> Result<IndicatorSettings, RelayError> {
        let saved = self.settings.save_indicator_settings(record).await?;
        self.multiplexer
            .setup(SetupScope::Specific(saved.key()))
            .await;
        Ok(saved)
    }

    /// Indicator settings of every configured indicator of `(symbol, timeframe)`.
    #[must_use]
    pub fn indicator_settings(&self, symbol: &Symbol, timeframe: Timeframe) -> Vec<IndicatorSettings> {
        self.settings.indicator_settings_for(symbol, timeframe)
    }

    /// Persist emission settings and re-emit under the new filter.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::Settings` when validation or the store write
    /// fails.
    pub async fn save_emission_settings(
        &self,
        record: EmissionSettings,
    ) -> Result<EmissionSettings, RelayError> {
        let saved = self.settings.save_emission_settings(record).await?;
        self.emitter.emit(&EmitScope::All);
        Ok(saved)
    }

    /// Emission filter of `symbol`.
    #[must_use]
    pub fn emission_settings(&self, symbol: &Symbol) -> EmissionSettings {
        self.settings.emission_settings(symbol)
    }

    /// Configured universe.
    #[must_use]
    pub fn universe(&self) -> &Universe {
        &self.universe
    }

    /// Number of symbols with a live upstream session.
    #[must_use]
    pub fn connected_count(&self) -> usize {
        self.connections.connected_count()
    }

    /// Subscription counts.
    #[must_use]
    pub fn subscription_stats(&self) -> SubscriptionStats {
        self.multiplexer.stats()
    }

    /// Latest value tree.
    #[must_use]
    pub fn data(&self) -> &StructuredData {
        &self.data
    }

    /// Health snapshot.
    #[must_use]
    pub fn health(&self) -> RelayHealth {
        RelayHealth {
            connections: self.connections.status(),
            proxies: self.pool.report(),
            subscriptions: self.multiplexer.stats(),
            values: self.data.leaf_count(),
        }
    }

    /// Stop timers, tear down subscriptions, then close upstream sessions.
    ///
    /// Best-effort: a failure releasing one resource does not stop the rest.
    pub async fn shutdown(&self) {
        tracing::info!("Relay shutting down");
        self.cancel.cancel();

        self.multiplexer.shutdown().await;
        self.connections.shutdown().await;

        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Background task failed during shutdown");
            }
        }
        tracing::info!("Relay stopped");
    }

    async fn load_settings(&self) -> Result<SeedReport, RelayError> {
        loop {
            match self.settings.load().await {
                Ok(report) => return Ok(report),
                Err(e) => {
                    tracing::error!(
                        error = %e,
                        retry_ms = u64::try_from(self.options.boot_retry.as_millis()).unwrap_or(u64::MAX),
                        "Boot failed, retrying"
                    );
                }
            }

            tokio::select! {
                () = self.cancel.cancelled() => return Err(RelayError::Cancelled),
                () = tokio::time::sleep(self.options.boot_retry) => {}
            }
        }
    }

    async fn run_events(self: Arc<Self>, mut events: mpsc::Receiver<ConnectionEvent>) {
        loop {
            let event = tokio::select! {
                () = self.cancel.cancelled() => return,
                event = events.recv() => event,
            };
            let Some(event) = event else {
                return;
            };

            match event {
                ConnectionEvent::Connected {
                    symbol,
                    reconnected: true,
                } => {
                    let rebuilt = self.multiplexer.rebuild_symbol(&symbol).await;
                    tracing::info!(symbol = %symbol, rebuilt, "Subscriptions rebuilt after reconnect");
                }
                ConnectionEvent::Connected { .. } => {}
                ConnectionEvent::Disconnected { symbol, error } => {
                    tracing::debug!(symbol = %symbol, error = %error, "Upstream session down");
                }
                ConnectionEvent::Reconnecting {
                    symbol,
                    attempt,
                    delay,
                } => {
                    tracing::debug!(
                        symbol = %symbol,
                        attempt,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "Upstream reconnect pending"
                    );
                }
            }
        }
    }

    async fn run_full_rebuild(self: Arc<Self>, period: Duration) {
        let mut interval = tokio::time::interval(period);
        interval.tick().await;

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => return,
                _ = interval.tick() => {
                    let rebuilt = self.multiplexer.setup(SetupScope::All).await;
                    tracing::info!(rebuilt, "Periodic full rebuild");
                }
            }
        }
    }

    fn spawn<F>(&self, task: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        self.tasks.lock().push(tokio::spawn(task));
    }
}
