//! Subscription Multiplexer
//!
//! Creates and destroys one chart + study subscription per
//! `(symbol, timeframe, indicator)` key.
//!
//! # Structure
//!
//! Every subscription is a task owning its chart. The task resolves inputs
//! from the settings cache, opens the chart, attaches the study, then
//! handles chart events one at a time in arrival order:
//!
//! - study update: transform, store, emit the key;
//! - series update (price key of the symbol only): store and emit the
//!   market snapshot;
//! - chart or study error: close the chart, wait the flat retry delay, and
//!   set the key up again from scratch.
//!
//! Teardown cancels the task and waits for it to release its chart, so a
//! key never has two live subscriptions. Setup and teardown are serialized.
//!
//! # Main and special indicators
//!
//! Main indicators share one definition lookup per script per setup batch.
//! Special indicators look up their definition on every (re)setup and
//! request a wider history range.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rust_decimal::Decimal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::connection_manager::ConnectionManager;
use super::emission::{EmissionScheduler, EmitScope};
use super::settings_cache::SettingsCache;
use crate::application::ports::{
    ChartEvent, ChartHandle, ChartRequest, IndicatorDefinition, IndicatorDirectoryPort,
    StudyRequest, UpstreamSession,
};
use crate::domain::catalog;
use crate::domain::market::{SubscriptionKey, Symbol, Universe};
use crate::domain::structured::StructuredData;
use crate::domain::subscription::{SubscriptionRegistry, SubscriptionState, SubscriptionStats};
use crate::domain::transform;
use crate::infrastructure::metrics;

/// Upper bound on releasing one chart.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

// =============================================================================
// Configuration
// =============================================================================

/// Multiplexer configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MultiplexerConfig {
    /// Delay before a faulted subscription is set up again.
    pub retry_delay: Duration,
    /// Bars of history requested for special indicators.
    pub special_history_range: u32,
}

impl Default for MultiplexerConfig {
    fn default() -> Self {
        Self {
            retry_delay: Duration::from_secs(5),
            special_history_range: 500,
        }
    }
}

/// Which subscriptions to (re)build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetupScope {
    /// Every key of the universe.
    All,
    /// Every key of one symbol.
    Symbol(Symbol),
    /// One key.
    Specific(SubscriptionKey),
}

/// Source of live upstream sessions.
pub trait SessionProvider: Send + Sync {
    /// Live session of `symbol`.
    fn session(&self, symbol: &Symbol) -> Option<Arc<dyn UpstreamSession>>;
}

impl SessionProvider for ConnectionManager {
    fn session(&self, symbol: &Symbol) -> Option<Arc<dyn UpstreamSession>> {
        Self::session(self, symbol)
    }
}

// =============================================================================
// Subscription Task
// =============================================================================

/// Everything a subscription task needs, shared by all tasks.
struct Context {
    config: MultiplexerConfig,
    universe: Arc<Universe>,
    sessions: Arc<dyn SessionProvider>,
    directory: Arc<dyn IndicatorDirectoryPort>,
    settings: Arc<SettingsCache>,
    data: Arc<StructuredData>,
    emitter: Arc<EmissionScheduler>,
    registry: SubscriptionRegistry,
}

struct OpenChart {
    session: Arc<dyn UpstreamSession>,
    chart: ChartHandle,
    threshold: Decimal,
}

impl Context {
    /// Market snapshots are taken from one chart per symbol.
    fn is_price_source(&self, key: &SubscriptionKey) -> bool {
        self.universe.timeframes().first() == Some(&key.timeframe)
            && self.universe.indicators().first() == Some(&key.indicator)
    }

    fn transition(&self, key: &SubscriptionKey, next: SubscriptionState) {
        if let Err(e) = self.registry.transition(key, next) {
            tracing::debug!(key = %key, error = %e, "Subscription transition ignored");
        }
        metrics::set_subscriptions_live(self.registry.stats().live());
    }

    async fn run(
        self: Arc<Self>,
        key: SubscriptionKey,
        mut definition: Option<IndicatorDefinition>,
        cancel: CancellationToken,
    ) {
        loop {
            let fault = match self.open(&key, &mut definition, &cancel).await {
                Ok(Some(mut open)) => {
                    let fault = self.pump(&key, &mut open, &cancel).await;
                    close_chart(&key, &open).await;
                    match fault {
                        Some(reason) => reason,
                        None => return,
                    }
                }
                Ok(None) => return,
                Err(reason) => reason,
            };

            metrics::record_subscription_fault();
            tracing::warn!(
                key = %key,
                error = %fault,
                retry_ms = u64::try_from(self.config.retry_delay.as_millis()).unwrap_or(u64::MAX),
                "Subscription faulted"
            );
            self.transition(&key, SubscriptionState::Faulted);

            tokio::select! {
                () = cancel.cancelled() => return,
                () = tokio::time::sleep(self.config.retry_delay) => {}
            }
            self.transition(&key, SubscriptionState::Connecting);
        }
    }

    /// Resolve inputs, open the chart and attach the study.
    ///
    /// Returns `Ok(None)` when cancelled. A chart opened before the
    /// cancellation is closed before returning.
    async fn open(
        &self,
        key: &SubscriptionKey,
        definition: &mut Option<IndicatorDefinition>,
        cancel: &CancellationToken,
    ) -> Result<Option<OpenChart>, String> {
        let session = self
            .sessions
            .session(&key.symbol)
            .ok_or_else(|| "no upstream session".to_string())?;

        let spec = catalog::spec(key.indicator);
        let definition = match definition {
            Some(d) => d.clone(),
            None => {
                let fetched = tokio::select! {
                    () = cancel.cancelled() => return Ok(None),
                    fetched = self.directory.fetch(spec.script_id) => {
                        fetched.map_err(|e| e.to_string())?
                    }
                };
                if !spec.is_special() {
                    *definition = Some(fetched.clone());
                }
                fetched
            }
        };

        let inputs = self.settings.indicator_settings(key).resolved_inputs();
        let threshold = inputs
            .get("threshold")
            .and_then(transform::parse_threshold)
            .unwrap_or_else(default_threshold);

        // Not raced against `cancel`: once the request is out, the chart
        // exists upstream and only the handle can release it.
        let chart = session
            .open_chart(ChartRequest {
                symbol: key.symbol.clone(),
                timeframe: key.timeframe,
                range: spec
                    .is_special()
                    .then_some(self.config.special_history_range),
            })
            .await
            .map_err(|e| e.to_string())?;

        let study = StudyRequest {
            script_id: definition.script_id.clone(),
            version: definition.version.clone(),
            inputs: definition.filter_inputs(inputs),
        };
        let open = OpenChart {
            session,
            chart,
            threshold,
        };

        let attached = tokio::select! {
            () = cancel.cancelled() => None,
            attached = open.session.attach_study(&open.chart.id, study) => Some(attached),
        };
        match attached {
            None => {
                close_chart(key, &open).await;
                Ok(None)
            }
            Some(Err(e)) => {
                close_chart(key, &open).await;
                Err(e.to_string())
            }
            Some(Ok(())) => {
                tracing::debug!(key = %key, chart = %open.chart.id, "Subscription opened");
                Ok(Some(open))
            }
        }
    }

    /// Handle chart events until a fault (`Some`) or cancellation (`None`).
    async fn pump(
        &self,
        key: &SubscriptionKey,
        open: &mut OpenChart,
        cancel: &CancellationToken,
    ) -> Option<String> {
        loop {
            let event = tokio::select! {
                () = cancel.cancelled() => return None,
                event = open.chart.events.recv() => event,
            };

            match event {
                None => return Some("chart event stream closed".to_string()),
                Some(ChartEvent::Error(reason)) => return Some(reason),
                Some(ChartEvent::Ready) => {
                    if self.registry.state(key) == Some(SubscriptionState::Connecting) {
                        self.transition(key, SubscriptionState::Ready);
                        tracing::debug!(key = %key, "Subscription ready");
                    }
                }
                Some(ChartEvent::StudyUpdate(raw)) => {
                    if self.registry.state(key) == Some(SubscriptionState::Connecting) {
                        self.transition(key, SubscriptionState::Ready);
                    }
                    match transform::transform(key.indicator, raw, open.threshold) {
                        Ok(value) => {
                            self.data.store(key, value);
                            self.emitter.emit(&EmitScope::Specific(key.clone()));
                        }
                        Err(e) => {
                            metrics::record_transform_error();
                            tracing::warn!(key = %key, error = %e, "Malformed study payload dropped");
                        }
                    }
                }
                Some(ChartEvent::Series(snapshot)) => {
                    if self.is_price_source(key) && self.data.update_market(&key.symbol, snapshot) {
                        self.emitter.emit_market(&key.symbol);
                    }
                }
            }
        }
    }
}

fn default_threshold() -> Decimal {
    transform::parse_threshold(&catalog::fallback("threshold")).unwrap_or(Decimal::ONE)
}

async fn close_chart(key: &SubscriptionKey, open: &OpenChart) {
    match tokio::time::timeout(CLOSE_TIMEOUT, open.session.close_chart(&open.chart.id)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::debug!(key = %key, error = %e, "Chart close failed"),
        Err(_) => tracing::debug!(key = %key, "Chart close timed out"),
    }
}

// =============================================================================
// Multiplexer
// =============================================================================

struct Slot {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Owner of every subscription.
pub struct SubscriptionMultiplexer {
    context: Arc<Context>,
    cancel: CancellationToken,
    slots: Mutex<HashMap<SubscriptionKey, Slot>>,
    setup_lock: tokio::sync::Mutex<()>,
}

impl SubscriptionMultiplexer {
    /// Create a multiplexer.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: MultiplexerConfig,
        universe: Arc<Universe>,
        sessions: Arc<dyn SessionProvider>,
        directory: Arc<dyn IndicatorDirectoryPort>,
        settings: Arc<SettingsCache>,
        data: Arc<StructuredData>,
        emitter: Arc<EmissionScheduler>,
        cancel: &CancellationToken,
    ) -> Self {
        Self {
            context: Arc::new(Context {
                config,
                universe,
                sessions,
                directory,
                settings,
                data,
                emitter,
                registry: SubscriptionRegistry::new(),
            }),
            cancel: cancel.child_token(),
            slots: Mutex::new(HashMap::new()),
            setup_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Tear down and recreate every subscription in `scope`.
    ///
    /// Keys outside the universe are ignored. Returns the number of
    /// subscriptions started.
    pub async fn setup(&self, scope: SetupScope) -> usize {
        let _guard = self.setup_lock.lock().await;
        if self.cancel.is_cancelled() {
            return 0;
        }

        let universe = &self.context.universe;
        let keys: Vec<SubscriptionKey> = match &scope {
            SetupScope::All => universe.keys().collect(),
            SetupScope::Symbol(symbol) => universe.keys_for(symbol).collect(),
            SetupScope::Specific(key) if universe.contains(key) => vec![key.clone()],
            SetupScope::Specific(key) => {
                tracing::warn!(key = %key, "Setup requested for unknown key");
                Vec::new()
            }
        };

        let mut batch: HashMap<&'static str, Option<IndicatorDefinition>> = HashMap::new();
        let mut started = 0;

        for key in keys {
            self.teardown_locked(&key).await;

            let spec = catalog::spec(key.indicator);
            let definition = if spec.is_special() {
                None
            } else if let Some(cached) = batch.get(spec.script_id) {
                cached.clone()
            } else {
                let fetched = match self.context.directory.fetch(spec.script_id).await {
                    Ok(definition) => Some(definition),
                    Err(e) => {
                        tracing::warn!(script = spec.script_id, error = %e, "Definition lookup failed");
                        None
                    }
                };
                batch.insert(spec.script_id, fetched.clone());
                fetched
            };

            self.spawn(key, definition);
            started += 1;
        }

        tracing::info!(scope = ?scope, started, "Subscriptions set up");
        started
    }

    /// Rebuild every subscription of `symbol`.
    pub async fn rebuild_symbol(&self, symbol: &Symbol) -> usize {
        self.setup(SetupScope::Symbol(symbol.clone())).await
    }

    /// Tear down the subscription of `key`. Idempotent.
    ///
    /// Returns `true` if a subscription existed.
    pub async fn teardown(&self, key: &SubscriptionKey) -> bool {
        let _guard = self.setup_lock.lock().await;
        self.teardown_locked(key).await
    }

    /// Current state of `key`.
    #[must_use]
    pub fn state(&self, key: &SubscriptionKey) -> Option<SubscriptionState> {
        self.context.registry.state(key)
    }

    /// Subscription counts.
    #[must_use]
    pub fn stats(&self) -> SubscriptionStats {
        self.context.registry.stats()
    }

    /// Tear down every subscription. Best-effort.
    pub async fn shutdown(&self) {
        let _guard = self.setup_lock.lock().await;
        self.cancel.cancel();

        let slots: Vec<(SubscriptionKey, Slot)> = self.slots.lock().drain().collect();
        let count = slots.len();
        for (key, slot) in slots {
            slot.cancel.cancel();
            if let Err(e) = slot.handle.await {
                tracing::warn!(key = %key, error = %e, "Subscription task failed during shutdown");
            }
            self.context.registry.tear_down(&key);
        }
        metrics::set_subscriptions_live(0);
        tracing::info!(count, "Subscriptions torn down");
    }

    fn spawn(&self, key: SubscriptionKey, definition: Option<IndicatorDefinition>) {
        if !self.context.registry.register(key.clone()) {
            tracing::warn!(key = %key, "Subscription already registered");
            return;
        }
        metrics::set_subscriptions_live(self.context.registry.stats().live());

        let cancel = self.cancel.child_token();
        let handle = tokio::spawn(Arc::clone(&self.context).run(
            key.clone(),
            definition,
            cancel.clone(),
        ));
        self.slots.lock().insert(key, Slot { cancel, handle });
    }

    async fn teardown_locked(&self, key: &SubscriptionKey) -> bool {
        let slot = self.slots.lock().remove(key);
        let Some(slot) = slot else {
            return false;
        };

        slot.cancel.cancel();
        if let Err(e) = slot.handle.await {
            tracing::warn!(key = %key, error = %e, "Subscription task failed");
        }
        self.context.registry.tear_down(key);
        metrics::set_subscriptions_live(self.context.registry.stats().live());
        tracing::debug!(key = %key, "Subscription torn down");
        true
    }
}
