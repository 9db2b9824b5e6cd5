//! Emission Scheduler
//!
//! Builds `(symbol, timeframe)` payloads from the latest values and hands
//! them to the broadcast sink.
//!
//! # Payload
//!
//! ```json
//! { "symbol": "X", "timeframe": "60", "EMA50": { ... }, "RSI": { ... } }
//! ```
//!
//! Only indicators and timeframes enabled in the symbol's
//! [`EmissionSettings`](crate::domain::settings::EmissionSettings) appear.
//! Invalid values are dropped, and a payload left with no indicator field
//! is not published at all.
//!
//! Market snapshots are published separately as
//! `{ "symbol", "marketPrice", "volume" }` under `live-data`, independent of
//! the indicator filter.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::settings_cache::SettingsCache;
use crate::application::ports::{BroadcastPort, EventKind};
use crate::domain::market::{Indicator, SubscriptionKey, Symbol, Timeframe, Universe};
use crate::domain::settings::EmissionSettings;
use crate::domain::structured::StructuredData;
use crate::domain::validity;
use crate::infrastructure::metrics;

/// What to emit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmitScope {
    /// Every `(symbol, timeframe)` of the current tree, as `live-data-all`.
    All,
    /// One updated leaf, as `live-data`.
    Specific(SubscriptionKey),
}

/// Settings-filtered publisher.
pub struct EmissionScheduler {
    universe: Arc<Universe>,
    data: Arc<StructuredData>,
    settings: Arc<SettingsCache>,
    sink: Arc<dyn BroadcastPort>,
}

impl EmissionScheduler {
    /// Create a scheduler.
    #[must_use]
    pub fn new(
        universe: Arc<Universe>,
        data: Arc<StructuredData>,
        settings: Arc<SettingsCache>,
        sink: Arc<dyn BroadcastPort>,
    ) -> Self {
        Self {
            universe,
            data,
            settings,
            sink,
        }
    }

    /// Emit `scope`. Returns the number of payloads published.
    pub fn emit(&self, scope: &EmitScope) -> usize {
        match scope {
            EmitScope::All => self.emit_all(),
            EmitScope::Specific(key) => usize::from(self.emit_specific(key)),
        }
    }

    /// Publish the market snapshot of `symbol`.
    ///
    /// Returns `false` when there is no snapshot or it is invalid.
    pub fn emit_market(&self, symbol: &Symbol) -> bool {
        let Some(snapshot) = self.data.market(symbol) else {
            return false;
        };

        let Ok(Value::Object(fields)) = serde_json::to_value(snapshot) else {
            return false;
        };
        if validity::is_invalid(&Value::Object(fields.clone())) {
            metrics::record_emission_suppressed();
            tracing::debug!(symbol = %symbol, "Market snapshot suppressed");
            return false;
        }

        let mut payload = Map::with_capacity(fields.len() + 1);
        payload.insert("symbol".to_string(), Value::from(symbol.as_str()));
        payload.extend(fields);
        self.publish(EventKind::LiveData, Value::Object(payload));
        true
    }

    /// Re-emit everything every `period` until `cancel` fires.
    pub async fn run_periodic(self: Arc<Self>, period: Duration, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick completes immediately.
        interval.tick().await;

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    tracing::debug!("Periodic emission stopped");
                    return;
                }
                _ = interval.tick() => {
                    let published = self.emit(&EmitScope::All);
                    tracing::trace!(published, "Periodic emission");
                }
            }
        }
    }

    fn emit_all(&self) -> usize {
        let mut published = 0;
        for symbol in self.universe.symbols() {
            let filter = self.settings.emission_settings(symbol);
            for (timeframe, values) in self.data.symbol_values(symbol) {
                if !filter.allows_timeframe(timeframe) {
                    continue;
                }
                if let Some(payload) = build_payload(symbol, timeframe, values, &filter) {
                    self.publish(EventKind::LiveDataAll, payload);
                    published += 1;
                }
            }
        }
        published
    }

    fn emit_specific(&self, key: &SubscriptionKey) -> bool {
        let filter = self.settings.emission_settings(&key.symbol);
        if !filter.allows(key.timeframe, key.indicator) {
            return false;
        }
        let Some(value) = self.data.value(key) else {
            return false;
        };

        match build_payload(&key.symbol, key.timeframe, [(key.indicator, value)], &filter) {
            Some(payload) => {
                self.publish(EventKind::LiveData, payload);
                true
            }
            None => false,
        }
    }

    fn publish(&self, event: EventKind, payload: Value) {
        metrics::record_emission(event);
        self.sink.publish(event, payload);
    }
}

/// Build one `(symbol, timeframe)` payload, or `None` if nothing survives
/// filtering.
fn build_payload(
    symbol: &Symbol,
    timeframe: Timeframe,
    values: impl IntoIterator<Item = (Indicator, Value)>,
    filter: &EmissionSettings,
) -> Option<Value> {
    let mut payload = Map::new();
    payload.insert("symbol".to_string(), Value::from(symbol.as_str()));
    payload.insert("timeframe".to_string(), Value::from(timeframe.as_str()));

    for (indicator, value) in values {
        if !filter.allows(timeframe, indicator) {
            continue;
        }
        if validity::is_invalid(&value) {
            metrics::record_emission_suppressed();
            tracing::debug!(
                symbol = %symbol,
                timeframe = %timeframe,
                indicator = %indicator,
                "Invalid value suppressed"
            );
            continue;
        }
        payload.insert(indicator.as_str().to_string(), value);
    }

    (payload.len() > 2).then_some(Value::Object(payload))
}
