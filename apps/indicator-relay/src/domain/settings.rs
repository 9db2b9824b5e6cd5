//! Settings Records
//!
//! Persisted configuration consulted by the relay:
//!
//! - [`IndicatorSettings`]: parameter values of one `(symbol, timeframe,
//!   indicator)` instance. Changing one rebuilds exactly that subscription.
//! - [`EmissionSettings`]: per-symbol filter of which indicators and
//!   timeframes get published. Never affects which subscriptions exist.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::catalog::{self, Params};
use super::market::{Indicator, Symbol, SubscriptionKey, Timeframe, Universe};

/// Parameter values of one indicator instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndicatorSettings {
    /// Instrument.
    pub symbol: Symbol,
    /// Chart interval.
    pub timeframe: Timeframe,
    /// Catalog entry.
    pub indicator: Indicator,
    /// Per-instance parameter values. `null` means "not set".
    #[serde(default)]
    pub params: Params,
    /// Last modification time.
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl IndicatorSettings {
    /// Record holding the catalog defaults of the key's indicator.
    #[must_use]
    pub fn defaults(key: &SubscriptionKey) -> Self {
        Self {
            symbol: key.symbol.clone(),
            timeframe: key.timeframe,
            indicator: key.indicator,
            params: catalog::spec(key.indicator).default_inputs(),
            updated_at: Utc::now(),
        }
    }

    /// Record with no per-instance values.
    #[must_use]
    pub fn empty(key: &SubscriptionKey) -> Self {
        Self {
            symbol: key.symbol.clone(),
            timeframe: key.timeframe,
            indicator: key.indicator,
            params: Params::new(),
            updated_at: Utc::now(),
        }
    }

    /// The subscription key this record configures.
    #[must_use]
    pub fn key(&self) -> SubscriptionKey {
        SubscriptionKey::new(self.symbol.clone(), self.timeframe, self.indicator)
    }

    /// Full upstream parameter set for this instance.
    #[must_use]
    pub fn resolved_inputs(&self) -> Params {
        catalog::spec(self.indicator).inputs(&self.params)
    }
}

/// Per-symbol publication filter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmissionSettings {
    /// Instrument.
    pub symbol: Symbol,
    /// Indicators whose values are published.
    pub indicators: BTreeSet<Indicator>,
    /// Timeframes whose values are published.
    pub timeframes: BTreeSet<Timeframe>,
}

impl EmissionSettings {
    /// Filter that publishes everything in the universe.
    #[must_use]
    pub fn all(symbol: Symbol, universe: &Universe) -> Self {
        Self {
            symbol,
            indicators: universe.indicators().iter().copied().collect(),
            timeframes: universe.timeframes().iter().copied().collect(),
        }
    }

    /// Whether values for `(timeframe, indicator)` are published.
    #[must_use]
    pub fn allows(&self, timeframe: Timeframe, indicator: Indicator) -> bool {
        self.timeframes.contains(&timeframe) && self.indicators.contains(&indicator)
    }

    /// Whether any indicator of `timeframe` is published.
    #[must_use]
    pub fn allows_timeframe(&self, timeframe: Timeframe) -> bool {
        self.timeframes.contains(&timeframe)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn key() -> SubscriptionKey {
        SubscriptionKey::new(Symbol::new("X"), Timeframe::H1, Indicator::Ema50)
    }

    #[test]
    fn defaults_hold_catalog_values() {
        let settings = IndicatorSettings::defaults(&key());
        assert_eq!(settings.params["length"], json!(50));
        assert_eq!(settings.key(), key());
    }

    #[test]
    fn resolved_inputs_apply_overrides() {
        let mut settings = IndicatorSettings::empty(&key());
        settings.params.insert("length".to_string(), json!(21));
        assert_eq!(settings.resolved_inputs()["length"], json!(21));
        assert_eq!(settings.resolved_inputs()["source"], json!("close"));
    }

    #[test]
    fn indicator_settings_deserialize_without_params() {
        let settings: IndicatorSettings = serde_json::from_value(json!({
            "symbol": "X",
            "timeframe": "60",
            "indicator": "RSI"
        }))
        .unwrap();
        assert!(settings.params.is_empty());
        assert_eq!(settings.indicator, Indicator::Rsi);
    }

    #[test]
    fn emission_filter() {
        let universe = Universe::new(
            vec![Symbol::new("X")],
            vec![Timeframe::H1, Timeframe::D1],
            vec![Indicator::Rsi, Indicator::Ema50],
        );
        let mut settings = EmissionSettings::all(Symbol::new("X"), &universe);
        assert!(settings.allows(Timeframe::H1, Indicator::Rsi));

        settings.indicators.remove(&Indicator::Rsi);
        assert!(!settings.allows(Timeframe::H1, Indicator::Rsi));
        assert!(settings.allows(Timeframe::H1, Indicator::Ema50));

        settings.timeframes.remove(&Timeframe::D1);
        assert!(!settings.allows_timeframe(Timeframe::D1));
    }
}
