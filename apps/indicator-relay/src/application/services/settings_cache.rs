//! Settings Cache
//!
//! In-memory mirror of the settings store, consulted synchronously during
//! subscription setup and emission.
//!
//! Writes go to the store first; the cache changes only after the store
//! accepted the record, so a failed write leaves the relay untouched.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;

use crate::application::ports::{SettingsStoreError, SettingsStorePort};
use crate::domain::market::{SubscriptionKey, Symbol, Timeframe, Universe};
use crate::domain::settings::{EmissionSettings, IndicatorSettings};

/// Settings operation failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SettingsError {
    /// The store rejected the read or write.
    #[error(transparent)]
    Store(#[from] SettingsStoreError),

    /// Key is outside the configured symbol/timeframe/indicator set.
    #[error("unknown subscription key: {0}")]
    UnknownKey(SubscriptionKey),

    /// Symbol is not configured.
    #[error("unknown symbol: {0}")]
    UnknownSymbol(Symbol),
}

/// Records written while seeding defaults.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeedReport {
    /// Indicator settings created from catalog defaults.
    pub indicator_defaults: usize,
    /// Emission settings created as "publish everything".
    pub emission_defaults: usize,
}

/// In-memory view of persisted settings.
pub struct SettingsCache {
    store: Arc<dyn SettingsStorePort>,
    universe: Arc<Universe>,
    indicators: RwLock<HashMap<SubscriptionKey, IndicatorSettings>>,
    emissions: RwLock<HashMap<Symbol, EmissionSettings>>,
}

impl std::fmt::Debug for SettingsCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SettingsCache")
            .field("indicators", &self.indicators.read().len())
            .field("emissions", &self.emissions.read().len())
            .finish_non_exhaustive()
    }
}

impl SettingsCache {
    /// Create an empty cache over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn SettingsStorePort>, universe: Arc<Universe>) -> Self {
        Self {
            store,
            universe,
            indicators: RwLock::new(HashMap::new()),
            emissions: RwLock::new(HashMap::new()),
        }
    }

    /// Load every key of the universe, persisting defaults for absent ones.
    ///
    /// Safe to call again after a failure: records stored by an earlier call
    /// are read back, not re-seeded.
    ///
    /// # Errors
    ///
    /// Returns `SettingsError::Store` on the first store failure.
    pub async fn load(&self) -> Result<SeedReport, SettingsError> {
        let mut report = SeedReport::default();

        for key in self.universe.keys() {
            let record = match self.store.get_indicator_settings(&key).await? {
                Some(record) => record,
                None => {
                    let record = IndicatorSettings::defaults(&key);
                    self.store.upsert_indicator_settings(&record).await?;
                    report.indicator_defaults += 1;
                    record
                }
            };
            self.indicators.write().insert(key, record);
        }

        for symbol in self.universe.symbols() {
            let record = match self.store.get_emission_settings(symbol).await? {
                Some(record) => record,
                None => {
                    let record = EmissionSettings::all(symbol.clone(), &self.universe);
                    self.store.upsert_emission_settings(&record).await?;
                    report.emission_defaults += 1;
                    record
                }
            };
            self.emissions.write().insert(symbol.clone(), record);
        }

        tracing::info!(
            indicator_defaults = report.indicator_defaults,
            emission_defaults = report.emission_defaults,
            keys = self.universe.key_count(),
            "Settings loaded"
        );
        Ok(report)
    }

    /// Settings of `key`, or an empty record when none is cached.
    #[must_use]
    pub fn indicator_settings(&self, key: &SubscriptionKey) -> IndicatorSettings {
        self.indicators
            .read()
            .get(key)
            .cloned()
            .unwrap_or_else(|| IndicatorSettings::empty(key))
    }

    /// Settings of every indicator of `(symbol, timeframe)`, in catalog order.
    #[must_use]
    pub fn indicator_settings_for(
        &self,
        symbol: &Symbol,
        timeframe: Timeframe,
    ) -> Vec<IndicatorSettings> {
        self.universe
            .indicators()
            .iter()
            .map(|indicator| {
                self.indicator_settings(&SubscriptionKey::new(symbol.clone(), timeframe, *indicator))
            })
            .collect()
    }

    /// Emission filter of `symbol`. Publishes everything when none is cached.
    #[must_use]
    pub fn emission_settings(&self, symbol: &Symbol) -> EmissionSettings {
        self.emissions
            .read()
            .get(symbol)
            .cloned()
            .unwrap_or_else(|| EmissionSettings::all(symbol.clone(), &self.universe))
    }

    /// Persist and cache indicator settings.
    ///
    /// # Errors
    ///
    /// Returns `UnknownKey` for keys outside the universe, or the store
    /// error. The cache is unchanged on error.
    pub async fn save_indicator_settings(
        &self,
        mut record: IndicatorSettings,
    ) -> Result<IndicatorSettings, SettingsError> {
        let key = record.key();
        if !self.universe.contains(&key) {
            return Err(SettingsError::UnknownKey(key));
        }

        record.updated_at = Utc::now();
        self.store.upsert_indicator_settings(&record).await?;
        self.indicators.write().insert(key, record.clone());

        tracing::info!(key = %record.key(), "Indicator settings saved");
        Ok(record)
    }

    /// Persist and cache emission settings.
    ///
    /// # Errors
    ///
    /// Returns `UnknownSymbol` for unconfigured symbols, or the store error.
    /// The cache is unchanged on error.
    pub async fn save_emission_settings(
        &self,
        record: EmissionSettings,
    ) -> Result<EmissionSettings, SettingsError> {
        if !self.universe.has_symbol(&record.symbol) {
            return Err(SettingsError::UnknownSymbol(record.symbol));
        }

        self.store.upsert_emission_settings(&record).await?;
        self.emissions
            .write()
            .insert(record.symbol.clone(), record.clone());

        tracing::info!(
            symbol = %record.symbol,
            indicators = record.indicators.len(),
            timeframes = record.timeframes.len(),
            "Emission settings saved"
        );
        Ok(record)
    }
}
