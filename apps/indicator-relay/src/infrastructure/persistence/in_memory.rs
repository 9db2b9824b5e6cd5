//! In-memory settings store for testing.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::application::ports::{SettingsStoreError, SettingsStorePort};
use crate::domain::market::{SubscriptionKey, Symbol};
use crate::domain::settings::{EmissionSettings, IndicatorSettings};

/// In-memory implementation of `SettingsStorePort`.
///
/// Counts writes and can be told to reject them, so tests can observe
/// seeding and failure handling.
#[derive(Debug, Default)]
pub struct InMemorySettingsStore {
    indicators: RwLock<HashMap<SubscriptionKey, IndicatorSettings>>,
    emissions: RwLock<HashMap<Symbol, EmissionSettings>>,
    indicator_upserts: AtomicUsize,
    emission_upserts: AtomicUsize,
    fail_writes: AtomicBool,
}

impl InMemorySettingsStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Successful indicator settings writes so far.
    #[must_use]
    pub fn indicator_upserts(&self) -> usize {
        self.indicator_upserts.load(Ordering::SeqCst)
    }

    /// Successful emission settings writes so far.
    #[must_use]
    pub fn emission_upserts(&self) -> usize {
        self.emission_upserts.load(Ordering::SeqCst)
    }

    /// Make every following write fail (or succeed again).
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of stored indicator settings.
    #[must_use]
    pub fn indicator_count(&self) -> usize {
        self.indicators.read().len()
    }

    fn check_writable(&self) -> Result<(), SettingsStoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(SettingsStoreError::Unavailable("writes disabled".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl SettingsStorePort for InMemorySettingsStore {
    async fn get_indicator_settings(
        &self,
        key: &SubscriptionKey,
    ) -> Result<Option<IndicatorSettings>, SettingsStoreError> {
        Ok(self.indicators.read().get(key).cloned())
    }

    async fn upsert_indicator_settings(
        &self,
        record: &IndicatorSettings,
    ) -> Result<(), SettingsStoreError> {
        self.check_writable()?;
        self.indicators.write().insert(record.key(), record.clone());
        self.indicator_upserts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn get_emission_settings(
        &self,
        symbol: &Symbol,
    ) -> Result<Option<EmissionSettings>, SettingsStoreError> {
        Ok(self.emissions.read().get(symbol).cloned())
    }

    async fn upsert_emission_settings(
        &self,
        record: &EmissionSettings,
    ) -> Result<(), SettingsStoreError> {
        self.check_writable()?;
        self.emissions
            .write()
            .insert(record.symbol.clone(), record.clone());
        self.emission_upserts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::market::{Indicator, Timeframe};

    fn key() -> SubscriptionKey {
        SubscriptionKey::new(Symbol::new("X"), Timeframe::H1, Indicator::Rsi)
    }

    #[tokio::test]
    async fn upsert_replaces_record() {
        let store = InMemorySettingsStore::new();
        assert!(store.get_indicator_settings(&key()).await.unwrap().is_none());

        store
            .upsert_indicator_settings(&IndicatorSettings::empty(&key()))
            .await
            .unwrap();
        store
            .upsert_indicator_settings(&IndicatorSettings::defaults(&key()))
            .await
            .unwrap();

        let stored = store.get_indicator_settings(&key()).await.unwrap().unwrap();
        assert_eq!(stored.params, IndicatorSettings::defaults(&key()).params);
        assert_eq!(store.indicator_count(), 1);
        assert_eq!(store.indicator_upserts(), 2);
    }

    #[tokio::test]
    async fn failed_writes_are_not_counted() {
        let store = InMemorySettingsStore::new();
        store.fail_writes(true);
        let err = store
            .upsert_indicator_settings(&IndicatorSettings::empty(&key()))
            .await
            .unwrap_err();
        assert!(matches!(err, SettingsStoreError::Unavailable(_)));
        assert_eq!(store.indicator_upserts(), 0);
        assert_eq!(store.indicator_count(), 0);
    }
}
