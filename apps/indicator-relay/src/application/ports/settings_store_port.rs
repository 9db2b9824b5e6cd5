//! Settings Store Port (Driven Port)
//!
//! Persistence of indicator and emission settings.

use async_trait::async_trait;

use crate::domain::market::{SubscriptionKey, Symbol};
use crate::domain::settings::{EmissionSettings, IndicatorSettings};

/// Settings store failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SettingsStoreError {
    /// Storage could not be read or written.
    #[error("settings storage error: {0}")]
    Io(String),

    /// Stored data could not be encoded or decoded.
    #[error("settings serialization error: {0}")]
    Serialization(String),

    /// Store is temporarily unavailable.
    #[error("settings store unavailable: {0}")]
    Unavailable(String),
}

/// Port for settings persistence.
#[async_trait]
pub trait SettingsStorePort: Send + Sync {
    /// Indicator settings of one key, if stored.
    async fn get_indicator_settings(
        &self,
        key: &SubscriptionKey,
    ) -> Result<Option<IndicatorSettings>, SettingsStoreError>;

    /// Insert or replace indicator settings.
    async fn upsert_indicator_settings(
        &self,
        record: &IndicatorSettings,
    ) -> Result<(), SettingsStoreError>;

    /// Emission settings of one symbol, if stored.
    async fn get_emission_settings(
        &self,
        symbol: &Symbol,
    ) -> Result<Option<EmissionSettings>, SettingsStoreError>;

    /// Insert or replace emission settings.
    async fn upsert_emission_settings(
        &self,
        record: &EmissionSettings,
    ) -> Result<(), SettingsStoreError>;
}
