//! JSON File Settings Store
//!
//! Keeps every settings record in one JSON document:
//!
//! ```json
//! { "indicators": [ { "symbol": "X", "timeframe": "60", "indicator": "RSI", ... } ],
//!   "emissions":  [ { "symbol": "X", "indicators": [...], "timeframes": [...] } ] }
//! ```
//!
//! The document is loaded once on open and rewritten in full on every
//! upsert. Writes go to a sibling temporary file that is then renamed over
//! the previous document, so a crash never leaves a truncated document behind.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::application::ports::{SettingsStoreError, SettingsStorePort};
use crate::domain::market::{SubscriptionKey, Symbol};
use crate::domain::settings::{EmissionSettings, IndicatorSettings};

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct SettingsDocument {
    #[serde(default)]
    indicators: Vec<IndicatorSettings>,
    #[serde(default)]
    emissions: Vec<EmissionSettings>,
}

/// Settings store backed by a JSON file.
#[derive(Debug)]
pub struct JsonFileSettingsStore {
    path: PathBuf,
    document: Mutex<SettingsDocument>,
}

impl JsonFileSettingsStore {
    /// Open the store at `path`. A missing file is an empty store.
    ///
    /// # Errors
    ///
    /// Returns `Io` if the file exists but cannot be read, or
    /// `Serialization` if it is not a valid settings document.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, SettingsStoreError> {
        let path = path.into();
        let document = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| SettingsStoreError::Serialization(e.to_string()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => SettingsDocument::default(),
            Err(e) => return Err(SettingsStoreError::Io(e.to_string())),
        };

        tracing::info!(
            path = %path.display(),
            indicators = document.indicators.len(),
            emissions = document.emissions.len(),
            "Settings store opened"
        );
        Ok(Self {
            path,
            document: Mutex::new(document),
        })
    }

    /// File backing this store.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, document: &SettingsDocument) -> Result<(), SettingsStoreError> {
        let bytes = serde_json::to_vec_pretty(document)
            .map_err(|e| SettingsStoreError::Serialization(e.to_string()))?;

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(|e| SettingsStoreError::Io(e.to_string()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| SettingsStoreError::Io(e.to_string()))
    }
}

#[async_trait]
impl SettingsStorePort for JsonFileSettingsStore {
    async fn get_indicator_settings(
        &self,
        key: &SubscriptionKey,
    ) -> Result<Option<IndicatorSettings>, SettingsStoreError> {
        let document = self.document.lock().await;
        Ok(document
            .indicators
            .iter()
            .find(|r| r.key() == *key)
            .cloned())
    }

    async fn upsert_indicator_settings(
        &self,
        record: &IndicatorSettings,
    ) -> Result<(), SettingsStoreError> {
        let mut document = self.document.lock().await;
        let mut next = document.clone();
        let key = record.key();
        match next.indicators.iter_mut().find(|r| r.key() == key) {
            Some(existing) => *existing = record.clone(),
            None => next.indicators.push(record.clone()),
        }

        self.persist(&next).await?;
        *document = next;
        Ok(())
    }

    async fn get_emission_settings(
        &self,
        symbol: &Symbol,
    ) -> Result<Option<EmissionSettings>, SettingsStoreError> {
        let document = self.document.lock().await;
        Ok(document
            .emissions
            .iter()
            .find(|r| &r.symbol == symbol)
            .cloned())
    }

    async fn upsert_emission_settings(
        &self,
        record: &EmissionSettings,
    ) -> Result<(), SettingsStoreError> {
        let mut document = self.document.lock().await;
        let mut next = document.clone();
        match next.emissions.iter_mut().find(|r| r.symbol == record.symbol) {
            Some(existing) => *existing = record.clone(),
            None => next.emissions.push(record.clone()),
        }

        self.persist(&next).await?;
        *document = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tempfile::tempdir;

    use super::*;
    use crate::domain::market::{Indicator, Timeframe, Universe};

    fn key() -> SubscriptionKey {
        SubscriptionKey::new(Symbol::new("X"), Timeframe::H1, Indicator::Ema50)
    }

    #[tokio::test]
    async fn missing_file_opens_empty() {
        let dir = tempdir().unwrap();
        let store = JsonFileSettingsStore::open(dir.path().join("settings.json"))
            .await
            .unwrap();
        assert!(store.get_indicator_settings(&key()).await.unwrap().is_none());
        assert!(!store.path().exists());
    }

    #[tokio::test]
    async fn records_survive_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let universe = Universe::new(vec![Symbol::new("X")], vec![Timeframe::H1], vec![Indicator::Ema50]);

        let store = JsonFileSettingsStore::open(&path).await.unwrap();
        let mut record = IndicatorSettings::defaults(&key());
        store.upsert_indicator_settings(&record).await.unwrap();
        record.params.insert("length".into(), json!(34));
        store.upsert_indicator_settings(&record).await.unwrap();
        store
            .upsert_emission_settings(&EmissionSettings::all(Symbol::new("X"), &universe))
            .await
            .unwrap();
        drop(store);

        let reopened = JsonFileSettingsStore::open(&path).await.unwrap();
        let stored = reopened.get_indicator_settings(&key()).await.unwrap().unwrap();
        assert_eq!(stored.params["length"], json!(34));
        let emission = reopened
            .get_emission_settings(&Symbol::new("X"))
            .await
            .unwrap()
            .unwrap();
        assert!(emission.allows(Timeframe::H1, Indicator::Ema50));

        let raw: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(raw["indicators"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn corrupt_file_is_a_serialization_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, b"{not json").unwrap();

        let err = JsonFileSettingsStore::open(&path).await.unwrap_err();
        assert!(matches!(err, SettingsStoreError::Serialization(_)));
    }

    #[tokio::test]
    async fn failed_write_keeps_previous_document() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing-dir").join("settings.json");
        let store = JsonFileSettingsStore::open(&path).await.unwrap();

        let err = store
            .upsert_indicator_settings(&IndicatorSettings::defaults(&key()))
            .await
            .unwrap_err();
        assert!(matches!(err, SettingsStoreError::Io(_)));
        assert!(store.get_indicator_settings(&key()).await.unwrap().is_none());
    }
}
