//! Indicator Directory Port (Driven Port)
//!
//! Lookup of upstream indicator definitions (version and declared inputs).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::catalog::Params;

/// Upstream description of an indicator script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndicatorDefinition {
    /// Script identifier.
    pub script_id: String,
    /// Script version to attach.
    pub version: String,
    /// Input ids the script declares. Empty means "unknown".
    #[serde(default)]
    pub inputs: Vec<String>,
}

impl IndicatorDefinition {
    /// Drop parameters the script does not declare.
    ///
    /// Returns `params` unchanged when the definition declares no inputs.
    #[must_use]
    pub fn filter_inputs(&self, params: Params) -> Params {
        if self.inputs.is_empty() {
            return params;
        }
        params
            .into_iter()
            .filter(|(name, _)| self.inputs.iter().any(|i| i == name))
            .collect()
    }
}

/// Directory lookup failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DirectoryError {
    /// Request could not be completed.
    #[error("indicator directory request failed: {0}")]
    Request(String),

    /// Unknown script.
    #[error("indicator not found: {0}")]
    NotFound(String),

    /// Response could not be decoded.
    #[error("invalid indicator definition: {0}")]
    Decode(String),
}

/// Port for indicator definitions.
#[async_trait]
pub trait IndicatorDirectoryPort: Send + Sync {
    /// Fetch the definition of `script_id`.
    async fn fetch(&self, script_id: &str) -> Result<IndicatorDefinition, DirectoryError>;
}
