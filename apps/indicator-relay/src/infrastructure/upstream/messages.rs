//! Upstream WebSocket Message Types
//!
//! Every frame carries one envelope, or a JSON array of envelopes:
//!
//! ```json
//! {"m": "study_update", "p": ["cs_1f0c", "st_9a2b", {"plot_0": [1, 2]}]}
//! ```
//!
//! `m` names the method, `p` holds its positional parameters.
//!
//! # Client Methods
//!
//! | Method | Parameters |
//! |---|---|
//! | `set_auth_token` | `[token]` |
//! | `create_chart` | `[chart_id, symbol, timeframe, range \| null]` |
//! | `create_study` | `[chart_id, study_id, script_id, version, inputs]` |
//! | `remove_chart` | `[chart_id]` |
//!
//! # Server Methods
//!
//! | Method | Parameters |
//! |---|---|
//! | `chart_ready` | `[chart_id]` |
//! | `series_update` | `[chart_id, {"price", "volume"}]` |
//! | `study_update` | `[chart_id, study_id, payload]` |
//! | `study_error` | `[chart_id, study_id, message]` |
//! | `chart_error` | `[chart_id, message]` |
//! | `protocol_error` | `[message]` |

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::catalog::Params;

/// Raw `{m, p}` envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Method name.
    pub m: String,
    /// Positional parameters.
    #[serde(default)]
    pub p: Vec<Value>,
}

// =============================================================================
// Client Messages
// =============================================================================

/// Messages sent to the upstream platform.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    /// Authenticate the session.
    SetAuthToken {
        /// Session token.
        token: String,
    },
    /// Open a chart.
    CreateChart {
        /// Client-chosen chart id.
        chart_id: String,
        /// Instrument.
        symbol: String,
        /// Resolution code.
        timeframe: String,
        /// Bars of history, or the upstream default.
        range: Option<u32>,
    },
    /// Attach a study to a chart.
    CreateStudy {
        /// Target chart.
        chart_id: String,
        /// Client-chosen study id.
        study_id: String,
        /// Script identifier.
        script_id: String,
        /// Script version.
        version: String,
        /// Script inputs.
        inputs: Params,
    },
    /// Close a chart and its study.
    RemoveChart {
        /// Chart to close.
        chart_id: String,
    },
}

impl ClientMessage {
    /// Method name on the wire.
    #[must_use]
    pub const fn method(&self) -> &'static str {
        match self {
            Self::SetAuthToken { .. } => "set_auth_token",
            Self::CreateChart { .. } => "create_chart",
            Self::CreateStudy { .. } => "create_study",
            Self::RemoveChart { .. } => "remove_chart",
        }
    }

    /// Wire envelope of this message.
    #[must_use]
    pub fn to_envelope(&self) -> Envelope {
        let p = match self {
            Self::SetAuthToken { token } => vec![Value::from(token.as_str())],
            Self::CreateChart {
                chart_id,
                symbol,
                timeframe,
                range,
            } => vec![
                Value::from(chart_id.as_str()),
                Value::from(symbol.as_str()),
                Value::from(timeframe.as_str()),
                range.map_or(Value::Null, Value::from),
            ],
            Self::CreateStudy {
                chart_id,
                study_id,
                script_id,
                version,
                inputs,
            } => vec![
                Value::from(chart_id.as_str()),
                Value::from(study_id.as_str()),
                Value::from(script_id.as_str()),
                Value::from(version.as_str()),
                Value::Object(inputs.clone().into_iter().collect()),
            ],
            Self::RemoveChart { chart_id } => vec![Value::from(chart_id.as_str())],
        };
        Envelope {
            m: self.method().to_string(),
            p,
        }
    }
}

// =============================================================================
// Server Messages
// =============================================================================

/// Last bar of a chart's series.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SeriesPoint {
    /// Last price.
    #[serde(default)]
    pub price: Option<f64>,
    /// Volume.
    #[serde(default)]
    pub volume: Option<f64>,
}

/// Messages received from the upstream platform.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    /// Chart loaded.
    ChartReady {
        /// Chart id.
        chart_id: String,
    },
    /// New last bar.
    SeriesUpdate {
        /// Chart id.
        chart_id: String,
        /// Price and volume.
        point: SeriesPoint,
    },
    /// New study payload.
    StudyUpdate {
        /// Chart id.
        chart_id: String,
        /// Study id.
        study_id: String,
        /// Raw payload.
        payload: Value,
    },
    /// Study failed.
    StudyError {
        /// Chart id.
        chart_id: String,
        /// Study id.
        study_id: String,
        /// Upstream description.
        message: String,
    },
    /// Chart failed.
    ChartError {
        /// Chart id.
        chart_id: String,
        /// Upstream description.
        message: String,
    },
    /// Session-level protocol violation. Fatal for the session.
    ProtocolError {
        /// Upstream description.
        message: String,
    },
}

impl ServerMessage {
    /// Chart this message belongs to, if any.
    #[must_use]
    pub fn chart_id(&self) -> Option<&str> {
        match self {
            Self::ChartReady { chart_id }
            | Self::SeriesUpdate { chart_id, .. }
            | Self::StudyUpdate { chart_id, .. }
            | Self::StudyError { chart_id, .. }
            | Self::ChartError { chart_id, .. } => Some(chart_id),
            Self::ProtocolError { .. } => None,
        }
    }
}
