//! Broadcast Port (Driven Port)
//!
//! Fan-out of processed values to downstream clients.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Published event name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    /// A single `(symbol, timeframe)` update, or a market snapshot.
    #[serde(rename = "live-data")]
    LiveData,
    /// Bulk re-emission (periodic tick or settings change).
    #[serde(rename = "live-data-all")]
    LiveDataAll,
}

impl EventKind {
    /// Wire name of the event.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::LiveData => "live-data",
            Self::LiveDataAll => "live-data-all",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Port for publishing payloads.
///
/// Fire-and-forget: there is no acknowledgment and no error path.
pub trait BroadcastPort: Send + Sync {
    /// Publish `payload` under `event`.
    fn publish(&self, event: EventKind, payload: Value);
}
