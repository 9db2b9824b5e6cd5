//! Upstream Platform Port (Driven Port)
//!
//! The charting platform that computes indicator values. One session per
//! symbol; each session hosts many charts, each chart one study.
//!
//! Chart and study events are delivered on a per-chart channel in arrival
//! order. Transport failure is reported once through
//! [`UpstreamSession::closed`].

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::domain::catalog::Params;
use crate::domain::market::{Symbol, Timeframe};
use crate::domain::proxy::ProxyAddress;
use crate::domain::structured::MarketSnapshot;

/// Upstream failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UpstreamError {
    /// Connection could not be established.
    #[error("upstream connect failed: {0}")]
    Connect(String),

    /// Established transport failed.
    #[error("upstream transport error: {0}")]
    Transport(String),

    /// No pong within the heartbeat timeout.
    #[error("upstream heartbeat timeout")]
    HeartbeatTimeout,

    /// Upstream reported a protocol violation.
    #[error("upstream protocol error: {0}")]
    Protocol(String),

    /// Session is closed.
    #[error("upstream session closed")]
    Closed,

    /// Chart or study request was rejected.
    #[error("upstream request rejected: {0}")]
    Rejected(String),
}

/// Session credential.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    token: String,
}

impl Credentials {
    /// Wrap a session token.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }

    /// The raw token.
    #[must_use]
    pub fn token(&self) -> &str {
        &self.token
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("token", &"[REDACTED]")
            .finish()
    }
}

/// Upstream chart identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChartId(pub String);

impl fmt::Display for ChartId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Chart bound to a symbol and timeframe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChartRequest {
    /// Instrument.
    pub symbol: Symbol,
    /// Bar interval.
    pub timeframe: Timeframe,
    /// Bars of history to load. `None` uses the upstream default.
    pub range: Option<u32>,
}

/// Study attached to a chart.
#[derive(Debug, Clone, PartialEq)]
pub struct StudyRequest {
    /// Script identifier.
    pub script_id: String,
    /// Script version.
    pub version: String,
    /// Resolved inputs.
    pub inputs: Params,
}

/// Event of one chart and its study.
#[derive(Debug, Clone, PartialEq)]
pub enum ChartEvent {
    /// Chart loaded its series.
    Ready,
    /// New last price and volume of the chart's series.
    Series(MarketSnapshot),
    /// New raw study payload.
    StudyUpdate(Value),
    /// Chart or study failed.
    Error(String),
}

/// An open chart and its event stream.
#[derive(Debug)]
pub struct ChartHandle {
    /// Chart identifier.
    pub id: ChartId,
    /// Events in upstream arrival order.
    pub events: mpsc::Receiver<ChartEvent>,
}

/// A connected upstream session.
#[async_trait]
pub trait UpstreamSession: Send + Sync {
    /// Open a chart.
    async fn open_chart(&self, request: ChartRequest) -> Result<ChartHandle, UpstreamError>;

    /// Attach a study to an open chart.
    async fn attach_study(&self, chart: &ChartId, study: StudyRequest)
    -> Result<(), UpstreamError>;

    /// Close a chart and its study.
    async fn close_chart(&self, chart: &ChartId) -> Result<(), UpstreamError>;

    /// Resolves with the transport error once the session fails or closes.
    async fn closed(&self) -> UpstreamError;

    /// Close the session. Safe to call more than once.
    async fn disconnect(&self);
}

/// Factory for upstream sessions.
#[async_trait]
pub trait UpstreamConnector: Send + Sync {
    /// Connect `symbol`'s session through `proxy`.
    async fn connect(
        &self,
        symbol: &Symbol,
        proxy: &ProxyAddress,
        credentials: &Credentials,
    ) -> Result<Arc<dyn UpstreamSession>, UpstreamError>;
}
