//! Shared doubles for the relay integration tests.
//!
//! The mock upstream records every chart and study request so tests can
//! observe what the relay asked for, and lets a test kill a session or
//! refuse connects to drive the reconnect path.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{mpsc, watch};

use indicator_relay::application::ports::{
    ChartEvent, ChartHandle, ChartId, ChartRequest, Credentials, DirectoryError,
    IndicatorDefinition, IndicatorDirectoryPort, ProxyProbePort, StudyRequest, UpstreamConnector,
    UpstreamError, UpstreamSession,
};
use indicator_relay::domain::proxy::ProxyAddress;
use indicator_relay::{
    BroadcastHub, CredentialSet, InMemorySettingsStore, IndicatorRelay, RelayDeps, RelayOptions,
    Symbol, Universe,
};

// =============================================================================
// Mock Upstream
// =============================================================================

/// One chart opened on a [`MockSession`].
pub struct OpenedChart {
    pub id: ChartId,
    pub request: ChartRequest,
    pub study: Option<StudyRequest>,
    pub events: mpsc::Sender<ChartEvent>,
}

/// Upstream session that records requests instead of talking to anything.
pub struct MockSession {
    pub symbol: Symbol,
    charts: Mutex<Vec<OpenedChart>>,
    closed_charts: Mutex<Vec<ChartId>>,
    next_id: AtomicUsize,
    closed_tx: watch::Sender<Option<UpstreamError>>,
}

impl MockSession {
    fn new(symbol: Symbol) -> Self {
        let (closed_tx, _) = watch::channel(None);
        Self {
            symbol,
            charts: Mutex::new(Vec::new()),
            closed_charts: Mutex::new(Vec::new()),
            next_id: AtomicUsize::new(0),
            closed_tx,
        }
    }

    /// End the session with `error`, as a dropped socket would.
    pub fn fail(&self, error: UpstreamError) {
        self.closed_tx.send_replace(Some(error));
    }

    /// Charts opened and not closed.
    pub fn open_count(&self) -> usize {
        let closed = self.closed_charts.lock();
        self.charts
            .lock()
            .iter()
            .filter(|c| !closed.contains(&c.id))
            .count()
    }

    /// Charts closed so far.
    pub fn closed_count(&self) -> usize {
        self.closed_charts.lock().len()
    }

    /// `length` inputs of the open studies running `script_id`.
    pub fn study_inputs(&self, script_id: &str) -> Vec<Value> {
        let closed = self.closed_charts.lock();
        self.charts
            .lock()
            .iter()
            .filter(|c| !closed.contains(&c.id))
            .filter_map(|c| c.study.as_ref())
            .filter(|s| s.script_id == script_id)
            .filter_map(|s| s.inputs.get("length").cloned())
            .collect()
    }

    /// Event sender of the open chart running `script_id`.
    pub fn sender(&self, script_id: &str) -> mpsc::Sender<ChartEvent> {
        let closed = self.closed_charts.lock();
        self.charts
            .lock()
            .iter()
            .rev()
            .find(|c| {
                !closed.contains(&c.id)
                    && c.study.as_ref().is_some_and(|s| s.script_id == script_id)
            })
            .map(|c| c.events.clone())
            .expect("no open chart for script")
    }
}

#[async_trait]
impl UpstreamSession for MockSession {
    async fn open_chart(&self, request: ChartRequest) -> Result<ChartHandle, UpstreamError> {
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        let id = ChartId(format!("{}_cs_{n}", self.symbol));
        let (tx, rx) = mpsc::channel(16);
        self.charts.lock().push(OpenedChart {
            id: id.clone(),
            request,
            study: None,
            events: tx,
        });
        Ok(ChartHandle { id, events: rx })
    }

    async fn attach_study(&self, chart: &ChartId, study: StudyRequest) -> Result<(), UpstreamError> {
        let mut charts = self.charts.lock();
        let opened = charts
            .iter_mut()
            .find(|c| &c.id == chart)
            .ok_or_else(|| UpstreamError::Rejected(format!("unknown chart {chart}")))?;
        opened.study = Some(study);
        Ok(())
    }

    async fn close_chart(&self, chart: &ChartId) -> Result<(), UpstreamError> {
        self.closed_charts.lock().push(chart.clone());
        Ok(())
    }

    async fn closed(&self) -> UpstreamError {
        let mut rx = self.closed_tx.subscribe();
        match rx.wait_for(Option::is_some).await {
            Ok(error) => error.clone().unwrap_or(UpstreamError::Closed),
            Err(_) => UpstreamError::Closed,
        }
    }

    async fn disconnect(&self) {
        self.closed_tx.send_if_modified(|state| {
            if state.is_some() {
                return false;
            }
            *state = Some(UpstreamError::Closed);
            true
        });
    }
}

/// Connector handing out a fresh [`MockSession`] per connect.
#[derive(Default)]
pub struct MockConnector {
    sessions: Mutex<Vec<Arc<MockSession>>>,
    refusals: AtomicUsize,
}

impl MockConnector {
    /// Refuse the next `count` connects.
    pub fn refuse_next(&self, count: usize) {
        self.refusals.store(count, Ordering::SeqCst);
    }

    /// Total connects so far.
    pub fn connects(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Connects made for `symbol`.
    pub fn connects_for(&self, symbol: &str) -> usize {
        self.sessions
            .lock()
            .iter()
            .filter(|s| s.symbol.as_str() == symbol)
            .count()
    }

    /// Newest session of `symbol`.
    pub fn latest(&self, symbol: &str) -> Arc<MockSession> {
        self.sessions
            .lock()
            .iter()
            .rev()
            .find(|s| s.symbol.as_str() == symbol)
            .cloned()
            .expect("no session for symbol")
    }
}

#[async_trait]
impl UpstreamConnector for MockConnector {
    async fn connect(
        &self,
        symbol: &Symbol,
        _proxy: &ProxyAddress,
        _credentials: &Credentials,
    ) -> Result<Arc<dyn UpstreamSession>, UpstreamError> {
        if self
            .refusals
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(UpstreamError::Connect("refused".into()));
        }
        let session = Arc::new(MockSession::new(symbol.clone()));
        self.sessions.lock().push(Arc::clone(&session));
        Ok(session)
    }
}

// =============================================================================
// Other Collaborators
// =============================================================================

/// Every proxy answers.
pub struct AliveProbe;

#[async_trait]
impl ProxyProbePort for AliveProbe {
    async fn probe(&self, _proxy: &ProxyAddress, _timeout: std::time::Duration) -> bool {
        true
    }
}

/// Serves version 1 of every script, declaring no inputs.
pub struct StaticDirectory;

#[async_trait]
impl IndicatorDirectoryPort for StaticDirectory {
    async fn fetch(&self, script_id: &str) -> Result<IndicatorDefinition, DirectoryError> {
        Ok(IndicatorDefinition {
            script_id: script_id.to_string(),
            version: "1".to_string(),
            inputs: Vec::new(),
        })
    }
}

// =============================================================================
// Harness
// =============================================================================

pub struct Harness {
    pub relay: Arc<IndicatorRelay>,
    pub store: Arc<InMemorySettingsStore>,
    pub hub: Arc<BroadcastHub>,
    pub connector: Arc<MockConnector>,
}

pub fn harness(universe: Universe, store: Arc<InMemorySettingsStore>) -> Harness {
    let hub = Arc::new(BroadcastHub::with_defaults());
    let connector = Arc::new(MockConnector::default());
    let relay = IndicatorRelay::new(
        RelayDeps {
            universe,
            store: Arc::clone(&store) as _,
            broadcast: Arc::clone(&hub) as _,
            connector: Arc::clone(&connector) as _,
            directory: Arc::new(StaticDirectory),
            probe: Arc::new(AliveProbe),
            proxies: vec![
                ProxyAddress::parse("http://10.0.0.1:8080").unwrap(),
                ProxyAddress::parse("http://10.0.0.2:8080").unwrap(),
            ],
            credentials: CredentialSet::new(Credentials::new("test-token")),
        },
        RelayOptions::default(),
    )
    .unwrap();

    Harness {
        relay,
        store,
        hub,
        connector,
    }
}

/// Let spawned tasks run to their next await point.
pub async fn settle() {
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
}
