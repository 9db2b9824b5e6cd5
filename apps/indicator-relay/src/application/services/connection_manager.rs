//! Connection Manager
//!
//! Owns one upstream session per symbol and keeps it alive.
//!
//! # Failure handling
//!
//! A failed connect, or a session whose [`UpstreamSession::closed`]
//! resolves, is a transport error for that symbol only:
//!
//! 1. the proxy in use is marked dead (bypassing its TTL);
//! 2. the symbol's attempt counter is incremented;
//! 3. a reconnect is scheduled after `min(base * 2^(attempt-1), cap)`.
//!
//! A reconnect disposes the old session, connects again through a freshly
//! assigned proxy and reports [`ConnectionEvent::Connected`] with
//! `reconnected = true`; the receiver rebuilds the symbol's subscriptions.
//! A successful connect resets the counter to zero.
//!
//! At most one reconnect is pending per symbol: scheduling a new one cancels
//! the previous timer.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::backoff::BackoffConfig;
use super::proxy_pool::ProxyPool;
use crate::application::ports::{Credentials, UpstreamConnector, UpstreamError, UpstreamSession};
use crate::domain::market::Symbol;
use crate::domain::proxy::ProxyAddress;
use crate::infrastructure::metrics;

// =============================================================================
// Events
// =============================================================================

/// Connection lifecycle events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// Session established.
    Connected {
        /// Symbol.
        symbol: Symbol,
        /// Whether this replaced a failed session.
        reconnected: bool,
    },
    /// Session lost or connect failed.
    Disconnected {
        /// Symbol.
        symbol: Symbol,
        /// Failure description.
        error: String,
    },
    /// Reconnect scheduled.
    Reconnecting {
        /// Symbol.
        symbol: Symbol,
        /// Attempt number, starting at 1.
        attempt: u32,
        /// Delay before the attempt.
        delay: Duration,
    },
}

// =============================================================================
// Credentials
// =============================================================================

/// Upstream credentials with optional per-symbol overrides.
#[derive(Debug, Clone)]
pub struct CredentialSet {
    default: Credentials,
    overrides: HashMap<Symbol, Credentials>,
}

impl CredentialSet {
    /// Use `default` for every symbol.
    #[must_use]
    pub fn new(default: Credentials) -> Self {
        Self {
            default,
            overrides: HashMap::new(),
        }
    }

    /// Use `credentials` for `symbol`.
    #[must_use]
    pub fn with_override(mut self, symbol: Symbol, credentials: Credentials) -> Self {
        self.overrides.insert(symbol, credentials);
        self
    }

    /// Credentials of `symbol`.
    #[must_use]
    pub fn for_symbol(&self, symbol: &Symbol) -> &Credentials {
        self.overrides.get(symbol).unwrap_or(&self.default)
    }
}

// =============================================================================
// Connection Manager
// =============================================================================

struct SymbolConnection {
    session: Arc<dyn UpstreamSession>,
    proxy: ProxyAddress,
}

/// Health view of one symbol's connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatus {
    /// Symbol.
    pub symbol: String,
    /// Whether a session is live.
    pub connected: bool,
    /// Proxy in use, without credentials.
    pub proxy: Option<String>,
    /// Consecutive failed attempts.
    pub reconnect_attempts: u32,
}

/// Per-symbol upstream session owner.
pub struct ConnectionManager {
    symbols: Vec<Symbol>,
    pool: Arc<ProxyPool>,
    connector: Arc<dyn UpstreamConnector>,
    credentials: CredentialSet,
    backoff: BackoffConfig,
    event_tx: mpsc::Sender<ConnectionEvent>,
    cancel: CancellationToken,
    connections: Mutex<HashMap<Symbol, SymbolConnection>>,
    attempts: Mutex<HashMap<Symbol, u32>>,
    supervisors: Mutex<HashMap<Symbol, CancellationToken>>,
}

impl ConnectionManager {
    /// Create a connection manager for `symbols`.
    ///
    /// Cancelling `cancel` stops every supervisor and pending reconnect.
    #[must_use]
    pub fn new(
        symbols: Vec<Symbol>,
        pool: Arc<ProxyPool>,
        connector: Arc<dyn UpstreamConnector>,
        credentials: CredentialSet,
        backoff: BackoffConfig,
        event_tx: mpsc::Sender<ConnectionEvent>,
        cancel: &CancellationToken,
    ) -> Self {
        Self {
            symbols,
            pool,
            connector,
            credentials,
            backoff,
            event_tx,
            cancel: cancel.child_token(),
            connections: Mutex::new(HashMap::new()),
            attempts: Mutex::new(HashMap::new()),
            supervisors: Mutex::new(HashMap::new()),
        }
    }

    /// Connect every configured symbol.
    ///
    /// Returns how many symbols connected on the first attempt. The others
    /// are already retrying in the background.
    pub async fn connect_all(self: &Arc<Self>) -> usize {
        let mut connected = 0;
        for symbol in &self.symbols {
            if self.connect(symbol).await.is_ok() {
                connected += 1;
            }
        }
        connected
    }

    /// Connect `symbol` and keep it connected.
    ///
    /// Replaces any earlier supervisor of the symbol, cancelling its pending
    /// reconnect.
    ///
    /// # Errors
    ///
    /// Returns the first attempt's `UpstreamError`. The reconnect schedule
    /// is already running when this returns an error.
    pub async fn connect(self: &Arc<Self>, symbol: &Symbol) -> Result<(), UpstreamError> {
        if self.cancel.is_cancelled() {
            return Err(UpstreamError::Closed);
        }

        let token = self.cancel.child_token();
        if let Some(previous) = self.supervisors.lock().insert(symbol.clone(), token.clone()) {
            previous.cancel();
        }

        let first = self.establish(symbol).await;
        let outcome = first
            .as_ref()
            .map(|_| ())
            .map_err(|(_, error)| error.clone());

        let this = Arc::clone(self);
        let symbol = symbol.clone();
        tokio::spawn(async move { this.supervise(symbol, first, token).await });

        outcome
    }

    /// Dispose `symbol`'s session and establish a new one.
    ///
    /// # Errors
    ///
    /// Returns the proxy used and the connect error.
    pub async fn reconnect(
        &self,
        symbol: &Symbol,
    ) -> Result<Arc<dyn UpstreamSession>, (ProxyAddress, UpstreamError)> {
        self.dispose(symbol).await;
        self.establish(symbol).await
    }

    /// Live session of `symbol`.
    #[must_use]
    pub fn session(&self, symbol: &Symbol) -> Option<Arc<dyn UpstreamSession>> {
        self.connections
            .lock()
            .get(symbol)
            .map(|c| Arc::clone(&c.session))
    }

    /// Consecutive failed attempts of `symbol`.
    #[must_use]
    pub fn attempts(&self, symbol: &Symbol) -> u32 {
        self.attempts.lock().get(symbol).copied().unwrap_or(0)
    }

    /// Connection state of every configured symbol.
    #[must_use]
    pub fn status(&self) -> Vec<ConnectionStatus> {
        let connections = self.connections.lock();
        let attempts = self.attempts.lock();
        self.symbols
            .iter()
            .map(|symbol| {
                let connection = connections.get(symbol);
                ConnectionStatus {
                    symbol: symbol.to_string(),
                    connected: connection.is_some(),
                    proxy: connection.map(|c| c.proxy.to_string()),
                    reconnect_attempts: attempts.get(symbol).copied().unwrap_or(0),
                }
            })
            .collect()
    }

    /// Number of symbols with a live session.
    #[must_use]
    pub fn connected_count(&self) -> usize {
        self.connections.lock().len()
    }

    /// Cancel pending reconnects and close every session.
    ///
    /// Best-effort: every session is released regardless of the others.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.supervisors.lock().clear();

        let connections: Vec<(Symbol, SymbolConnection)> =
            self.connections.lock().drain().collect();
        for (symbol, connection) in connections {
            connection.session.disconnect().await;
            self.pool.release(&symbol);
            tracing::debug!(symbol = %symbol, "Upstream session closed");
        }
    }

    /// One connect attempt through a freshly assigned proxy.
    async fn establish(
        &self,
        symbol: &Symbol,
    ) -> Result<Arc<dyn UpstreamSession>, (ProxyAddress, UpstreamError)> {
        let proxy = self.pool.assign(symbol).await;
        tracing::info!(symbol = %symbol, proxy = %proxy, "Connecting upstream session");

        match self
            .connector
            .connect(symbol, &proxy, self.credentials.for_symbol(symbol))
            .await
        {
            Ok(session) => {
                metrics::record_upstream_connect(true);
                self.attempts.lock().insert(symbol.clone(), 0);

                let replaced = self.connections.lock().insert(
                    symbol.clone(),
                    SymbolConnection {
                        session: Arc::clone(&session),
                        proxy,
                    },
                );
                if let Some(old) = replaced {
                    old.session.disconnect().await;
                }

                tracing::info!(symbol = %symbol, "Upstream session connected");
                Ok(session)
            }
            Err(error) => {
                metrics::record_upstream_connect(false);
                tracing::warn!(symbol = %symbol, proxy = %proxy, error = %error, "Upstream connect failed");
                Err((proxy, error))
            }
        }
    }

    /// Remove `symbol`'s connection only while it still holds `session`.
    fn take_if_current(
        &self,
        symbol: &Symbol,
        session: &Arc<dyn UpstreamSession>,
    ) -> Option<SymbolConnection> {
        let mut connections = self.connections.lock();
        let current = connections
            .get(symbol)
            .is_some_and(|c| Arc::ptr_eq(&c.session, session));
        if current {
            connections.remove(symbol)
        } else {
            None
        }
    }

    async fn dispose(&self, symbol: &Symbol) {
        let removed = self.connections.lock().remove(symbol);
        if let Some(connection) = removed {
            connection.session.disconnect().await;
        }
    }

    /// Keep `symbol` connected until `cancel` fires.
    async fn supervise(
        self: Arc<Self>,
        symbol: Symbol,
        first: Result<Arc<dyn UpstreamSession>, (ProxyAddress, UpstreamError)>,
        cancel: CancellationToken,
    ) {
        let mut result = first;
        let mut reconnected = false;

        loop {
            let (proxy, error) = match result {
                Ok(session) => {
                    let _ = self
                        .event_tx
                        .send(ConnectionEvent::Connected {
                            symbol: symbol.clone(),
                            reconnected,
                        })
                        .await;

                    let error = tokio::select! {
                        () = cancel.cancelled() => return,
                        error = session.closed() => error,
                    };
                    tracing::warn!(symbol = %symbol, error = %error, "Upstream session lost");

                    // A lost session stops counting as connected right away,
                    // unless a newer connection already replaced it.
                    let Some(connection) = self.take_if_current(&symbol, &session) else {
                        tracing::debug!(symbol = %symbol, "Superseded session closed");
                        return;
                    };
                    connection.session.disconnect().await;
                    (connection.proxy, error)
                }
                Err(failure) => failure,
            };

            if cancel.is_cancelled() {
                return;
            }

            let delay = self.on_transport_error(&symbol, &proxy, &error).await;

            tokio::select! {
                () = cancel.cancelled() => {
                    tracing::debug!(symbol = %symbol, "Pending reconnect cancelled");
                    return;
                }
                () = tokio::time::sleep(delay) => {}
            }

            result = self.reconnect(&symbol).await;
            reconnected = true;
        }
    }

    /// Mark the proxy dead, count the attempt and return the backoff delay.
    async fn on_transport_error(
        &self,
        symbol: &Symbol,
        proxy: &ProxyAddress,
        error: &UpstreamError,
    ) -> Duration {
        self.pool.mark_dead(proxy);

        let attempt = {
            let mut attempts = self.attempts.lock();
            let counter = attempts.entry(symbol.clone()).or_insert(0);
            *counter = counter.saturating_add(1);
            *counter
        };
        let delay = self.backoff.delay_with_jitter(attempt);

        metrics::record_upstream_reconnect();
        tracing::info!(
            symbol = %symbol,
            attempt,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "Scheduling upstream reconnect"
        );

        let _ = self
            .event_tx
            .send(ConnectionEvent::Disconnected {
                symbol: symbol.clone(),
                error: error.to_string(),
            })
            .await;
        let _ = self
            .event_tx
            .send(ConnectionEvent::Reconnecting {
                symbol: symbol.clone(),
                attempt,
                delay,
            })
            .await;

        delay
    }
}
