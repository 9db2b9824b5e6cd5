//! Upstream WebSocket Client
//!
//! [`WsUpstreamConnector`] opens one WebSocket per symbol through the
//! symbol's proxy and hands back a [`WsSession`].
//!
//! # Session task
//!
//! Each session runs one task that owns the socket:
//!
//! - queued [`ClientMessage`]s are written in order;
//! - inbound frames are decoded and routed to the owning chart's channel,
//!   preserving arrival order per chart;
//! - pings go out every heartbeat interval.
//!
//! A close frame, read/write error, heartbeat timeout or `protocol_error`
//! ends the task. The error is published once through
//! [`UpstreamSession::closed`], and every chart channel is dropped.
//!
//! Frames that fail to decode are logged and dropped; they never end the
//! session.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use url::Url;
use uuid::Uuid;

use super::codec::JsonCodec;
use super::heartbeat::{Heartbeat, HeartbeatAction, HeartbeatConfig};
use super::messages::{ClientMessage, ServerMessage};
use super::tunnel::open_tunnel;
use crate::application::ports::{
    ChartEvent, ChartHandle, ChartId, ChartRequest, Credentials, StudyRequest, UpstreamConnector,
    UpstreamError, UpstreamSession,
};
use crate::domain::market::Symbol;
use crate::domain::proxy::ProxyAddress;
use crate::domain::structured::MarketSnapshot;

/// Buffered events per chart.
const CHART_EVENT_CAPACITY: usize = 64;

/// Buffered outbound messages per session.
const OUTBOUND_CAPACITY: usize = 256;

/// How long `disconnect` waits for the close handshake.
const DISCONNECT_GRACE: Duration = Duration::from_secs(2);

type ChartRoutes = Arc<Mutex<HashMap<String, mpsc::Sender<ChartEvent>>>>;

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the upstream client.
#[derive(Debug, Clone)]
pub struct UpstreamClientConfig {
    /// WebSocket URL.
    pub url: Url,
    /// Bound on tunnel setup and on the WebSocket handshake, each.
    pub connect_timeout: Duration,
    /// Heartbeat configuration.
    pub heartbeat: HeartbeatConfig,
}

impl UpstreamClientConfig {
    /// Create a new configuration with default timeouts.
    #[must_use]
    pub fn new(url: Url) -> Self {
        Self {
            url,
            connect_timeout: Duration::from_secs(10),
            heartbeat: HeartbeatConfig::default(),
        }
    }
}

// =============================================================================
// Connector
// =============================================================================

/// Connects upstream sessions over proxied WebSockets.
#[derive(Debug, Clone)]
pub struct WsUpstreamConnector {
    config: UpstreamClientConfig,
}

impl WsUpstreamConnector {
    /// Create a connector.
    #[must_use]
    pub const fn new(config: UpstreamClientConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl UpstreamConnector for WsUpstreamConnector {
    async fn connect(
        &self,
        symbol: &Symbol,
        proxy: &ProxyAddress,
        credentials: &Credentials,
    ) -> Result<Arc<dyn UpstreamSession>, UpstreamError> {
        let timeout = self.config.connect_timeout;
        let stream = open_tunnel(proxy, &self.config.url, timeout)
            .await
            .map_err(|e| UpstreamError::Connect(e.to_string()))?;

        let (ws, _response) = tokio::time::timeout(
            timeout,
            tokio_tungstenite::client_async_tls(self.config.url.as_str(), stream),
        )
        .await
        .map_err(|_| UpstreamError::Connect("websocket handshake timed out".into()))?
        .map_err(|e| UpstreamError::Connect(e.to_string()))?;

        tracing::info!(symbol = %symbol, proxy = %proxy, "Upstream WebSocket connected");
        Ok(Arc::new(WsSession::start(
            symbol.clone(),
            ws,
            credentials,
            self.config.heartbeat,
        )))
    }
}

// =============================================================================
// Session
// =============================================================================

/// One live upstream WebSocket session.
pub struct WsSession {
    symbol: Symbol,
    outbound: mpsc::Sender<ClientMessage>,
    charts: ChartRoutes,
    closed: watch::Receiver<Option<UpstreamError>>,
    cancel: CancellationToken,
}

impl WsSession {
    /// Take over `ws`, authenticate and start the session task.
    #[must_use]
    pub fn start<S>(
        symbol: Symbol,
        ws: WebSocketStream<S>,
        credentials: &Credentials,
        heartbeat: HeartbeatConfig,
    ) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (outbound, outbound_rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let (closed_tx, closed) = watch::channel(None);
        let charts: ChartRoutes = Arc::new(Mutex::new(HashMap::new()));
        let cancel = CancellationToken::new();

        // Queued ahead of anything the caller sends.
        let _ = outbound.try_send(ClientMessage::SetAuthToken {
            token: credentials.token().to_string(),
        });

        tokio::spawn(drive(
            symbol.clone(),
            ws,
            outbound_rx,
            Arc::clone(&charts),
            heartbeat,
            closed_tx,
            cancel.clone(),
        ));

        Self {
            symbol,
            outbound,
            charts,
            closed,
            cancel,
        }
    }

    /// Number of open charts.
    #[must_use]
    pub fn chart_count(&self) -> usize {
        self.charts.lock().len()
    }

    async fn send(&self, message: ClientMessage) -> Result<(), UpstreamError> {
        if let Some(error) = self.closed.borrow().clone() {
            return Err(error);
        }
        self.outbound
            .send(message)
            .await
            .map_err(|_| UpstreamError::Closed)
    }
}

impl Drop for WsSession {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[async_trait]
impl UpstreamSession for WsSession {
    async fn open_chart(&self, request: ChartRequest) -> Result<ChartHandle, UpstreamError> {
        let chart_id = format!("cs_{}", Uuid::new_v4().simple());
        let (tx, rx) = mpsc::channel(CHART_EVENT_CAPACITY);
        self.charts.lock().insert(chart_id.clone(), tx);

        let sent = self
            .send(ClientMessage::CreateChart {
                chart_id: chart_id.clone(),
                symbol: request.symbol.to_string(),
                timeframe: request.timeframe.as_str().to_string(),
                range: request.range,
            })
            .await;
        if let Err(e) = sent {
            self.charts.lock().remove(&chart_id);
            return Err(e);
        }

        tracing::debug!(
            symbol = %self.symbol,
            timeframe = %request.timeframe,
            chart = %chart_id,
            "Chart requested"
        );
        Ok(ChartHandle {
            id: ChartId(chart_id),
            events: rx,
        })
    }

    async fn attach_study(&self, chart: &ChartId, study: StudyRequest) -> Result<(), UpstreamError> {
        if !self.charts.lock().contains_key(&chart.0) {
            return Err(UpstreamError::Rejected(format!("unknown chart {chart}")));
        }

        self.send(ClientMessage::CreateStudy {
            chart_id: chart.0.clone(),
            study_id: format!("st_{}", Uuid::new_v4().simple()),
            script_id: study.script_id,
            version: study.version,
            inputs: study.inputs,
        })
        .await
    }

    async fn close_chart(&self, chart: &ChartId) -> Result<(), UpstreamError> {
        if self.charts.lock().remove(&chart.0).is_none() {
            return Ok(());
        }
        self.send(ClientMessage::RemoveChart {
            chart_id: chart.0.clone(),
        })
        .await
    }

    async fn closed(&self) -> UpstreamError {
        let mut closed = self.closed.clone();
        match closed.wait_for(Option::is_some).await {
            Ok(error) => error.clone().unwrap_or(UpstreamError::Closed),
            Err(_) => UpstreamError::Closed,
        }
    }

    async fn disconnect(&self) {
        self.cancel.cancel();
        let _ = tokio::time::timeout(DISCONNECT_GRACE, self.closed()).await;
    }
}

// =============================================================================
// Session Task
// =============================================================================

async fn drive<S>(
    symbol: Symbol,
    ws: WebSocketStream<S>,
    mut outbound: mpsc::Receiver<ClientMessage>,
    charts: ChartRoutes,
    heartbeat: HeartbeatConfig,
    closed: watch::Sender<Option<UpstreamError>>,
    cancel: CancellationToken,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let codec = JsonCodec::new();
    let (mut write, mut read) = ws.split();
    let mut heartbeat = Heartbeat::new(heartbeat);
    let mut ticker = heartbeat.interval();

    let error = loop {
        tokio::select! {
            () = cancel.cancelled() => {
                let _ = write.send(Message::Close(None)).await;
                break UpstreamError::Closed;
            }
            Some(message) = outbound.recv() => {
                let text = match codec.encode(&message) {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::error!(symbol = %symbol, method = message.method(), error = %e, "Failed to encode message");
                        continue;
                    }
                };
                if let Err(e) = write.send(Message::Text(text.into())).await {
                    break UpstreamError::Transport(e.to_string());
                }
            }
            _ = ticker.tick() => {
                match heartbeat.on_tick() {
                    HeartbeatAction::SendPing => {
                        if let Err(e) = write.send(Message::Ping(Vec::new().into())).await {
                            break UpstreamError::Transport(e.to_string());
                        }
                    }
                    HeartbeatAction::TimedOut => break UpstreamError::HeartbeatTimeout,
                }
            }
            frame = read.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        heartbeat.record_activity();
                        if let Err(e) = route(&symbol, &codec, text.as_str(), &charts).await {
                            break e;
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        heartbeat.record_activity();
                        if let Err(e) = write.send(Message::Pong(data)).await {
                            break UpstreamError::Transport(e.to_string());
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        tracing::info!(symbol = %symbol, "Upstream sent close frame");
                        break UpstreamError::Transport("closed by upstream".into());
                    }
                    Some(Ok(_)) => heartbeat.record_activity(),
                    Some(Err(e)) => break UpstreamError::Transport(e.to_string()),
                    None => break UpstreamError::Transport("stream ended".into()),
                }
            }
        }
    };

    if error != UpstreamError::Closed {
        tracing::warn!(symbol = %symbol, error = %error, "Upstream session ended");
    }
    charts.lock().clear();
    closed.send_replace(Some(error));
}

/// Decode one frame and deliver its messages to their charts.
///
/// Only a `protocol_error` is returned as an error.
async fn route(
    symbol: &Symbol,
    codec: &JsonCodec,
    text: &str,
    charts: &ChartRoutes,
) -> Result<(), UpstreamError> {
    let messages = match codec.decode(text) {
        Ok(messages) => messages,
        Err(e) => {
            tracing::warn!(symbol = %symbol, error = %e, "Dropping undecodable frame");
            return Ok(());
        }
    };

    for message in messages {
        let Some(chart_id) = message.chart_id().map(str::to_string) else {
            if let ServerMessage::ProtocolError { message } = message {
                return Err(UpstreamError::Protocol(message));
            }
            continue;
        };

        let event = match message {
            ServerMessage::ChartReady { .. } => ChartEvent::Ready,
            ServerMessage::SeriesUpdate { point, .. } => {
                ChartEvent::Series(MarketSnapshot::new(point.price, point.volume))
            }
            ServerMessage::StudyUpdate { payload, .. } => ChartEvent::StudyUpdate(payload),
            ServerMessage::StudyError { message, .. } | ServerMessage::ChartError { message, .. } => {
                ChartEvent::Error(message)
            }
            ServerMessage::ProtocolError { .. } => continue,
        };

        let route = charts.lock().get(&chart_id).cloned();
        let Some(route) = route else {
            tracing::trace!(symbol = %symbol, chart = %chart_id, "Event for closed chart");
            continue;
        };
        if route.send(event).await.is_err() {
            charts.lock().remove(&chart_id);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::{Value, json};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    use super::*;
    use crate::domain::market::Timeframe;

    type ServerSocket = WebSocketStream<TcpStream>;

    async fn pair() -> (WsSession, ServerSocket) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            tokio_tungstenite::accept_async(socket).await.unwrap()
        });

        let tcp = TcpStream::connect(addr).await.unwrap();
        let (ws, _) = tokio_tungstenite::client_async(format!("ws://{addr}/"), tcp)
            .await
            .unwrap();
        let session = WsSession::start(
            Symbol::new("X"),
            ws,
            &Credentials::new("tok"),
            HeartbeatConfig::default(),
        );
        (session, server.await.unwrap())
    }

    async fn next_json(server: &mut ServerSocket) -> Value {
        loop {
            if let Message::Text(text) = server.next().await.unwrap().unwrap() {
                return serde_json::from_str(text.as_str()).unwrap();
            }
        }
    }

    async fn send_json(server: &mut ServerSocket, value: Value) {
        server
            .send(Message::Text(value.to_string().into()))
            .await
            .unwrap();
    }

    fn request() -> ChartRequest {
        ChartRequest {
            symbol: Symbol::new("X"),
            timeframe: Timeframe::H1,
            range: Some(500),
        }
    }

    #[tokio::test]
    async fn authenticates_then_routes_chart_events() {
        let (session, mut server) = pair().await;
        assert_eq!(
            next_json(&mut server).await,
            json!({"m": "set_auth_token", "p": ["tok"]})
        );

        let mut chart = session.open_chart(request()).await.unwrap();
        let create = next_json(&mut server).await;
        assert_eq!(create["m"], "create_chart");
        assert_eq!(create["p"][0], chart.id.0.as_str());
        assert_eq!(create["p"][3], 500);

        let study = StudyRequest {
            script_id: "STD;RSI".into(),
            version: "1".into(),
            inputs: Default::default(),
        };
        session.attach_study(&chart.id, study).await.unwrap();
        assert_eq!(next_json(&mut server).await["m"], "create_study");

        let id = chart.id.0.clone();
        send_json(
            &mut server,
            json!([
                {"m": "chart_ready", "p": [id]},
                {"m": "series_update", "p": [id, {"price": 10.5, "volume": 3.0}]},
                {"m": "study_update", "p": [id, "st", {"plot_0": [2, 1]}]},
            ]),
        )
        .await;

        assert_eq!(chart.events.recv().await, Some(ChartEvent::Ready));
        assert_eq!(
            chart.events.recv().await,
            Some(ChartEvent::Series(MarketSnapshot::new(Some(10.5), Some(3.0))))
        );
        assert_eq!(
            chart.events.recv().await,
            Some(ChartEvent::StudyUpdate(json!({"plot_0": [2, 1]})))
        );

        session.close_chart(&chart.id).await.unwrap();
        assert_eq!(
            next_json(&mut server).await,
            json!({"m": "remove_chart", "p": [id]})
        );
        assert_eq!(session.chart_count(), 0);
    }

    #[tokio::test]
    async fn study_error_is_delivered_to_its_chart() {
        let (session, mut server) = pair().await;
        next_json(&mut server).await;

        let mut chart = session.open_chart(request()).await.unwrap();
        next_json(&mut server).await;
        send_json(
            &mut server,
            json!({"m": "study_error", "p": [chart.id.0, "st", "invalid input"]}),
        )
        .await;

        assert_eq!(
            chart.events.recv().await,
            Some(ChartEvent::Error("invalid input".into()))
        );
    }

    #[tokio::test]
    async fn protocol_error_closes_session() {
        let (session, mut server) = pair().await;
        next_json(&mut server).await;
        let mut chart = session.open_chart(request()).await.unwrap();

        send_json(&mut server, json!({"m": "protocol_error", "p": ["bad auth"]})).await;

        assert_eq!(session.closed().await, UpstreamError::Protocol("bad auth".into()));
        assert_eq!(chart.events.recv().await, None);
        assert!(session.open_chart(request()).await.is_err());
    }

    #[tokio::test]
    async fn undecodable_frame_is_dropped() {
        let (session, mut server) = pair().await;
        next_json(&mut server).await;
        let mut chart = session.open_chart(request()).await.unwrap();

        server.send(Message::Text("~m~garbage".into())).await.unwrap();
        send_json(&mut server, json!({"m": "chart_ready", "p": [chart.id.0]})).await;

        assert_eq!(chart.events.recv().await, Some(ChartEvent::Ready));
    }

    #[tokio::test]
    async fn server_close_is_a_transport_error() {
        let (session, mut server) = pair().await;
        server.close(None).await.unwrap();
        assert!(matches!(session.closed().await, UpstreamError::Transport(_)));
    }

    #[tokio::test]
    async fn disconnect_sends_close_frame() {
        let (session, mut server) = pair().await;
        next_json(&mut server).await;

        session.disconnect().await;
        assert!(matches!(
            server.next().await,
            Some(Ok(Message::Close(_))) | None
        ));
        assert_eq!(session.closed().await, UpstreamError::Closed);
    }

    #[tokio::test]
    async fn connector_tunnels_through_proxy() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        // Proxy and upstream in one: answer CONNECT, then speak WebSocket.
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut head = Vec::new();
            let mut byte = [0u8; 1];
            while !head.ends_with(b"\r\n\r\n") {
                socket.read_exact(&mut byte).await.unwrap();
                head.push(byte[0]);
            }
            socket
                .write_all(b"HTTP/1.1 200 Connection established\r\n\r\n")
                .await
                .unwrap();
            let mut ws = tokio_tungstenite::accept_async(socket).await.unwrap();
            let first = next_json(&mut ws).await;
            (String::from_utf8(head).unwrap(), first)
        });

        let connector = WsUpstreamConnector::new(UpstreamClientConfig::new(
            Url::parse("ws://upstream.test:8080/socket").unwrap(),
        ));
        let proxy = ProxyAddress::parse(&format!("http://127.0.0.1:{port}")).unwrap();
        let _session = connector
            .connect(&Symbol::new("X"), &proxy, &Credentials::new("tok"))
            .await
            .unwrap();

        let (head, first) = server.await.unwrap();
        assert!(head.starts_with("CONNECT upstream.test:8080 HTTP/1.1"));
        assert_eq!(first["m"], "set_auth_token");
    }
}
