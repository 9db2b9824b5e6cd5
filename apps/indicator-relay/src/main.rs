//! Indicator Relay Binary
//!
//! Starts the technical-indicator relay.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin indicator-relay
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `RELAY_SYMBOLS`: comma-separated symbols
//! - `RELAY_PROXIES`: comma-separated proxy URLs
//! - `UPSTREAM_WS_URL`: upstream WebSocket endpoint
//! - `UPSTREAM_HTTP_URL`: upstream indicator definition endpoint
//! - `UPSTREAM_SESSION_TOKEN`: default upstream credential
//!
//! ## Optional
//! - `RELAY_TIMEFRAMES`: timeframe subset (default: 5,15,60,240,1D,1W)
//! - `RELAY_INDICATORS`: indicator subset (default: all)
//! - `UPSTREAM_SESSION_TOKEN_<SYMBOL>`: per-symbol credential
//! - `RELAY_SETTINGS_PATH`: settings file (default: relay-settings.json)
//! - `RELAY_HEALTH_PORT`: health, metrics and stream port (default: 8083)
//! - `OTEL_ENABLED`, `OTEL_EXPORTER_OTLP_ENDPOINT`, `OTEL_SERVICE_NAME`
//! - `RUST_LOG`: log filter (default adds `indicator_relay=info`)
//!
//! See [`RelayConfig`] for the retry and timing variables.

use std::sync::Arc;
use std::time::Duration;

use indicator_relay::application::services::SeedReport;
use indicator_relay::infrastructure::directory::HttpIndicatorDirectory;
use indicator_relay::infrastructure::health::HealthSource;
use indicator_relay::infrastructure::probe::HttpProxyProbe;
use indicator_relay::infrastructure::telemetry;
use indicator_relay::infrastructure::upstream::{
    HeartbeatConfig, UpstreamClientConfig, WsUpstreamConnector,
};
use indicator_relay::{
    BroadcastConfig, BroadcastHub, HealthServer, HealthServerState, IndicatorRelay,
    JsonFileSettingsStore, RelayConfig, RelayDeps, RelayError, init_metrics,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout of one indicator definition request.
const DIRECTORY_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| "failed to install rustls crypto provider")?;

    load_dotenv();

    let _telemetry_guard = telemetry::init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting Indicator Relay");

    if let Err(e) = init_metrics() {
        tracing::warn!(error = %e, "Prometheus recorder not installed");
    }

    let config = RelayConfig::from_env()?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    let hub = Arc::new(BroadcastHub::new(BroadcastConfig {
        capacity: config.broadcast.capacity,
    }));
    let store = Arc::new(JsonFileSettingsStore::open(config.settings_path.clone()).await?);
    let connector = Arc::new(WsUpstreamConnector::new(UpstreamClientConfig {
        url: config.upstream.ws_url.clone(),
        connect_timeout: config.upstream.connect_timeout,
        heartbeat: HeartbeatConfig::new(
            config.upstream.heartbeat_interval,
            config.upstream.heartbeat_timeout,
        ),
    }));
    let directory = Arc::new(HttpIndicatorDirectory::new(
        config.upstream.http_url.clone(),
        DIRECTORY_TIMEOUT,
    )?);
    let probe = Arc::new(HttpProxyProbe::new(config.proxy.probe_url.clone()));

    let relay = IndicatorRelay::new(
        RelayDeps {
            universe: config.universe.clone(),
            store,
            broadcast: Arc::clone(&hub) as _,
            connector,
            directory,
            probe,
            proxies: config.proxy.proxies.clone(),
            credentials: config.upstream.credentials.clone(),
        },
        config.relay_options(),
    )?;

    // Health server
    let source: Arc<dyn HealthSource> = Arc::clone(&relay) as _;
    let health_state = Arc::new(HealthServerState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        source,
        Arc::clone(&hub),
        shutdown_token.clone(),
    ));
    let health_server = HealthServer::new(config.server.health_port, health_state);
    let health_handle = tokio::spawn(async move {
        if let Err(e) = health_server.run().await {
            tracing::error!(error = %e, "Health server error");
        }
    });

    // Boot runs alongside the signal wait so a shutdown during boot is honoured.
    let boot = {
        let relay = Arc::clone(&relay);
        tokio::spawn(async move {
            match relay.start().await {
                Ok(seeded) => log_seed(&seeded),
                Err(RelayError::Cancelled) => tracing::info!("Boot cancelled"),
                Err(e) => tracing::error!(error = %e, "Boot failed"),
            }
        })
    };

    await_shutdown().await;

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
    if tokio::time::timeout(SHUTDOWN_TIMEOUT, relay.shutdown())
        .await
        .is_err()
    {
        tracing::warn!("Relay shutdown timed out");
    }

    boot.abort();
    let _ = boot.await;

    shutdown_token.cancel();
    let _ = health_handle.await;

    tracing::info!("Indicator Relay stopped");
    Ok(())
}

fn load_dotenv() {
    if dotenvy::dotenv().is_err() {
        load_dotenv_from_ancestors();
    }
}

fn load_dotenv_from_ancestors() {
    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

fn log_config(config: &RelayConfig) {
    tracing::info!(
        symbols = config.universe.symbols().len(),
        timeframes = config.universe.timeframes().len(),
        indicators = config.universe.indicators().len(),
        subscriptions = config.universe.key_count(),
        proxies = config.proxy.proxies.len(),
        health_port = config.server.health_port,
        settings_path = %config.settings_path.display(),
        "Configuration loaded"
    );
    tracing::debug!(
        upstream_ws = %config.upstream.ws_url,
        upstream_http = %config.upstream.http_url,
        probe_url = %config.proxy.probe_url,
        "Upstream endpoints"
    );
}

fn log_seed(seeded: &SeedReport) {
    tracing::info!(
        indicator_defaults = seeded.indicator_defaults,
        emission_defaults = seeded.emission_defaults,
        "Relay running"
    );
}

async fn await_shutdown() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Ctrl+C handler unavailable");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }
}
