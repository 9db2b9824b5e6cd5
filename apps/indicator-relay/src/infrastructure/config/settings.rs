//! Relay Configuration Settings
//!
//! Configuration types for the relay, loaded from environment variables.
//! [`RelayConfig::from_lookup`] takes any key lookup so parsing is testable
//! without touching the process environment.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use url::Url;

use crate::application::ports::Credentials;
use crate::application::services::{
    BackoffConfig, CredentialSet, MultiplexerConfig, ProxyPoolConfig, RelayOptions,
};
use crate::domain::market::{Indicator, Symbol, Timeframe, Universe};
use crate::domain::proxy::ProxyAddress;

const DEFAULT_TIMEFRAMES: &str = "5,15,60,240,1D,1W";
const DEFAULT_PROBE_URL: &str = "https://www.google.com/generate_204";
const DEFAULT_SETTINGS_PATH: &str = "relay-settings.json";

/// Upstream platform settings.
#[derive(Debug, Clone)]
pub struct UpstreamSettings {
    /// WebSocket endpoint.
    pub ws_url: Url,
    /// Indicator definition endpoint base.
    pub http_url: Url,
    /// Session credentials, with per-symbol overrides.
    pub credentials: CredentialSet,
    /// Heartbeat ping interval.
    pub heartbeat_interval: Duration,
    /// Silence tolerated after a ping.
    pub heartbeat_timeout: Duration,
    /// Bound on tunnel setup and WebSocket handshake.
    pub connect_timeout: Duration,
}

/// Proxy pool settings.
#[derive(Debug, Clone)]
pub struct ProxySettings {
    /// Configured proxies, in order.
    pub proxies: Vec<ProxyAddress>,
    /// Liveness probe target.
    pub probe_url: Url,
    /// Timeout of one probe.
    pub probe_timeout: Duration,
    /// How long a verdict is reused.
    pub status_ttl: Duration,
}

/// Retry and scheduling settings.
#[derive(Debug, Clone, PartialEq)]
pub struct TimingSettings {
    /// First reconnect delay.
    pub reconnect_base: Duration,
    /// Reconnect delay cap.
    pub reconnect_cap: Duration,
    /// Reconnect jitter as a fraction of the delay, within `0..=1`.
    pub reconnect_jitter: f64,
    /// Flat retry delay of a faulted subscription.
    pub subscription_retry: Duration,
    /// Period of the full re-emission.
    pub emission_interval: Duration,
    /// Period of the full subscription rebuild. `None` disables it.
    pub full_rebuild_interval: Option<Duration>,
    /// Delay between failed boot attempts.
    pub boot_retry: Duration,
    /// Bars of history requested for special indicators.
    pub special_history_range: u32,
}

impl Default for TimingSettings {
    fn default() -> Self {
        Self {
            reconnect_base: Duration::from_secs(5),
            reconnect_cap: Duration::from_secs(30),
            reconnect_jitter: 0.0,
            subscription_retry: Duration::from_secs(5),
            emission_interval: Duration::from_secs(5),
            full_rebuild_interval: None,
            boot_retry: Duration::from_secs(5),
            special_history_range: 500,
        }
    }
}

/// Server port settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerSettings {
    /// Health, metrics and stream HTTP port.
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { health_port: 8083 }
    }
}

/// Broadcast channel settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastSettings {
    /// Channel capacity.
    pub capacity: usize,
}

impl Default for BroadcastSettings {
    fn default() -> Self {
        Self { capacity: 4_096 }
    }
}

/// Complete relay configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Configured symbols, timeframes and indicators.
    pub universe: Universe,
    /// Upstream platform.
    pub upstream: UpstreamSettings,
    /// Proxy pool.
    pub proxy: ProxySettings,
    /// Retry and scheduling.
    pub timing: TimingSettings,
    /// Server ports.
    pub server: ServerSettings,
    /// Broadcast channel.
    pub broadcast: BroadcastSettings,
    /// JSON settings store file.
    pub settings_path: PathBuf,
}

impl RelayConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required environment variables are missing or
    /// any value fails to parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Same as [`RelayConfig::from_env`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);

        let symbols: Vec<Symbol> = list(&env.required("RELAY_SYMBOLS")?)
            .map(Symbol::from)
            .collect();
        if symbols.is_empty() {
            return Err(ConfigError::EmptyValue("RELAY_SYMBOLS".into()));
        }

        let timeframes = env
            .get("RELAY_TIMEFRAMES")
            .unwrap_or_else(|| DEFAULT_TIMEFRAMES.to_string());
        let timeframes = parse_list::<Timeframe>("RELAY_TIMEFRAMES", &timeframes)?;

        let indicators = match env.get("RELAY_INDICATORS") {
            Some(raw) => parse_list::<Indicator>("RELAY_INDICATORS", &raw)?,
            None => Indicator::all().to_vec(),
        };

        let universe = Universe::new(symbols, timeframes, indicators);

        let proxies = list(&env.required("RELAY_PROXIES")?)
            .map(|raw| {
                ProxyAddress::parse(raw).map_err(|e| ConfigError::invalid("RELAY_PROXIES", e))
            })
            .collect::<Result<Vec<_>, _>>()?;
        if proxies.is_empty() {
            return Err(ConfigError::EmptyValue("RELAY_PROXIES".into()));
        }

        let default_token = env.required("UPSTREAM_SESSION_TOKEN")?;
        let credentials = universe.symbols().iter().fold(
            CredentialSet::new(Credentials::new(default_token)),
            |set, symbol| {
                let key = format!("UPSTREAM_SESSION_TOKEN_{}", symbol.env_suffix());
                match env.get(&key) {
                    Some(token) => set.with_override(symbol.clone(), Credentials::new(token)),
                    None => set,
                }
            },
        );

        let upstream = UpstreamSettings {
            ws_url: env.url("UPSTREAM_WS_URL")?,
            http_url: env.url("UPSTREAM_HTTP_URL")?,
            credentials,
            heartbeat_interval: env.secs("UPSTREAM_HEARTBEAT_INTERVAL_SECS", Duration::from_secs(20))?,
            heartbeat_timeout: env.secs("UPSTREAM_HEARTBEAT_TIMEOUT_SECS", Duration::from_secs(20))?,
            connect_timeout: env.millis("UPSTREAM_CONNECT_TIMEOUT_MS", Duration::from_secs(10))?,
        };

        let probe_url = env
            .get("PROXY_PROBE_URL")
            .unwrap_or_else(|| DEFAULT_PROBE_URL.to_string());
        let proxy_defaults = ProxyPoolConfig::default();
        let proxy = ProxySettings {
            proxies,
            probe_url: Url::parse(&probe_url)
                .map_err(|e| ConfigError::invalid("PROXY_PROBE_URL", e))?,
            probe_timeout: env.millis("PROXY_PROBE_TIMEOUT_MS", proxy_defaults.probe_timeout)?,
            status_ttl: env.millis("PROXY_STATUS_TTL_MS", proxy_defaults.status_ttl)?,
        };

        let defaults = TimingSettings::default();
        let full_rebuild = env.secs("FULL_REBUILD_INTERVAL_SECS", Duration::ZERO)?;
        let timing = TimingSettings {
            reconnect_base: env.millis("RECONNECT_BASE_MS", defaults.reconnect_base)?,
            reconnect_cap: env.millis("RECONNECT_CAP_MS", defaults.reconnect_cap)?,
            reconnect_jitter: env
                .parsed("RECONNECT_JITTER")?
                .unwrap_or(defaults.reconnect_jitter),
            subscription_retry: env.millis("SUBSCRIPTION_RETRY_MS", defaults.subscription_retry)?,
            emission_interval: env.millis("EMISSION_INTERVAL_MS", defaults.emission_interval)?,
            full_rebuild_interval: (!full_rebuild.is_zero()).then_some(full_rebuild),
            boot_retry: env.millis("BOOT_RETRY_MS", defaults.boot_retry)?,
            special_history_range: env
                .parsed("SPECIAL_HISTORY_RANGE")?
                .unwrap_or(defaults.special_history_range),
        };
        if !(0.0..=1.0).contains(&timing.reconnect_jitter) {
            return Err(ConfigError::invalid("RECONNECT_JITTER", "must be within 0..=1"));
        }
        if timing.emission_interval.is_zero() {
            return Err(ConfigError::invalid("EMISSION_INTERVAL_MS", "must be positive"));
        }

        let server = ServerSettings {
            health_port: env
                .parsed("RELAY_HEALTH_PORT")?
                .unwrap_or(ServerSettings::default().health_port),
        };

        let broadcast = BroadcastSettings {
            capacity: env
                .parsed("RELAY_BROADCAST_CAPACITY")?
                .unwrap_or(BroadcastSettings::default().capacity),
        };

        let settings_path = env
            .get("RELAY_SETTINGS_PATH")
            .map_or_else(|| PathBuf::from(DEFAULT_SETTINGS_PATH), PathBuf::from);

        Ok(Self {
            universe,
            upstream,
            proxy,
            timing,
            server,
            broadcast,
            settings_path,
        })
    }

    /// Service options derived from this configuration.
    #[must_use]
    pub fn relay_options(&self) -> RelayOptions {
        RelayOptions {
            proxy: ProxyPoolConfig {
                probe_timeout: self.proxy.probe_timeout,
                status_ttl: self.proxy.status_ttl,
            },
            backoff: BackoffConfig {
                jitter_factor: self.timing.reconnect_jitter,
                ..BackoffConfig::new(self.timing.reconnect_base, self.timing.reconnect_cap)
            },
            multiplexer: MultiplexerConfig {
                retry_delay: self.timing.subscription_retry,
                special_history_range: self.timing.special_history_range,
            },
            emission_interval: self.timing.emission_interval,
            full_rebuild_interval: self.timing.full_rebuild_interval,
            boot_retry: self.timing.boot_retry,
        }
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// Environment variable could not be parsed.
    #[error("invalid value for {key}: {reason}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// What was wrong.
        reason: String,
    },
}

impl ConfigError {
    fn invalid(key: &str, reason: impl ToString) -> Self {
        Self::InvalidValue {
            key: key.to_string(),
            reason: reason.to_string(),
        }
    }
}

// =============================================================================
// Parsing Helpers
// =============================================================================

struct Env<F>(F);

impl<F: Fn(&str) -> Option<String>> Env<F> {
    /// Trimmed value; blank counts as unset.
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn required(&self, key: &str) -> Result<String, ConfigError> {
        match (self.0)(key) {
            None => Err(ConfigError::MissingEnvVar(key.to_string())),
            Some(v) if v.trim().is_empty() => Err(ConfigError::EmptyValue(key.to_string())),
            Some(v) => Ok(v.trim().to_string()),
        }
    }

    fn parsed<T>(&self, key: &str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        self.get(key)
            .map(|v| v.parse().map_err(|e| ConfigError::invalid(key, e)))
            .transpose()
    }

    fn millis(&self, key: &str, default: Duration) -> Result<Duration, ConfigError> {
        Ok(self.parsed::<u64>(key)?.map_or(default, Duration::from_millis))
    }

    fn secs(&self, key: &str, default: Duration) -> Result<Duration, ConfigError> {
        Ok(self.parsed::<u64>(key)?.map_or(default, Duration::from_secs))
    }

    fn url(&self, key: &str) -> Result<Url, ConfigError> {
        Url::parse(&self.required(key)?).map_err(|e| ConfigError::invalid(key, e))
    }
}

fn list(raw: &str) -> impl Iterator<Item = &str> {
    raw.split(',').map(str::trim).filter(|s| !s.is_empty())
}

fn parse_list<T>(key: &str, raw: &str) -> Result<Vec<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let values = list(raw)
        .map(|s| s.parse().map_err(|e| ConfigError::invalid(key, e)))
        .collect::<Result<Vec<T>, _>>()?;
    if values.is_empty() {
        return Err(ConfigError::EmptyValue(key.to_string()));
    }
    Ok(values)
}
