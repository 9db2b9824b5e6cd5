//! Market Enumerations
//!
//! The fixed key space of the relay: symbols, timeframes, indicators and the
//! `(symbol, timeframe, indicator)` subscription key. Everything that can be
//! configured or subscribed is a member of a [`Universe`] built once at
//! startup; nothing is created dynamically at runtime.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// =============================================================================
// Symbol
// =============================================================================

/// Exchange-qualified instrument identifier (e.g. `BINANCE:BTCUSDT`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Symbol(String);

impl Symbol {
    /// Create a new symbol.
    #[must_use]
    pub fn new(symbol: impl Into<String>) -> Self {
        Self(symbol.into())
    }

    /// Get the symbol as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Suffix used for per-symbol environment variables.
    ///
    /// Uppercased, with every non-alphanumeric character replaced by `_`.
    #[must_use]
    pub fn env_suffix(&self) -> String {
        self.0
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() {
                    c.to_ascii_uppercase()
                } else {
                    '_'
                }
            })
            .collect()
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Symbol {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

// =============================================================================
// Timeframe
// =============================================================================

/// Aggregation interval of a chart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Timeframe {
    /// One minute.
    #[serde(rename = "1")]
    M1,
    /// Five minutes.
    #[serde(rename = "5")]
    M5,
    /// Fifteen minutes.
    #[serde(rename = "15")]
    M15,
    /// Thirty minutes.
    #[serde(rename = "30")]
    M30,
    /// One hour.
    #[serde(rename = "60")]
    H1,
    /// Four hours.
    #[serde(rename = "240")]
    H4,
    /// One day.
    #[serde(rename = "1D")]
    D1,
    /// One week.
    #[serde(rename = "1W")]
    W1,
}

impl Timeframe {
    /// All timeframes, shortest first.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[
            Self::M1,
            Self::M5,
            Self::M15,
            Self::M30,
            Self::H1,
            Self::H4,
            Self::D1,
            Self::W1,
        ]
    }

    /// Upstream resolution code.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::M1 => "1",
            Self::M5 => "5",
            Self::M15 => "15",
            Self::M30 => "30",
            Self::H1 => "60",
            Self::H4 => "240",
            Self::D1 => "1D",
            Self::W1 => "1W",
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Timeframe {
    type Err = KeyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        Self::all()
            .iter()
            .copied()
            .find(|tf| tf.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| KeyParseError::UnknownTimeframe(s.to_string()))
    }
}

// =============================================================================
// Indicator
// =============================================================================

/// Entry of the fixed indicator catalog.
///
/// See [`crate::domain::catalog`] for each entry's upstream script and
/// parameter schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Indicator {
    /// Exponential moving average, length 20.
    #[serde(rename = "EMA20")]
    Ema20,
    /// Exponential moving average, length 50.
    #[serde(rename = "EMA50")]
    Ema50,
    /// Exponential moving average, length 100.
    #[serde(rename = "EMA100")]
    Ema100,
    /// Exponential moving average, length 200.
    #[serde(rename = "EMA200")]
    Ema200,
    /// Relative strength index.
    #[serde(rename = "RSI")]
    Rsi,
    /// Moving average convergence/divergence.
    #[serde(rename = "MACD")]
    Macd,
    /// Bollinger bands.
    #[serde(rename = "BB")]
    BollingerBands,
    /// Support/resistance zones (label collection).
    #[serde(rename = "SRZones")]
    SrZones,
    /// Trend channel lines.
    #[serde(rename = "TrendLines")]
    TrendLines,
    /// Pivot points high/low, clustered.
    #[serde(rename = "PivotHL")]
    PivotHighLow,
    /// Standard pivot points.
    #[serde(rename = "PivotStd")]
    PivotStandard,
}

impl Indicator {
    /// The whole catalog, main indicators first.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[
            Self::Ema20,
            Self::Ema50,
            Self::Ema100,
            Self::Ema200,
            Self::Rsi,
            Self::Macd,
            Self::BollingerBands,
            Self::SrZones,
            Self::TrendLines,
            Self::PivotHighLow,
            Self::PivotStandard,
        ]
    }

    /// Catalog name, as used in settings and emitted payloads.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Ema20 => "EMA20",
            Self::Ema50 => "EMA50",
            Self::Ema100 => "EMA100",
            Self::Ema200 => "EMA200",
            Self::Rsi => "RSI",
            Self::Macd => "MACD",
            Self::BollingerBands => "BB",
            Self::SrZones => "SRZones",
            Self::TrendLines => "TrendLines",
            Self::PivotHighLow => "PivotHL",
            Self::PivotStandard => "PivotStd",
        }
    }
}

impl fmt::Display for Indicator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Indicator {
    type Err = KeyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        Self::all()
            .iter()
            .copied()
            .find(|i| i.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| KeyParseError::UnknownIndicator(s.to_string()))
    }
}

// =============================================================================
// Subscription Key
// =============================================================================

/// Identity of one subscription: `(symbol, timeframe, indicator)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubscriptionKey {
    /// Instrument.
    pub symbol: Symbol,
    /// Chart interval.
    pub timeframe: Timeframe,
    /// Catalog entry.
    pub indicator: Indicator,
}

impl SubscriptionKey {
    /// Create a new key.
    #[must_use]
    pub const fn new(symbol: Symbol, timeframe: Timeframe, indicator: Indicator) -> Self {
        Self {
            symbol,
            timeframe,
            indicator,
        }
    }
}

impl fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.symbol, self.timeframe, self.indicator)
    }
}

// =============================================================================
// Universe
// =============================================================================

/// The configured key space.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Universe {
    symbols: Vec<Symbol>,
    timeframes: Vec<Timeframe>,
    indicators: Vec<Indicator>,
}

impl Universe {
    /// Create a universe. Duplicates are dropped, first occurrence wins.
    #[must_use]
    pub fn new(symbols: Vec<Symbol>, timeframes: Vec<Timeframe>, indicators: Vec<Indicator>) -> Self {
        Self {
            symbols: dedup(symbols),
            timeframes: dedup(timeframes),
            indicators: dedup(indicators),
        }
    }

    /// Configured symbols.
    #[must_use]
    pub fn symbols(&self) -> &[Symbol] {
        &self.symbols
    }

    /// Configured timeframes.
    #[must_use]
    pub fn timeframes(&self) -> &[Timeframe] {
        &self.timeframes
    }

    /// Configured indicators.
    #[must_use]
    pub fn indicators(&self) -> &[Indicator] {
        &self.indicators
    }

    /// Whether the symbol is part of the universe.
    #[must_use]
    pub fn has_symbol(&self, symbol: &Symbol) -> bool {
        self.symbols.contains(symbol)
    }

    /// Whether every component of the key is part of the universe.
    #[must_use]
    pub fn contains(&self, key: &SubscriptionKey) -> bool {
        self.has_symbol(&key.symbol)
            && self.timeframes.contains(&key.timeframe)
            && self.indicators.contains(&key.indicator)
    }

    /// Every key of one symbol.
    pub fn keys_for<'a>(&'a self, symbol: &'a Symbol) -> impl Iterator<Item = SubscriptionKey> + 'a {
        self.timeframes.iter().flat_map(move |tf| {
            self.indicators
                .iter()
                .map(move |ind| SubscriptionKey::new(symbol.clone(), *tf, *ind))
        })
    }

    /// Every key of the universe, grouped by symbol.
    pub fn keys(&self) -> impl Iterator<Item = SubscriptionKey> + '_ {
        self.symbols.iter().flat_map(|s| self.keys_for(s))
    }

    /// Number of keys.
    #[must_use]
    pub fn key_count(&self) -> usize {
        self.symbols.len() * self.timeframes.len() * self.indicators.len()
    }
}

fn dedup<T: PartialEq>(items: Vec<T>) -> Vec<T> {
    let mut out: Vec<T> = Vec::with_capacity(items.len());
    for item in items {
        if !out.contains(&item) {
            out.push(item);
        }
    }
    out
}

/// Unknown enumeration name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeyParseError {
    /// Not a member of the timeframe enumeration.
    #[error("unknown timeframe: {0}")]
    UnknownTimeframe(String),
    /// Not a member of the indicator catalog.
    #[error("unknown indicator: {0}")]
    UnknownIndicator(String),
}
