//! Structured Data
//!
//! The latest processed value of every subscription, arranged as
//! `symbol -> timeframe -> indicator -> value`, plus the latest market
//! snapshot per symbol.
//!
//! Each leaf has a single writer (its subscription task). Readers take
//! snapshots; a snapshot of the whole tree may interleave with concurrent
//! leaf writes, which the next periodic emission corrects.

use std::collections::{BTreeMap, HashMap};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::market::{Indicator, SubscriptionKey, Symbol, Timeframe};

/// Indicator values of one `(symbol, timeframe)`.
pub type TimeframeValues = BTreeMap<Indicator, Value>;

/// Latest price and volume of a symbol.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketSnapshot {
    /// Last traded price.
    pub market_price: Option<f64>,
    /// Session volume.
    pub volume: Option<f64>,
}

impl MarketSnapshot {
    /// Create a snapshot.
    #[must_use]
    pub const fn new(market_price: Option<f64>, volume: Option<f64>) -> Self {
        Self {
            market_price,
            volume,
        }
    }
}

/// Shared tree of latest values.
#[derive(Debug, Default)]
pub struct StructuredData {
    values: RwLock<HashMap<Symbol, HashMap<Timeframe, TimeframeValues>>>,
    market: RwLock<HashMap<Symbol, MarketSnapshot>>,
}

impl StructuredData {
    /// Create an empty tree.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the leaf of `key`.
    pub fn store(&self, key: &SubscriptionKey, value: Value) {
        self.values
            .write()
            .entry(key.symbol.clone())
            .or_default()
            .entry(key.timeframe)
            .or_default()
            .insert(key.indicator, value);
    }

    /// Latest value of `key`.
    #[must_use]
    pub fn value(&self, key: &SubscriptionKey) -> Option<Value> {
        self.values
            .read()
            .get(&key.symbol)?
            .get(&key.timeframe)?
            .get(&key.indicator)
            .cloned()
    }

    /// All values of one `(symbol, timeframe)`.
    #[must_use]
    pub fn timeframe_values(&self, symbol: &Symbol, timeframe: Timeframe) -> TimeframeValues {
        self.values
            .read()
            .get(symbol)
            .and_then(|tfs| tfs.get(&timeframe))
            .cloned()
            .unwrap_or_default()
    }

    /// Snapshot of every stored value of `symbol`, ordered by timeframe.
    #[must_use]
    pub fn symbol_values(&self, symbol: &Symbol) -> BTreeMap<Timeframe, TimeframeValues> {
        self.values
            .read()
            .get(symbol)
            .map(|tfs| tfs.iter().map(|(tf, v)| (*tf, v.clone())).collect())
            .unwrap_or_default()
    }

    /// Number of stored leaves.
    #[must_use]
    pub fn leaf_count(&self) -> usize {
        self.values
            .read()
            .values()
            .flat_map(HashMap::values)
            .map(BTreeMap::len)
            .sum()
    }

    /// Record a market snapshot.
    ///
    /// Returns `false` when it equals the previous snapshot of the symbol.
    pub fn update_market(&self, symbol: &Symbol, snapshot: MarketSnapshot) -> bool {
        let mut market = self.market.write();
        if market.get(symbol) == Some(&snapshot) {
            return false;
        }
        market.insert(symbol.clone(), snapshot);
        true
    }

    /// Latest market snapshot of `symbol`.
    #[must_use]
    pub fn market(&self, symbol: &Symbol) -> Option<MarketSnapshot> {
        self.market.read().get(symbol).copied()
    }
}
