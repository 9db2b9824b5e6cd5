//! Indicator Catalog
//!
//! Static description of every indicator the relay can subscribe to: the
//! upstream script identifier, whether it is a "main" or "special" indicator,
//! how its payload is reshaped, and its parameter schema.
//!
//! # Parameter resolution
//!
//! Every parameter of every indicator resolves through the same three tiers:
//!
//! 1. the explicit per-instance value, unless it is absent or `null`;
//! 2. the catalog default for that indicator;
//! 3. the global fallback constant for the parameter name.

use std::collections::BTreeMap;

use serde_json::Value;

use super::market::Indicator;

/// Resolved upstream parameter set, keyed by parameter name.
pub type Params = BTreeMap<String, Value>;

/// Subscription path an indicator takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndicatorKind {
    /// Moving averages and oscillators. Definitions are fetched once per
    /// setup batch and shared.
    Main,
    /// Zone/cluster style indicators. Need a wider history range and fetch
    /// their definition per subscription.
    Special,
}

/// Indicator-specific reshaping applied by the payload transformer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadShape {
    /// Published as received (after array reversal).
    Passthrough,
    /// Keep only the label collection.
    Zones,
    /// Keep only fully-formed lines spanning `[0, 1]`.
    Lines,
    /// Cluster pivot label prices into `processedPivotPoints`.
    PivotClusters,
    /// Keep the 11 most recent labels' text.
    PivotStandard,
}

/// Const-friendly parameter literal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Literal {
    /// Integer value.
    Int(i64),
    /// Floating-point value.
    Float(f64),
    /// String value.
    Text(&'static str),
}

impl Literal {
    /// Convert into a JSON value.
    #[must_use]
    pub fn to_value(self) -> Value {
        match self {
            Self::Int(i) => Value::from(i),
            Self::Float(f) => Value::from(f),
            Self::Text(s) => Value::from(s),
        }
    }
}

/// One parameter of an indicator's schema.
#[derive(Debug, Clone, Copy)]
pub struct ParamSpec {
    /// Parameter name.
    pub name: &'static str,
    /// Catalog default for this indicator, if any.
    pub default: Option<Literal>,
}

const fn param(name: &'static str, default: Option<Literal>) -> ParamSpec {
    ParamSpec { name, default }
}

/// Catalog entry.
#[derive(Debug, Clone, Copy)]
pub struct IndicatorSpec {
    /// Catalog entry this spec describes.
    pub indicator: Indicator,
    /// Upstream script identifier.
    pub script_id: &'static str,
    /// Subscription path.
    pub kind: IndicatorKind,
    /// Payload reshaping.
    pub shape: PayloadShape,
    /// Parameter schema.
    pub params: &'static [ParamSpec],
}

const EMA_SCRIPT: &str = "STD;EMA";

const EMA20_PARAMS: &[ParamSpec] = &[
    param("length", Some(Literal::Int(20))),
    param("source", None),
    param("offset", None),
];
const EMA50_PARAMS: &[ParamSpec] = &[
    param("length", Some(Literal::Int(50))),
    param("source", None),
    param("offset", None),
];
const EMA100_PARAMS: &[ParamSpec] = &[
    param("length", Some(Literal::Int(100))),
    param("source", None),
    param("offset", None),
];
const EMA200_PARAMS: &[ParamSpec] = &[
    param("length", Some(Literal::Int(200))),
    param("source", None),
    param("offset", None),
];
const RSI_PARAMS: &[ParamSpec] = &[param("length", None), param("source", None)];
const MACD_PARAMS: &[ParamSpec] = &[
    param("fast", None),
    param("slow", None),
    param("signal", None),
    param("source", None),
];
const BB_PARAMS: &[ParamSpec] = &[
    param("length", Some(Literal::Int(20))),
    param("multiplier", None),
    param("source", None),
];
const SR_ZONES_PARAMS: &[ParamSpec] = &[
    param("left", None),
    param("right", None),
    param("zones", Some(Literal::Int(6))),
];
const TREND_LINES_PARAMS: &[ParamSpec] = &[
    param("length", Some(Literal::Int(100))),
    param("multiplier", None),
];
const PIVOT_HL_PARAMS: &[ParamSpec] = &[
    param("left", None),
    param("right", None),
    param("threshold", None),
];
const PIVOT_STD_PARAMS: &[ParamSpec] = &[param("type", None), param("timeframe", None)];

const CATALOG: &[IndicatorSpec] = &[
    IndicatorSpec {
        indicator: Indicator::Ema20,
        script_id: EMA_SCRIPT,
        kind: IndicatorKind::Main,
        shape: PayloadShape::Passthrough,
        params: EMA20_PARAMS,
    },
    IndicatorSpec {
        indicator: Indicator::Ema50,
        script_id: EMA_SCRIPT,
        kind: IndicatorKind::Main,
        shape: PayloadShape::Passthrough,
        params: EMA50_PARAMS,
    },
    IndicatorSpec {
        indicator: Indicator::Ema100,
        script_id: EMA_SCRIPT,
        kind: IndicatorKind::Main,
        shape: PayloadShape::Passthrough,
        params: EMA100_PARAMS,
    },
    IndicatorSpec {
        indicator: Indicator::Ema200,
        script_id: EMA_SCRIPT,
        kind: IndicatorKind::Main,
        shape: PayloadShape::Passthrough,
        params: EMA200_PARAMS,
    },
    IndicatorSpec {
        indicator: Indicator::Rsi,
        script_id: "STD;RSI",
        kind: IndicatorKind::Main,
        shape: PayloadShape::Passthrough,
        params: RSI_PARAMS,
    },
    IndicatorSpec {
        indicator: Indicator::Macd,
        script_id: "STD;MACD",
        kind: IndicatorKind::Main,
        shape: PayloadShape::Passthrough,
        params: MACD_PARAMS,
    },
    IndicatorSpec {
        indicator: Indicator::BollingerBands,
        script_id: "STD;Bollinger_Bands",
        kind: IndicatorKind::Main,
        shape: PayloadShape::Passthrough,
        params: BB_PARAMS,
    },
    IndicatorSpec {
        indicator: Indicator::SrZones,
        script_id: "PUB;SR_Zones",
        kind: IndicatorKind::Special,
        shape: PayloadShape::Zones,
        params: SR_ZONES_PARAMS,
    },
    IndicatorSpec {
        indicator: Indicator::TrendLines,
        script_id: "PUB;Trend_Channels",
        kind: IndicatorKind::Special,
        shape: PayloadShape::Lines,
        params: TREND_LINES_PARAMS,
    },
    IndicatorSpec {
        indicator: Indicator::PivotHighLow,
        script_id: "STD;Pivot%1Points%1High%1Low",
        kind: IndicatorKind::Special,
        shape: PayloadShape::PivotClusters,
        params: PIVOT_HL_PARAMS,
    },
    IndicatorSpec {
        indicator: Indicator::PivotStandard,
        script_id: "STD;Pivot%1Points%1Standard",
        kind: IndicatorKind::Special,
        shape: PayloadShape::PivotStandard,
        params: PIVOT_STD_PARAMS,
    },
];

/// Look up the catalog entry of an indicator.
#[must_use]
pub fn spec(indicator: Indicator) -> &'static IndicatorSpec {
    // CATALOG has one entry per `Indicator` variant in declaration order.
    &CATALOG[indicator as usize]
}

/// Global fallback constant for a parameter name (third resolution tier).
#[must_use]
pub fn fallback(name: &str) -> Value {
    let literal = match name {
        "length" => Literal::Int(14),
        "source" => Literal::Text("close"),
        "multiplier" => Literal::Float(2.0),
        "fast" => Literal::Int(12),
        "slow" => Literal::Int(26),
        "signal" => Literal::Int(9),
        "left" | "right" => Literal::Int(10),
        "threshold" => Literal::Float(0.5),
        "type" => Literal::Text("Traditional"),
        "timeframe" => Literal::Text("Auto"),
        "offset" => Literal::Int(0),
        _ => return Value::Null,
    };
    literal.to_value()
}

impl IndicatorSpec {
    /// Resolve the full upstream parameter set from a per-instance record.
    ///
    /// Keys in `overrides` that are not part of the schema are ignored.
    #[must_use]
    pub fn inputs(&self, overrides: &Params) -> Params {
        self.params
            .iter()
            .map(|p| {
                let value = overrides
                    .get(p.name)
                    .filter(|v| !v.is_null())
                    .cloned()
                    .or_else(|| p.default.map(Literal::to_value))
                    .unwrap_or_else(|| fallback(p.name));
                (p.name.to_string(), value)
            })
            .collect()
    }

    /// Parameter set built from catalog defaults only.
    #[must_use]
    pub fn default_inputs(&self) -> Params {
        self.inputs(&Params::new())
    }

    /// Whether this indicator takes the special subscription path.
    #[must_use]
    pub fn is_special(&self) -> bool {
        self.kind == IndicatorKind::Special
    }
}
