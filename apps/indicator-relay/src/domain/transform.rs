//! Payload Transformer
//!
//! Normalizes raw upstream study payloads before they are stored and
//! published. Pure functions only; the multiplexer decides what to do with a
//! [`TransformError`] (drop the update, keep the subscription).
//!
//! Steps, in order:
//!
//! 1. Every array in the payload is reversed, recursively. Upstream sends
//!    some fields newest-first; consumers expect chronological order.
//! 2. Indicator-specific reshaping by [`PayloadShape`].

use std::cmp::Ordering;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde_json::Value;

use super::catalog::{self, PayloadShape};
use super::market::Indicator;
use super::pivot;

/// Number of labels kept for standard pivots.
pub const PIVOT_STANDARD_LABELS: usize = 11;

/// Key under which clustered pivots are published.
pub const PROCESSED_PIVOTS_KEY: &str = "processedPivotPoints";

/// Malformed upstream payload.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransformError {
    /// Payload is not a JSON object.
    #[error("payload is not an object")]
    NotAnObject,
    /// Required field is absent.
    #[error("missing field: {0}")]
    MissingField(&'static str),
    /// Field is present but not an array.
    #[error("field {0} is not an array")]
    NotAnArray(&'static str),
    /// Pivot prices too large to cluster.
    #[error("pivot prices out of range: {0}")]
    PivotOutOfRange(#[from] pivot::PivotOverflow),
}

/// Transform a raw study payload for `indicator`.
///
/// `threshold` is the pivot clustering distance; ignored by every other shape.
///
/// # Errors
///
/// Returns `TransformError` when the payload lacks the structure the
/// indicator's shape requires.
pub fn transform(
    indicator: Indicator,
    raw: Value,
    threshold: Decimal,
) -> Result<Value, TransformError> {
    let payload = deep_reverse(raw);

    match catalog::spec(indicator).shape {
        PayloadShape::Passthrough => Ok(payload),
        PayloadShape::Zones => Ok(Value::Array(take_array(payload, "labels")?)),
        PayloadShape::Lines => {
            let lines = take_array(payload, "lines")?;
            Ok(Value::Array(
                lines.into_iter().filter(is_unit_span_line).collect(),
            ))
        }
        PayloadShape::PivotClusters => cluster_pivots(payload, threshold),
        PayloadShape::PivotStandard => {
            let labels = take_array(payload, "labels")?;
            Ok(Value::Array(standard_pivots(labels)))
        }
    }
}

/// Reverse every array in the tree. Scalars are left untouched.
#[must_use]
pub fn deep_reverse(value: Value) -> Value {
    match value {
        Value::Array(items) => Value::Array(items.into_iter().rev().map(deep_reverse).collect()),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k, deep_reverse(v)))
                .collect(),
        ),
        scalar => scalar,
    }
}

/// Parse the clustering threshold parameter (number or numeric string).
#[must_use]
pub fn parse_threshold(value: &Value) -> Option<Decimal> {
    match value {
        Value::Number(n) => Decimal::from_str(&n.to_string())
            .or_else(|_| Decimal::from_scientific(&n.to_string()))
            .ok(),
        Value::String(s) => Decimal::from_str(s.trim()).ok(),
        _ => None,
    }
}

/// Extract the first decimal number from a label text such as `"H 1234.5"`.
#[must_use]
pub fn parse_price(text: &str) -> Option<Decimal> {
    let cleaned: String = text.chars().filter(|c| *c != ',').collect();
    let start = cleaned
        .char_indices()
        .find(|(i, c)| {
            c.is_ascii_digit()
                || (*c == '-'
                    && cleaned[i + 1..]
                        .chars()
                        .next()
                        .is_some_and(|n| n.is_ascii_digit()))
        })
        .map(|(i, _)| i)?;

    let number: String = cleaned[start..]
        .char_indices()
        .take_while(|(i, c)| c.is_ascii_digit() || *c == '.' || (*i == 0 && *c == '-'))
        .map(|(_, c)| c)
        .collect();

    Decimal::from_str(number.trim_end_matches('.')).ok()
}

fn take_array(payload: Value, field: &'static str) -> Result<Vec<Value>, TransformError> {
    let Value::Object(mut map) = payload else {
        return Err(TransformError::NotAnObject);
    };
    match map.remove(field) {
        Some(Value::Array(items)) => Ok(items),
        Some(_) => Err(TransformError::NotAnArray(field)),
        None => Err(TransformError::MissingField(field)),
    }
}

fn number(line: &Value, field: &str) -> Option<f64> {
    line.get(field).and_then(Value::as_f64)
}

fn is_unit_span_line(line: &Value) -> bool {
    let (Some(x1), Some(x2)) = (number(line, "x1"), number(line, "x2")) else {
        return false;
    };
    if number(line, "y1").is_none() || number(line, "y2").is_none() {
        return false;
    }
    x1.min(x2) == 0.0 && x1.max(x2) == 1.0
}

fn label_text(label: &Value) -> Option<&str> {
    label.get("text").and_then(Value::as_str)
}

fn cluster_pivots(payload: Value, threshold: Decimal) -> Result<Value, TransformError> {
    let Value::Object(mut map) = payload else {
        return Err(TransformError::NotAnObject);
    };
    let labels = match map.remove("labels") {
        Some(Value::Array(items)) => items,
        Some(_) => return Err(TransformError::NotAnArray("labels")),
        None => return Err(TransformError::MissingField("labels")),
    };

    let prices: Vec<Decimal> = labels
        .iter()
        .filter_map(label_text)
        .filter_map(parse_price)
        .collect();

    let clusters = pivot::cluster(&prices, threshold)?;
    let clusters = serde_json::to_value(clusters).unwrap_or_else(|_| Value::Array(Vec::new()));

    map.insert(PROCESSED_PIVOTS_KEY.to_string(), clusters);
    Ok(Value::Object(map))
}

fn compare_ids(a: &Value, b: &Value) -> Ordering {
    match (a.get("id"), b.get("id")) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(_), None) => Ordering::Greater,
        (None, Some(_)) => Ordering::Less,
        _ => Ordering::Equal,
    }
}

fn standard_pivots(labels: Vec<Value>) -> Vec<Value> {
    let mut defined: Vec<Value> = labels
        .into_iter()
        .filter(|l| l.get("y").is_some_and(|y| !y.is_null()))
        .collect();

    defined.sort_by(|a, b| compare_ids(b, a));

    defined
        .into_iter()
        .take(PIVOT_STANDARD_LABELS)
        .map(|l| label_text(&l).map_or(Value::Null, Value::from))
        .collect()
}
