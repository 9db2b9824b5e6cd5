//! Invalid-result rules used to suppress emissions.
//!
//! A value is invalid when it is `null`, an empty collection, one of the
//! sentinel strings, or a composite whose every member is itself invalid.
//! Numbers and booleans are always valid.

use serde_json::Value;

/// Sentinel published by upstream for "not available".
pub const NOT_AVAILABLE: &str = "N/A";

/// Whether a string is a placeholder rather than a real reading.
///
/// Matches [`NOT_AVAILABLE`] and numeric strings equal to zero
/// (`"0"`, `"0.00"`, `"-0.0000"`).
#[must_use]
pub fn is_sentinel(text: &str) -> bool {
    let trimmed = text.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case(NOT_AVAILABLE) {
        return true;
    }
    trimmed
        .parse::<f64>()
        .is_ok_and(|n| n.is_finite() && n == 0.0)
}

/// Whether a value must not be published.
#[must_use]
pub fn is_invalid(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(_) | Value::Number(_) => false,
        Value::String(s) => is_sentinel(s),
        Value::Array(items) => items.iter().all(is_invalid),
        Value::Object(fields) => fields.values().all(is_invalid),
    }
}
