//! Lenient scalar handling for backend and legacy-storage payloads.
//!
//! The storefront backend serializes money as DECIMAL-backed strings on
//! some endpoints and as JSON numbers on others, ids as integers or
//! strings, and older storefront builds persisted yet other mixes. These
//! helpers accept every observed shape and turn anything unreadable into
//! `None`, so one bad scalar never discards a whole list.

use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// Money field: JSON number, `"12.50"`, or the comma form `"12,50"`.
pub(crate) fn de_opt_money<'de, D>(deserializer: D) -> Result<Option<Decimal>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Value>::deserialize(deserializer)?;
    Ok(raw.as_ref().and_then(value_to_decimal))
}

/// Integer field that may arrive as a JSON number, float, or string.
pub(crate) fn de_opt_int<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Value>::deserialize(deserializer)?;
    Ok(raw.as_ref().and_then(value_to_int))
}

/// Opaque id field: strings pass through, integers are stringified.
pub(crate) fn de_opt_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Value>::deserialize(deserializer)?;
    Ok(raw.as_ref().and_then(value_to_id))
}

fn value_to_decimal(value: &Value) -> Option<Decimal> {
    match value {
        // Number::to_string prints the shortest decimal form, which
        // Decimal parses exactly; going through f64 bits would not.
        Value::Number(n) => n.to_string().parse().ok(),
        Value::String(s) => parse_money_str(s),
        _ => None,
    }
}

fn parse_money_str(s: &str) -> Option<Decimal> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed
        .parse()
        .ok()
        .or_else(|| trimmed.replace(' ', "").replace(',', ".").parse().ok())
}

fn value_to_int(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn value_to_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
