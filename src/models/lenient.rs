//! Tolerant field readers for gateway documents.
//!
//! The gateway is not versioned with the agent, so a value outside the
//! expected domain degrades to a default instead of rejecting the whole
//! profile or detection result.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer};
use serde_json::Value;
use tracing::warn;

use super::profile::RunningMode;

/// Truthiness of a loosely typed JSON value.
///
/// `null`, `false`, zero, empty strings and containers are false, as are
/// the strings `"false"`, `"0"`, `"no"` and `"off"`.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => {
            let s = s.trim();
            !s.is_empty() && !["false", "0", "no", "off"].iter().any(|f| s.eq_ignore_ascii_case(f))
        }
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|f| f.is_finite())
}

/// `null` reads as the type's default.
pub fn or_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Unknown or missing mode names fall back to [`RunningMode::default`].
pub fn running_mode<'de, D>(deserializer: D) -> Result<RunningMode, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    let mode = value.as_str().and_then(RunningMode::from_str_name);
    if mode.is_none() && !value.is_null() {
        warn!(value = %value, "unrecognised running mode, using default");
    }
    Ok(mode.unwrap_or_default())
}

pub fn flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(truthy(&Value::deserialize(deserializer)?))
}

/// Non-negative count. Floats are truncated; anything else is zero.
pub fn count<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    if let Some(n) = value.as_u64() {
        return Ok(n);
    }
    match number(&value) {
        Some(f) if f >= 0.0 => Ok(f.trunc() as u64),
        _ => {
            if !value.is_null() {
                warn!(value = %value, "unusable count, using 0");
            }
            Ok(0)
        }
    }
}

pub fn optional_number<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    let parsed = number(&value);
    if parsed.is_none() && !value.is_null() {
        warn!(value = %value, "unusable threshold, treating as unset");
    }
    Ok(parsed)
}

/// Missing or unparsable scores read as 0.
pub fn score<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(number(&Value::deserialize(deserializer)?).unwrap_or(0.0))
}

/// A map of named flags, each reduced to its truthiness.
pub fn flags<'de, D>(deserializer: D) -> Result<BTreeMap<String, bool>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<BTreeMap<String, Value>>::deserialize(deserializer)?.unwrap_or_default();
    Ok(raw.into_iter().map(|(name, value)| (name, truthy(&value))).collect())
}
