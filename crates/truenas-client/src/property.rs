//! Polymorphic decoding of ZFS property values.
//!
//! The appliance reports numeric properties in three shapes depending on
//! the endpoint and API version: a raw number, an object `{"parsed": N}`,
//! or an object `{"value": "N"}` / `{"value": N}`. This module is the one
//! place that understands all of them; size, quota, volsize and
//! available/allocated fields all decode through here.

use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// A ZFS property in any of the shapes the appliance emits.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ZfsProperty {
    /// Raw integer, e.g. `1073741824`.
    Int(i64),
    /// Raw float; the middleware emits these for some computed properties.
    Float(f64),
    /// Raw string, e.g. `"lz4"`.
    Str(String),
    /// Boolean flags.
    Bool(bool),
    /// Wrapped form: `{"parsed": ..., "value": ..., "rawvalue": ...}`.
    /// Unknown keys are ignored.
    Wrapped {
        /// Machine-parsed value, preferred when present.
        #[serde(default)]
        parsed: Option<Value>,
        /// Display value; either a number or its string rendering.
        #[serde(default)]
        value: Option<Value>,
    },
}

impl ZfsProperty {
    /// Extracts the property as an integer, whatever shape it arrived in.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ZfsProperty::Int(n) => Some(*n),
            ZfsProperty::Float(f) => Some(*f as i64),
            ZfsProperty::Str(s) => s.parse().ok(),
            ZfsProperty::Bool(_) => None,
            ZfsProperty::Wrapped { parsed, value } => {
                if let Some(n) = parsed.as_ref().and_then(value_to_i64) {
                    return Some(n);
                }
                value.as_ref().and_then(value_to_i64)
            }
        }
    }

    /// Extracts the property as a string, preferring the parsed form.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ZfsProperty::Str(s) => Some(s),
            ZfsProperty::Wrapped { parsed, value } => match parsed {
                Some(Value::String(s)) => Some(s),
                _ => match value {
                    Some(Value::String(s)) => Some(s),
                    _ => None,
                },
            },
            _ => None,
        }
    }
}

fn value_to_i64(v: &Value) -> Option<i64> {
    match v {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// Serde helper: decodes an optional property field into `i64`, treating
/// absent, null, and unparseable values as zero.
pub(crate) fn prop_i64<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let prop = Option::<ZfsProperty>::deserialize(deserializer)?;
    Ok(prop.and_then(|p| p.as_i64()).unwrap_or(0))
}

/// Serde helper: decodes an optional property field into `Option<i64>`.
pub(crate) fn prop_opt_i64<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let prop = Option::<ZfsProperty>::deserialize(deserializer)?;
    Ok(prop.and_then(|p| p.as_i64()))
}

/// Serde helper: decodes an optional property field into `Option<String>`.
pub(crate) fn prop_opt_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let prop = Option::<ZfsProperty>::deserialize(deserializer)?;
    Ok(prop.and_then(|p| p.as_str().map(str::to_string)))
}
