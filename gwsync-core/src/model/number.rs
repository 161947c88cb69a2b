//! Numeric fields that are stored as strings.
//!
//! Desired-state records keep fractional numbers as strings so that storage
//! never rounds them. The remote control plane expects real JSON numbers, so
//! the encoder takes an explicit [`NumberMode`] instead of relying on any
//! process-wide switch.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Number, Value};

/// Decimal number carried as its string representation.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(transparent)]
pub struct Float64(String);

impl Float64 {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn to_f64(&self) -> Option<f64> {
        self.0.trim().parse::<f64>().ok().filter(|v| v.is_finite())
    }
}

impl<'de> Deserialize<'de> for Float64 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Num(Number),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Text(s) => {
                if !s.is_empty() && s.trim().parse::<f64>().is_err() {
                    return Err(serde::de::Error::custom(format!(
                        "{:?} is not a decimal number",
                        s
                    )));
                }
                Ok(Float64(s))
            }
            Raw::Num(n) => Ok(Float64(n.to_string())),
        }
    }
}

/// How numeric-string fields are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NumberMode {
    /// Keep them as strings. Used for storage and hashing.
    #[default]
    String,
    /// Emit JSON numbers. Used for bodies sent to the control plane.
    Number,
}

/// Serializes `value`, converting the named numeric-string fields according to `mode`.
///
/// `fields` are object keys matched at any depth.
pub fn encode<T: Serialize>(value: &T, fields: &[&str], mode: NumberMode) -> serde_json::Result<Value> {
    let mut out = serde_json::to_value(value)?;
    if mode == NumberMode::Number {
        numbers_in_place(&mut out, fields);
    }
    Ok(out)
}

/// Applies [`NumberMode::Number`] to an already serialized value.
pub fn numbers_in_place(value: &mut Value, fields: &[&str]) {
    match value {
        Value::Object(map) => {
            for (key, child) in map.iter_mut() {
                if fields.contains(&key.as_str()) {
                    if let Value::String(s) = child {
                        if let Some(n) = s.trim().parse::<f64>().ok().and_then(Number::from_f64) {
                            *child = Value::Number(n);
                            continue;
                        }
                    }
                }
                numbers_in_place(child, fields);
            }
        }
        Value::Array(items) => {
            for item in items {
                numbers_in_place(item, fields);
            }
        }
        _ => {}
    }
}
