//! Lenient numeric deserializers. The backend serialises arbitrary-precision
//! decimals as strings, while fixtures and some endpoints send plain numbers.

use rust_decimal::Decimal;
use serde::de::Error;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::str::FromStr;

fn value_to_decimal<E: Error>(value: &Value) -> Result<Option<Decimal>, E> {
    match value {
        Value::Null => Ok(None),
        Value::Number(n) => Decimal::from_str(&n.to_string())
            .or_else(|_| Decimal::from_scientific(&n.to_string()))
            .map(Some)
            .map_err(|e| E::custom(format!("invalid decimal {}: {}", n, e))),
        Value::String(s) => Decimal::from_str(s.trim())
            .or_else(|_| Decimal::from_scientific(s.trim()))
            .map(Some)
            .map_err(|e| E::custom(format!("invalid decimal {:?}: {}", s, e))),
        other => Err(E::custom(format!("expected number or numeric string, got {}", other))),
    }
}

pub fn decimal<'de, D>(deserializer: D) -> Result<Decimal, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(value_to_decimal(&value)?.unwrap_or(Decimal::ZERO))
}

pub fn option_decimal<'de, D>(deserializer: D) -> Result<Option<Decimal>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    value_to_decimal(&value)
}

pub fn lenient_f64<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(0.0),
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| D::Error::custom(format!("number out of range: {}", n))),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|e| D::Error::custom(format!("invalid number {:?}: {}", s, e))),
        other => Err(D::Error::custom(format!("expected number or numeric string, got {}", other))),
    }
}
