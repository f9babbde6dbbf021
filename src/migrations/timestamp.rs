//! Normalisation of the `t` attribute stored on tracking records.
//!
//! Different writers have stored application times in different shapes over
//! the years. Every supported shape is reduced to epoch seconds.

use chrono::{DateTime, Utc};
use serde_json::{json, Value};

use super::errors::{MigrationError, MigrationResult};

const SUPPORTED: &str = "epoch seconds, {\"$date\": millis|rfc3339}, \
                         {\"$timestamp\": {\"t\": secs, \"i\": inc}}, or an RFC 3339 string";

/// Store-native representation of `at` written into tracking records.
pub fn to_document_value(at: DateTime<Utc>) -> Value {
    json!({ "$date": at.timestamp_millis() })
}

/// Current time as a tracking record value.
pub fn now() -> Value {
    to_document_value(Utc::now())
}

/// Convert a stored timestamp to seconds since 1970.
pub fn normalize(value: &Value) -> MigrationResult<i64> {
    match value {
        Value::Number(n) => n.as_i64().ok_or_else(|| unsupported(value)),
        Value::String(s) => parse_rfc3339(s).ok_or_else(|| unsupported(value)),
        Value::Object(map) => {
            if let Some(date) = map.get("$date") {
                return match date {
                    Value::Number(ms) => ms
                        .as_i64()
                        .map(|ms| ms.div_euclid(1000))
                        .ok_or_else(|| unsupported(value)),
                    Value::String(s) => parse_rfc3339(s).ok_or_else(|| unsupported(value)),
                    // Canonical extended JSON nests the millis: {"$date": {"$numberLong": "..."}}
                    Value::Object(inner) => inner
                        .get("$numberLong")
                        .and_then(Value::as_str)
                        .and_then(|s| s.parse::<i64>().ok())
                        .map(|ms| ms.div_euclid(1000))
                        .ok_or_else(|| unsupported(value)),
                    _ => Err(unsupported(value)),
                };
            }
            if let Some(ts) = map.get("$timestamp") {
                return ts
                    .get("t")
                    .and_then(Value::as_i64)
                    .ok_or_else(|| unsupported(value));
            }
            Err(unsupported(value))
        }
        _ => Err(unsupported(value)),
    }
}

fn parse_rfc3339(s: &str) -> Option<i64> {
    DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.timestamp())
}

fn unsupported(value: &Value) -> MigrationError {
    MigrationError::Domain(format!(
        "The timestamp to normalise must be one of {} but it is {}",
        SUPPORTED, value
    ))
}
