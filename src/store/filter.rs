//! Query filter evaluation for the built-in stores.
//!
//! Supports the subset of the query language the migration tooling uses:
//! field equality (dotted paths allowed) and the `$in`, `$nin`, `$ne`,
//! `$exists`, `$gt`, `$gte`, `$lt`, `$lte` operators.

use std::cmp::Ordering;

use serde_json::Value;

use super::{Document, StoreError, StoreResult};

/// Check whether `document` satisfies `filter`.
pub fn matches(document: &Document, filter: &Document) -> StoreResult<bool> {
    for (path, condition) in filter {
        if path.starts_with('$') {
            return Err(StoreError::InvalidFilter(format!(
                "top-level operator '{}' is not supported",
                path
            )));
        }

        let value = lookup(document, path);
        if !matches_condition(value, condition)? {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Resolve a dotted path inside a document.
pub fn lookup<'a>(document: &'a Document, path: &str) -> Option<&'a Value> {
    let mut parts = path.split('.');
    let first = parts.next()?;
    let mut current = document.get(first)?;
    for part in parts {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

fn matches_condition(value: Option<&Value>, condition: &Value) -> StoreResult<bool> {
    match condition {
        Value::Object(ops) if is_operator_object(ops) => {
            for (op, operand) in ops {
                if !apply_operator(value, op, operand)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        _ => Ok(value == Some(condition)),
    }
}

fn is_operator_object(map: &serde_json::Map<String, Value>) -> bool {
    !map.is_empty() && map.keys().all(|k| k.starts_with('$'))
}

fn apply_operator(value: Option<&Value>, op: &str, operand: &Value) -> StoreResult<bool> {
    match op {
        "$in" => {
            let candidates = operand.as_array().ok_or_else(|| {
                StoreError::InvalidFilter("$in requires an array".to_string())
            })?;
            Ok(value.map(|v| candidates.contains(v)).unwrap_or(false))
        }
        "$nin" => {
            let candidates = operand.as_array().ok_or_else(|| {
                StoreError::InvalidFilter("$nin requires an array".to_string())
            })?;
            Ok(value.map(|v| !candidates.contains(v)).unwrap_or(true))
        }
        "$ne" => Ok(value != Some(operand)),
        "$exists" => {
            let wanted = operand.as_bool().ok_or_else(|| {
                StoreError::InvalidFilter("$exists requires a boolean".to_string())
            })?;
            Ok(value.is_some() == wanted)
        }
        "$gt" => Ok(compare(value, operand) == Some(Ordering::Greater)),
        "$gte" => Ok(matches!(
            compare(value, operand),
            Some(Ordering::Greater | Ordering::Equal)
        )),
        "$lt" => Ok(compare(value, operand) == Some(Ordering::Less)),
        "$lte" => Ok(matches!(
            compare(value, operand),
            Some(Ordering::Less | Ordering::Equal)
        )),
        other => Err(StoreError::InvalidFilter(format!(
            "operator '{}' is not supported",
            other
        ))),
    }
}

/// Order two values of the same scalar kind. Mixed kinds do not compare.
pub fn compare(value: Option<&Value>, other: &Value) -> Option<Ordering> {
    match (value?, other) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::doc;
    use serde_json::json;

    #[test]
    fn test_equality_and_missing_field() {
        let d = doc([("v", json!("20140101000000"))]);
        assert!(matches(&d, &doc([("v", json!("20140101000000"))])).unwrap());
        assert!(!matches(&d, &doc([("v", json!("20140102000000"))])).unwrap());
        assert!(!matches(&d, &doc([("t", json!(1))])).unwrap());
    }

    #[test]
    fn test_in_operator() {
        let d = doc([("v", json!("b"))]);
        assert!(matches(&d, &doc([("v", json!({"$in": ["a", "b"]}))])).unwrap());
        assert!(!matches(&d, &doc([("v", json!({"$in": ["c"]}))])).unwrap());
        assert!(matches(&d, &doc([("v", json!({"$in": "b"}))])).is_err());
    }

    #[test]
    fn test_range_operators_on_nested_path() {
        let d = doc([("stats", json!({"count": 10}))]);
        assert!(matches(&d, &doc([("stats.count", json!({"$gt": 5, "$lte": 10}))])).unwrap());
        assert!(!matches(&d, &doc([("stats.count", json!({"$lt": 10}))])).unwrap());
    }

    #[test]
    fn test_exists_operator() {
        let d = doc([("v", json!("a"))]);
        assert!(matches(&d, &doc([("v", json!({"$exists": true}))])).unwrap());
        assert!(matches(&d, &doc([("t", json!({"$exists": false}))])).unwrap());
    }

    #[test]
    fn test_unknown_operator_rejected() {
        let d = doc([("v", json!("a"))]);
        let result = matches(&d, &doc([("v", json!({"$regex": "a"}))]));
        assert!(matches!(result, Err(StoreError::InvalidFilter(_))));
    }
}
