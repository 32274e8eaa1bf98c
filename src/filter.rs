//! Subscription filter validation and matching.
//!
//! A filter is a JSON object mapping payload keys to arrays of allowed
//! values: `{"country": ["BR", "US"], "tier": [1, 2]}`. A payload matches
//! when every filter key is present in the payload and equal to at least one
//! allowed value. `null`, `{}`, and non-object filters match everything.
//!
//! Two implementations exist for the same grammar: the Postgres backend
//! evaluates it in SQL during publish fan-out so the whole batch stays a
//! single statement, and [`matches`] below is the host-side equivalent used
//! by the in-memory backend and as the test oracle. Richer operators
//! (`$gt` and friends) are intentionally not supported.
use serde_json::Value;

/// Validate the shape of a caller-supplied filter.
///
/// Keys map to arrays of primitives (strings, numbers, booleans). Nested
/// objects, nested arrays, and nulls inside the arrays are rejected so the
/// SQL evaluation never has to reason about them.
pub fn validate_filter(filter: &Value) -> Result<(), String> {
    let object = match filter {
        Value::Null => return Ok(()),
        Value::Object(map) => map,
        _ => return Err("filter must be a JSON object".to_string()),
    };
    for (key, allowed) in object {
        let values = match allowed {
            Value::Array(values) => values,
            _ => {
                return Err(format!(
                    "filter key '{key}' must map to an array of allowed values"
                ));
            }
        };
        for value in values {
            match value {
                Value::String(_) | Value::Number(_) | Value::Bool(_) => {}
                Value::Null => {
                    return Err(format!("filter key '{key}' contains null"));
                }
                Value::Array(_) | Value::Object(_) => {
                    return Err(format!(
                        "filter key '{key}' contains a non-primitive value"
                    ));
                }
            }
        }
    }
    Ok(())
}

/// Decide whether `payload` matches `filter`.
///
/// Mirrors the SQL predicate exactly: conjunction across keys, set
/// membership per key, missing payload keys fail, keys whose allowed list
/// is not an array are skipped.
pub fn matches(filter: Option<&Value>, payload: &Value) -> bool {
    let object = match filter {
        None | Some(Value::Null) => return true,
        Some(Value::Object(map)) => map,
        // Non-object filters never made it past validation; treat them as
        // match-all like the SQL path does.
        Some(_) => return true,
    };
    for (key, allowed) in object {
        let values = match allowed {
            Value::Array(values) => values,
            _ => continue,
        };
        let candidate = match payload.get(key) {
            Some(value) => value,
            None => return false,
        };
        if !values.iter().any(|value| json_eq(value, candidate)) {
            return false;
        }
    }
    true
}

/// JSON equality with numeric comparison for numbers, matching jsonb
/// semantics where `1` and `1.0` are equal.
fn json_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}
