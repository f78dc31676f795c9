//! Restricted condition evaluation for branch tasks.
//!
//! Conditions are equality expressions of the form `<result key> == <literal>`.
//! The left side must name a key already present in the sequence's results
//! map; the right side is coerced to the type of the looked-up value (i64,
//! f64, else raw string) before comparing. Any parse or lookup failure
//! evaluates to `false` — evaluation never fails a run.
//!
//! This is a deliberate trust boundary: sequences are user-authored data, so
//! the engine does not run a general expression evaluator over them.

use serde_json::Value;
use std::collections::HashMap;

/// Evaluate a `<result key> == <literal>` expression against a results map.
pub fn evaluate(condition: &str, results: &HashMap<String, Value>) -> bool {
    let Some((left, right)) = condition.split_once("==") else {
        return false;
    };
    // A second `==` makes the expression malformed, not a nested comparison.
    if right.contains("==") {
        return false;
    }
    let left = left.trim();
    let right = right.trim();

    let Some(value) = results.get(left) else {
        return false;
    };
    match coerce(value, right) {
        Some(literal) => *value == literal,
        None => false,
    }
}

/// Coerce the literal text to the type of the looked-up value. Returns
/// `None` when the literal does not parse as that type.
fn coerce(value: &Value, literal: &str) -> Option<Value> {
    match value {
        Value::Number(n) if n.is_i64() => literal.parse::<i64>().ok().map(Value::from),
        Value::Number(_) => literal.parse::<f64>().ok().map(Value::from),
        Value::String(_) => Some(Value::String(literal.to_string())),
        _ => None,
    }
}
