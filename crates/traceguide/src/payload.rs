//! Log payload validation and encoding.
//!
//! Payloads are loosely-typed [`serde_json::Value`]s. Anything nested deeper
//! than the configured maximum is rejected outright, never truncated.

use crate::error::PayloadError;
use serde_json::Value;

/// Nesting depth of a value: scalars are 0, containers are one more than
/// their deepest child.
pub fn depth(value: &Value) -> usize {
    bounded_depth(value, usize::MAX)
}

/// Depth of `value`, walked no further than needed to tell that it exceeds
/// `limit`. Returns `min(depth, limit + 1)`.
fn bounded_depth(value: &Value, limit: usize) -> usize {
    match value {
        Value::Array(items) => 1 + deepest_child(items.iter(), limit),
        Value::Object(map) => 1 + deepest_child(map.values(), limit),
        _ => 0,
    }
}

fn deepest_child<'a>(children: impl Iterator<Item = &'a Value>, limit: usize) -> usize {
    // A container at the limit already exceeds it with any nested container.
    let Some(child_limit) = limit.checked_sub(1) else {
        return 0;
    };
    let mut deepest = 0;
    for child in children {
        deepest = deepest.max(bounded_depth(child, child_limit));
        if deepest > child_limit {
            break;
        }
    }
    deepest
}

/// Validates `value` against `max_depth` and encodes it as JSON text.
pub fn encode_payload(value: &Value, max_depth: usize) -> Result<String, PayloadError> {
    if bounded_depth(value, max_depth) > max_depth {
        return Err(PayloadError::TooDeep { max: max_depth });
    }
    serde_json::to_string(value).map_err(|e| PayloadError::Encode(e.to_string()))
}
