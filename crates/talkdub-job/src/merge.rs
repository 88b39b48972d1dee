//! Deep-merge-one-level operator for phase metadata.
//!
//! A phase reports its results as a JSON object that is merged into the job
//! record by rule: top-level keys whose existing and incoming values are
//! both objects are merged key-wise; scalars and arrays are replaced
//! wholesale. Nesting below that one level is never merged.

use serde_json::Value;

/// Merge `incoming` into `target` one level deep.
///
/// `target` must be a JSON object (the serialized job record).
pub fn deep_merge_one_level(target: &mut Value, incoming: Value) {
    let Value::Object(target_map) = target else {
        *target = incoming;
        return;
    };
    let Value::Object(incoming_map) = incoming else {
        return;
    };

    for (key, value) in incoming_map {
        match (target_map.get_mut(&key), value) {
            (Some(Value::Object(existing)), Value::Object(update)) => {
                for (k, v) in update {
                    existing.insert(k, v);
                }
            }
            (_, value) => {
                target_map.insert(key, value);
            }
        }
    }
}
