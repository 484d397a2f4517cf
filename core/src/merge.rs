//! Deep merge of JSON configuration values.
//!
//! Objects merge key by key and recursively; anything else in the patch
//! replaces what the target holds. Keys that only exist in the target are
//! kept.

use serde_json::Value;

/// Merge `patch` into `target` in place and return the target.
pub fn merge(target: &mut Value, patch: Value) -> &mut Value {
    match patch {
        Value::Object(patch_map) if target.is_object() => {
            if let Value::Object(target_map) = &mut *target {
                for (key, value) in patch_map {
                    let recurse =
                        value.is_object() && matches!(target_map.get(&key), Some(Value::Object(_)));
                    if recurse {
                        if let Some(existing) = target_map.get_mut(&key) {
                            merge(existing, value);
                        }
                    } else {
                        target_map.insert(key, value);
                    }
                }
            }
        }
        other => *target = other,
    }
    target
}

/// Merge `patch` over a copy of `defaults`, leaving `defaults` untouched.
pub fn merged(defaults: &Value, patch: Value) -> Value {
    let mut out = defaults.clone();
    merge(&mut out, patch);
    out
}
