//! Canonical config hashing.
//!
//! The hash must be stable across key-order permutations and float
//! round-trips, and must ignore persistence-only toggles:
//! - float leaves are rounded to 5 decimal places at every nesting level;
//! - object keys serialize sorted (`serde_json::Map` is ordered by key);
//! - top-level keys starting with `"save"` are stripped;
//! - the result is the MD5 hex digest of the serialized tree.
//!
//! The same rounding is applied when floats are written to TEXT columns, so
//! a value read back from the cache hashes identically.

use serde_json::Value;

/// Canonical MD5 hex digest of a config tree.
pub fn config_hash(config: &Value) -> String {
    let mut tree = canonicalize(config);
    if let Value::Object(map) = &mut tree {
        map.retain(|key, _| !key.starts_with("save"));
    }
    let serialized = tree.to_string();
    format!("{:x}", md5::compute(serialized))
}

/// Rounds every float leaf to 5 decimal places, recursively.
pub fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Number(n) => {
            // Integers pass through untouched; only true floats are rounded.
            if n.is_i64() || n.is_u64() {
                value.clone()
            } else {
                let rounded = round5(n.as_f64().unwrap_or(0.0));
                serde_json::Number::from_f64(rounded)
                    .map(Value::Number)
                    .unwrap_or(Value::Null)
            }
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), canonicalize(v)))
                .collect(),
        ),
        _ => value.clone(),
    }
}

/// Rounds to 5 decimal places, half away from zero.
pub fn round5(x: f64) -> f64 {
    (x * 1e5).round() / 1e5
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn key_order_does_not_matter() {
        // serde_json's default map sorts keys, so two insertion orders
        // produce the same tree; the digests must agree.
        let a: Value = serde_json::from_str(r#"{"b": 1, "a": {"y": 2, "x": 3}}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"a": {"x": 3, "y": 2}, "b": 1}"#).unwrap();
        assert_eq!(config_hash(&a), config_hash(&b));
    }

    #[test]
    fn save_keys_are_stripped() {
        let base = json!({"corrdor_params": {"step": 60}});
        let with_save = json!({"corrdor_params": {"step": 60}, "save_foo": "bar"});
        let with_other_save = json!({"corrdor_params": {"step": 60}, "save_foo": "baz"});
        assert_eq!(config_hash(&base), config_hash(&with_save));
        assert_eq!(config_hash(&with_save), config_hash(&with_other_save));
    }

    #[test]
    fn sub_1e5_float_noise_is_ignored() {
        let a = json!({"margin_percent": 5.0});
        let b = json!({"margin_percent": 5.000001});
        assert_eq!(config_hash(&a), config_hash(&b));

        let c = json!({"margin_percent": 5.0001});
        assert_ne!(config_hash(&a), config_hash(&c));
    }

    #[test]
    fn numeric_changes_change_the_hash() {
        let a = json!({"corrdor_params": {"window_size": 10}});
        let b = json!({"corrdor_params": {"window_size": 11}});
        assert_ne!(config_hash(&a), config_hash(&b));
    }

    #[test]
    fn nested_save_keys_are_kept() {
        // Only top-level keys are stripped.
        let a = json!({"cache": {"save_hint": 1}});
        let b = json!({"cache": {"save_hint": 2}});
        assert_ne!(config_hash(&a), config_hash(&b));
    }

    #[test]
    fn round5_behavior() {
        assert_eq!(round5(1.2345651), 1.23457);
        assert_eq!(round5(-1.2345651), -1.23457);
        assert_eq!(round5(1.2345649), 1.23456);
        assert_eq!(round5(2.0), 2.0);
    }
}
