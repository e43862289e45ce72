//! Fingerprint computation for store artifacts.
//!
//! The fingerprint is the sole cache key: a 32-character lowercase hex
//! digest of a canonical byte serialization of `(kind, input)`. Any
//! non-determinism here produces cache misses at best and latent
//! collisions at worst, so the serialization is versioned, labeled, and
//! insensitive to JSON object key order at every depth.

use serde_json::Value;

/// Current fingerprint schema version.
/// Bump this when the canonical serialization changes.
pub const FINGERPRINT_VERSION: u32 = 1;

/// Digest length in bytes (128 bits, 32 hex characters).
pub const FINGERPRINT_BYTES: usize = 16;

/// Compute the content address for a `(kind, input)` pair.
///
/// Stable across processes, machines, and run order. The kind
/// participates in the digest, so equal inputs under different kinds
/// never share an address.
pub fn fingerprint(kind: &str, input: &Value) -> String {
    let mut hasher = blake3::Hasher::new();

    hasher.update(b"fingerprint-v");
    hasher.update(&FINGERPRINT_VERSION.to_le_bytes());
    hasher.update(b"\n");

    hasher.update(b"kind:");
    hasher.update(kind.as_bytes());
    hasher.update(b"\n");

    hasher.update(b"input:");
    hasher.update(canonical_json(input).as_bytes());
    hasher.update(b"\n");

    let digest = hasher.finalize();
    digest.as_bytes()[..FINGERPRINT_BYTES]
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

/// Canonical JSON serialization used for fingerprinting.
///
/// Object keys are emitted in code-point-sorted order at every depth.
/// Array elements are serialized individually and the resulting strings
/// sorted before joining, so arrays hash order-insensitively: `[1,2]`
/// and `[2,1]` produce the same fingerprint. Primitives and null use the
/// compact standard JSON encoding.
pub fn canonical_json(value: &Value) -> String {
    match value {
        Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_) => value.to_string(),
        Value::Array(items) => {
            let mut parts: Vec<String> = items.iter().map(canonical_json).collect();
            parts.sort();
            format!("[{}]", parts.join(","))
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let parts: Vec<String> = keys
                .iter()
                .map(|k| {
                    format!(
                        "{}:{}",
                        Value::String((*k).clone()),
                        canonical_json(&map[k.as_str()])
                    )
                })
                .collect();
            format!("{{{}}}", parts.join(","))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn fingerprint_is_deterministic() {
        let input = json!({"text": "hi", "n": 3});
        assert_eq!(fingerprint("echo", &input), fingerprint("echo", &input));
    }

    #[test]
    fn fingerprint_shape() {
        let fp = fingerprint("echo", &json!({"text": "hi"}));
        assert_eq!(fp.len(), 32);
        assert!(fp.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn key_order_is_insignificant_at_depth() {
        let a: Value = serde_json::from_str(r#"{"a":1,"b":{"x":[true],"y":2},"c":null}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"c":null,"b":{"y":2,"x":[true]},"a":1}"#).unwrap();
        assert_eq!(fingerprint("k", &a), fingerprint("k", &b));
    }

    #[test]
    fn kind_separates_equal_inputs() {
        let input = json!({"x": 1});
        assert_ne!(fingerprint("alpha", &input), fingerprint("beta", &input));
    }

    #[test]
    fn arrays_hash_order_insensitively() {
        // Documented behavior: element order is treated as insignificant.
        assert_eq!(
            fingerprint("k", &json!([1, 2])),
            fingerprint("k", &json!([2, 1]))
        );
        assert_eq!(
            fingerprint("k", &json!({"xs": ["b", "a"]})),
            fingerprint("k", &json!({"xs": ["a", "b"]}))
        );
    }

    #[test]
    fn distinct_inputs_diverge() {
        assert_ne!(
            fingerprint("k", &json!({"x": 1})),
            fingerprint("k", &json!({"x": 2}))
        );
        assert_ne!(fingerprint("k", &json!([1, 2])), fingerprint("k", &json!([1, 2, 2])));
    }

    #[test]
    fn canonical_json_sorts_keys_and_escapes() {
        let v: Value = serde_json::from_str(r#"{"b":"two\n","a":1}"#).unwrap();
        assert_eq!(canonical_json(&v), r#"{"a":1,"b":"two\n"}"#);
    }

    #[test]
    fn canonical_json_sorts_array_elements() {
        assert_eq!(canonical_json(&json!([3, 1, 2])), "[1,2,3]");
        // Sorting is over serialized element strings, not values.
        assert_eq!(canonical_json(&json!([10, 2])), "[10,2]");
    }
}
