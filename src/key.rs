//! Query keys and key hashing.
//!
//! A request is identified by an ordered, immutable sequence of JSON values.
//! The cache index is a deterministic hash derived by canonical JSON
//! serialization: object keys are sorted recursively, arrays preserve order.
//! Two keys collide exactly when their canonical forms are equal.
//!
//! Keys also support *partial matching* for filters: a filter key matches a
//! query key when the filter key is a recursive structural subset of it, so
//! `["todos"]` matches `["todos", 1]` and `["todos", {"page": 2}]`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// An ordered, immutable sequence of JSON values identifying one request.
///
/// # Example
///
/// ```rust
/// use refetch::QueryKey;
/// use serde_json::json;
///
/// let key = QueryKey::from(json!(["todos", { "status": "open", "page": 1 }]));
/// let other = QueryKey::from(json!(["todos", { "page": 1, "status": "open" }]));
///
/// // Object key order does not matter.
/// assert_eq!(key.hash_string(), other.hash_string());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueryKey(Vec<Value>);

impl QueryKey {
    /// Creates a key from its parts.
    #[must_use]
    pub const fn new(parts: Vec<Value>) -> Self {
        Self(parts)
    }

    /// The ordered parts of this key.
    #[must_use]
    pub fn parts(&self) -> &[Value] {
        &self.0
    }

    /// Returns `true` if this key has no parts.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The canonical hash of this key.
    ///
    /// This is the canonical JSON serialization of the parts. `serde_json`
    /// maps are ordered, so object keys serialize sorted at every depth and
    /// the string is deterministic.
    #[must_use]
    pub fn hash_string(&self) -> String {
        serde_json::to_string(&self.0).unwrap_or_default()
    }

    /// Returns `true` if `filter` is a recursive structural subset of this
    /// key.
    ///
    /// Every part of `filter` must partially match the part of `self` at the
    /// same position; objects match when every filter field matches, arrays
    /// when every filter element matches positionally. Types must match
    /// exactly; `null` only matches `null`.
    #[must_use]
    pub fn partially_matches(&self, filter: &QueryKey) -> bool {
        filter
            .0
            .iter()
            .enumerate()
            .all(|(i, fv)| self.0.get(i).is_some_and(|sv| partial_deep_eq(sv, fv)))
    }
}

impl From<Value> for QueryKey {
    /// Wraps a JSON value as a key. Arrays become the key parts directly;
    /// any other value becomes a single-part key.
    fn from(value: Value) -> Self {
        match value {
            Value::Array(parts) => Self(parts),
            other => Self(vec![other]),
        }
    }
}

impl From<Vec<Value>> for QueryKey {
    fn from(parts: Vec<Value>) -> Self {
        Self(parts)
    }
}

impl From<&str> for QueryKey {
    fn from(part: &str) -> Self {
        Self(vec![Value::String(part.to_owned())])
    }
}

impl std::fmt::Display for QueryKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.hash_string())
    }
}

/// Recursive structural-subset comparison.
///
/// `partial_deep_eq(a, b)` holds when `b` is a structural subset of `a`:
/// equal scalars, objects where every field of `b` matches the same field of
/// `a`, arrays where every element of `b` matches the element of `a` at the
/// same index.
pub(crate) fn partial_deep_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Object(ao), Value::Object(bo)) => bo
            .iter()
            .all(|(k, bv)| ao.get(k).is_some_and(|av| partial_deep_eq(av, bv))),
        (Value::Array(aa), Value::Array(ba)) => ba
            .iter()
            .enumerate()
            .all(|(i, bv)| aa.get(i).is_some_and(|av| partial_deep_eq(av, bv))),
        _ => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_hash_is_order_independent_for_objects() {
        let a = QueryKey::from(json!(["todos", { "page": 1, "status": "open" }]));
        let b = QueryKey::from(json!(["todos", { "status": "open", "page": 1 }]));
        assert_eq!(a.hash_string(), b.hash_string());
    }

    #[test]
    fn test_hash_is_order_dependent_for_arrays() {
        let a = QueryKey::from(json!(["todos", [1, 2]]));
        let b = QueryKey::from(json!(["todos", [2, 1]]));
        assert_ne!(a.hash_string(), b.hash_string());
    }

    #[test]
    fn test_hash_nested_objects_sorted() {
        let a = QueryKey::from(json!([{ "outer": { "b": 2, "a": 1 } }]));
        let b = QueryKey::from(json!([{ "outer": { "a": 1, "b": 2 } }]));
        assert_eq!(a.hash_string(), b.hash_string());
    }

    #[test]
    fn test_scalar_wraps_to_single_part() {
        let key = QueryKey::from(json!("todos"));
        assert_eq!(key.parts().len(), 1);
        assert_eq!(key, QueryKey::from("todos"));
    }

    #[test]
    fn test_partial_match_prefix() {
        let key = QueryKey::from(json!(["todos", 1, { "status": "open" }]));
        assert!(key.partially_matches(&QueryKey::from(json!(["todos"]))));
        assert!(key.partially_matches(&QueryKey::from(json!(["todos", 1]))));
        assert!(!key.partially_matches(&QueryKey::from(json!(["users"]))));
    }

    #[test]
    fn test_partial_match_object_subset() {
        let key = QueryKey::from(json!(["todos", { "status": "open", "page": 2 }]));
        let filter = QueryKey::from(json!(["todos", { "status": "open" }]));
        assert!(key.partially_matches(&filter));

        let wrong = QueryKey::from(json!(["todos", { "status": "closed" }]));
        assert!(!key.partially_matches(&wrong));
    }

    #[test]
    fn test_partial_match_is_reflexive() {
        let key = QueryKey::from(json!(["todos", [1, { "a": null }]]));
        assert!(key.partially_matches(&key));
    }

    #[test]
    fn test_partial_match_type_mismatch() {
        let key = QueryKey::from(json!(["todos", 1]));
        let filter = QueryKey::from(json!(["todos", "1"]));
        assert!(!key.partially_matches(&filter));
    }

    #[test]
    fn test_partial_match_null_propagates() {
        let key = QueryKey::from(json!(["todos", null]));
        assert!(key.partially_matches(&QueryKey::from(json!(["todos", null]))));

        let nonnull = QueryKey::from(json!(["todos", 0]));
        assert!(!nonnull.partially_matches(&QueryKey::from(json!(["todos", null]))));
    }

    #[test]
    fn test_longer_filter_does_not_match() {
        let key = QueryKey::from(json!(["todos"]));
        let filter = QueryKey::from(json!(["todos", 1]));
        assert!(!key.partially_matches(&filter));
    }
}
