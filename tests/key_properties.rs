// Property tests for key hashing and partial matching

use proptest::prelude::*;
use refetch::QueryKey;
use serde_json::{Map, Value, json};

/// A small recursive JSON value generator.
fn arb_value() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i32>().prop_map(|n| json!(n)),
        "[a-z]{0,8}".prop_map(Value::String),
    ];
    leaf.prop_recursive(3, 16, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
            prop::collection::vec(("[a-z]{1,6}", inner), 0..4).prop_map(|entries| {
                let mut map = Map::new();
                for (key, value) in entries {
                    map.insert(key, value);
                }
                Value::Object(map)
            }),
        ]
    })
}

fn arb_key() -> impl Strategy<Value = QueryKey> {
    prop::collection::vec(arb_value(), 0..4).prop_map(QueryKey::new)
}

/// Shuffles object key insertion order at every depth without changing
/// content.
fn reorder(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> =
                map.iter().map(|(k, v)| (k.clone(), reorder(v))).collect();
            entries.reverse();
            let mut out = Map::new();
            for (key, inner) in entries {
                out.insert(key, inner);
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(reorder).collect()),
        other => other.clone(),
    }
}

proptest! {
    #[test]
    fn hash_equals_iff_canonical_forms_equal(a in arb_key(), b in arb_key()) {
        prop_assert_eq!(a.hash_string() == b.hash_string(), a == b);
    }

    #[test]
    fn hash_ignores_object_key_insertion_order(key in arb_key()) {
        let reordered = QueryKey::new(key.parts().iter().map(reorder).collect());
        prop_assert_eq!(key.hash_string(), reordered.hash_string());
    }

    #[test]
    fn partial_match_is_reflexive(key in arb_key()) {
        prop_assert!(key.partially_matches(&key));
    }

    #[test]
    fn exact_equality_implies_partial_match(key in arb_key()) {
        let copy = QueryKey::new(key.parts().to_vec());
        prop_assert!(key.partially_matches(&copy));
    }

    #[test]
    fn prefix_of_key_partially_matches(key in arb_key(), cut in 0usize..4) {
        let len = key.parts().len();
        let prefix = QueryKey::new(key.parts()[..cut.min(len)].to_vec());
        prop_assert!(key.partially_matches(&prefix));
    }

    #[test]
    fn dropping_object_fields_keeps_matching(parts in prop::collection::vec(arb_value(), 1..3)) {
        // Build a filter by removing one field from every object part.
        let filter_parts: Vec<Value> = parts
            .iter()
            .map(|part| match part {
                Value::Object(map) if !map.is_empty() => {
                    let mut smaller = map.clone();
                    let first = smaller.keys().next().cloned().unwrap();
                    smaller.remove(&first);
                    Value::Object(smaller)
                }
                other => other.clone(),
            })
            .collect();
        let key = QueryKey::new(parts);
        let filter = QueryKey::new(filter_parts);
        prop_assert!(key.partially_matches(&filter));
    }
}

#[test]
fn array_order_is_significant() {
    let a = QueryKey::from(json!([[1, 2, 3]]));
    let b = QueryKey::from(json!([[3, 2, 1]]));
    assert_ne!(a.hash_string(), b.hash_string());
    assert!(!a.partially_matches(&b));
}
