//! Property tests: key extraction yields one addressable leaf per terminal
//! location, and every leaf resolves back to its value by path.

use maple_worldline_remediation::{extract, extract_keys_only, Value, ValueKind};
use proptest::prelude::*;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Nested JSON-shaped systems with keys that never contain dots.
fn arb_system() -> impl Strategy<Value = serde_json::Value> {
    let leaf = prop_oneof![
        Just(serde_json::Value::Null),
        any::<bool>().prop_map(serde_json::Value::from),
        (-100i64..100).prop_map(serde_json::Value::from),
        "[a-z]{0,6}".prop_map(serde_json::Value::from),
    ];
    let tree = leaf.prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(serde_json::Value::from),
            prop::collection::btree_map("[a-z]{1,4}", inner, 0..4)
                .prop_map(|m| serde_json::Value::Object(m.into_iter().collect())),
        ]
    });
    prop::collection::btree_map("[a-z]{1,4}", tree, 0..5)
        .prop_map(|m| serde_json::Value::Object(m.into_iter().collect()))
}

// ---------------------------------------------------------------------------
// Property Tests
// ---------------------------------------------------------------------------

proptest! {
    /// Every extracted leaf resolves to its own value through `lookup`.
    #[test]
    fn leaves_resolve_by_fullname(json in arb_system()) {
        let system = Value::from(json);
        for key in extract(&system).unwrap() {
            let found = system.lookup(&key.fullname());
            prop_assert_eq!(found, key.value.as_ref());
        }
    }

    /// Leaves are never non-empty aggregates, and fullnames are unique.
    #[test]
    fn leaves_are_terminal_and_unique(json in arb_system()) {
        let system = Value::from(json);
        let keys = extract(&system).unwrap();
        let mut names: Vec<String> = keys.iter().map(|k| k.fullname()).collect();
        for key in &keys {
            if key.kind.is_aggregate() {
                prop_assert!(key.value.as_ref().is_some_and(Value::is_empty_aggregate));
            }
        }
        let total = names.len();
        names.sort();
        names.dedup();
        prop_assert_eq!(names.len(), total);
    }

    /// Key-only extraction finds the same locations without values.
    #[test]
    fn keys_only_matches_full_extraction(json in arb_system()) {
        let system = Value::from(json);
        let full = extract(&system).unwrap();
        let bare = extract_keys_only(&system).unwrap();
        prop_assert_eq!(&full, &bare);
        prop_assert!(bare.iter().all(|k| k.value.is_none()));
        prop_assert!(bare.iter().all(|k| k.kind != ValueKind::Function));
    }
}
