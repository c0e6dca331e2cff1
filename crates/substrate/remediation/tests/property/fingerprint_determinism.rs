//! Property tests: fingerprints depend only on the content of the selected
//! leaves, never on insertion order or on leaves outside the selection.

use maple_worldline_remediation::{fingerprint, Value};
use proptest::prelude::*;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn arb_scalar() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::from),
        (-1_000i64..1_000).prop_map(Value::from),
        "[a-zA-Z ]{0,12}".prop_map(Value::from),
    ]
}

/// Distinct keys paired with scalar values.
fn arb_entries() -> impl Strategy<Value = Vec<(String, Value)>> {
    prop::collection::btree_map("[a-z]{1,6}", arb_scalar(), 1..12)
        .prop_map(|m| m.into_iter().collect())
}

fn map_from(entries: &[(String, Value)]) -> Value {
    let mut map = Value::map();
    for (k, v) in entries {
        map.map_insert(k.as_str(), v.clone());
    }
    map
}

// ---------------------------------------------------------------------------
// Property Tests
// ---------------------------------------------------------------------------

proptest! {
    /// Reversing map insertion order never changes the fingerprint.
    #[test]
    fn map_insertion_order_is_irrelevant(entries in arb_entries()) {
        let forward = map_from(&entries);
        let mut reversed_entries = entries.clone();
        reversed_entries.reverse();
        let reversed = map_from(&reversed_entries);

        prop_assert_eq!(
            fingerprint(&forward, None).unwrap(),
            fingerprint(&reversed, None).unwrap()
        );
    }

    /// Changing a leaf outside the restricted keys keeps the fingerprint.
    #[test]
    fn excluded_leaf_changes_are_invisible(
        entries in arb_entries(),
        replacement in arb_scalar(),
    ) {
        let mut system = Value::object();
        system.insert("watched", "fixed value");
        for (k, v) in &entries {
            system.insert(format!("other_{k}"), v.clone());
        }
        let keys = vec!["watched".to_string()];
        let before = fingerprint(&system, Some(keys.as_slice())).unwrap();

        let target = format!("other_{}", entries[0].0);
        system.insert(target, replacement);
        let after = fingerprint(&system, Some(keys.as_slice())).unwrap();

        prop_assert_eq!(before, after);
    }

    /// Changing an included leaf to a different value changes the fingerprint.
    #[test]
    fn included_leaf_changes_are_visible(
        entries in arb_entries(),
        suffix in "[a-z]{1,4}",
    ) {
        let system = map_from(&entries);
        let (key, value) = &entries[0];
        let changed_value = Value::from(format!("{}-{suffix}", value.key_string()));
        prop_assume!(&changed_value != value);

        let mut changed = system.clone();
        changed.map_insert(key.as_str(), changed_value);

        prop_assert_ne!(
            fingerprint(&system, None).unwrap(),
            fingerprint(&changed, None).unwrap()
        );
    }
}
