//! Structural key extraction.
//!
//! Flattens a nested aggregate into addressable [`LeafKey`]s. Maps are
//! addressed by the key string of each entry (so `0` and `"0"` collapse) and
//! sets by member index. A non-empty aggregate is recursed into; an empty
//! one is kept as a leaf of its own kind so it does not vanish from the key
//! list.
//!
//! ```text
//!   {cfg: {limits: [3, 4]}, tags: Set{}}
//!       │
//!       ├──► cfg.limits.0   number   3
//!       ├──► cfg.limits.1   number   4
//!       └──► tags           set      (empty)
//! ```

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{AnomalyError, AnomalyResult};
use crate::value::{Value, ValueKind};

// ── Leaf Key ────────────────────────────────────────────────────────────

/// One terminal location inside a nested aggregate.
///
/// Keys compare by [`fullname`](LeafKey::fullname) only.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LeafKey {
    /// Local key or index.
    pub name: String,
    /// Dotted path of ancestors, empty at the top level.
    pub path: String,
    /// Kind of the value at this location.
    #[serde(rename = "type")]
    pub kind: ValueKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

impl LeafKey {
    pub fn fullname(&self) -> String {
        join(&self.path, &self.name)
    }
}

impl PartialEq for LeafKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for LeafKey {}

impl PartialOrd for LeafKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for LeafKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.fullname().cmp(&other.fullname())
    }
}

fn join(path: &str, name: &str) -> String {
    if path.is_empty() {
        name.to_string()
    } else {
        format!("{path}.{name}")
    }
}

// ── Extraction ──────────────────────────────────────────────────────────

/// Extract every leaf key, with values.
///
/// Fails with [`AnomalyError::UnsupportedType`] when `root` is not an aggregate.
pub fn extract(root: &Value) -> AnomalyResult<Vec<LeafKey>> {
    walk(root, true)
}

/// Extract every leaf key without copying values.
pub fn extract_keys_only(root: &Value) -> AnomalyResult<Vec<LeafKey>> {
    walk(root, false)
}

fn walk(root: &Value, with_values: bool) -> AnomalyResult<Vec<LeafKey>> {
    let kind = root.kind();
    if !kind.is_aggregate() {
        return Err(AnomalyError::UnsupportedType(kind));
    }
    let mut out = Vec::new();
    collect(root, "", with_values, &mut out);
    Ok(out)
}

fn collect(aggregate: &Value, path: &str, with_values: bool, out: &mut Vec<LeafKey>) {
    for (name, child) in members(aggregate) {
        if child.is_aggregate() && !child.is_empty_aggregate() {
            collect(child, &join(path, &name), with_values, out);
        } else {
            out.push(LeafKey {
                name,
                path: path.to_string(),
                kind: child.kind(),
                value: with_values.then(|| child.clone()),
            });
        }
    }
}

/// Normalize an aggregate into `(key, member)` pairs.
fn members(aggregate: &Value) -> Vec<(String, &Value)> {
    match aggregate {
        Value::Object(m) => m.iter().map(|(k, v)| (k.clone(), v)).collect(),
        Value::Array(items) | Value::Set(items) => items
            .iter()
            .enumerate()
            .map(|(i, v)| (i.to_string(), v))
            .collect(),
        Value::Map(entries) => {
            // later entries overwrite earlier ones with the same key string
            let mut keyed: BTreeMap<String, &Value> = BTreeMap::new();
            for (k, v) in entries {
                keyed.insert(k.key_string(), v);
            }
            keyed.into_iter().collect()
        }
        _ => Vec::new(),
    }
}

// ── Diff ────────────────────────────────────────────────────────────────

/// How a leaf location changed between two snapshots.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Added,
    Removed,
    Modified,
}

/// A single changed leaf location.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct KeyChange {
    pub fullname: String,
    pub change: ChangeKind,
    pub before: Option<Value>,
    pub after: Option<Value>,
}

/// Report which leaf locations differ between `before` and `after`.
///
/// A leaf is modified when its kind or its value differs. Output is sorted
/// by fullname.
pub fn diff(before: &Value, after: &Value) -> AnomalyResult<Vec<KeyChange>> {
    let old = index(extract(before)?);
    let mut new = index(extract(after)?);

    let mut changes = Vec::new();
    for (fullname, left) in old {
        match new.remove(&fullname) {
            None => changes.push(KeyChange {
                fullname,
                change: ChangeKind::Removed,
                before: left.value,
                after: None,
            }),
            Some(right) if left.kind != right.kind || left.value != right.value => {
                changes.push(KeyChange {
                    fullname,
                    change: ChangeKind::Modified,
                    before: left.value,
                    after: right.value,
                })
            }
            Some(_) => {}
        }
    }
    changes.extend(new.into_iter().map(|(fullname, right)| KeyChange {
        fullname,
        change: ChangeKind::Added,
        before: None,
        after: right.value,
    }));
    changes.sort_by(|a, b| a.fullname.cmp(&b.fullname));
    Ok(changes)
}

fn index(keys: Vec<LeafKey>) -> BTreeMap<String, LeafKey> {
    keys.into_iter().map(|k| (k.fullname(), k)).collect()
}
