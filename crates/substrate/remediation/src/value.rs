//! Value model for the system under analysis.
//!
//! A [`Value`] is a closed tagged union. Four variants are aggregate-capable
//! (`Object`, `Array`, `Map`, `Set`) and are flattened by the key extractor;
//! everything else is a scalar leaf.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::AnomalyError;

// ── Value Kind ──────────────────────────────────────────────────────────

/// Runtime type tag of a [`Value`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    Null,
    Undefined,
    Boolean,
    Number,
    String,
    Date,
    Function,
    /// Keyed aggregate.
    Object,
    /// Ordered sequence.
    Array,
    /// Keyed mapping with arbitrary keys.
    Map,
    /// Unique-element collection.
    Set,
}

impl ValueKind {
    /// Whether values of this kind can contain other values.
    pub fn is_aggregate(&self) -> bool {
        matches!(self, Self::Object | Self::Array | Self::Map | Self::Set)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Undefined => "undefined",
            Self::Boolean => "boolean",
            Self::Number => "number",
            Self::String => "string",
            Self::Date => "date",
            Self::Function => "function",
            Self::Object => "object",
            Self::Array => "array",
            Self::Map => "map",
            Self::Set => "set",
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ValueKind {
    type Err = AnomalyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "null" => Self::Null,
            "undefined" => Self::Undefined,
            "boolean" => Self::Boolean,
            "number" => Self::Number,
            "string" => Self::String,
            "date" => Self::Date,
            "function" => Self::Function,
            "object" => Self::Object,
            "array" => Self::Array,
            "map" => Self::Map,
            "set" => Self::Set,
            other => {
                return Err(AnomalyError::InvalidParams(format!(
                    "unknown value kind '{other}'"
                )))
            }
        })
    }
}

// ── Value ───────────────────────────────────────────────────────────────

/// A node of the system under analysis.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Null,
    Undefined,
    Bool(bool),
    Number(f64),
    String(String),
    Date(DateTime<Utc>),
    /// Opaque callable, identified by name. Never content-fingerprinted.
    Function(String),
    Object(BTreeMap<String, Value>),
    Array(Vec<Value>),
    /// Insertion-ordered entries; keys may be any value.
    Map(Vec<(Value, Value)>),
    /// Insertion-ordered unique members.
    Set(Vec<Value>),
}

impl Value {
    /// An empty keyed aggregate.
    pub fn object() -> Self {
        Self::Object(BTreeMap::new())
    }

    /// An empty keyed mapping.
    pub fn map() -> Self {
        Self::Map(Vec::new())
    }

    /// An empty unique-element collection.
    pub fn set() -> Self {
        Self::Set(Vec::new())
    }

    /// Classify this value.
    pub fn kind(&self) -> ValueKind {
        match self {
            Self::Null => ValueKind::Null,
            Self::Undefined => ValueKind::Undefined,
            Self::Bool(_) => ValueKind::Boolean,
            Self::Number(_) => ValueKind::Number,
            Self::String(_) => ValueKind::String,
            Self::Date(_) => ValueKind::Date,
            Self::Function(_) => ValueKind::Function,
            Self::Object(_) => ValueKind::Object,
            Self::Array(_) => ValueKind::Array,
            Self::Map(_) => ValueKind::Map,
            Self::Set(_) => ValueKind::Set,
        }
    }

    pub fn is_aggregate(&self) -> bool {
        self.kind().is_aggregate()
    }

    /// True for an aggregate with no members. Scalars are never "empty".
    pub fn is_empty_aggregate(&self) -> bool {
        match self {
            Self::Object(m) => m.is_empty(),
            Self::Array(items) | Self::Set(items) => items.is_empty(),
            Self::Map(entries) => entries.is_empty(),
            _ => false,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// The string form used when this value addresses a member.
    ///
    /// Integral numbers render without a fraction, so the number `0` and the
    /// string `"0"` yield the same key.
    pub fn key_string(&self) -> String {
        match self {
            Self::Null => "null".into(),
            Self::Undefined => "undefined".into(),
            Self::Bool(b) => b.to_string(),
            Self::Number(n) => number_key(*n),
            Self::String(s) => s.clone(),
            Self::Date(d) => d.to_rfc3339_opts(SecondsFormat::Millis, true),
            Self::Function(name) => name.clone(),
            Self::Object(_) | Self::Array(_) | Self::Map(_) | Self::Set(_) => {
                serde_json::to_string(self).unwrap_or_default()
            }
        }
    }

    /// Member lookup by key string.
    ///
    /// Objects match by key, arrays and sets by index, maps by the key string
    /// of each entry's key (the last matching entry wins).
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Self::Object(m) => m.get(key),
            Self::Array(items) | Self::Set(items) => {
                key.parse::<usize>().ok().and_then(|i| items.get(i))
            }
            Self::Map(entries) => entries
                .iter()
                .rev()
                .find(|(k, _)| k.key_string() == key)
                .map(|(_, v)| v),
            _ => None,
        }
    }

    /// Mutable counterpart of [`Value::get`].
    pub fn get_mut(&mut self, key: &str) -> Option<&mut Value> {
        match self {
            Self::Object(m) => m.get_mut(key),
            Self::Array(items) | Self::Set(items) => {
                key.parse::<usize>().ok().and_then(|i| items.get_mut(i))
            }
            Self::Map(entries) => entries
                .iter_mut()
                .rev()
                .find(|(k, _)| k.key_string() == key)
                .map(|(_, v)| v),
            _ => None,
        }
    }

    /// Resolve a dotted path such as `config.limits.0`.
    ///
    /// Path segments cannot themselves contain dots.
    pub fn lookup(&self, path: &str) -> Option<&Value> {
        path.split('.').try_fold(self, |node, segment| node.get(segment))
    }

    pub fn lookup_mut(&mut self, path: &str) -> Option<&mut Value> {
        path.split('.')
            .try_fold(self, |node, segment| node.get_mut(segment))
    }

    /// Insert or replace an object member. Returns the previous value.
    ///
    /// No-op returning `None` when `self` is not an object.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        match self {
            Self::Object(m) => m.insert(key.into(), value.into()),
            _ => None,
        }
    }

    /// Remove an object member. Returns the removed value.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        match self {
            Self::Object(m) => m.remove(key),
            _ => None,
        }
    }

    /// Insert a map entry, replacing the value of an equal key.
    pub fn map_insert(&mut self, key: impl Into<Value>, value: impl Into<Value>) -> Option<Value> {
        let Self::Map(entries) = self else {
            return None;
        };
        let key = key.into();
        let value = value.into();
        match entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, slot)) => Some(std::mem::replace(slot, value)),
            None => {
                entries.push((key, value));
                None
            }
        }
    }

    /// Add a member to a set. Returns false if it was already present.
    pub fn set_insert(&mut self, member: impl Into<Value>) -> bool {
        let Self::Set(items) = self else {
            return false;
        };
        let member = member.into();
        if items.contains(&member) {
            return false;
        }
        items.push(member);
        true
    }
}

fn number_key(n: f64) -> String {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else if n.is_nan() {
        "NaN".into()
    } else if n.is_infinite() {
        String::from(if n > 0.0 { "Infinity" } else { "-Infinity" })
    } else {
        n.to_string()
    }
}

// ── Conversions ─────────────────────────────────────────────────────────

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => Self::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Self::String(s),
            serde_json::Value::Array(items) => {
                Self::Array(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(m) => {
                Self::Object(m.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::Number(n as f64)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(d: DateTime<Utc>) -> Self {
        Self::Date(d)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Self::Array(items)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(m: BTreeMap<String, Value>) -> Self {
        Self::Object(m)
    }
}

// ── Canonical serde form ────────────────────────────────────────────────

const TAG_UNDEFINED: &str = "$undefined";
const TAG_DATE: &str = "$date";
const TAG_FUNCTION: &str = "$function";
const TAG_MAP: &str = "$map";
const TAG_SET: &str = "$set";
/// Wraps a one-key object whose key is itself a tag.
const TAG_OBJECT: &str = "$object";

const TAGS: [&str; 6] = [TAG_UNDEFINED, TAG_DATE, TAG_FUNCTION, TAG_MAP, TAG_SET, TAG_OBJECT];

fn is_tag(key: &str) -> bool {
    TAGS.contains(&key)
}

fn tagged<S: Serializer, T: Serialize + ?Sized>(
    serializer: S,
    tag: &str,
    value: &T,
) -> Result<S::Ok, S::Error> {
    let mut map = serializer.serialize_map(Some(1))?;
    map.serialize_entry(tag, value)?;
    map.end()
}

/// Type-preserving JSON form. Non-JSON kinds become single-key `$tag` objects;
/// a user object whose only key is one of those tags is wrapped in `$object`
/// so it reads back as an object.
impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Null => serializer.serialize_unit(),
            Self::Undefined => tagged(serializer, TAG_UNDEFINED, &true),
            Self::Bool(b) => serializer.serialize_bool(*b),
            Self::Number(n) => serializer.serialize_f64(*n),
            Self::String(s) => serializer.serialize_str(s),
            Self::Date(d) => tagged(
                serializer,
                TAG_DATE,
                &d.to_rfc3339_opts(SecondsFormat::AutoSi, true),
            ),
            Self::Function(name) => tagged(serializer, TAG_FUNCTION, name),
            Self::Object(m) if m.len() == 1 && m.keys().all(|k| is_tag(k)) => {
                tagged(serializer, TAG_OBJECT, m)
            }
            Self::Object(m) => {
                let mut map = serializer.serialize_map(Some(m.len()))?;
                for (k, v) in m {
                    map.serialize_entry(k, v)?;
                }
                map.end()
            }
            Self::Array(items) => items.serialize(serializer),
            Self::Map(entries) => tagged(serializer, TAG_MAP, entries),
            Self::Set(items) => tagged(serializer, TAG_SET, items),
        }
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let json = serde_json::Value::deserialize(deserializer)?;
        from_canonical(json).map_err(serde::de::Error::custom)
    }
}

fn from_canonical(json: serde_json::Value) -> Result<Value, String> {
    match json {
        serde_json::Value::Array(items) => items
            .into_iter()
            .map(from_canonical)
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        serde_json::Value::Object(mut m) if m.len() == 1 => {
            let Some(tag) = m.keys().next().cloned() else {
                return Ok(Value::object());
            };
            let Some(inner) = m.remove(&tag) else {
                return Ok(Value::object());
            };
            match tag.as_str() {
                TAG_UNDEFINED => Ok(Value::Undefined),
                TAG_DATE => {
                    let raw = inner.as_str().ok_or("'$date' must be a string")?;
                    DateTime::parse_from_rfc3339(raw)
                        .map(|d| Value::Date(d.with_timezone(&Utc)))
                        .map_err(|e| format!("invalid '$date': {e}"))
                }
                TAG_FUNCTION => inner
                    .as_str()
                    .map(|name| Value::Function(name.to_string()))
                    .ok_or_else(|| "'$function' must be a string".to_string()),
                TAG_MAP => {
                    let serde_json::Value::Array(entries) = inner else {
                        return Err("'$map' must be an array of pairs".into());
                    };
                    let mut out = Vec::with_capacity(entries.len());
                    for entry in entries {
                        match entry {
                            serde_json::Value::Array(pair) if pair.len() == 2 => {
                                let mut pair = pair.into_iter();
                                let k = pair.next().map(from_canonical).transpose()?;
                                let v = pair.next().map(from_canonical).transpose()?;
                                if let (Some(k), Some(v)) = (k, v) {
                                    out.push((k, v));
                                }
                            }
                            _ => return Err("'$map' entries must be [key, value] pairs".into()),
                        }
                    }
                    Ok(Value::Map(out))
                }
                TAG_OBJECT => {
                    let serde_json::Value::Object(members) = inner else {
                        return Err("'$object' must be an object".into());
                    };
                    members
                        .into_iter()
                        .map(|(k, v)| from_canonical(v).map(|v| (k, v)))
                        .collect::<Result<BTreeMap<_, _>, _>>()
                        .map(Value::Object)
                }
                TAG_SET => {
                    let serde_json::Value::Array(items) = inner else {
                        return Err("'$set' must be an array".into());
                    };
                    items
                        .into_iter()
                        .map(from_canonical)
                        .collect::<Result<Vec<_>, _>>()
                        .map(Value::Set)
                }
                _ => {
                    let mut object = BTreeMap::new();
                    object.insert(tag, from_canonical(inner)?);
                    Ok(Value::Object(object))
                }
            }
        }
        serde_json::Value::Object(m) => m
            .into_iter()
            .map(|(k, v)| from_canonical(v).map(|v| (k, v)))
            .collect::<Result<BTreeMap<_, _>, _>>()
            .map(Value::Object),
        scalar => Ok(Value::from(scalar)),
    }
}
