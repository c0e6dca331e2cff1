//! Core type definitions for the remediation lifecycle.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AnomalyError, AnomalyResult};
use crate::fingerprint::Fingerprint;

// ── Identifier Types ────────────────────────────────────────────────────

/// Unique identifier for an anomaly instance.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AnomalyId(pub String);

impl AnomalyId {
    /// Generate a new unique anomaly ID.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for AnomalyId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AnomalyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "anomaly:{}", self.0)
    }
}

// ── Anomaly State ───────────────────────────────────────────────────────

/// Lifecycle state of an anomaly.
///
/// `Preaction` is initial. `Resolved` is terminal for a successful run;
/// failures return to `Preaction` with the anomaly paused.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnomalyState {
    #[default]
    Preaction,
    Postaction,
    Resolved,
}

impl AnomalyState {
    pub const ALL: [AnomalyState; 3] = [Self::Preaction, Self::Postaction, Self::Resolved];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Preaction => "preaction",
            Self::Postaction => "postaction",
            Self::Resolved => "resolved",
        }
    }
}

impl fmt::Display for AnomalyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AnomalyState {
    type Err = AnomalyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| AnomalyError::InvalidState(s.to_string()))
    }
}

// ── Activity ────────────────────────────────────────────────────────────

/// Major lifecycle phase, reported in activity events and hook errors.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Activity {
    Action,
    Evaluate,
    Revert,
}

impl fmt::Display for Activity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Action => write!(f, "action"),
            Self::Evaluate => write!(f, "evaluate"),
            Self::Revert => write!(f, "revert"),
        }
    }
}

// ── History ─────────────────────────────────────────────────────────────

/// Severity of a history entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Debug => write!(f, "debug"),
            Self::Info => write!(f, "info"),
            Self::Warn => write!(f, "warn"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// One append-only audit record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub level: LogLevel,
    pub message: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl HistoryEntry {
    pub fn new(level: LogLevel, message: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            message: message.into(),
            data,
        }
    }
}

// ── Fingerprints ────────────────────────────────────────────────────────

/// Fingerprints recorded around the action hook.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprints {
    pub preaction: Option<Fingerprint>,
    pub postaction: Option<Fingerprint>,
}

// ── Persisted Envelope ──────────────────────────────────────────────────

/// Serialized form of an anomaly.
///
/// `fingerprints` is part of the envelope so that a restored anomaly can
/// still be reverted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AnomalyRecord {
    pub id: AnomalyId,
    pub description: String,
    pub name: String,
    pub state: AnomalyState,
    pub history: Vec<HistoryEntry>,
    pub paused: bool,
    pub dirty: bool,
    pub fingerprint_keys: Option<Vec<String>>,
    #[serde(default)]
    pub fingerprints: Fingerprints,
}

// ── Construction Parameters ─────────────────────────────────────────────

/// Optional construction parameters. Unset fields take their defaults:
/// fresh id, class description, `preaction`, not paused, not dirty, the
/// class's fingerprint keys, no fingerprints, empty history.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AnomalyParams {
    pub id: Option<AnomalyId>,
    pub description: Option<String>,
    pub state: Option<AnomalyState>,
    pub paused: Option<bool>,
    pub dirty: Option<bool>,
    pub fingerprint_keys: Option<Vec<String>>,
    pub fingerprints: Option<Fingerprints>,
    pub history: Option<Vec<HistoryEntry>>,
}

impl AnomalyParams {
    /// Validate and decode untyped parameters.
    ///
    /// An unknown `state` is [`AnomalyError::InvalidState`]; a non-array
    /// `history` or `fingerprint_keys` is [`AnomalyError::InvalidParams`].
    pub fn from_json(json: serde_json::Value) -> AnomalyResult<Self> {
        let obj = match json {
            serde_json::Value::Null => return Ok(Self::default()),
            serde_json::Value::Object(obj) => obj,
            other => {
                return Err(AnomalyError::InvalidParams(format!(
                    "expected an object, found {other}"
                )))
            }
        };

        match obj.get("state") {
            None | Some(serde_json::Value::Null) => {}
            Some(serde_json::Value::String(s)) => {
                s.parse::<AnomalyState>()?;
            }
            Some(other) => return Err(AnomalyError::InvalidState(other.to_string())),
        }

        for field in ["history", "fingerprint_keys"] {
            match obj.get(field) {
                None | Some(serde_json::Value::Null) | Some(serde_json::Value::Array(_)) => {}
                Some(other) => {
                    return Err(AnomalyError::InvalidParams(format!(
                        "'{field}' must be an array, found {other}"
                    )))
                }
            }
        }

        serde_json::from_value(serde_json::Value::Object(obj))
            .map_err(|e| AnomalyError::InvalidParams(e.to_string()))
    }
}

impl From<AnomalyRecord> for AnomalyParams {
    fn from(record: AnomalyRecord) -> Self {
        Self {
            id: Some(record.id),
            description: Some(record.description),
            state: Some(record.state),
            paused: Some(record.paused),
            dirty: Some(record.dirty),
            fingerprint_keys: record.fingerprint_keys,
            fingerprints: Some(record.fingerprints),
            history: Some(record.history),
        }
    }
}
