//! Content fingerprints of a system snapshot.
//!
//! A fingerprint is the SHA-256 of the canonical JSON encoding of the sorted
//! `(fullname, value)` leaf pairs. Function leaves are skipped. Sorting by
//! fullname happens before encoding, so native insertion order never affects
//! the result.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{AnomalyError, AnomalyResult};
use crate::keys::{extract, LeafKey};
use crate::value::{Value, ValueKind};

/// Hex-encoded 256-bit content hash.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Parse a 64-character hex digest.
    pub fn from_hex(hex: &str) -> AnomalyResult<Self> {
        if hex.len() != 64 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(AnomalyError::InvalidParams(format!(
                "fingerprint must be 64 hex characters, got '{hex}'"
            )));
        }
        Ok(Self(hex.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex characters, for logs.
    pub fn short(&self) -> &str {
        &self.0[..12]
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self.short())
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Fingerprint {
    type Error = AnomalyError;

    fn try_from(hex: String) -> Result<Self, Self::Error> {
        Self::from_hex(&hex)
    }
}

impl From<Fingerprint> for String {
    fn from(fp: Fingerprint) -> Self {
        fp.0
    }
}

/// Fingerprint `system`, optionally restricted to the given dotted paths.
///
/// Every restricted path must name an extracted, non-function leaf;
/// otherwise [`AnomalyError::MissingFingerprintKeys`] lists the ones missing.
pub fn fingerprint(system: &Value, keys: Option<&[String]>) -> AnomalyResult<Fingerprint> {
    let mut leaves: Vec<LeafKey> = extract(system)?
        .into_iter()
        .filter(|k| k.kind != ValueKind::Function)
        .collect();
    leaves.sort();

    if let Some(keys) = keys {
        let wanted: BTreeSet<&str> = keys.iter().map(String::as_str).collect();
        let present: BTreeSet<String> = leaves.iter().map(LeafKey::fullname).collect();
        let missing: Vec<String> = wanted
            .iter()
            .filter(|k| !present.contains(**k))
            .map(|k| k.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(AnomalyError::MissingFingerprintKeys(missing));
        }
        leaves.retain(|k| wanted.contains(k.fullname().as_str()));
    }

    let pairs: Vec<(String, &Value)> = leaves
        .iter()
        .filter_map(|k| k.value.as_ref().map(|v| (k.fullname(), v)))
        .collect();
    let payload = serde_json::to_vec(&pairs)?;

    let mut hasher = Sha256::new();
    hasher.update(&payload);
    Ok(Fingerprint(format!("{:x}", hasher.finalize())))
}
