//! Error types for the remediation lifecycle.
//!
//! Errors fall into two groups. Usage faults (see
//! [`AnomalyError::is_usage_fault`]) indicate a caller bug and always
//! propagate. Everything else is a runtime fault that the
//! [`Processor`](crate::Processor) absorbs by reverting and pausing the
//! anomaly.

use thiserror::Error;

use crate::fingerprint::Fingerprint;
use crate::types::{Activity, AnomalyState};
use crate::value::ValueKind;

/// Errors that can occur while driving an anomaly through its lifecycle.
#[derive(Debug, Error)]
pub enum AnomalyError {
    /// A lifecycle operation was invoked from a state that does not allow it.
    #[error("cannot {operation} from state '{state}'")]
    IllegalTransition {
        operation: &'static str,
        state: AnomalyState,
    },

    /// An unrecognized state name.
    #[error("invalid anomaly state: '{0}'")]
    InvalidState(String),

    /// Malformed construction parameters.
    #[error("invalid construction parameters: {0}")]
    InvalidParams(String),

    /// A required hook was not supplied by the anomaly class.
    #[error("not implemented: {0}")]
    NotImplemented(String),

    /// Key extraction was asked to flatten a non-aggregate value.
    #[error("unsupported value type for key extraction: {0}")]
    UnsupportedType(ValueKind),

    /// Configured fingerprint keys that do not exist in the system.
    #[error("fingerprint keys not found in system: {}", .0.join(", "))]
    MissingFingerprintKeys(Vec<String>),

    /// The system matches neither recorded fingerprint, so the action cannot be undone safely.
    #[error(
        "unknown system state: fingerprint {} matches neither the pre-action nor the post-action fingerprint",
        .found.short()
    )]
    UnknownState { found: Fingerprint },

    /// The revert hook ran but the pre-action fingerprint was not restored.
    #[error(
        "reversion incomplete: expected fingerprint {}, found {}",
        .expected.short(),
        .found.short()
    )]
    ReversionIncomplete {
        expected: Fingerprint,
        found: Fingerprint,
    },

    /// A lifecycle hook reported failure.
    #[error("{phase} hook failed: {message}")]
    Hook { phase: Activity, message: String },

    /// The system lost the shape needed to fingerprint it after a
    /// pre-action fingerprint was recorded.
    #[error("system cannot be fingerprinted during {phase}: {source}")]
    Unfingerprintable {
        phase: Activity,
        source: Box<AnomalyError>,
    },

    /// A persisted record names a class the processor does not know.
    #[error("anomaly class not registered: {0}")]
    UnknownClass(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl AnomalyError {
    /// Wrap a hook failure, keeping the full error chain in the message.
    pub fn hook(phase: Activity, err: &anyhow::Error) -> Self {
        Self::Hook {
            phase,
            message: format!("{err:#}"),
        }
    }

    /// Whether this error signals a caller bug rather than a runtime condition.
    ///
    /// Usage faults are never absorbed by the processor.
    pub fn is_usage_fault(&self) -> bool {
        matches!(
            self,
            Self::IllegalTransition { .. }
                | Self::InvalidState(_)
                | Self::InvalidParams(_)
                | Self::NotImplemented(_)
                | Self::UnsupportedType(_)
                | Self::MissingFingerprintKeys(_)
                | Self::UnknownClass(_)
        )
    }
}

/// Convenience result type for remediation operations.
pub type AnomalyResult<T> = Result<T, AnomalyError>;
