//! Extension points supplied by concrete anomaly kinds.
//!
//! An [`AnomalyClass`] decides whether a deficiency is present and creates
//! per-instance [`AnomalyHooks`] that perform, undo and evaluate the fix.
//! Hooks signal failure by returning an error; the anomaly records it and
//! the processor decides whether to revert.

use async_trait::async_trait;

use crate::error::{AnomalyError, AnomalyResult};
use crate::value::Value;

/// Per-instance lifecycle hooks. Every hook defaults to a successful no-op.
#[async_trait]
pub trait AnomalyHooks: Send {
    /// Apply the fix, mutating `system` in place.
    async fn perform_action(
        &mut self,
        _system: &mut Value,
        _opts: &serde_json::Value,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    /// Undo a previously applied fix.
    async fn perform_revert(
        &mut self,
        _system: &mut Value,
        _opts: &serde_json::Value,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    /// Check that the fix achieved its goal. Return an error to reject it.
    async fn perform_evaluate(
        &mut self,
        _system: &Value,
        _opts: &serde_json::Value,
    ) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Hooks that do nothing.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopHooks;

impl AnomalyHooks for NoopHooks {}

/// A detectable kind of anomaly.
#[async_trait]
pub trait AnomalyClass: Send + Sync {
    /// Stable name, recorded on every instance and used to restore records.
    fn name(&self) -> &str;

    fn description(&self) -> String {
        String::new()
    }

    /// Restrict fingerprints of new instances to these dotted paths.
    fn fingerprint_keys(&self) -> Option<Vec<String>> {
        None
    }

    /// Whether the deficiency is present in `system`.
    ///
    /// The default reports [`AnomalyError::NotImplemented`].
    async fn detect(&self, _system: &Value, _opts: &serde_json::Value) -> AnomalyResult<bool> {
        Err(AnomalyError::NotImplemented(format!(
            "{}: detect",
            self.name()
        )))
    }

    /// Create the hooks for a new instance.
    fn instantiate(&self) -> Box<dyn AnomalyHooks> {
        Box::new(NoopHooks)
    }
}
