//! End-to-end test: failed remediations are reverted, verified by fingerprint,
//! and anomalies that could not be restored are marked dirty.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use maple_worldline_remediation::{
    Anomaly, AnomalyClass, AnomalyError, AnomalyHooks, AnomalyResult, AnomalyState, LogLevel,
    Processor, Value,
};
use serde_json::json;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Rewrites `test`, then fails. Undo restores `test` only when `undo` is set.
#[derive(Clone, Default)]
struct BrokenFix {
    undo: bool,
    reverts: Arc<AtomicUsize>,
}

struct BrokenFixHooks {
    undo: bool,
    reverts: Arc<AtomicUsize>,
}

#[async_trait]
impl AnomalyHooks for BrokenFixHooks {
    async fn perform_action(
        &mut self,
        system: &mut Value,
        _opts: &serde_json::Value,
    ) -> anyhow::Result<()> {
        system.insert("test", "modified");
        anyhow::bail!("downstream check rejected the change")
    }

    async fn perform_revert(
        &mut self,
        system: &mut Value,
        _opts: &serde_json::Value,
    ) -> anyhow::Result<()> {
        self.reverts.fetch_add(1, Ordering::SeqCst);
        if self.undo {
            system.insert("test", "test");
        }
        Ok(())
    }
}

#[async_trait]
impl AnomalyClass for BrokenFix {
    fn name(&self) -> &str {
        "broken-fix"
    }

    async fn detect(&self, system: &Value, _opts: &serde_json::Value) -> AnomalyResult<bool> {
        Ok(system.lookup("test").is_some())
    }

    fn instantiate(&self) -> Box<dyn AnomalyHooks> {
        Box::new(BrokenFixHooks {
            undo: self.undo,
            reverts: self.reverts.clone(),
        })
    }
}

fn system() -> Value {
    Value::from(json!({"test": "test", "config": {"retries": 3}}))
}

fn opts() -> serde_json::Value {
    serde_json::Value::Null
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn no_undo_hook_leaves_anomaly_dirty() {
    crate::init_tracing();
    let class = BrokenFix::default();
    let mut system = system();
    let mut processor = Processor::new().with_class(class.clone());
    processor.detect(&system, &opts()).await.unwrap();
    processor.process(&mut system, &opts()).await.unwrap();

    let anomaly = &processor.anomalies()[0];
    assert!(anomaly.is_paused());
    assert!(anomaly.is_dirty());
    assert_eq!(anomaly.state(), AnomalyState::Postaction);
    assert_eq!(class.reverts.load(Ordering::SeqCst), 1);
    assert!(anomaly.history().any(|h| h.level == LogLevel::Warn));
}

#[tokio::test]
async fn undo_hook_restores_and_stays_clean() {
    let class = BrokenFix {
        undo: true,
        ..Default::default()
    };
    let mut system = system();
    let mut processor = Processor::new().with_class(class.clone());
    processor.detect(&system, &opts()).await.unwrap();
    processor.process(&mut system, &opts()).await.unwrap();

    let anomaly = &processor.anomalies()[0];
    assert!(anomaly.is_paused());
    assert!(!anomaly.is_dirty());
    assert_eq!(anomaly.state(), AnomalyState::Preaction);
    assert_eq!(system, self::system());
}

#[tokio::test]
async fn resumed_anomaly_is_processed_again() {
    let class = BrokenFix {
        undo: true,
        ..Default::default()
    };
    let mut system = system();
    let mut processor = Processor::new().with_class(class.clone());
    let ids = processor.detect(&system, &opts()).await.unwrap();
    processor.process(&mut system, &opts()).await.unwrap();
    assert!(processor.next_eligible().is_none());

    processor.get_mut(&ids[0]).unwrap().resume("operator retry");
    let again = processor.process(&mut system, &opts()).await.unwrap();
    assert_eq!(again, ids);
    assert_eq!(class.reverts.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn concurrent_drift_blocks_revert() {
    let class = BrokenFix {
        undo: true,
        ..Default::default()
    };
    let mut system = system();
    let mut anomaly = Anomaly::new(&class);

    assert!(anomaly.action(&mut system, &opts()).await.is_err());
    *system.lookup_mut("config.retries").unwrap() = Value::from(5i64);

    let err = anomaly.revert(&mut system, &opts()).await.unwrap_err();
    assert!(matches!(err, AnomalyError::UnknownState { .. }));
    assert_eq!(class.reverts.load(Ordering::SeqCst), 0);
    assert_eq!(system.lookup("test").and_then(Value::as_str), Some("modified"));
}

#[tokio::test]
async fn restricted_keys_tolerate_unrelated_drift() {
    let class = BrokenFix {
        undo: true,
        ..Default::default()
    };
    let mut system = system();
    let mut anomaly = Anomaly::from_json(&class, json!({"fingerprint_keys": ["test"]})).unwrap();

    assert!(anomaly.action(&mut system, &opts()).await.is_err());
    *system.lookup_mut("config.retries").unwrap() = Value::from(5i64);

    anomaly.revert(&mut system, &opts()).await.unwrap();
    assert_eq!(anomaly.state(), AnomalyState::Preaction);
    assert_eq!(class.reverts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn unknown_fingerprint_key_propagates_from_processor() {
    crate::init_tracing();
    let class = BrokenFix::default();
    let mut system = system();
    let mut processor = Processor::new().with_class(class.clone());
    processor.push(Anomaly::from_json(&class, json!({"fingerprint_keys": ["nope"]})).unwrap());

    let err = processor.process(&mut system, &opts()).await.unwrap_err();
    assert!(err.is_usage_fault());
    assert!(matches!(err, AnomalyError::MissingFingerprintKeys(ref keys) if keys == &["nope".to_string()]));
    assert_eq!(system, self::system());
    assert!(!processor.anomalies()[0].is_paused());
}
