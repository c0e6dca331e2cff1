//! End-to-end test: queued anomalies survive a round trip through their
//! persisted JSON envelopes, including the fingerprints needed to revert.

use async_trait::async_trait;
use maple_worldline_remediation::{
    AnomalyClass, AnomalyError, AnomalyHooks, AnomalyRecord, AnomalyResult, AnomalyState,
    Processor, ProcessorConfig, Value,
};
use serde_json::json;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

struct Counter;

struct CounterHooks;

#[async_trait]
impl AnomalyHooks for CounterHooks {
    async fn perform_action(
        &mut self,
        system: &mut Value,
        _opts: &serde_json::Value,
    ) -> anyhow::Result<()> {
        system.insert("count", 0i64);
        Ok(())
    }

    async fn perform_revert(
        &mut self,
        system: &mut Value,
        opts: &serde_json::Value,
    ) -> anyhow::Result<()> {
        let original = opts
            .get("original")
            .and_then(serde_json::Value::as_i64)
            .ok_or_else(|| anyhow::anyhow!("missing original count"))?;
        system.insert("count", original);
        Ok(())
    }
}

#[async_trait]
impl AnomalyClass for Counter {
    fn name(&self) -> &str {
        "negative-counter"
    }

    async fn detect(&self, system: &Value, _opts: &serde_json::Value) -> AnomalyResult<bool> {
        Ok(system
            .lookup("count")
            .and_then(Value::as_f64)
            .is_some_and(|n| n < 0.0))
    }

    fn instantiate(&self) -> Box<dyn AnomalyHooks> {
        Box::new(CounterHooks)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn restored_anomaly_reverts_after_reload() {
    crate::init_tracing();
    let mut system = Value::from(json!({"count": -4}));
    let mut processor = Processor::new().with_class(Counter);
    let ids = processor.detect(&system, &serde_json::Value::Null).await.unwrap();

    let anomaly = processor.get_mut(&ids[0]).unwrap();
    anomaly
        .action(&mut system, &serde_json::Value::Null)
        .await
        .unwrap();
    assert_eq!(anomaly.state(), AnomalyState::Postaction);

    let saved = serde_json::to_string(&processor.records()).unwrap();
    let records: Vec<AnomalyRecord> = serde_json::from_str(&saved).unwrap();

    let mut reloaded = Processor::new()
        .with_config(ProcessorConfig {
            max_history: Some(64),
            ..Default::default()
        })
        .with_class(Counter);
    reloaded.restore_records(records).unwrap();

    let anomaly = reloaded.get_mut(&ids[0]).unwrap();
    assert_eq!(anomaly.state(), AnomalyState::Postaction);
    anomaly
        .revert(&mut system, &json!({"original": -4}))
        .await
        .unwrap();
    assert_eq!(system, Value::from(json!({"count": -4})));
    assert_eq!(reloaded.summary().preaction, 1);
}

#[tokio::test]
async fn envelope_has_documented_shape() {
    let system = Value::from(json!({"count": -1}));
    let mut processor = Processor::new().with_class(Counter);
    processor.detect(&system, &serde_json::Value::Null).await.unwrap();

    let json = serde_json::to_value(&processor.anomalies()[0]).unwrap();
    for field in [
        "id",
        "description",
        "name",
        "state",
        "history",
        "paused",
        "dirty",
        "fingerprint_keys",
        "fingerprints",
    ] {
        assert!(json.get(field).is_some(), "missing '{field}'");
    }
    assert_eq!(json["state"], "preaction");
    assert_eq!(json["fingerprint_keys"], serde_json::Value::Null);
}

#[test]
fn unregistered_class_is_rejected() {
    let record: AnomalyRecord = serde_json::from_value(json!({
        "id": "abc",
        "description": "",
        "name": "who-knows",
        "state": "preaction",
        "history": [],
        "paused": false,
        "dirty": false,
        "fingerprint_keys": null,
    }))
    .unwrap();

    let mut processor = Processor::new().with_class(Counter);
    let err = processor.restore_records(vec![record]).unwrap_err();
    assert!(matches!(err, AnomalyError::UnknownClass(ref name) if name == "who-knows"));
    assert!(err.is_usage_fault());
}
