//! Anomaly processor: detection, queueing and the remediation loop.
//!
//! Pipeline for each eligible anomaly (not paused, in `preaction`):
//! 1. `action`
//! 2. `evaluate` → `resolved`
//! 3. On hook failure: `revert`, then pause with the failure message
//! 4. If the revert fails too: pause and mark dirty
//!
//! Usage faults (illegal transitions, bad fingerprint keys, missing
//! detection) are never absorbed; they propagate to the caller.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::anomaly::Anomaly;
use crate::error::{AnomalyError, AnomalyResult};
use crate::events::{EventEnvelope, EventSink, DEFAULT_EVENT_CAPACITY};
use crate::hooks::AnomalyClass;
use crate::types::{AnomalyId, AnomalyRecord, AnomalyState};
use crate::value::Value;

// ── Configuration ───────────────────────────────────────────────────────

/// Configuration for the anomaly processor.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessorConfig {
    /// Broadcast capacity of the lifecycle event channel.
    pub event_capacity: usize,
    /// Cap each queued anomaly's history to the most recent N entries.
    pub max_history: Option<usize>,
    /// Upper bound on `process_one` calls in a single sweep.
    pub max_iterations: usize,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            event_capacity: DEFAULT_EVENT_CAPACITY,
            max_history: None,
            max_iterations: 10_000,
        }
    }
}

// ── Summary ─────────────────────────────────────────────────────────────

/// Summary statistics over the queue.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessorSummary {
    pub total: usize,
    pub preaction: usize,
    pub postaction: usize,
    pub resolved: usize,
    /// Paused anomalies, in any state.
    pub paused: usize,
    /// Anomalies whose revert could not restore the pre-action state.
    pub dirty: usize,
}

impl fmt::Display for ProcessorSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "total={}, preaction={}, postaction={}, resolved={}, paused={}, dirty={}",
            self.total, self.preaction, self.postaction, self.resolved, self.paused, self.dirty
        )
    }
}

// ── Processor ───────────────────────────────────────────────────────────

/// Owns registered anomaly classes and the queue of detected anomalies.
pub struct Processor {
    classes: Vec<Arc<dyn AnomalyClass>>,
    anomalies: Vec<Anomaly>,
    events: EventSink,
    config: ProcessorConfig,
}

impl Processor {
    pub fn new() -> Self {
        Self {
            classes: Vec::new(),
            anomalies: Vec::new(),
            events: EventSink::default(),
            config: ProcessorConfig::default(),
        }
    }

    /// Create with custom configuration.
    ///
    /// Rebuilds the event channel at the configured capacity; existing
    /// subscribers stop receiving events.
    pub fn with_config(mut self, config: ProcessorConfig) -> Self {
        self.events = EventSink::new(config.event_capacity);
        for anomaly in &mut self.anomalies {
            anomaly.set_event_sink(self.events.clone());
        }
        self.config = config;
        self
    }

    /// Builder form of [`Processor::register`].
    pub fn with_class(mut self, class: impl AnomalyClass + 'static) -> Self {
        self.register(class);
        self
    }

    /// Register a class. Detection runs classes in registration order.
    pub fn register(&mut self, class: impl AnomalyClass + 'static) {
        debug!(class = class.name(), "registered anomaly class");
        self.classes.push(Arc::new(class));
    }

    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    /// Run every class's detector against `system` and queue an instance
    /// for each positive result. Never removes queued anomalies.
    pub async fn detect(
        &mut self,
        system: &Value,
        opts: &serde_json::Value,
    ) -> AnomalyResult<Vec<AnomalyId>> {
        let classes = self.classes.clone();
        let mut detected = Vec::new();
        for class in &classes {
            if class.detect(system, opts).await? {
                let anomaly = Anomaly::new(class.as_ref());
                info!(anomaly_id = %anomaly.id(), class = class.name(), "anomaly detected");
                detected.push(anomaly.id().clone());
                self.push(anomaly);
            }
        }
        Ok(detected)
    }

    /// Queue an anomaly directly, attaching the processor's event channel.
    ///
    /// Any sink set with [`Anomaly::with_events`] is replaced: from here on
    /// the anomaly's events reach [`Processor::subscribe`] receivers only.
    pub fn push(&mut self, anomaly: Anomaly) {
        let mut anomaly = match (self.config.max_history, anomaly.max_history()) {
            (Some(max), None) => anomaly.with_max_history(max),
            _ => anomaly,
        };
        anomaly.set_event_sink(self.events.clone());
        self.anomalies.push(anomaly);
    }

    // ── Queries ─────────────────────────────────────────────────────────

    pub fn anomalies(&self) -> &[Anomaly] {
        &self.anomalies
    }

    pub fn get(&self, id: &AnomalyId) -> Option<&Anomaly> {
        self.anomalies.iter().find(|a| a.id() == id)
    }

    pub fn get_mut(&mut self, id: &AnomalyId) -> Option<&mut Anomaly> {
        self.anomalies.iter_mut().find(|a| a.id() == id)
    }

    pub fn len(&self) -> usize {
        self.anomalies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.anomalies.is_empty()
    }

    /// Anomalies whose state is named `state`.
    pub fn anomalies_with_state(&self, state: &str) -> AnomalyResult<Vec<&Anomaly>> {
        Ok(self.in_state(state.parse()?))
    }

    pub fn in_state(&self, state: AnomalyState) -> Vec<&Anomaly> {
        self.anomalies.iter().filter(|a| a.state() == state).collect()
    }

    /// First anomaly that is not paused and still awaiting action.
    pub fn next_eligible(&self) -> Option<&Anomaly> {
        self.anomalies.iter().find(|a| is_eligible(a))
    }

    /// Compute summary statistics.
    pub fn summary(&self) -> ProcessorSummary {
        let mut s = ProcessorSummary {
            total: self.anomalies.len(),
            ..Default::default()
        };

        for a in &self.anomalies {
            match a.state() {
                AnomalyState::Preaction => s.preaction += 1,
                AnomalyState::Postaction => s.postaction += 1,
                AnomalyState::Resolved => s.resolved += 1,
            }
            if a.is_paused() {
                s.paused += 1;
            }
            if a.is_dirty() {
                s.dirty += 1;
            }
        }

        s
    }

    /// Receive every event from every queued anomaly.
    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.events.subscribe()
    }

    // ── Remediation loop ────────────────────────────────────────────────

    /// Drive the next eligible anomaly through its lifecycle.
    ///
    /// Returns `None` when nothing is eligible.
    pub async fn process_one(
        &mut self,
        system: &mut Value,
        opts: &serde_json::Value,
    ) -> AnomalyResult<Option<AnomalyId>> {
        let Some(index) = self.anomalies.iter().position(is_eligible) else {
            return Ok(None);
        };
        let anomaly = &mut self.anomalies[index];
        let id = anomaly.id().clone();

        let outcome = match anomaly.action(system, opts).await {
            Ok(()) => anomaly.evaluate(system, opts).await,
            Err(e) => Err(e),
        };

        let err = match outcome {
            Ok(()) => {
                info!(anomaly_id = %id, "anomaly resolved");
                return Ok(Some(id));
            }
            Err(e) if e.is_usage_fault() => return Err(e),
            Err(e) => e,
        };

        warn!(anomaly_id = %id, error = %err, "remediation failed, reverting");
        match anomaly.revert(system, opts).await {
            Ok(()) => anomaly.pause(err.to_string()),
            Err(revert_err) => {
                warn!(anomaly_id = %id, error = %revert_err, "revert failed");
                anomaly.pause(format!("{err}; revert failed: {revert_err}"));
                anomaly.set_dirty(true);
                if revert_err.is_usage_fault() {
                    return Err(revert_err);
                }
            }
        }

        Ok(Some(id))
    }

    /// Process eligible anomalies until none remain.
    ///
    /// Returns the ids processed, in order. A sweep never revisits an
    /// anomaly it paused.
    pub async fn process(
        &mut self,
        system: &mut Value,
        opts: &serde_json::Value,
    ) -> AnomalyResult<Vec<AnomalyId>> {
        let mut processed = Vec::new();
        for _ in 0..self.config.max_iterations {
            match self.process_one(system, opts).await? {
                Some(id) => processed.push(id),
                None => return Ok(processed),
            }
        }
        if self.next_eligible().is_some() {
            warn!(
                max_iterations = self.config.max_iterations,
                processed = processed.len(),
                "sweep stopped at iteration limit"
            );
        }
        Ok(processed)
    }

    // ── Queue maintenance ───────────────────────────────────────────────

    /// Remove and return resolved anomalies.
    pub fn drain_resolved(&mut self) -> Vec<Anomaly> {
        let (resolved, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.anomalies)
            .into_iter()
            .partition(|a| a.state() == AnomalyState::Resolved);
        self.anomalies = kept;
        resolved
    }

    /// Persisted envelopes for every queued anomaly.
    pub fn records(&self) -> Vec<AnomalyRecord> {
        self.anomalies.iter().map(Anomaly::to_record).collect()
    }

    /// Queue anomalies from persisted envelopes.
    ///
    /// Each record's class must be registered. Nothing is queued unless
    /// every record restores.
    pub fn restore_records(&mut self, records: Vec<AnomalyRecord>) -> AnomalyResult<Vec<AnomalyId>> {
        let restored = records
            .into_iter()
            .map(|record| {
                let class = self
                    .classes
                    .iter()
                    .find(|c| c.name() == record.name)
                    .ok_or_else(|| AnomalyError::UnknownClass(record.name.clone()))?;
                Anomaly::restore(class.as_ref(), record)
            })
            .collect::<AnomalyResult<Vec<_>>>()?;

        let ids = restored.iter().map(|a| a.id().clone()).collect();
        for anomaly in restored {
            self.push(anomaly);
        }
        Ok(ids)
    }
}

impl Default for Processor {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Processor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let classes: Vec<&str> = self.classes.iter().map(|c| c.name()).collect();
        f.debug_struct("Processor")
            .field("classes", &classes)
            .field("anomalies", &self.anomalies)
            .field("config", &self.config)
            .finish()
    }
}

fn is_eligible(anomaly: &Anomaly) -> bool {
    !anomaly.is_paused() && anomaly.state() == AnomalyState::Preaction
}
