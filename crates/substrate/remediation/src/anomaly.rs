//! The anomaly state machine.
//!
//! ```text
//!            action ok              evaluate ok
//!  preaction ─────────► postaction ───────────► resolved
//!      ▲                    │
//!      └──── revert ────────┘   (processor pauses on the way back)
//! ```
//!
//! `action` fingerprints the system before and after the hook. `revert`
//! uses those fingerprints to tell three situations apart:
//!
//! 1. nothing changed: return to `preaction` without calling the undo hook;
//! 2. the system is exactly as the action left it: undo, then require the
//!    pre-action fingerprint to be restored;
//! 3. anything else: refuse, since the undo hook would run against a state
//!    it was never written for.

use std::collections::VecDeque;
use std::fmt;

use chrono::Utc;
use serde::{Serialize, Serializer};
use serde_json::json;
use tracing::{debug, error, info, warn};

use crate::error::{AnomalyError, AnomalyResult};
use crate::events::{AnomalyEvent, EventEnvelope, EventSink};
use crate::fingerprint::{self, Fingerprint};
use crate::hooks::{AnomalyClass, AnomalyHooks};
use crate::types::{
    Activity, AnomalyId, AnomalyParams, AnomalyRecord, AnomalyState, Fingerprints, HistoryEntry,
    LogLevel,
};
use crate::value::Value;

/// One detected deficiency and its lifecycle.
pub struct Anomaly {
    id: AnomalyId,
    name: String,
    description: String,
    state: AnomalyState,
    paused: bool,
    dirty: bool,
    fingerprint_keys: Option<Vec<String>>,
    fingerprints: Fingerprints,
    history: VecDeque<HistoryEntry>,
    max_history: Option<usize>,
    hooks: Box<dyn AnomalyHooks>,
    events: Option<EventSink>,
}

impl Anomaly {
    /// A fresh anomaly of the given class.
    pub fn new(class: &dyn AnomalyClass) -> Self {
        Self::from_params(class, AnomalyParams::default())
    }

    /// Build from typed parameters; unset fields take class defaults.
    pub fn from_params(class: &dyn AnomalyClass, params: AnomalyParams) -> Self {
        Self {
            id: params.id.unwrap_or_default(),
            name: class.name().to_string(),
            description: params.description.unwrap_or_else(|| class.description()),
            state: params.state.unwrap_or_default(),
            paused: params.paused.unwrap_or(false),
            dirty: params.dirty.unwrap_or(false),
            fingerprint_keys: params.fingerprint_keys.or_else(|| class.fingerprint_keys()),
            fingerprints: params.fingerprints.unwrap_or_default(),
            history: params.history.unwrap_or_default().into(),
            max_history: None,
            hooks: class.instantiate(),
            events: None,
        }
    }

    /// Build from untyped parameters, validating their shape.
    pub fn from_json(class: &dyn AnomalyClass, params: serde_json::Value) -> AnomalyResult<Self> {
        Ok(Self::from_params(class, AnomalyParams::from_json(params)?))
    }

    /// Rebuild an anomaly from its persisted envelope.
    ///
    /// The record's `fingerprint_keys` are kept as saved; a `null` there
    /// does not fall back to the class's current keys.
    pub fn restore(class: &dyn AnomalyClass, record: AnomalyRecord) -> AnomalyResult<Self> {
        if record.name != class.name() {
            return Err(AnomalyError::InvalidParams(format!(
                "record '{}' belongs to class '{}', not '{}'",
                record.id.0,
                record.name,
                class.name()
            )));
        }
        let fingerprint_keys = record.fingerprint_keys.clone();
        let mut anomaly = Self::from_params(class, record.into());
        anomaly.fingerprint_keys = fingerprint_keys;
        Ok(anomaly)
    }

    /// Publish lifecycle events into `sink`.
    ///
    /// [`Processor::push`](crate::Processor::push) replaces this sink with
    /// the processor's own channel.
    pub fn with_events(mut self, sink: EventSink) -> Self {
        self.events = Some(sink);
        self
    }

    /// Keep at most `max` history entries, evicting the oldest.
    pub fn with_max_history(mut self, max: usize) -> Self {
        self.max_history = Some(max);
        self.trim_history();
        self
    }

    pub fn set_event_sink(&mut self, sink: EventSink) {
        self.events = Some(sink);
    }

    // ── Accessors ───────────────────────────────────────────────────────

    pub fn id(&self) -> &AnomalyId {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn state(&self) -> AnomalyState {
        self.state
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn fingerprint_keys(&self) -> Option<&[String]> {
        self.fingerprint_keys.as_deref()
    }

    pub fn fingerprints(&self) -> &Fingerprints {
        &self.fingerprints
    }

    pub fn history(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.history.iter()
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    pub(crate) fn max_history(&self) -> Option<usize> {
        self.max_history
    }

    /// Fingerprint `system` using this anomaly's restricted keys, if any.
    pub fn fingerprint(&self, system: &Value) -> AnomalyResult<Fingerprint> {
        fingerprint::fingerprint(system, self.fingerprint_keys.as_deref())
    }

    // ── Lifecycle ───────────────────────────────────────────────────────

    /// Apply the fix.
    ///
    /// Only valid from `preaction`. Once the hook has run the anomaly is in
    /// `postaction`, even if the hook failed or the mutated system can no
    /// longer be fingerprinted ([`AnomalyError::Unfingerprintable`], with no
    /// post-action fingerprint recorded).
    pub async fn action(
        &mut self,
        system: &mut Value,
        opts: &serde_json::Value,
    ) -> AnomalyResult<()> {
        if self.state != AnomalyState::Preaction {
            let err = AnomalyError::IllegalTransition {
                operation: "action",
                state: self.state,
            };
            return Err(self.fault(err));
        }

        let before = self.fingerprint(system).map_err(|e| self.fault(e))?;
        self.log(
            LogLevel::Debug,
            "recorded pre-action fingerprint",
            json!({ "fingerprint": before.as_str() }),
        );
        self.fingerprints = Fingerprints {
            preaction: Some(before),
            postaction: None,
        };

        self.activity(Activity::Action, 0);
        let outcome = self.hooks.perform_action(system, opts).await;

        // postaction even if the mutated system cannot be fingerprinted
        let after = self.fingerprint(system);
        if let Ok(fp) = &after {
            self.log(
                LogLevel::Debug,
                "recorded post-action fingerprint",
                json!({ "fingerprint": fp.as_str() }),
            );
        }
        self.fingerprints.postaction = after.as_ref().ok().cloned();
        self.transition(AnomalyState::Postaction);

        if let Err(e) = outcome {
            let hook_err = self.fault(AnomalyError::hook(Activity::Action, &e));
            if after.is_ok() {
                return Err(hook_err);
            }
        }

        match after {
            Ok(_) => {
                self.activity(Activity::Action, 100);
                Ok(())
            }
            Err(e) => {
                let err = AnomalyError::Unfingerprintable {
                    phase: Activity::Action,
                    source: Box::new(e),
                };
                Err(self.fault(err))
            }
        }
    }

    /// Undo the fix, verified by fingerprints.
    pub async fn revert(
        &mut self,
        system: &mut Value,
        opts: &serde_json::Value,
    ) -> AnomalyResult<()> {
        let Some(preaction) = self.fingerprints.preaction.clone() else {
            let err = AnomalyError::IllegalTransition {
                operation: "revert",
                state: self.state,
            };
            return Err(self.fault(err));
        };

        self.activity(Activity::Revert, 0);
        let current = self.refingerprint(system, Activity::Revert)?;

        if current == preaction {
            self.log(
                LogLevel::Info,
                "system matches pre-action fingerprint; nothing to revert",
                json!({ "fingerprint": current.as_str() }),
            );
            self.transition(AnomalyState::Preaction);
            self.activity(Activity::Revert, 100);
            return Ok(());
        }

        if self.fingerprints.postaction.as_ref() != Some(&current) {
            return Err(self.fault(AnomalyError::UnknownState { found: current }));
        }

        if let Err(e) = self.hooks.perform_revert(system, opts).await {
            return Err(self.fault(AnomalyError::hook(Activity::Revert, &e)));
        }

        let restored = self.refingerprint(system, Activity::Revert)?;
        if restored != preaction {
            let err = AnomalyError::ReversionIncomplete {
                expected: preaction,
                found: restored,
            };
            return Err(self.fault(err));
        }

        self.transition(AnomalyState::Preaction);
        self.activity(Activity::Revert, 100);
        Ok(())
    }

    /// Evaluate the fix. Only valid from `postaction`; success resolves.
    pub async fn evaluate(&mut self, system: &Value, opts: &serde_json::Value) -> AnomalyResult<()> {
        if self.state != AnomalyState::Postaction {
            let err = AnomalyError::IllegalTransition {
                operation: "evaluate",
                state: self.state,
            };
            return Err(self.fault(err));
        }

        self.activity(Activity::Evaluate, 0);
        if let Err(e) = self.hooks.perform_evaluate(system, opts).await {
            return Err(self.fault(AnomalyError::hook(Activity::Evaluate, &e)));
        }
        self.transition(AnomalyState::Resolved);
        self.activity(Activity::Evaluate, 100);
        Ok(())
    }

    pub fn pause(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        self.paused = true;
        self.log(
            LogLevel::Info,
            format!("paused: {reason}"),
            json!({ "reason": reason }),
        );
        self.emit(AnomalyEvent::Pause { reason });
    }

    pub fn resume(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        self.paused = false;
        self.log(
            LogLevel::Info,
            format!("resumed: {reason}"),
            json!({ "reason": reason }),
        );
        self.emit(AnomalyEvent::Resume { reason });
    }

    /// Flag that automated recovery could not restore the pre-action state.
    pub fn set_dirty(&mut self, dirty: bool) {
        self.dirty = dirty;
        if dirty {
            self.log(
                LogLevel::Warn,
                "marked dirty: pre-action state could not be restored",
                json!({ "dirty": true }),
            );
        } else {
            self.log(LogLevel::Info, "dirty flag cleared", json!({ "dirty": false }));
        }
    }

    // ── Serialization ───────────────────────────────────────────────────

    pub fn to_record(&self) -> AnomalyRecord {
        AnomalyRecord {
            id: self.id.clone(),
            description: self.description.clone(),
            name: self.name.clone(),
            state: self.state,
            history: self.history.iter().cloned().collect(),
            paused: self.paused,
            dirty: self.dirty,
            fingerprint_keys: self.fingerprint_keys.clone(),
            fingerprints: self.fingerprints.clone(),
        }
    }

    // ── Internal ────────────────────────────────────────────────────────

    /// Append to history, mirror to tracing, and publish a log event.
    fn log(&mut self, level: LogLevel, message: impl Into<String>, data: serde_json::Value) {
        let message = message.into();
        match level {
            LogLevel::Debug => debug!(anomaly_id = %self.id, name = %self.name, "{message}"),
            LogLevel::Info => info!(anomaly_id = %self.id, name = %self.name, "{message}"),
            LogLevel::Warn => warn!(anomaly_id = %self.id, name = %self.name, "{message}"),
            LogLevel::Error => error!(anomaly_id = %self.id, name = %self.name, "{message}"),
        }
        self.history
            .push_back(HistoryEntry::new(level, message.clone(), data.clone()));
        self.trim_history();
        self.emit(AnomalyEvent::Log {
            level,
            message,
            data,
        });
    }

    /// Fingerprint after the pre-action fingerprint was taken. The keys were
    /// valid then, so failure here means the system changed shape.
    fn refingerprint(&mut self, system: &Value, phase: Activity) -> AnomalyResult<Fingerprint> {
        self.fingerprint(system).map_err(|e| {
            self.fault(AnomalyError::Unfingerprintable {
                phase,
                source: Box::new(e),
            })
        })
    }

    /// Record a fault in history before handing it back for propagation.
    fn fault(&mut self, err: AnomalyError) -> AnomalyError {
        self.log(
            LogLevel::Error,
            err.to_string(),
            json!({ "state": self.state, "usage_fault": err.is_usage_fault() }),
        );
        err
    }

    fn transition(&mut self, new_state: AnomalyState) {
        let old_state = self.state;
        if old_state == new_state {
            return;
        }
        self.state = new_state;
        self.log(
            LogLevel::Info,
            format!("state changed: {old_state} -> {new_state}"),
            json!({ "old_state": old_state, "new_state": new_state }),
        );
        self.emit(AnomalyEvent::State {
            old_state,
            new_state,
        });
    }

    fn activity(&self, activity: Activity, progress: u8) {
        debug!(anomaly_id = %self.id, %activity, progress, "activity");
        self.emit(AnomalyEvent::Activity { activity, progress });
    }

    fn emit(&self, event: AnomalyEvent) {
        if let Some(sink) = &self.events {
            sink.publish(EventEnvelope {
                anomaly_id: self.id.clone(),
                anomaly_name: self.name.clone(),
                timestamp: Utc::now(),
                event,
            });
        }
    }

    fn trim_history(&mut self) {
        if let Some(max) = self.max_history {
            while self.history.len() > max {
                self.history.pop_front();
            }
        }
    }
}

impl Serialize for Anomaly {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_record().serialize(serializer)
    }
}

impl fmt::Debug for Anomaly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Anomaly")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("state", &self.state)
            .field("paused", &self.paused)
            .field("dirty", &self.dirty)
            .field("fingerprint_keys", &self.fingerprint_keys)
            .field("fingerprints", &self.fingerprints)
            .field("history_len", &self.history.len())
            .finish_non_exhaustive()
    }
}
