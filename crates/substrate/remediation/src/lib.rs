//! # maple-worldline-remediation
//!
//! Anomaly remediation for the WorldLine Self-Producing Substrate.
//!
//! An anomaly is a correctable deficiency detected in an arbitrary
//! structured system value. Each anomaly is driven through a small
//! lifecycle: act on the system, evaluate the fix, and on failure revert
//! it. Reverts are verified against content fingerprints taken before and
//! after the action, so the engine can tell "nothing happened", "undo
//! what we did" and "someone else changed this" apart.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                        PROCESSOR                                 │
//! │                                                                  │
//! │  registered classes ──detect──▶ queue of anomalies               │
//! │                                      │                           │
//! │                         next eligible (not paused, preaction)    │
//! │                                      ▼                           │
//! │   ┌───────────┐  action  ┌────────────┐  evaluate ┌──────────┐   │
//! │   │ preaction │─────────▶│ postaction │──────────▶│ resolved │   │
//! │   └─────▲─────┘          └─────┬──────┘           └──────────┘   │
//! │         │      revert          │ failure                         │
//! │         └──────────────────────┘                                 │
//! │               │                                                  │
//! │               ├─ restored ──▶ paused                             │
//! │               └─ not restored ──▶ paused + dirty                 │
//! │                                                                  │
//! │   fingerprint(system) = sha256(sorted leaf (path, value) pairs)  │
//! │   events ──▶ broadcast channel ──▶ subscribers                   │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Key Components
//!
//! - [`Processor`]: Detection, queueing and the remediation loop
//! - [`Anomaly`]: One anomaly's state machine, history and fingerprints
//! - [`AnomalyClass`] / [`AnomalyHooks`]: Extension points for concrete anomalies
//! - [`Value`]: The structured system value being remediated
//! - [`fingerprint()`]: SHA-256 content hash over extracted leaf keys
//! - [`EventSink`]: Broadcast channel for lifecycle events
//!
//! ## Quick start
//!
//! ```no_run
//! use async_trait::async_trait;
//! use maple_worldline_remediation::{
//!     AnomalyClass, AnomalyHooks, AnomalyResult, Processor, Value,
//! };
//!
//! struct Shouting;
//! struct ShoutingHooks;
//!
//! #[async_trait]
//! impl AnomalyHooks for ShoutingHooks {
//!     async fn perform_action(
//!         &mut self,
//!         system: &mut Value,
//!         _opts: &serde_json::Value,
//!     ) -> anyhow::Result<()> {
//!         let upper = system.lookup("str").and_then(Value::as_str).map(str::to_uppercase);
//!         if let Some(upper) = upper {
//!             system.insert("str", upper);
//!         }
//!         Ok(())
//!     }
//! }
//!
//! #[async_trait]
//! impl AnomalyClass for Shouting {
//!     fn name(&self) -> &str {
//!         "shouting"
//!     }
//!
//!     async fn detect(&self, system: &Value, _opts: &serde_json::Value) -> AnomalyResult<bool> {
//!         Ok(system
//!             .lookup("str")
//!             .and_then(Value::as_str)
//!             .is_some_and(|s| s.chars().any(char::is_lowercase)))
//!     }
//!
//!     fn instantiate(&self) -> Box<dyn AnomalyHooks> {
//!         Box::new(ShoutingHooks)
//!     }
//! }
//!
//! # async fn run() -> AnomalyResult<()> {
//! let mut system = Value::from(serde_json::json!({ "str": "Hello World" }));
//! let mut processor = Processor::new().with_class(Shouting);
//! processor.detect(&system, &serde_json::Value::Null).await?;
//! processor.process(&mut system, &serde_json::Value::Null).await?;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]

pub mod anomaly;
pub mod error;
pub mod events;
pub mod fingerprint;
pub mod hooks;
pub mod keys;
pub mod processor;
pub mod types;
pub mod value;

// Re-exports for convenience
pub use anomaly::Anomaly;
pub use error::{AnomalyError, AnomalyResult};
pub use events::{AnomalyEvent, EventEnvelope, EventSink, DEFAULT_EVENT_CAPACITY};
pub use fingerprint::{fingerprint, Fingerprint};
pub use hooks::{AnomalyClass, AnomalyHooks, NoopHooks};
pub use keys::{diff, extract, extract_keys_only, ChangeKind, KeyChange, LeafKey};
pub use processor::{Processor, ProcessorConfig, ProcessorSummary};
pub use types::{
    Activity, AnomalyId, AnomalyParams, AnomalyRecord, AnomalyState, Fingerprints, HistoryEntry,
    LogLevel,
};
pub use value::{Value, ValueKind};
