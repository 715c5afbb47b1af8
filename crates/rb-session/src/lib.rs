//! Run state, checkpointing, telemetry, and redaction.
//!
//! The serialisable [`state::RunState`] is the single mutable record of a
//! scenario run. The checkpoint manager snapshots it to
//! `.reports/runs/<runId>/` at a configurable interval so a crashed or
//! failed run can be resumed; the telemetry writer fans typed events out to
//! sinks with redaction applied at the edge.

pub mod answers;
pub mod checkpoint;
pub mod events;
pub mod redact;
pub mod state;

pub use answers::PersistedAnswers;
pub use checkpoint::{CheckpointManager, CheckpointOptions, RunMetadata, list_runs, load_checkpoint};
pub use events::{
    EventEnvelope, JsonlSink, LogSink, LogWriter, MemorySink, RedactionOptions, TelemetryEvent,
};
pub use redact::{REDACTED, redact_keys};
pub use state::{
    CommandRecord, ErrorInfo, FlowRun, PolicyDecisionRecord, RetryRecord, RunPhase, RunState,
    RunStatus, ScenarioInfo, SkipRecord, StepTimings,
};
