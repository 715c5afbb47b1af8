//! Run state types.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use rb_config::PolicyLevel;
use rb_process::{IntegrationTiming, TimingSummary};

/// The checkpoint schema this engine reads and writes. Bumped on any change
/// to the serialised state shape; unknown versions are rejected on load.
pub const STATE_SCHEMA_VERSION: u32 = 1;

/// The serialisable record of a scenario run, mutated by the executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunState {
    pub schema_version: u32,
    pub run_id: String,
    pub scenario: ScenarioInfo,
    /// Prompt answers, compute outputs, and captured command output.
    #[serde(default)]
    pub answers: serde_json::Map<String, Value>,
    #[serde(default)]
    pub history: Vec<CommandRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_command: Option<CommandRecord>,
    #[serde(default)]
    pub completed_steps: u32,
    #[serde(default)]
    pub failed_steps: u32,
    #[serde(default)]
    pub retries: Vec<RetryRecord>,
    #[serde(default)]
    pub skipped_steps: Vec<SkipRecord>,
    #[serde(default)]
    pub policy_decisions: Vec<PolicyDecisionRecord>,
    #[serde(default)]
    pub integration_timings: Vec<StepTimings>,
    #[serde(default)]
    pub flow_runs: Vec<FlowRun>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub exited_early: bool,
    #[serde(default)]
    pub phase: RunPhase,
    /// Index into the scenario's flow chain (entry flow = 0).
    #[serde(default)]
    pub flow_cursor: usize,
    /// Index of the next step within the current flow.
    #[serde(default)]
    pub step_cursor: usize,
    #[serde(default)]
    pub post_run_cursor: usize,
    /// Consumed auto-action budget per `flowId:stepId`.
    #[serde(default)]
    pub auto_action_counts: BTreeMap<String, u32>,
    #[serde(default)]
    pub dry_run: bool,
    /// Transient binding while an iterate step's nested flow runs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iteration: Option<Value>,
    /// The error that terminated the run, flattened for serialisation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

impl RunState {
    pub fn new(scenario: ScenarioInfo, run_id: String, dry_run: bool, phase: RunPhase) -> Self {
        Self {
            schema_version: STATE_SCHEMA_VERSION,
            run_id,
            scenario,
            answers: serde_json::Map::new(),
            history: Vec::new(),
            last_command: None,
            completed_steps: 0,
            failed_steps: 0,
            retries: Vec::new(),
            skipped_steps: Vec::new(),
            policy_decisions: Vec::new(),
            integration_timings: Vec::new(),
            flow_runs: Vec::new(),
            started_at: Utc::now(),
            ended_at: None,
            exited_early: false,
            phase,
            flow_cursor: 0,
            step_cursor: 0,
            post_run_cursor: 0,
            auto_action_counts: BTreeMap::new(),
            dry_run,
            iteration: None,
            error: None,
        }
    }

    /// Append a command record and update `lastCommand`.
    pub fn record_command(&mut self, record: CommandRecord) {
        self.last_command = Some(record.clone());
        self.history.push(record);
    }

    /// The auto-action budget key for a step.
    pub fn auto_count_key(flow_id: &str, step_id: &str) -> String {
        format!("{flow_id}:{step_id}")
    }

    /// Shape the state the way templates see it (`state.answers.…`).
    pub fn template_view(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Scenario descriptor snapshot taken at run start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioInfo {
    pub id: String,
    pub label: String,
}

/// One command execution, including dry-run simulations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandRecord {
    pub flow_id: String,
    pub step_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_label: Option<String>,
    /// The rendered command line.
    pub command: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub success: bool,
    pub exit_code: i32,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warn_after_ms: Option<u64>,
    #[serde(default)]
    pub long_running: bool,
    #[serde(default)]
    pub timed_out: bool,
    #[serde(default)]
    pub dry_run: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryRecord {
    pub flow_id: String,
    pub step_id: String,
    pub attempt: u32,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkipRecord {
    pub flow_id: String,
    pub step_id: String,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
}

/// Every matched policy rule evaluation, including downgraded ones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyDecisionRecord {
    pub rule_id: String,
    pub rule_level: PolicyLevel,
    pub enforced_level: PolicyLevel,
    pub acknowledged: bool,
    pub flow_id: String,
    pub step_id: String,
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Timing markers captured from one step's stdout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepTimings {
    pub flow_id: String,
    pub step_id: String,
    pub timings: Vec<IntegrationTiming>,
    pub summary: TimingSummary,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowRun {
    pub flow_id: String,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default)]
    pub exited_early: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunPhase {
    Collect,
    #[default]
    Execute,
    Complete,
}

impl std::fmt::Display for RunPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Collect => write!(f, "collect"),
            Self::Execute => write!(f, "execute"),
            Self::Complete => write!(f, "complete"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// A terminated run's error, reduced to its structural parts so it survives
/// serialisation. Reconstructed structurally on hydrate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorInfo {
    pub name: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

impl ErrorInfo {
    pub fn from_engine_error(error: &rb_core::EngineError) -> Self {
        Self {
            name: error.kind().to_string(),
            message: error.to_string(),
            stack: None,
        }
    }
}

#[cfg(test)]
#[path = "state_tests.rs"]
mod tests;
