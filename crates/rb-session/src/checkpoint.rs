//! Crash-safe run checkpoints under `.reports/runs/<runId>/`.
//!
//! Each run directory holds `state.json` (the full serialised [`RunState`])
//! and `metadata.json` (the summary used for listing and resume). Writes
//! happen every `interval` observed records, or immediately on request;
//! `finalize` stamps the terminal status and prunes old runs beyond the
//! retention limit.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use rb_core::EngineError;

use crate::state::{RunPhase, RunState, RunStatus, STATE_SCHEMA_VERSION};

pub const RUNS_DIR: &str = ".reports/runs";
const STATE_FILE: &str = "state.json";
const METADATA_FILE: &str = "metadata.json";

/// Run summary stored next to the state snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunMetadata {
    pub id: String,
    pub scenario_id: String,
    pub scenario_label: String,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub status: RunStatus,
    pub dry_run: bool,
    pub flow_cursor: usize,
    pub step_cursor: usize,
    pub phase: RunPhase,
    pub post_run_cursor: usize,
}

#[derive(Debug, Clone)]
pub struct CheckpointOptions {
    pub repo_root: PathBuf,
    pub scenario_id: String,
    pub scenario_label: String,
    /// Reuse an existing run id when resuming.
    pub run_id: Option<String>,
    pub dry_run: bool,
    /// Steps between checkpoint writes (default 1).
    pub interval: u32,
    /// Max runs kept per scenario after finalize.
    pub retention: Option<usize>,
}

pub struct CheckpointManager {
    runs_root: PathBuf,
    run_dir: PathBuf,
    run_id: String,
    scenario_id: String,
    scenario_label: String,
    dry_run: bool,
    interval: u32,
    retention: Option<usize>,
    writes_observed: u32,
}

impl CheckpointManager {
    pub fn create(opts: CheckpointOptions) -> Result<Self, EngineError> {
        let runs_root = opts.repo_root.join(RUNS_DIR);
        let run_id = opts
            .run_id
            .unwrap_or_else(|| default_run_id(&opts.scenario_id));
        let run_dir = runs_root.join(&run_id);
        std::fs::create_dir_all(&run_dir)
            .map_err(|e| EngineError::Checkpoint(format!("cannot create run directory: {e}")))?;
        Ok(Self {
            runs_root,
            run_dir,
            run_id,
            scenario_id: opts.scenario_id,
            scenario_label: opts.scenario_label,
            dry_run: opts.dry_run,
            interval: opts.interval.max(1),
            retention: opts.retention,
            writes_observed: 0,
        })
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    /// Observe a state change, writing after `interval` observations (or
    /// right away when `immediate` is set).
    pub fn record(&mut self, state: &RunState, immediate: bool) -> Result<(), EngineError> {
        self.writes_observed += 1;
        if immediate || self.writes_observed >= self.interval {
            self.writes_observed = 0;
            self.write_snapshot(state, RunStatus::Running)?;
        }
        Ok(())
    }

    /// Write a final snapshot with the terminal status and prune old runs.
    pub fn finalize(&mut self, state: &RunState, status: RunStatus) -> Result<(), EngineError> {
        self.write_snapshot(state, status)?;
        if let Some(retention) = self.retention {
            self.prune(retention);
        }
        Ok(())
    }

    fn write_snapshot(&self, state: &RunState, status: RunStatus) -> Result<(), EngineError> {
        let state_json = serde_json::to_string_pretty(state)
            .map_err(|e| EngineError::Checkpoint(format!("cannot serialise state: {e}")))?;
        std::fs::write(self.run_dir.join(STATE_FILE), state_json)
            .map_err(|e| EngineError::Checkpoint(format!("cannot write state.json: {e}")))?;

        let metadata = RunMetadata {
            id: self.run_id.clone(),
            scenario_id: self.scenario_id.clone(),
            scenario_label: self.scenario_label.clone(),
            started_at: state.started_at,
            updated_at: Utc::now(),
            status,
            dry_run: self.dry_run,
            flow_cursor: state.flow_cursor,
            step_cursor: state.step_cursor,
            phase: state.phase,
            post_run_cursor: state.post_run_cursor,
        };
        let metadata_json = serde_json::to_string_pretty(&metadata)
            .map_err(|e| EngineError::Checkpoint(format!("cannot serialise metadata: {e}")))?;
        std::fs::write(self.run_dir.join(METADATA_FILE), metadata_json)
            .map_err(|e| EngineError::Checkpoint(format!("cannot write metadata.json: {e}")))?;

        debug!(run_id = %self.run_id, %status, "checkpoint written");
        Ok(())
    }

    /// Remove this scenario's oldest runs beyond `retention`. The most
    /// recent runs by `updatedAt` survive; removal failures only warn.
    fn prune(&self, retention: usize) {
        let Ok(mut runs) = scan_runs(&self.runs_root) else {
            return;
        };
        runs.retain(|(_, meta)| meta.scenario_id == self.scenario_id);
        runs.sort_by(|a, b| b.1.updated_at.cmp(&a.1.updated_at));
        for (dir, meta) in runs.into_iter().skip(retention.max(1)) {
            debug!(run_id = %meta.id, "pruning checkpoint beyond retention");
            if let Err(e) = std::fs::remove_dir_all(&dir) {
                warn!(path = %dir.display(), error = %e, "failed to prune run directory");
            }
        }
    }
}

fn default_run_id(scenario_id: &str) -> String {
    let slug: String = scenario_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '-' })
        .collect();
    format!("{}-{slug}", Utc::now().format("%Y%m%d-%H%M%S"))
}

fn scan_runs(runs_root: &Path) -> std::io::Result<Vec<(PathBuf, RunMetadata)>> {
    let mut runs = Vec::new();
    for entry in std::fs::read_dir(runs_root)? {
        let entry = entry?;
        let dir = entry.path();
        if !dir.is_dir() {
            continue;
        }
        let metadata_path = dir.join(METADATA_FILE);
        let Ok(contents) = std::fs::read_to_string(&metadata_path) else {
            continue;
        };
        match serde_json::from_str::<RunMetadata>(&contents) {
            Ok(meta) => runs.push((dir, meta)),
            Err(e) => warn!(path = %metadata_path.display(), error = %e, "skipping unreadable run metadata"),
        }
    }
    Ok(runs)
}

/// List all checkpointed runs under a repository, newest first.
pub fn list_runs(repo_root: &Path) -> Vec<RunMetadata> {
    let mut runs = scan_runs(&repo_root.join(RUNS_DIR))
        .map(|runs| runs.into_iter().map(|(_, meta)| meta).collect())
        .unwrap_or_else(|_| Vec::new());
    runs.sort_by(|a: &RunMetadata, b: &RunMetadata| b.updated_at.cmp(&a.updated_at));
    runs
}

/// Load a checkpoint for resumption. `identifier` is a run id under
/// `.reports/runs`, or an absolute/relative path to a run directory.
pub fn load_checkpoint(
    repo_root: &Path,
    identifier: &str,
) -> Result<(RunState, RunMetadata), EngineError> {
    let candidate = Path::new(identifier);
    let run_dir = if candidate.join(STATE_FILE).exists() {
        candidate.to_path_buf()
    } else {
        repo_root.join(RUNS_DIR).join(identifier)
    };

    let state_contents = std::fs::read_to_string(run_dir.join(STATE_FILE))
        .map_err(|e| EngineError::Checkpoint(format!("cannot read checkpoint '{identifier}': {e}")))?;
    let state: RunState = serde_json::from_str(&state_contents)
        .map_err(|e| EngineError::Checkpoint(format!("cannot parse state.json: {e}")))?;
    if state.schema_version != STATE_SCHEMA_VERSION {
        return Err(EngineError::Checkpoint(format!(
            "unknown checkpoint schema version {} (expected {STATE_SCHEMA_VERSION})",
            state.schema_version
        )));
    }

    let metadata_contents = std::fs::read_to_string(run_dir.join(METADATA_FILE))
        .map_err(|e| EngineError::Checkpoint(format!("cannot read metadata.json: {e}")))?;
    let metadata: RunMetadata = serde_json::from_str(&metadata_contents)
        .map_err(|e| EngineError::Checkpoint(format!("cannot parse metadata.json: {e}")))?;

    Ok((state, metadata))
}

#[cfg(test)]
#[path = "checkpoint_tests.rs"]
mod tests;
