//! Opportunistic parsing of `[integration][timing]` stdout markers.
//!
//! Target child processes may emit lines of the form
//! `[integration][timing]{"task":"build","profile":"ci","durationMs":1200,"status":"ok"}`.
//! Valid lines are collected into per-step timing metadata; anything that
//! fails to parse is ignored.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

const MARKER_PREFIX: &str = "[integration][timing]";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrationTiming {
    pub task: String,
    pub profile: String,
    pub duration_ms: u64,
    pub status: String,
}

/// Aggregated view over a step's timing markers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimingSummary {
    /// Total duration per task name.
    pub per_task_total_ms: BTreeMap<String, u64>,
    /// Marker count per profile.
    pub per_profile_runs: BTreeMap<String, u64>,
}

/// Extract every valid timing marker from a captured stdout buffer.
pub fn extract_timings(stdout: &str) -> Vec<IntegrationTiming> {
    stdout
        .lines()
        .filter_map(|line| {
            let payload = line.trim().strip_prefix(MARKER_PREFIX)?;
            serde_json::from_str::<IntegrationTiming>(payload.trim()).ok()
        })
        .collect()
}

pub fn aggregate(timings: &[IntegrationTiming]) -> TimingSummary {
    let mut summary = TimingSummary::default();
    for timing in timings {
        *summary
            .per_task_total_ms
            .entry(timing.task.clone())
            .or_insert(0) += timing.duration_ms;
        *summary
            .per_profile_runs
            .entry(timing.profile.clone())
            .or_insert(0) += 1;
    }
    summary
}
