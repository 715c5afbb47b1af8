use super::*;
use crate::state::ScenarioInfo;
use tempfile::tempdir;

fn make_state(run_id: &str) -> RunState {
    RunState::new(
        ScenarioInfo {
            id: "release".into(),
            label: "Release".into(),
        },
        run_id.into(),
        false,
        RunPhase::Execute,
    )
}

fn manager_for(
    repo_root: &Path,
    run_id: &str,
    interval: u32,
    retention: Option<usize>,
) -> CheckpointManager {
    CheckpointManager::create(CheckpointOptions {
        repo_root: repo_root.to_path_buf(),
        scenario_id: "release".into(),
        scenario_label: "Release".into(),
        run_id: Some(run_id.into()),
        dry_run: false,
        interval,
        retention,
    })
    .unwrap()
}

#[test]
fn test_record_writes_after_interval() {
    let tmp = tempdir().unwrap();
    let mut manager = manager_for(tmp.path(), "run-1", 2, None);
    let state = make_state("run-1");

    manager.record(&state, false).unwrap();
    assert!(!manager.run_dir().join("state.json").exists());

    manager.record(&state, false).unwrap();
    assert!(manager.run_dir().join("state.json").exists());
    assert!(manager.run_dir().join("metadata.json").exists());
}

#[test]
fn test_immediate_record_bypasses_interval() {
    let tmp = tempdir().unwrap();
    let mut manager = manager_for(tmp.path(), "run-1", 10, None);
    let state = make_state("run-1");
    manager.record(&state, true).unwrap();
    assert!(manager.run_dir().join("state.json").exists());
}

#[test]
fn test_finalize_marks_status() {
    let tmp = tempdir().unwrap();
    let mut manager = manager_for(tmp.path(), "run-1", 1, None);
    let state = make_state("run-1");
    manager.finalize(&state, RunStatus::Failed).unwrap();

    let (_, metadata) = load_checkpoint(tmp.path(), "run-1").unwrap();
    assert_eq!(metadata.status, RunStatus::Failed);
    assert_eq!(metadata.scenario_id, "release");
}

#[test]
fn test_load_checkpoint_round_trip() {
    let tmp = tempdir().unwrap();
    let mut manager = manager_for(tmp.path(), "run-1", 1, None);
    let mut state = make_state("run-1");
    state
        .answers
        .insert("name".into(), serde_json::json!("api"));
    state.flow_cursor = 1;
    state.step_cursor = 3;
    manager.finalize(&state, RunStatus::Completed).unwrap();

    let (loaded, metadata) = load_checkpoint(tmp.path(), "run-1").unwrap();
    assert_eq!(loaded.answers["name"], serde_json::json!("api"));
    assert_eq!(loaded.flow_cursor, 1);
    assert_eq!(metadata.step_cursor, 3);
}

#[test]
fn test_load_checkpoint_by_path() {
    let tmp = tempdir().unwrap();
    let mut manager = manager_for(tmp.path(), "run-1", 1, None);
    let state = make_state("run-1");
    manager.finalize(&state, RunStatus::Completed).unwrap();

    let dir = manager.run_dir().to_string_lossy().into_owned();
    let (loaded, _) = load_checkpoint(tmp.path(), &dir).unwrap();
    assert_eq!(loaded.run_id, "run-1");
}

#[test]
fn test_unknown_schema_version_rejected() {
    let tmp = tempdir().unwrap();
    let mut manager = manager_for(tmp.path(), "run-1", 1, None);
    let mut state = make_state("run-1");
    state.schema_version = 99;
    manager.finalize(&state, RunStatus::Completed).unwrap();

    let err = load_checkpoint(tmp.path(), "run-1").unwrap_err();
    assert!(err.to_string().contains("unknown checkpoint schema version 99"));
}

#[test]
fn test_missing_checkpoint_errors() {
    let tmp = tempdir().unwrap();
    let err = load_checkpoint(tmp.path(), "nope").unwrap_err();
    assert!(err.to_string().contains("Checkpoint error"));
}

#[test]
fn test_retention_prunes_oldest() {
    let tmp = tempdir().unwrap();

    for (run_id, pause) in [("run-1", true), ("run-2", true), ("run-3", false)] {
        let mut manager = manager_for(tmp.path(), run_id, 1, Some(2));
        let state = make_state(run_id);
        manager.finalize(&state, RunStatus::Completed).unwrap();
        if pause {
            // updatedAt ordering needs distinct timestamps.
            std::thread::sleep(std::time::Duration::from_millis(15));
        }
    }

    let runs = list_runs(tmp.path());
    assert_eq!(runs.len(), 2);
    assert_eq!(runs[0].id, "run-3");
    assert_eq!(runs[1].id, "run-2");
    assert!(load_checkpoint(tmp.path(), "run-1").is_err());
}

#[test]
fn test_retention_never_prunes_most_recent() {
    let tmp = tempdir().unwrap();
    let mut manager = manager_for(tmp.path(), "only-run", 1, Some(0));
    let state = make_state("only-run");
    manager.finalize(&state, RunStatus::Completed).unwrap();

    let runs = list_runs(tmp.path());
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].id, "only-run");
}

#[test]
fn test_list_runs_sorted_newest_first() {
    let tmp = tempdir().unwrap();
    for run_id in ["a", "b"] {
        let mut manager = manager_for(tmp.path(), run_id, 1, None);
        let state = make_state(run_id);
        manager.finalize(&state, RunStatus::Completed).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(15));
    }
    let runs = list_runs(tmp.path());
    assert_eq!(runs[0].id, "b");
    assert_eq!(runs[1].id, "a");
}

#[test]
fn test_list_runs_empty_repo() {
    let tmp = tempdir().unwrap();
    assert!(list_runs(tmp.path()).is_empty());
}

#[test]
fn test_default_run_id_slugs_scenario() {
    let id = super::default_run_id("deploy prod/eu");
    let suffix = id.splitn(3, '-').nth(2).unwrap();
    assert_eq!(suffix, "deploy-prod-eu");
}

#[test]
fn test_prune_ignores_other_scenarios() {
    let tmp = tempdir().unwrap();

    // Another scenario's run should survive this scenario's retention.
    let mut other = CheckpointManager::create(CheckpointOptions {
        repo_root: tmp.path().to_path_buf(),
        scenario_id: "other".into(),
        scenario_label: "Other".into(),
        run_id: Some("other-run".into()),
        dry_run: false,
        interval: 1,
        retention: None,
    })
    .unwrap();
    let mut other_state = make_state("other-run");
    other_state.scenario.id = "other".into();
    other.finalize(&other_state, RunStatus::Completed).unwrap();

    for run_id in ["r1", "r2"] {
        let mut manager = manager_for(tmp.path(), run_id, 1, Some(1));
        let state = make_state(run_id);
        manager.finalize(&state, RunStatus::Completed).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(15));
    }

    let runs = list_runs(tmp.path());
    let ids: Vec<&str> = runs.iter().map(|r| r.id.as_str()).collect();
    assert!(ids.contains(&"other-run"));
    assert!(ids.contains(&"r2"));
    assert!(!ids.contains(&"r1"));
}
