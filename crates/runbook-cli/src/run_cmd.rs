//! `runbook run` and `runbook resume`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use serde_json::Value;
use tokio::sync::watch;

use rb_engine::{ExecContext, NullPromptDriver, RunReport, execute_scenario};
use rb_session::state::{RunPhase, RunStatus};
use rb_session::{
    CheckpointManager, CheckpointOptions, JsonlSink, LogWriter, PersistedAnswers,
    RedactionOptions, load_checkpoint,
};

use crate::cli::{ResumeArgs, RunArgs};
use crate::console::ConsolePromptDriver;
use crate::loader::load_configuration;

pub async fn run(args: RunArgs) -> Result<i32> {
    let config = load_configuration(&args.common.config)?;
    let repo_root = resolve_repo_root(args.common.repo_root.as_deref())?;
    tracing::debug!(repo_root = %repo_root.display(), "configuration loaded");

    let Some(scenario_id) = &args.scenario else {
        println!("Scenarios in {}:", config.meta.name);
        for scenario in &config.scenarios {
            println!("  {}  {}", scenario.id, scenario.label);
        }
        return Ok(0);
    };
    let scenario = config
        .scenario(scenario_id)
        .ok_or_else(|| anyhow!("unknown scenario '{scenario_id}'"))?
        .clone();

    let checkpoint = CheckpointManager::create(CheckpointOptions {
        repo_root: repo_root.clone(),
        scenario_id: scenario.id.clone(),
        scenario_label: scenario.label.clone(),
        run_id: None,
        dry_run: args.dry_run,
        interval: args.checkpoint_interval,
        retention: args.retention,
    })?;

    let mut ctx = ExecContext::new(Arc::new(config), scenario_id, &repo_root);
    ctx.dry_run = args.dry_run;
    ctx.quiet = args.quiet;
    ctx.verbose = args.verbose;
    ctx.non_interactive = args.non_interactive;
    ctx.fresh_answers = args.fresh_answers;
    ctx.phase = if args.collect {
        RunPhase::Collect
    } else {
        RunPhase::Execute
    };
    ctx.overrides = parse_overrides(&args.common.overrides)?;
    ctx.persisted = PersistedAnswers::load(&repo_root);
    ctx.prompt_driver = if args.non_interactive {
        Box::new(NullPromptDriver)
    } else {
        Box::new(ConsolePromptDriver)
    };
    for rule_id in &args.acknowledged_rules {
        ctx.policy.acknowledge(rule_id);
    }

    let mut log = LogWriter::new(RedactionOptions {
        redact_prompt_values: args.redact_prompt_values,
        redact_command_output: args.redact_command_output,
    });
    log.add_sink(Box::new(JsonlSink::create(
        &checkpoint.run_dir().join("events.jsonl"),
    )));
    ctx.log = log;
    ctx.checkpoint = Some(checkpoint);
    ctx.cancel = Some(cancellation_signal());

    let report = execute_scenario(&mut ctx, None).await?;
    finish(report, args.quiet)
}

pub async fn resume(args: ResumeArgs) -> Result<i32> {
    let config = load_configuration(&args.common.config)?;
    let repo_root = resolve_repo_root(args.common.repo_root.as_deref())?;

    let (state, metadata) = load_checkpoint(&repo_root, &args.run_id)?;
    if !args.quiet {
        eprintln!(
            "Resuming run {} (scenario '{}', last status {})",
            metadata.id, metadata.scenario_id, metadata.status
        );
    }

    let checkpoint = CheckpointManager::create(CheckpointOptions {
        repo_root: repo_root.clone(),
        scenario_id: metadata.scenario_id.clone(),
        scenario_label: metadata.scenario_label.clone(),
        run_id: Some(metadata.id.clone()),
        dry_run: args.dry_run,
        interval: args.checkpoint_interval,
        retention: args.retention,
    })?;

    let mut ctx = ExecContext::new(Arc::new(config), &metadata.scenario_id, &repo_root);
    ctx.dry_run = args.dry_run;
    ctx.quiet = args.quiet;
    ctx.non_interactive = args.non_interactive;
    ctx.overrides = parse_overrides(&args.common.overrides)?;
    ctx.persisted = PersistedAnswers::load(&repo_root);
    ctx.prompt_driver = if args.non_interactive {
        Box::new(NullPromptDriver)
    } else {
        Box::new(ConsolePromptDriver)
    };

    let mut log = LogWriter::new(RedactionOptions::default());
    log.add_sink(Box::new(JsonlSink::create(
        &checkpoint.run_dir().join("events.jsonl"),
    )));
    ctx.log = log;
    ctx.checkpoint = Some(checkpoint);
    ctx.cancel = Some(cancellation_signal());

    let report = execute_scenario(&mut ctx, Some(state)).await?;
    finish(report, args.quiet)
}

fn finish(report: RunReport, quiet: bool) -> Result<i32> {
    let state = &report.state;
    if !quiet {
        eprintln!(
            "Run {}: {} ({} step(s) completed, {} failed, {} command(s))",
            state.run_id,
            report.status,
            state.completed_steps,
            state.failed_steps,
            state.history.len()
        );
    }
    match report.error {
        Some(error) => {
            eprintln!("error: {error}");
            Ok(1)
        }
        None if report.status == RunStatus::Failed => Ok(1),
        None => Ok(0),
    }
}

fn cancellation_signal() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = tx.send(true);
        }
    });
    rx
}

pub fn resolve_repo_root(flag: Option<&Path>) -> Result<PathBuf> {
    match flag {
        Some(path) => Ok(path.to_path_buf()),
        None => std::env::current_dir().context("cannot determine current directory"),
    }
}

/// Parse `key=value` overrides. Values that parse as JSON keep their type;
/// anything else is a plain string.
pub fn parse_overrides(raw: &[String]) -> Result<BTreeMap<String, Value>> {
    let mut overrides = BTreeMap::new();
    for entry in raw {
        let (key, value) = entry
            .split_once('=')
            .ok_or_else(|| anyhow!("override '{entry}' is not of the form key=value"))?;
        let parsed = serde_json::from_str::<Value>(value)
            .unwrap_or_else(|_| Value::String(value.to_string()));
        overrides.insert(key.to_string(), parsed);
    }
    Ok(overrides)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_overrides_types() {
        let overrides = parse_overrides(&[
            "name=api".to_string(),
            "count=3".to_string(),
            "flag=true".to_string(),
            "list=[1,2]".to_string(),
            "quoted=\"3\"".to_string(),
        ])
        .unwrap();
        assert_eq!(overrides["name"], json!("api"));
        assert_eq!(overrides["count"], json!(3));
        assert_eq!(overrides["flag"], json!(true));
        assert_eq!(overrides["list"], json!([1, 2]));
        assert_eq!(overrides["quoted"], json!("3"));
    }

    #[test]
    fn test_parse_overrides_rejects_missing_equals() {
        assert!(parse_overrides(&["oops".to_string()]).is_err());
    }

    #[test]
    fn test_parse_overrides_value_may_contain_equals() {
        let overrides = parse_overrides(&["expr=a=b".to_string()]).unwrap();
        assert_eq!(overrides["expr"], json!("a=b"));
    }
}
