//! `runbook runs`: list checkpointed runs.

use anyhow::Result;

use rb_session::list_runs;

use crate::cli::RunsArgs;
use crate::run_cmd::resolve_repo_root;

pub fn runs(args: RunsArgs) -> Result<i32> {
    let repo_root = resolve_repo_root(args.repo_root.as_deref())?;
    let mut runs = list_runs(&repo_root);
    if let Some(scenario) = &args.scenario {
        runs.retain(|run| &run.scenario_id == scenario);
    }

    if runs.is_empty() {
        println!("No checkpointed runs under {}.", repo_root.display());
        return Ok(0);
    }

    println!(
        "{:<40} {:<20} {:<10} {:<8} {}",
        "RUN", "SCENARIO", "STATUS", "PHASE", "UPDATED"
    );
    for run in runs {
        println!(
            "{:<40} {:<20} {:<10} {:<8} {}",
            run.id,
            run.scenario_id,
            run.status.to_string(),
            run.phase.to_string(),
            run.updated_at.format("%Y-%m-%d %H:%M:%S"),
        );
    }
    Ok(0)
}
