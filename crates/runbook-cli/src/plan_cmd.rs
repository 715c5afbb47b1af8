//! `runbook plan`: render a scenario preview.

use std::sync::Arc;

use anyhow::{Result, bail};

use rb_core::types::PlanFormat;
use rb_engine::plan::PlanPreferences;
use rb_engine::{ExecContext, build_scenario_plan, format};
use rb_session::PersistedAnswers;

use crate::cli::PlanArgs;
use crate::loader::load_configuration;
use crate::run_cmd::{parse_overrides, resolve_repo_root};

pub fn plan(args: PlanArgs) -> Result<i32> {
    let config = load_configuration(&args.common.config)?;
    let repo_root = resolve_repo_root(args.common.repo_root.as_deref())?;

    let mut preferences = PlanPreferences::default();
    for section in &args.expand {
        match section.as_str() {
            "templates" => preferences.expand_templates = true,
            "env" => preferences.expand_env = true,
            "branches" => preferences.expand_branches = true,
            other => bail!("unknown --plan-expand section '{other}' (templates, env, branches)"),
        }
    }

    let mut ctx = ExecContext::new(Arc::new(config), &args.scenario, &repo_root);
    ctx.dry_run = args.dry_run;
    ctx.overrides = parse_overrides(&args.common.overrides)?;
    ctx.persisted = PersistedAnswers::load(&repo_root);

    let plan = build_scenario_plan(&ctx, preferences)?;
    match args.format {
        PlanFormat::Text => print!("{}", format::render_text(&plan)),
        PlanFormat::Ndjson => print!("{}", format::render_ndjson(&plan)),
        PlanFormat::Json => println!("{}", format::render_json(&plan)),
    }
    Ok(0)
}
