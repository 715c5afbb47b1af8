use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use rb_core::types::PlanFormat;

#[derive(Parser)]
#[command(
    name = "runbook",
    about = "Declarative scenario automation for developer workflows",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Execute a scenario (lists scenarios when none is given).
    Run(RunArgs),
    /// Preview a scenario as a plan without side effects.
    Plan(PlanArgs),
    /// Resume a checkpointed run.
    Resume(ResumeArgs),
    /// List checkpointed runs.
    Runs(RunsArgs),
}

#[derive(Args)]
pub struct CommonArgs {
    /// Path to the configuration document (TOML or JSON).
    #[arg(short, long, default_value = "runbook.toml")]
    pub config: PathBuf,

    /// Repository root the run operates on (default: current directory).
    #[arg(long)]
    pub repo_root: Option<PathBuf>,

    /// Prompt overrides as key=value; values parse as JSON when possible.
    #[arg(long = "set", value_name = "KEY=VALUE")]
    pub overrides: Vec<String>,
}

#[derive(Args)]
pub struct RunArgs {
    /// Scenario id to run.
    pub scenario: Option<String>,

    #[command(flatten)]
    pub common: CommonArgs,

    /// Simulate commands instead of spawning them (per dryRunStrategy).
    #[arg(long)]
    pub dry_run: bool,

    /// Fail instead of prompting.
    #[arg(long)]
    pub non_interactive: bool,

    /// Suppress command output forwarding and info messages.
    #[arg(short, long)]
    pub quiet: bool,

    #[arg(short, long)]
    pub verbose: bool,

    /// Run the collect phase only: gather answers, skip side effects.
    #[arg(long)]
    pub collect: bool,

    /// Ignore persisted answers and collect anew.
    #[arg(long)]
    pub fresh_answers: bool,

    /// Steps between checkpoint writes.
    #[arg(long, default_value_t = 1)]
    pub checkpoint_interval: u32,

    /// Max checkpointed runs kept per scenario.
    #[arg(long)]
    pub retention: Option<usize>,

    /// Replace prompt answer values with "[redacted]" in telemetry.
    #[arg(long)]
    pub redact_prompt_values: bool,

    /// Drop command stdout/stderr from telemetry.
    #[arg(long)]
    pub redact_command_output: bool,

    /// Acknowledge a blocking policy rule for this run (repeatable).
    #[arg(long = "acknowledge", value_name = "RULE_ID")]
    pub acknowledged_rules: Vec<String>,
}

#[derive(Args)]
pub struct PlanArgs {
    /// Scenario id to plan.
    pub scenario: String,

    #[command(flatten)]
    pub common: CommonArgs,

    /// Plan under dry-run assumptions.
    #[arg(long)]
    pub dry_run: bool,

    /// Output format.
    #[arg(long, value_enum, default_value_t = PlanFormat::Text)]
    pub format: PlanFormat,

    /// Expand sections in the text render (repeatable):
    /// templates, env, branches.
    #[arg(long = "plan-expand", value_name = "SECTION")]
    pub expand: Vec<String>,
}

#[derive(Args)]
pub struct ResumeArgs {
    /// Run id (or path to a run directory) to resume.
    pub run_id: String,

    #[command(flatten)]
    pub common: CommonArgs,

    #[arg(long)]
    pub dry_run: bool,

    #[arg(long)]
    pub non_interactive: bool,

    #[arg(short, long)]
    pub quiet: bool,

    #[arg(long, default_value_t = 1)]
    pub checkpoint_interval: u32,

    #[arg(long)]
    pub retention: Option<usize>,
}

#[derive(Args)]
pub struct RunsArgs {
    /// Repository root holding the .reports directory.
    #[arg(long)]
    pub repo_root: Option<PathBuf>,

    /// Only list runs for this scenario.
    #[arg(long)]
    pub scenario: Option<String>,
}
