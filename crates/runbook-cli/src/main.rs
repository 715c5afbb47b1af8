use anyhow::Result;
use clap::Parser;

mod cli;
mod console;
mod loader;
mod plan_cmd;
mod run_cmd;
mod runs_cmd;

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    // Tracing goes to stderr so stdout stays clean for plan output and
    // forwarded command streams.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init()
        .ok();

    let cli = Cli::parse();
    let exit_code = match cli.command {
        Commands::Run(args) => run_cmd::run(args).await?,
        Commands::Plan(args) => plan_cmd::plan(args)?,
        Commands::Resume(args) => run_cmd::resume(args).await?,
        Commands::Runs(args) => runs_cmd::runs(args)?,
    };
    std::process::exit(exit_code);
}
