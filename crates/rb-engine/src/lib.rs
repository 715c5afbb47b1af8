//! Scenario compiler and executor.
//!
//! [`plan::build_scenario_plan`] and [`executor::execute_scenario`] share
//! one traversal model: the same configuration walk, template engine,
//! preset layering, and state shapes. The plan builder is the executor with
//! side effects suppressed — prompts resolve only from overrides, persisted
//! answers, and defaults, and commands are rendered but never spawned.

pub mod command;
pub mod compute;
pub mod context;
pub mod executor;
pub mod format;
pub mod options;
pub mod plan;
pub mod router;
pub mod worktree;

pub use command::{EnvDiffEntry, EnvSource, LayeredCommand};
pub use context::{
    ExecContext, NullPromptDriver, PluginHandler, PluginHelpers, PluginOutcome, PluginRegistry,
    PromptDriver, PromptHistoryEntry, PromptRequest, ScriptedPromptDriver,
};
pub use executor::{RunReport, execute_scenario};
pub use options::{ResolvedOption, SessionOptionsCache};
pub use plan::{Plan, PlanPreferences, build_scenario_plan};
pub use router::RouteAction;
