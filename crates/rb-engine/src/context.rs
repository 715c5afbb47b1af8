//! Execution context and the driver/plugin seams.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::watch;

use rb_config::{Configuration, PluginStep};
use rb_core::EngineError;
use rb_core::types::PromptMode;
use rb_policy::PolicyEngine;
use rb_session::state::{RunPhase, RunState};
use rb_session::{CheckpointManager, LogWriter, PersistedAnswers};

use crate::options::{ResolvedOption, SessionOptionsCache};

/// Everything the compiler and executor need for one scenario walk.
pub struct ExecContext {
    pub config: Arc<Configuration>,
    pub scenario_id: String,
    pub repo_root: PathBuf,
    pub dry_run: bool,
    pub quiet: bool,
    pub verbose: bool,
    /// Collect gathers answers without side effects; execute is the default.
    pub phase: RunPhase,
    pub non_interactive: bool,
    /// Prompt values applied without invoking the driver, keyed by `storeAs`.
    pub overrides: BTreeMap<String, Value>,
    pub prompt_driver: Box<dyn PromptDriver>,
    pub log: LogWriter,
    pub options_cache: SessionOptionsCache,
    /// Prompts answered so far this run, in order.
    pub prompt_history: Vec<PromptHistoryEntry>,
    pub checkpoint: Option<CheckpointManager>,
    pub policy: PolicyEngine,
    pub plugins: PluginRegistry,
    pub persisted: PersistedAnswers,
    /// Ignore persisted answers and collect anew.
    pub fresh_answers: bool,
    pub cancel: Option<watch::Receiver<bool>>,
    /// Process environment snapshot, the base layer for command env.
    pub env: BTreeMap<String, String>,
}

impl ExecContext {
    /// A context with no interactivity, no checkpoints, and no telemetry
    /// sinks; callers opt into each.
    pub fn new(config: Arc<Configuration>, scenario_id: &str, repo_root: &Path) -> Self {
        let policy = PolicyEngine::new(&config.policies);
        Self {
            config,
            scenario_id: scenario_id.to_string(),
            repo_root: repo_root.to_path_buf(),
            dry_run: false,
            quiet: false,
            verbose: false,
            phase: RunPhase::Execute,
            non_interactive: false,
            overrides: BTreeMap::new(),
            prompt_driver: Box::new(NullPromptDriver),
            log: LogWriter::disabled(),
            options_cache: SessionOptionsCache::default(),
            prompt_history: Vec::new(),
            checkpoint: None,
            policy,
            plugins: PluginRegistry::default(),
            persisted: PersistedAnswers::default(),
            fresh_answers: false,
            cancel: None,
            env: std::env::vars().collect(),
        }
    }

    pub fn cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|rx| *rx.borrow())
    }
}

/// One answered prompt, as remembered by the run context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptHistoryEntry {
    pub step_id: String,
    pub store_as: String,
    /// `override`, `persisted`, `interactive`, or `worktree-guard`.
    pub source: String,
}

/// A prompt ready for a driver, options resolved and text rendered.
#[derive(Debug, Clone)]
pub struct PromptRequest {
    pub step_id: String,
    pub mode: PromptMode,
    pub text: String,
    pub options: Vec<ResolvedOption>,
    pub default: Option<Value>,
    pub show_selection_order: bool,
}

/// The interactive seam. The terminal implementation lives in the CLI; the
/// engine ships non-interactive and scripted drivers.
#[async_trait]
pub trait PromptDriver: Send {
    /// Collect one answer. Cancellation surfaces as `PromptCancelled`.
    async fn prompt(&mut self, request: &PromptRequest) -> Result<Value, EngineError>;

    /// Present error-recovery actions as `(label, target)` pairs and return
    /// the chosen target. An implicit abort entry is already included.
    async fn choose_action(
        &mut self,
        title: &str,
        actions: &[(String, String)],
    ) -> Result<String, EngineError>;
}

/// Driver for non-interactive runs: every invocation is an error.
pub struct NullPromptDriver;

#[async_trait]
impl PromptDriver for NullPromptDriver {
    async fn prompt(&mut self, request: &PromptRequest) -> Result<Value, EngineError> {
        Err(EngineError::NonInteractive(request.step_id.clone()))
    }

    async fn choose_action(
        &mut self,
        title: &str,
        _actions: &[(String, String)],
    ) -> Result<String, EngineError> {
        Err(EngineError::NonInteractive(title.to_string()))
    }
}

/// Test driver that replays a fixed sequence of answers.
#[derive(Default)]
pub struct ScriptedPromptDriver {
    answers: std::collections::VecDeque<Value>,
    actions: std::collections::VecDeque<String>,
    pub prompts_seen: Vec<String>,
}

impl ScriptedPromptDriver {
    pub fn with_answers(answers: Vec<Value>) -> Self {
        Self {
            answers: answers.into(),
            actions: Default::default(),
            prompts_seen: Vec::new(),
        }
    }

    pub fn push_action(&mut self, target: &str) {
        self.actions.push_back(target.to_string());
    }
}

#[async_trait]
impl PromptDriver for ScriptedPromptDriver {
    async fn prompt(&mut self, request: &PromptRequest) -> Result<Value, EngineError> {
        self.prompts_seen.push(request.step_id.clone());
        self.answers
            .pop_front()
            .ok_or_else(|| EngineError::NonInteractive(request.step_id.clone()))
    }

    async fn choose_action(
        &mut self,
        _title: &str,
        _actions: &[(String, String)],
    ) -> Result<String, EngineError> {
        Ok(self.actions.pop_front().unwrap_or_else(|| "exit".into()))
    }
}

/// Result of a plugin handler invocation.
#[derive(Debug, Clone, Default)]
pub struct PluginOutcome {
    /// Optional transition (`exit`, `repeat`, or a step id).
    pub next: Option<String>,
    pub status: Option<String>,
    pub output: Option<Value>,
}

/// Helper pack handed to plugin handlers.
pub struct PluginHelpers<'a> {
    pub state: &'a mut RunState,
    pub repo_root: &'a Path,
    pub env: &'a BTreeMap<String, String>,
    pub dry_run: bool,
}

impl PluginHelpers<'_> {
    /// Render a template against the current state.
    pub fn render(&self, template: &str) -> Result<String, EngineError> {
        let view = self.state.template_view();
        let repo_root = self.repo_root.to_string_lossy();
        let ctx = rb_template::Context {
            state: &view,
            env: self.env,
            repo_root: &repo_root,
            iteration: view.get("iteration"),
        };
        rb_template::render(template, &ctx)
    }
}

/// Handler for one custom step type.
#[async_trait]
pub trait PluginHandler: Send + Sync {
    /// Describe the step for a preview. No side effects.
    fn plan(&self, step: &PluginStep) -> Option<Value> {
        let _ = step;
        None
    }

    async fn run(
        &self,
        step: &PluginStep,
        helpers: &mut PluginHelpers<'_>,
    ) -> Result<PluginOutcome, EngineError>;
}

/// Registry mapping step `type` tags to handlers.
#[derive(Default)]
pub struct PluginRegistry {
    handlers: BTreeMap<String, Arc<dyn PluginHandler>>,
}

impl PluginRegistry {
    pub fn register(&mut self, step_type: &str, handler: Arc<dyn PluginHandler>) {
        self.handlers.insert(step_type.to_string(), handler);
    }

    pub fn get(&self, step_type: &str) -> Option<&Arc<dyn PluginHandler>> {
        self.handlers.get(step_type)
    }
}
