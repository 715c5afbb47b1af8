//! The step tagged union and its variant payloads.
//!
//! Step kinds are a closed sum discriminated by the document's `type` field.
//! Any unrecognised `type` deserialises into [`PluginStep`], the open
//! extension point: its body stays opaque to the core and is handed to a
//! registered plugin handler at plan/run time.

use std::collections::BTreeMap;

use serde::de::Error as DeError;
use serde::ser::Error as SerError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use rb_core::types::{MessageLevel, PromptMode};

use crate::model::{CacheMode, OptionMap};

/// One unit of execution in a flow.
#[derive(Debug, Clone)]
pub enum Step {
    Prompt(PromptStep),
    Command(CommandStep),
    Message(MessageStep),
    Branch(BranchStep),
    Group(GroupStep),
    Iterate(IterateStep),
    Compute(ComputeStep),
    GitWorktreeGuard(WorktreeGuardStep),
    Plugin(PluginStep),
}

impl Step {
    pub fn id(&self) -> &str {
        match self {
            Self::Prompt(s) => &s.id,
            Self::Command(s) => &s.id,
            Self::Message(s) => &s.id,
            Self::Branch(s) => &s.id,
            Self::Group(s) => &s.id,
            Self::Iterate(s) => &s.id,
            Self::Compute(s) => &s.id,
            Self::GitWorktreeGuard(s) => &s.id,
            Self::Plugin(s) => &s.id,
        }
    }

    pub fn label(&self) -> Option<&str> {
        match self {
            Self::Prompt(s) => s.label.as_deref(),
            Self::Command(s) => s.label.as_deref(),
            Self::Message(s) => s.label.as_deref(),
            Self::Branch(s) => s.label.as_deref(),
            Self::Group(s) => s.label.as_deref(),
            Self::Iterate(s) => s.label.as_deref(),
            Self::Compute(s) => s.label.as_deref(),
            Self::GitWorktreeGuard(s) => s.label.as_deref(),
            Self::Plugin(s) => s.label.as_deref(),
        }
    }

    /// The document `type` tag for this step.
    pub fn kind(&self) -> &str {
        match self {
            Self::Prompt(_) => "prompt",
            Self::Command(_) => "command",
            Self::Message(_) => "message",
            Self::Branch(_) => "branch",
            Self::Group(_) => "group",
            Self::Iterate(_) => "iterate",
            Self::Compute(_) => "compute",
            Self::GitWorktreeGuard(_) => "git-worktree-guard",
            Self::Plugin(s) => &s.step_type,
        }
    }

    /// Display label, falling back to the id.
    pub fn display_label(&self) -> &str {
        self.label().unwrap_or_else(|| self.id())
    }
}

impl<'de> Deserialize<'de> for Step {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Value::deserialize(deserializer)?;
        let step_type = raw
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| D::Error::custom("step is missing a string 'type' field"))?
            .to_string();

        fn typed<'de, T: Deserialize<'de>, E: DeError>(raw: Value) -> Result<T, E> {
            T::deserialize(raw).map_err(E::custom)
        }

        match step_type.as_str() {
            "prompt" => typed(raw).map(Step::Prompt),
            "command" => typed(raw).map(Step::Command),
            "message" => typed(raw).map(Step::Message),
            "branch" => typed(raw).map(Step::Branch),
            "group" => typed(raw).map(Step::Group),
            "iterate" => typed(raw).map(Step::Iterate),
            "compute" => typed(raw).map(Step::Compute),
            "git-worktree-guard" => typed(raw).map(Step::GitWorktreeGuard),
            _ => {
                let id = raw
                    .get("id")
                    .and_then(Value::as_str)
                    .ok_or_else(|| D::Error::custom("plugin step is missing an 'id' field"))?
                    .to_string();
                let label = raw
                    .get("label")
                    .and_then(Value::as_str)
                    .map(str::to_string);
                Ok(Step::Plugin(PluginStep {
                    id,
                    label,
                    step_type,
                    body: raw,
                }))
            }
        }
    }
}

impl Serialize for Step {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        fn tagged<T: Serialize, S: Serializer>(
            inner: &T,
            tag: &str,
        ) -> Result<Value, S::Error> {
            let mut value = serde_json::to_value(inner).map_err(S::Error::custom)?;
            if let Value::Object(map) = &mut value {
                map.insert("type".to_string(), Value::String(tag.to_string()));
            }
            Ok(value)
        }

        let value = match self {
            Self::Prompt(s) => tagged::<_, S>(s, "prompt")?,
            Self::Command(s) => tagged::<_, S>(s, "command")?,
            Self::Message(s) => tagged::<_, S>(s, "message")?,
            Self::Branch(s) => tagged::<_, S>(s, "branch")?,
            Self::Group(s) => tagged::<_, S>(s, "group")?,
            Self::Iterate(s) => tagged::<_, S>(s, "iterate")?,
            Self::Compute(s) => tagged::<_, S>(s, "compute")?,
            Self::GitWorktreeGuard(s) => tagged::<_, S>(s, "git-worktree-guard")?,
            Self::Plugin(s) => s.body.clone(),
        };
        value.serialize(serializer)
    }
}

// ---------------------------------------------------------------------------
// Prompt
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptStep {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    pub mode: PromptMode,
    /// Prompt text; rendered through the template engine.
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<PromptOption>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dynamic: Option<DynamicSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    pub store_as: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validate: Option<PromptValidation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persist: Option<PromptPersistence>,
    /// Multiselect hint: display chosen options with their selection order.
    #[serde(default)]
    pub show_selection_order: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptOption {
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    #[serde(default)]
    pub disabled: bool,
}

impl PromptOption {
    pub fn display_label(&self) -> String {
        self.label
            .clone()
            .unwrap_or_else(|| rb_core::value::display_value(&self.value))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptValidation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
    /// User-facing message when a rule fails.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Where a prompt answer is persisted between runs. The effective store key
/// is `<scope>:<key>`, with `key` defaulting to the step's `storeAs`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptPersistence {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

impl PromptPersistence {
    pub fn effective_key(&self, store_as: &str) -> String {
        let key = self.key.as_deref().unwrap_or(store_as);
        match self.scope.as_deref() {
            Some(scope) => format!("{scope}:{key}"),
            None => key.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Dynamic option sources
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DynamicSource {
    #[serde(flatten)]
    pub kind: DynamicSourceKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache: Option<CacheMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub map: Option<OptionMap>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "kebab-case")]
pub enum DynamicSourceKind {
    /// Run a shell command and JSON-parse its stdout into options.
    #[serde(rename_all = "camelCase")]
    Command {
        command: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cwd: Option<String>,
    },
    /// Match file glob patterns under `cwd` (default repo root).
    #[serde(rename_all = "camelCase")]
    Glob {
        patterns: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cwd: Option<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        ignore: Vec<String>,
    },
    /// Read a JSON file, optionally following a JSON pointer.
    #[serde(rename_all = "camelCase")]
    Json {
        path: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pointer: Option<String>,
    },
    /// Discover directories under the repo root containing a package manifest.
    #[serde(rename_all = "camelCase")]
    WorkspaceProjects {
        #[serde(default)]
        include_root: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_depth: Option<usize>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        ignore: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        limit: Option<usize>,
    },
    /// Enumerate `tsconfig*.json` files under a project directory.
    #[serde(rename_all = "camelCase")]
    ProjectTsconfigs {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        dir: Option<String>,
        /// Append a "custom path" sentinel entry.
        #[serde(default)]
        allow_custom_path: bool,
    },
}

impl DynamicSourceKind {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Command { .. } => "command",
            Self::Glob { .. } => "glob",
            Self::Json { .. } => "json",
            Self::WorkspaceProjects { .. } => "workspace-projects",
            Self::ProjectTsconfigs { .. } => "project-tsconfigs",
        }
    }
}

// ---------------------------------------------------------------------------
// Command
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandStep {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    pub commands: Vec<CommandSpec>,
    /// Step-level defaults layered between preset and per-command fields.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub defaults: Option<CommandDefaults>,
    /// Runnable during the collect phase.
    #[serde(default)]
    pub collect_safe: bool,
    #[serde(default)]
    pub continue_on_error: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_success: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_error: Option<OnError>,
}

/// A single command descriptor.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandSpec {
    /// Template string; rendered before execution.
    pub run: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shell: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preset: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub capture_stdout: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store_stdout_as: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parse_json: Option<ParseJson>,
    #[serde(default)]
    pub store_when: StoreWhen,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub redact_keys: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warn_after_ms: Option<u64>,
    #[serde(default)]
    pub dry_run_strategy: DryRunStrategy,
    #[serde(default)]
    pub continue_on_fail: bool,
}

/// Step-level command defaults; the middle layer of preset inheritance.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandDefaults {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shell: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warn_after_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParseJson {
    Flag(bool),
    #[serde(rename_all = "camelCase")]
    Options {
        on_error: ParseErrorMode,
    },
}

impl ParseJson {
    pub fn enabled(&self) -> bool {
        !matches!(self, Self::Flag(false))
    }

    pub fn on_error(&self) -> ParseErrorMode {
        match self {
            Self::Flag(_) => ParseErrorMode::Fail,
            Self::Options { on_error } => *on_error,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParseErrorMode {
    Fail,
    Warn,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreWhen {
    #[default]
    Success,
    Failure,
    Always,
}

impl StoreWhen {
    pub fn matches(&self, success: bool) -> bool {
        match self {
            Self::Always => true,
            Self::Success => success,
            Self::Failure => !success,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DryRunStrategy {
    /// Synthesise a successful record without spawning.
    #[default]
    Skip,
    /// Spawn normally even in dry-run (used to gather live information).
    Execute,
}

// ---------------------------------------------------------------------------
// Error routing
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnError {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto: Option<AutoAction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<ErrorPolicy>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<ErrorAction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_next: Option<String>,
    /// Target for the `transition` auto strategy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoAction {
    pub strategy: AutoStrategy,
    #[serde(default = "default_auto_limit")]
    pub limit: u32,
}

fn default_auto_limit() -> u32 {
    1
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AutoStrategy {
    Retry,
    Default,
    Transition,
    Exit,
}

/// Route a failure by mapping a state value to a transition target.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPolicy {
    /// Dotted key resolved against `state.answers`.
    pub key: String,
    pub map: BTreeMap<String, String>,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
}

/// An interactive recovery choice offered when a command fails.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorAction {
    pub label: String,
    pub next: String,
}

// ---------------------------------------------------------------------------
// Message / Branch / Group / Iterate / Compute
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageStep {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    #[serde(default)]
    pub level: MessageLevel,
    /// Rendered through the template engine.
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchStep {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    pub conditions: Vec<BranchCondition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_next: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchCondition {
    /// Boolean expression evaluated against state and environment.
    pub when: String,
    pub next: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupStep {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    /// Nested flow run to completion before the parent continues.
    pub flow: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IterateStep {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    pub over: IterateSource,
    /// Answers key holding the current item during each iteration.
    pub store_each_as: String,
    pub flow: String,
    /// Optional upper bound for overlapped item execution. Accepted as a
    /// hint; execution remains sequential.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concurrency: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "from", rename_all = "kebab-case")]
pub enum IterateSource {
    #[serde(rename_all = "camelCase")]
    Items { items: Vec<Value> },
    /// Look up a list stored in `state.answers`.
    #[serde(rename_all = "camelCase")]
    Answers { key: String },
    #[serde(rename_all = "camelCase")]
    Dynamic { source: DynamicSource },
    #[serde(rename_all = "camelCase")]
    Json {
        path: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pointer: Option<String>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComputeStep {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    /// Inline key → template map. Mutually exclusive with `handler`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<BTreeMap<String, Value>>,
    /// Named built-in handler. Mutually exclusive with `values`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handler: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    /// When set, results are stored under this single key instead of being
    /// spread into `answers`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store_as: Option<String>,
}

// ---------------------------------------------------------------------------
// Worktree guard
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorktreeGuardStep {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    /// Strategies offered when the tree is dirty.
    #[serde(default = "default_strategies")]
    pub strategies: Vec<WorktreeStrategy>,
    /// Answers key recording the chosen strategy.
    pub store_as: String,
    /// Follow-up prompts keyed by strategy name (e.g. a commit message for
    /// `commit`, a branch name for `branch`).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub prompts: BTreeMap<String, WorktreePrompt>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clean_message: Option<String>,
}

fn default_strategies() -> Vec<WorktreeStrategy> {
    vec![
        WorktreeStrategy::Commit,
        WorktreeStrategy::Stash,
        WorktreeStrategy::Branch,
        WorktreeStrategy::Proceed,
    ]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorktreeStrategy {
    Commit,
    Stash,
    Branch,
    Proceed,
}

impl WorktreeStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Commit => "commit",
            Self::Stash => "stash",
            Self::Branch => "branch",
            Self::Proceed => "proceed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorktreePrompt {
    pub prompt: String,
    pub store_as: String,
}

// ---------------------------------------------------------------------------
// Plugin
// ---------------------------------------------------------------------------

/// A step whose `type` is not built-in. The body (the full raw step object,
/// including `id` and `type`) is passed to the registered handler untouched.
#[derive(Debug, Clone)]
pub struct PluginStep {
    pub id: String,
    pub label: Option<String>,
    pub step_type: String,
    pub body: Value,
}

#[cfg(test)]
#[path = "step_tests.rs"]
mod tests;
