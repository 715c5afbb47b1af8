//! Document-level configuration shapes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::step::Step;

/// A validated configuration document, immutable for the duration of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Configuration {
    pub meta: Meta,
    pub scenarios: Vec<Scenario>,
    pub flows: BTreeMap<String, Vec<Step>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub command_presets: BTreeMap<String, CommandPreset>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub policies: Vec<PolicyRule>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub plugins: Vec<PluginRef>,
}

impl Configuration {
    pub fn scenario(&self, id: &str) -> Option<&Scenario> {
        self.scenarios.iter().find(|s| s.id == id)
    }

    pub fn flow(&self, id: &str) -> Option<&[Step]> {
        self.flows.get(id).map(Vec::as_slice)
    }
}

/// Document identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Meta {
    pub name: String,
    #[serde(default)]
    pub version: String,
    /// Document schema version; unknown values produce a validation warning.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_version: Option<String>,
}

/// The document schema version this engine understands.
pub const SUPPORTED_SCHEMA_VERSION: &str = "1";

/// A named traversal over one or more flows.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scenario {
    pub id: String,
    pub label: String,
    /// Entry flow id.
    pub flow: String,
    /// Flows chained after the entry flow completes.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub additional_flows: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub post_run: Vec<PostRunHook>,
}

/// A flow executed during the `completing` phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostRunHook {
    pub flow: String,
    #[serde(default)]
    pub trigger: HookTrigger,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HookTrigger {
    #[default]
    Always,
    OnSuccess,
    OnFailure,
}

impl HookTrigger {
    /// Whether a hook with this trigger runs given the scenario outcome.
    pub fn fires(&self, scenario_succeeded: bool) -> bool {
        match self {
            Self::Always => true,
            Self::OnSuccess => scenario_succeeded,
            Self::OnFailure => !scenario_succeeded,
        }
    }
}

/// A reusable bundle of command defaults referenced by name.
///
/// `description` and `tags` are documentation only and never reach the
/// command runner.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandPreset {
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
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

/// An ordered policy rule gating command execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyRule {
    pub id: String,
    pub level: PolicyLevel,
    #[serde(default, rename = "match")]
    pub matcher: PolicyMatcher,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyLevel {
    Allow,
    Warn,
    Block,
}

impl std::fmt::Display for PolicyLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Allow => write!(f, "allow"),
            Self::Warn => write!(f, "warn"),
            Self::Block => write!(f, "block"),
        }
    }
}

/// Predicates a command must satisfy for the rule to fire. All specified
/// predicates must hold; an empty matcher matches everything.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyMatcher {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flow: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preset: Option<String>,
    /// Exact command strings.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub commands: Vec<String>,
    /// Regex patterns over the rendered command string.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub patterns: Vec<String>,
}

/// Reference to an externally-loaded handler for a custom step type.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginRef {
    /// The step `type` this handler claims.
    #[serde(rename = "type")]
    pub step_type: String,
    /// Loader-specific locator; opaque to the engine.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handler: Option<String>,
}

/// Cache behaviour for a dynamic option source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CacheMode {
    Keyword(CacheKeyword),
    Ttl {
        #[serde(rename = "ttlMs")]
        ttl_ms: u64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheKeyword {
    /// In-memory for the current run only.
    Session,
    /// Process lifetime, no expiry.
    Always,
}

/// Field re-projection for dynamic option entries. Paths are dotted or
/// JSON-pointer (`/a/b`) into each raw entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptionMap {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disable_when: Option<String>,
}
