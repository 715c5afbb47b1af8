//! Configuration data model for the runbook engine.
//!
//! The engine consumes an already-validated [`Configuration`]; discovery and
//! merging of configuration documents happen outside this workspace. This
//! crate defines the document shapes (scenarios, flows, steps, command
//! presets, policies, plugin references) and the cross-reference validation
//! that turns a parsed document into a trusted one.

pub mod model;
pub mod step;
pub mod validate;

pub use model::{
    CacheKeyword, CacheMode, CommandPreset, Configuration, HookTrigger, Meta, OptionMap,
    PluginRef, PolicyLevel, PolicyMatcher, PolicyRule, PostRunHook, SUPPORTED_SCHEMA_VERSION,
    Scenario,
};
pub use step::{
    AutoAction, AutoStrategy, BranchCondition, BranchStep, CommandDefaults, CommandSpec,
    CommandStep, ComputeStep, DryRunStrategy, DynamicSource, DynamicSourceKind, ErrorAction,
    ErrorPolicy, GroupStep, IterateSource, IterateStep, MessageStep, OnError, ParseErrorMode,
    ParseJson, PluginStep, PromptOption, PromptPersistence, PromptStep, PromptValidation, Step,
    StoreWhen, WorktreeGuardStep, WorktreePrompt, WorktreeStrategy,
};
pub use validate::ValidationReport;
