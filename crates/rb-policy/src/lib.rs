//! Policy gating for command execution.
//!
//! Rules are evaluated in configuration order; the first rule whose matcher
//! matches decides the command's fate. A `block` rule can be downgraded to
//! `warn` for the current run by acknowledging its id — consent never
//! outlives the run.

use std::collections::HashSet;

use regex::Regex;
use serde::Serialize;
use tracing::debug;

use rb_config::{PolicyLevel, PolicyRule};

/// A command about to run, described for rule matching.
#[derive(Debug, Clone)]
pub struct CommandQuery<'a> {
    pub flow_id: &'a str,
    pub step_id: &'a str,
    /// The rendered command line.
    pub command: &'a str,
    pub preset: Option<&'a str>,
}

/// The outcome of matching one rule against a command.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyDecision {
    pub rule_id: String,
    pub rule_level: PolicyLevel,
    /// `warn` when a `block` rule has been acknowledged this run.
    pub enforced_level: PolicyLevel,
    pub acknowledged: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Per-run policy evaluator with precompiled matchers.
pub struct PolicyEngine {
    rules: Vec<CompiledRule>,
    acknowledged: HashSet<String>,
}

struct CompiledRule {
    rule: PolicyRule,
    patterns: Vec<Regex>,
}

impl PolicyEngine {
    /// Compile the ordered rule list. Patterns are assumed valid — the
    /// configuration validator rejects bad regexes before a run starts.
    pub fn new(rules: &[PolicyRule]) -> Self {
        let compiled = rules
            .iter()
            .map(|rule| CompiledRule {
                patterns: rule
                    .matcher
                    .patterns
                    .iter()
                    .filter_map(|pattern| Regex::new(pattern).ok())
                    .collect(),
                rule: rule.clone(),
            })
            .collect();
        Self {
            rules: compiled,
            acknowledged: HashSet::new(),
        }
    }

    /// Record current-run consent for a blocking rule.
    pub fn acknowledge(&mut self, rule_id: &str) {
        debug!(rule_id, "policy rule acknowledged for this run");
        self.acknowledged.insert(rule_id.to_string());
    }

    pub fn is_acknowledged(&self, rule_id: &str) -> bool {
        self.acknowledged.contains(rule_id)
    }

    /// Return the first matching rule's decision, or `None` when no rule
    /// matches (implicitly allowed).
    pub fn evaluate_command(&self, query: &CommandQuery<'_>) -> Option<PolicyDecision> {
        for compiled in &self.rules {
            if !compiled.matches(query) {
                continue;
            }
            let rule = &compiled.rule;
            let acknowledged = self.acknowledged.contains(&rule.id);
            let enforced_level = match rule.level {
                PolicyLevel::Block if acknowledged => PolicyLevel::Warn,
                level => level,
            };
            return Some(PolicyDecision {
                rule_id: rule.id.clone(),
                rule_level: rule.level,
                enforced_level,
                acknowledged,
                note: rule.note.clone(),
            });
        }
        None
    }
}

impl CompiledRule {
    /// All specified predicates must hold.
    fn matches(&self, query: &CommandQuery<'_>) -> bool {
        let matcher = &self.rule.matcher;
        if let Some(flow) = &matcher.flow {
            if flow != query.flow_id {
                return false;
            }
        }
        if let Some(step) = &matcher.step {
            if step != query.step_id {
                return false;
            }
        }
        if let Some(preset) = &matcher.preset {
            if query.preset != Some(preset.as_str()) {
                return false;
            }
        }
        if !matcher.commands.is_empty()
            && !matcher.commands.iter().any(|c| c == query.command)
        {
            return false;
        }
        if !self.patterns.is_empty()
            && !self.patterns.iter().any(|p| p.is_match(query.command))
        {
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(value: serde_json::Value) -> PolicyRule {
        serde_json::from_value(value).unwrap()
    }

    fn query<'a>(command: &'a str) -> CommandQuery<'a> {
        CommandQuery {
            flow_id: "deploy",
            step_id: "release",
            command,
            preset: Some("ci"),
        }
    }

    #[test]
    fn test_first_matching_rule_wins() {
        let engine = PolicyEngine::new(&[
            rule(serde_json::json!({"id": "warn-any", "level": "warn", "match": {}})),
            rule(serde_json::json!({"id": "block-any", "level": "block", "match": {}})),
        ]);
        let decision = engine.evaluate_command(&query("ls")).unwrap();
        assert_eq!(decision.rule_id, "warn-any");
        assert_eq!(decision.enforced_level, PolicyLevel::Warn);
    }

    #[test]
    fn test_no_match_is_none() {
        let engine = PolicyEngine::new(&[rule(serde_json::json!({
            "id": "block-prod",
            "level": "block",
            "match": {"patterns": ["deploy\\s+--channel\\s+prod"]}
        }))]);
        assert!(engine.evaluate_command(&query("ls -la")).is_none());
    }

    #[test]
    fn test_regex_pattern_match() {
        let engine = PolicyEngine::new(&[rule(serde_json::json!({
            "id": "block-prod",
            "level": "block",
            "match": {"patterns": ["deploy\\s+--channel\\s+prod"]},
            "note": "production deploys are gated"
        }))]);
        let decision = engine
            .evaluate_command(&query("deploy --channel prod"))
            .unwrap();
        assert_eq!(decision.rule_id, "block-prod");
        assert_eq!(decision.rule_level, PolicyLevel::Block);
        assert_eq!(decision.enforced_level, PolicyLevel::Block);
        assert!(!decision.acknowledged);
        assert_eq!(decision.note.as_deref(), Some("production deploys are gated"));
    }

    #[test]
    fn test_acknowledge_downgrades_block_to_warn() {
        let mut engine = PolicyEngine::new(&[rule(serde_json::json!({
            "id": "block-prod",
            "level": "block",
            "match": {"commands": ["deploy --channel prod"]}
        }))]);
        engine.acknowledge("block-prod");
        let decision = engine
            .evaluate_command(&query("deploy --channel prod"))
            .unwrap();
        assert_eq!(decision.rule_level, PolicyLevel::Block);
        assert_eq!(decision.enforced_level, PolicyLevel::Warn);
        assert!(decision.acknowledged);
    }

    #[test]
    fn test_acknowledge_does_not_downgrade_warn_or_allow() {
        let mut engine = PolicyEngine::new(&[rule(serde_json::json!({
            "id": "warn-rule",
            "level": "warn",
            "match": {}
        }))]);
        engine.acknowledge("warn-rule");
        let decision = engine.evaluate_command(&query("ls")).unwrap();
        assert_eq!(decision.enforced_level, PolicyLevel::Warn);
        assert!(decision.acknowledged);
    }

    #[test]
    fn test_all_predicates_must_hold() {
        let engine = PolicyEngine::new(&[rule(serde_json::json!({
            "id": "narrow",
            "level": "allow",
            "match": {"flow": "deploy", "step": "release", "preset": "ci",
                       "commands": ["make release"]}
        }))]);
        assert!(engine.evaluate_command(&query("make release")).is_some());

        let other_preset = CommandQuery {
            preset: Some("local"),
            ..query("make release")
        };
        assert!(engine.evaluate_command(&other_preset).is_none());

        let other_flow = CommandQuery {
            flow_id: "test",
            ..query("make release")
        };
        assert!(engine.evaluate_command(&other_flow).is_none());
    }

    #[test]
    fn test_preset_predicate_requires_a_preset() {
        let engine = PolicyEngine::new(&[rule(serde_json::json!({
            "id": "preset-only",
            "level": "warn",
            "match": {"preset": "ci"}
        }))]);
        let no_preset = CommandQuery {
            preset: None,
            ..query("ls")
        };
        assert!(engine.evaluate_command(&no_preset).is_none());
    }

    #[test]
    fn test_command_equality_list() {
        let engine = PolicyEngine::new(&[rule(serde_json::json!({
            "id": "exact",
            "level": "block",
            "match": {"commands": ["rm -rf /", "dd if=/dev/zero"]}
        }))]);
        assert!(engine.evaluate_command(&query("rm -rf /")).is_some());
        assert!(engine.evaluate_command(&query("rm -rf /tmp")).is_none());
    }
}
