//! Cross-reference validation of a parsed configuration document.
//!
//! The executor trusts configurations that passed this check: every flow,
//! step target, and preset reference it encounters mid-run is known to
//! resolve, so traversal errors there indicate engine bugs, not user input.

use std::collections::BTreeSet;

use rb_core::EngineError;

use crate::model::{Configuration, SUPPORTED_SCHEMA_VERSION};
use crate::step::Step;

/// Non-fatal findings produced alongside a successful validation.
#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    pub warnings: Vec<String>,
}

impl Configuration {
    /// Check all cross-references in the document.
    ///
    /// Returns the warning list on success; the first broken reference or
    /// malformed expression fails with [`EngineError::Config`].
    pub fn validate(&self) -> Result<ValidationReport, EngineError> {
        let mut report = ValidationReport::default();

        if let Some(version) = &self.meta.schema_version {
            if version != SUPPORTED_SCHEMA_VERSION {
                report.warnings.push(format!(
                    "unknown schema version '{version}' (supported: {SUPPORTED_SCHEMA_VERSION})"
                ));
            }
        }

        let mut scenario_ids = BTreeSet::new();
        for scenario in &self.scenarios {
            if !scenario_ids.insert(scenario.id.as_str()) {
                return Err(EngineError::Config(format!(
                    "duplicate scenario id '{}'",
                    scenario.id
                )));
            }
            self.require_flow(&scenario.flow, &format!("scenario '{}'", scenario.id))?;
            for flow in &scenario.additional_flows {
                self.require_flow(flow, &format!("scenario '{}'", scenario.id))?;
            }
            for hook in &scenario.post_run {
                self.require_flow(
                    &hook.flow,
                    &format!("post-run hook of scenario '{}'", scenario.id),
                )?;
            }
        }

        for rule in &self.policies {
            for pattern in &rule.matcher.patterns {
                regex::Regex::new(pattern).map_err(|e| {
                    EngineError::Config(format!(
                        "policy rule '{}' has an invalid pattern: {e}",
                        rule.id
                    ))
                })?;
            }
        }

        for (flow_id, steps) in &self.flows {
            self.validate_flow(flow_id, steps, &mut report)?;
        }

        Ok(report)
    }

    fn require_flow(&self, flow_id: &str, referrer: &str) -> Result<(), EngineError> {
        if self.flows.contains_key(flow_id) {
            Ok(())
        } else {
            Err(EngineError::Config(format!(
                "{referrer} references unknown flow '{flow_id}'"
            )))
        }
    }

    fn validate_flow(
        &self,
        flow_id: &str,
        steps: &[Step],
        report: &mut ValidationReport,
    ) -> Result<(), EngineError> {
        let mut step_ids = BTreeSet::new();
        for step in steps {
            if !step_ids.insert(step.id()) {
                return Err(EngineError::Config(format!(
                    "flow '{flow_id}' has duplicate step id '{}'",
                    step.id()
                )));
            }
        }

        let check_target = |target: &str, step_id: &str| -> Result<(), EngineError> {
            if target == "exit" || target == "repeat" || step_ids.contains(target) {
                Ok(())
            } else {
                Err(EngineError::Config(format!(
                    "step '{step_id}' in flow '{flow_id}' targets unknown step '{target}'"
                )))
            }
        };

        for step in steps {
            match step {
                Step::Prompt(prompt) => {
                    if let Some(rule) = &prompt.validate {
                        if let Some(pattern) = &rule.pattern {
                            regex::Regex::new(pattern).map_err(|e| {
                                EngineError::Config(format!(
                                    "prompt '{}' has an invalid validation pattern: {e}",
                                    prompt.id
                                ))
                            })?;
                        }
                    }
                }
                Step::Command(cmd) => {
                    for spec in &cmd.commands {
                        if let Some(preset) = &spec.preset {
                            if !self.command_presets.contains_key(preset) {
                                return Err(EngineError::Config(format!(
                                    "command step '{}' references unknown preset '{preset}'",
                                    cmd.id
                                )));
                            }
                        }
                    }
                    if let Some(target) = &cmd.on_success {
                        check_target(target, &cmd.id)?;
                    }
                    if let Some(on_error) = &cmd.on_error {
                        if let Some(target) = &on_error.target {
                            check_target(target, &cmd.id)?;
                        }
                        if let Some(target) = &on_error.default_next {
                            check_target(target, &cmd.id)?;
                        }
                        for action in &on_error.actions {
                            check_target(&action.next, &cmd.id)?;
                        }
                        if let Some(policy) = &on_error.policy {
                            for target in policy.map.values() {
                                check_target(target, &cmd.id)?;
                            }
                            if let Some(target) = &policy.default {
                                check_target(target, &cmd.id)?;
                            }
                        }
                    }
                }
                Step::Message(msg) => {
                    if let Some(target) = &msg.next {
                        check_target(target, &msg.id)?;
                    }
                }
                Step::Branch(branch) => {
                    for condition in &branch.conditions {
                        rb_template::parse_expression(&condition.when).map_err(|e| {
                            EngineError::Config(format!(
                                "branch '{}' has an invalid expression '{}': {e}",
                                branch.id, condition.when
                            ))
                        })?;
                        check_target(&condition.next, &branch.id)?;
                    }
                    if let Some(target) = &branch.default_next {
                        check_target(target, &branch.id)?;
                    }
                }
                Step::Group(group) => {
                    self.require_flow(&group.flow, &format!("group step '{}'", group.id))?;
                }
                Step::Iterate(iterate) => {
                    self.require_flow(&iterate.flow, &format!("iterate step '{}'", iterate.id))?;
                    if iterate.concurrency == Some(0) {
                        return Err(EngineError::Config(format!(
                            "iterate step '{}' has a zero concurrency hint",
                            iterate.id
                        )));
                    }
                }
                Step::Compute(compute) => {
                    match (&compute.values, &compute.handler) {
                        (Some(_), Some(_)) => {
                            return Err(EngineError::Config(format!(
                                "compute step '{}' sets both 'values' and 'handler'",
                                compute.id
                            )));
                        }
                        (None, None) => {
                            return Err(EngineError::Config(format!(
                                "compute step '{}' needs either 'values' or 'handler'",
                                compute.id
                            )));
                        }
                        _ => {}
                    }
                }
                Step::GitWorktreeGuard(guard) => {
                    for key in guard.prompts.keys() {
                        let known = guard.strategies.iter().any(|s| s.as_str() == key);
                        if !known {
                            return Err(EngineError::Config(format!(
                                "worktree guard '{}' has a prompt for unoffered strategy '{key}'",
                                guard.id
                            )));
                        }
                    }
                }
                Step::Plugin(plugin) => {
                    let declared = self
                        .plugins
                        .iter()
                        .any(|p| p.step_type == plugin.step_type);
                    if !declared {
                        report.warnings.push(format!(
                            "step '{}' uses plugin type '{}' with no declared handler",
                            plugin.id, plugin.step_type
                        ));
                    }
                }
            }
        }
        Ok(())
    }
}
