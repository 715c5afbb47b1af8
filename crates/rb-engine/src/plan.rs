//! Side-effect-free scenario plans.
//!
//! The plan builder shares the executor's layering and template machinery
//! but never spawns commands or invokes the prompt driver: prompt values
//! come only from overrides, persisted answers, and declared defaults.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use rb_config::{IterateSource, Scenario, Step};
use rb_core::EngineError;
use rb_core::value::{coerce_override, lookup_path};

use crate::command::{EnvDiffEntry, layer};
use crate::context::ExecContext;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    pub scenario_id: String,
    pub scenario_label: String,
    pub dry_run: bool,
    pub overrides: Vec<OverrideEntry>,
    pub warnings: Vec<String>,
    /// Prompts that will need interactive input at runtime.
    pub pending_prompt_count: usize,
    pub flows: Vec<PlannedFlow>,
    pub preferences: PlanPreferences,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OverrideEntry {
    pub key: String,
    pub value: Value,
    /// Where the value came from: `override`, `persisted`, or `default`.
    pub source: String,
}

/// Expansion toggles for the human-readable render.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanPreferences {
    pub expand_templates: bool,
    pub expand_env: bool,
    pub expand_branches: bool,
}

impl Default for PlanPreferences {
    fn default() -> Self {
        Self {
            expand_templates: true,
            expand_env: false,
            expand_branches: false,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannedFlow {
    pub id: String,
    pub steps: Vec<PlannedStep>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannedStep {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub kind: String,
    #[serde(flatten)]
    pub detail: PlannedDetail,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged, rename_all = "camelCase")]
pub enum PlannedDetail {
    #[serde(rename_all = "camelCase")]
    Prompt {
        store_as: String,
        mode: String,
        /// `override`, `persisted`, `default`, or `pending`.
        value_source: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        planned_value: Option<Value>,
    },
    #[serde(rename_all = "camelCase")]
    Command { commands: Vec<PlannedCommand> },
    #[serde(rename_all = "camelCase")]
    Message { level: String, text: String },
    #[serde(rename_all = "camelCase")]
    Branch {
        conditions: Vec<PlannedCondition>,
        #[serde(skip_serializing_if = "Option::is_none")]
        selected: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        default_next: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Group { flow: String },
    #[serde(rename_all = "camelCase")]
    Iterate {
        flow: String,
        store_each_as: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        item_count: Option<usize>,
        #[serde(skip_serializing_if = "Option::is_none")]
        concurrency: Option<usize>,
    },
    #[serde(rename_all = "camelCase")]
    Compute {
        keys: Vec<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        handler: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    WorktreeGuard { strategies: Vec<String> },
    #[serde(rename_all = "camelCase")]
    Plugin {
        step_type: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        summary: Option<Value>,
    },
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannedCommand {
    /// The raw template string.
    pub run: String,
    /// The command line after template rendering against planned answers.
    pub rendered_run: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preset: Option<String>,
    pub env_diff: Vec<EnvDiffEntry>,
    pub dry_run_strategy: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannedCondition {
    pub when: String,
    pub next: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Build the plan for a scenario under the context's overrides.
pub fn build_scenario_plan(
    ctx: &ExecContext,
    preferences: PlanPreferences,
) -> Result<Plan, EngineError> {
    let scenario = ctx
        .config
        .scenario(&ctx.scenario_id)
        .cloned()
        .ok_or_else(|| {
            EngineError::Config(format!("unknown scenario '{}'", ctx.scenario_id))
        })?;

    let mut warnings = ctx.config.validate()?.warnings;
    let mut builder = PlanBuilder {
        ctx,
        repo_root_str: ctx.repo_root.to_string_lossy().into_owned(),
        answers: serde_json::Map::new(),
        overrides: Vec::new(),
        pending_prompt_count: 0,
    };

    let mut flows = Vec::new();
    for flow_id in flow_chain(&scenario) {
        let steps = ctx
            .config
            .flow(&flow_id)
            .ok_or_else(|| EngineError::Config(format!("unknown flow '{flow_id}'")))?;
        let planned = steps
            .iter()
            .map(|step| builder.plan_step(step, &mut warnings))
            .collect::<Result<Vec<_>, _>>()?;
        flows.push(PlannedFlow {
            id: flow_id,
            steps: planned,
        });
    }

    if builder.pending_prompt_count > 0 {
        warnings.push(format!(
            "{} prompt(s) will require interactive input at runtime",
            builder.pending_prompt_count
        ));
    }

    Ok(Plan {
        scenario_id: scenario.id,
        scenario_label: scenario.label,
        dry_run: ctx.dry_run,
        overrides: builder.overrides,
        warnings,
        pending_prompt_count: builder.pending_prompt_count,
        flows,
        preferences,
    })
}

/// Entry flow, chained flows, then post-run hook flows, in walk order.
fn flow_chain(scenario: &Scenario) -> Vec<String> {
    let mut chain = vec![scenario.flow.clone()];
    chain.extend(scenario.additional_flows.iter().cloned());
    chain.extend(scenario.post_run.iter().map(|hook| hook.flow.clone()));
    chain.dedup();
    chain
}

struct PlanBuilder<'a> {
    ctx: &'a ExecContext,
    repo_root_str: String,
    answers: serde_json::Map<String, Value>,
    overrides: Vec<OverrideEntry>,
    pending_prompt_count: usize,
}

impl PlanBuilder<'_> {
    fn render(&self, template: &str) -> String {
        let state = serde_json::json!({"answers": self.answers});
        let tctx = rb_template::Context {
            state: &state,
            env: &self.ctx.env,
            repo_root: &self.repo_root_str,
            iteration: None,
        };
        rb_template::render(template, &tctx).unwrap_or_else(|_| template.to_string())
    }

    fn eval(&self, expr: &str) -> Option<bool> {
        let state = serde_json::json!({"answers": self.answers});
        let tctx = rb_template::Context {
            state: &state,
            env: &self.ctx.env,
            repo_root: &self.repo_root_str,
            iteration: None,
        };
        rb_template::eval_bool(expr, &tctx).ok()
    }

    fn plan_step(
        &mut self,
        step: &Step,
        warnings: &mut Vec<String>,
    ) -> Result<PlannedStep, EngineError> {
        let detail = match step {
            Step::Prompt(prompt) => {
                let (source, value) = if let Some(raw) = self.ctx.overrides.get(&prompt.store_as)
                {
                    ("override", Some(coerce_override(raw, prompt.mode)?))
                } else if let Some(value) = prompt
                    .persist
                    .as_ref()
                    .filter(|_| !self.ctx.fresh_answers)
                    .and_then(|p| self.ctx.persisted.get(&p.effective_key(&prompt.store_as)))
                {
                    ("persisted", Some(value.clone()))
                } else if let Some(default) = &prompt.default {
                    ("default", Some(default.clone()))
                } else {
                    self.pending_prompt_count += 1;
                    ("pending", None)
                };
                if let Some(value) = &value {
                    self.answers.insert(prompt.store_as.clone(), value.clone());
                    self.overrides.push(OverrideEntry {
                        key: prompt.store_as.clone(),
                        value: value.clone(),
                        source: source.to_string(),
                    });
                }
                PlannedDetail::Prompt {
                    store_as: prompt.store_as.clone(),
                    mode: prompt.mode.to_string(),
                    value_source: source.to_string(),
                    planned_value: value,
                }
            }
            Step::Command(cmd) => {
                let mut commands = Vec::with_capacity(cmd.commands.len());
                for spec in &cmd.commands {
                    let preset = spec
                        .preset
                        .as_ref()
                        .and_then(|name| self.ctx.config.command_presets.get(name));
                    let layered = layer(spec, cmd.defaults.as_ref(), preset, &self.ctx.env);
                    commands.push(PlannedCommand {
                        run: spec.run.clone(),
                        rendered_run: self.render(&layered.run),
                        preset: spec.preset.clone(),
                        env_diff: layered.env_diff,
                        dry_run_strategy: match spec.dry_run_strategy {
                            rb_config::DryRunStrategy::Skip => "skip".to_string(),
                            rb_config::DryRunStrategy::Execute => "execute".to_string(),
                        },
                    });
                }
                PlannedDetail::Command { commands }
            }
            Step::Message(msg) => PlannedDetail::Message {
                level: msg.level.to_string(),
                text: self.render(&msg.text),
            },
            Step::Branch(branch) => {
                let selected = branch
                    .conditions
                    .iter()
                    .find(|c| self.eval(&c.when) == Some(true))
                    .map(|c| c.next.clone())
                    .or_else(|| branch.default_next.clone());
                PlannedDetail::Branch {
                    conditions: branch
                        .conditions
                        .iter()
                        .map(|c| PlannedCondition {
                            when: c.when.clone(),
                            next: c.next.clone(),
                            description: c.description.clone(),
                        })
                        .collect(),
                    selected,
                    default_next: branch.default_next.clone(),
                }
            }
            Step::Group(group) => PlannedDetail::Group {
                flow: group.flow.clone(),
            },
            Step::Iterate(iterate) => PlannedDetail::Iterate {
                flow: iterate.flow.clone(),
                store_each_as: iterate.store_each_as.clone(),
                item_count: self.iterate_count(&iterate.over),
                concurrency: iterate.concurrency,
            },
            Step::Compute(compute) => PlannedDetail::Compute {
                keys: compute
                    .values
                    .as_ref()
                    .map(|values| values.keys().cloned().collect())
                    .unwrap_or_default(),
                handler: compute.handler.clone(),
            },
            Step::GitWorktreeGuard(guard) => PlannedDetail::WorktreeGuard {
                strategies: guard
                    .strategies
                    .iter()
                    .map(|s| s.as_str().to_string())
                    .collect(),
            },
            Step::Plugin(plugin) => {
                let summary = match self.ctx.plugins.get(&plugin.step_type) {
                    Some(handler) => handler.plan(plugin),
                    None => {
                        warnings.push(format!(
                            "plugin step '{}' has no handler for type '{}'",
                            plugin.id, plugin.step_type
                        ));
                        None
                    }
                };
                PlannedDetail::Plugin {
                    step_type: plugin.step_type.clone(),
                    summary,
                }
            }
        };

        Ok(PlannedStep {
            id: step.id().to_string(),
            label: step.label().map(str::to_string),
            kind: step.kind().to_string(),
            detail,
        })
    }

    /// Item count where statically knowable.
    fn iterate_count(&self, source: &IterateSource) -> Option<usize> {
        match source {
            IterateSource::Items { items } => Some(items.len()),
            IterateSource::Answers { key } => {
                let answers = Value::Object(self.answers.clone());
                match lookup_path(&answers, key) {
                    Some(Value::Array(items)) => Some(items.len()),
                    _ => None,
                }
            }
            IterateSource::Json { path, pointer } => {
                let full = self.ctx.repo_root.join(path);
                let contents = std::fs::read_to_string(full).ok()?;
                let parsed: Value = serde_json::from_str(&contents).ok()?;
                let target = match pointer {
                    Some(pointer) => parsed.pointer(pointer)?,
                    None => &parsed,
                };
                target.as_array().map(Vec::len)
            }
            IterateSource::Dynamic { .. } => {
                debug!("dynamic iterate source count is not statically knowable");
                None
            }
        }
    }
}

/// Convenience map of the override values a plan would apply, used by the
/// executor's collect flow and by tests.
pub fn planned_answers(plan: &Plan) -> BTreeMap<String, Value> {
    plan.overrides
        .iter()
        .map(|entry| (entry.key.clone(), entry.value.clone()))
        .collect()
}

#[cfg(test)]
#[path = "plan_tests.rs"]
mod tests;
