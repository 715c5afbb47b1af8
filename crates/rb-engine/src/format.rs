//! Plan serialisation: indented text, newline-delimited JSON events, and a
//! single structured JSON document.

use serde_json::json;

use crate::plan::{Plan, PlannedDetail, PlannedStep};

/// Render the plan as indented human-readable text.
pub fn render_text(plan: &Plan) -> String {
    let mut out = String::new();
    let prefs = &plan.preferences;

    out.push_str(&format!(
        "Scenario: {} ({})\n",
        plan.scenario_label, plan.scenario_id
    ));
    out.push_str(&format!(
        "Mode: {}\n",
        if plan.dry_run { "dry-run" } else { "live" }
    ));

    if !plan.overrides.is_empty() {
        out.push_str("Overrides:\n");
        for entry in &plan.overrides {
            out.push_str(&format!(
                "  {} = {} ({})\n",
                entry.key, entry.value, entry.source
            ));
        }
    }
    if !plan.warnings.is_empty() {
        out.push_str("Warnings:\n");
        for warning in &plan.warnings {
            out.push_str(&format!("  ! {warning}\n"));
        }
    }
    out.push('\n');

    for flow in &plan.flows {
        out.push_str(&format!("Flow: {} ({})\n", flow.id, flow.id));
        for step in &flow.steps {
            render_step(&mut out, step, prefs.expand_templates, prefs.expand_env, prefs.expand_branches);
        }
        out.push('\n');
    }

    out.push_str(&format!(
        "Pending prompts: {}\n",
        plan.pending_prompt_count
    ));
    out
}

fn render_step(
    out: &mut String,
    step: &PlannedStep,
    expand_templates: bool,
    expand_env: bool,
    expand_branches: bool,
) {
    let label = step.label.as_deref().unwrap_or(&step.id);
    out.push_str(&format!("- [{}] {} ({})\n", step.kind, label, step.id));

    match &step.detail {
        PlannedDetail::Command { commands } => {
            for command in commands {
                let line = if expand_templates {
                    &command.rendered_run
                } else {
                    &command.run
                };
                out.push_str(&format!("    • {line}\n"));
                if command.env_diff.is_empty() {
                    continue;
                }
                if expand_env {
                    out.push_str("    env:\n");
                    for entry in &command.env_diff {
                        let previous = entry
                            .previous
                            .as_deref()
                            .map(|p| format!(" (was {p})"))
                            .unwrap_or_default();
                        out.push_str(&format!(
                            "      {}={} [{}]{}\n",
                            entry.key,
                            entry.value,
                            match entry.source {
                                crate::command::EnvSource::Preset => "preset",
                                crate::command::EnvSource::Defaults => "defaults",
                                crate::command::EnvSource::Command => "command",
                            },
                            previous
                        ));
                    }
                } else {
                    out.push_str("    env diffs: (hidden — use --plan-expand env)\n");
                }
            }
        }
        PlannedDetail::Prompt {
            store_as,
            mode,
            value_source,
            planned_value,
        } => {
            match planned_value {
                Some(value) => out.push_str(&format!(
                    "    {mode} → {store_as} = {value} ({value_source})\n"
                )),
                None => out.push_str(&format!(
                    "    {mode} → {store_as} (interactive at runtime)\n"
                )),
            };
        }
        PlannedDetail::Branch {
            conditions,
            selected,
            default_next,
        } => {
            if expand_branches {
                for condition in conditions {
                    let marker = if selected.as_deref() == Some(condition.next.as_str()) {
                        "»"
                    } else {
                        " "
                    };
                    out.push_str(&format!(
                        "    {marker} when {} → {}\n",
                        condition.when, condition.next
                    ));
                }
                if let Some(default_next) = default_next {
                    out.push_str(&format!("      else → {default_next}\n"));
                }
            } else {
                out.push_str("    branch rationale: (hidden — use --plan-expand branches)\n");
            }
            if let Some(selected) = selected {
                out.push_str(&format!("    selected: {selected}\n"));
            }
        }
        PlannedDetail::Message { level, text } => {
            out.push_str(&format!("    {level}: {text}\n"));
        }
        PlannedDetail::Group { flow } => {
            out.push_str(&format!("    runs flow '{flow}'\n"));
        }
        PlannedDetail::Iterate {
            flow,
            store_each_as,
            item_count,
            concurrency,
        } => {
            let count = item_count
                .map(|n| n.to_string())
                .unwrap_or_else(|| "?".to_string());
            out.push_str(&format!(
                "    {count} item(s) as '{store_each_as}' through flow '{flow}'\n"
            ));
            if let Some(bound) = concurrency {
                out.push_str(&format!("    concurrency hint: {bound}\n"));
            }
        }
        PlannedDetail::Compute { keys, handler } => match handler {
            Some(handler) => out.push_str(&format!("    handler: {handler}\n")),
            None => out.push_str(&format!("    sets: {}\n", keys.join(", "))),
        },
        PlannedDetail::WorktreeGuard { strategies } => {
            out.push_str(&format!("    strategies: {}\n", strategies.join(", ")));
        }
        PlannedDetail::Plugin { step_type, summary } => {
            out.push_str(&format!("    plugin type: {step_type}\n"));
            if let Some(summary) = summary {
                out.push_str(&format!("    {summary}\n"));
            }
        }
    }
}

/// Render the plan as newline-delimited JSON events.
pub fn render_ndjson(plan: &Plan) -> String {
    let mut lines = Vec::new();
    lines.push(
        json!({
            "type": "plan.scenario.start",
            "scenarioId": plan.scenario_id,
            "scenarioLabel": plan.scenario_label,
            "dryRun": plan.dry_run,
            "overrides": plan.overrides,
        })
        .to_string(),
    );
    for flow in &plan.flows {
        lines.push(
            json!({
                "type": "plan.flow.start",
                "flowId": flow.id,
                "stepCount": flow.steps.len(),
            })
            .to_string(),
        );
        for step in &flow.steps {
            let mut event = serde_json::to_value(step).unwrap_or_default();
            if let Some(map) = event.as_object_mut() {
                map.insert("type".to_string(), json!("plan.step"));
                map.insert("flowId".to_string(), json!(flow.id));
            }
            lines.push(event.to_string());
        }
    }
    lines.push(
        json!({
            "type": "plan.preferences",
            "preferences": plan.preferences,
        })
        .to_string(),
    );
    lines.push(
        json!({
            "type": "plan.summary",
            "pendingPromptCount": plan.pending_prompt_count,
            "warnings": plan.warnings,
            "flowCount": plan.flows.len(),
        })
        .to_string(),
    );
    lines.join("\n") + "\n"
}

/// Render the plan as one structured JSON document.
pub fn render_json(plan: &Plan) -> String {
    serde_json::to_string_pretty(plan).unwrap_or_else(|_| "{}".to_string())
}

#[cfg(test)]
#[path = "format_tests.rs"]
mod tests;
