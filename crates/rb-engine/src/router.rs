//! Error-recovery routing for failed command steps.
//!
//! Selection order when a step's final command fails: the step's auto
//! action (bounded by its per-step budget), then the answers-driven error
//! policy, then interactive recovery actions, then `continueOnError`, and
//! finally scenario failure.

use tracing::debug;

use rb_config::{AutoStrategy, OnError};
use rb_core::EngineError;
use rb_core::value::{display_value, lookup_path};
use rb_session::state::{RetryRecord, RunState};
use rb_session::{LogWriter, TelemetryEvent};
use serde_json::Value;

use crate::context::PromptDriver;

/// Where the walker goes after a failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteAction {
    /// Re-run the failing command.
    Retry,
    /// Jump to a step id within the current flow.
    Goto(String),
    /// Re-enter the current step.
    Repeat,
    /// Terminate the scenario with `exitedEarly`.
    Exit,
    /// Proceed to the next step in sequence.
    Continue,
    /// Fail the scenario.
    Fail,
}

fn action_for_target(target: &str) -> RouteAction {
    match target {
        "exit" => RouteAction::Exit,
        "repeat" => RouteAction::Repeat,
        other => RouteAction::Goto(other.to_string()),
    }
}

pub struct FailureContext<'a> {
    pub flow_id: &'a str,
    pub step_id: &'a str,
    pub on_error: Option<&'a OnError>,
    pub continue_on_error: bool,
    pub interactive: bool,
    /// Human-readable failure cause (e.g. `exit code 3`).
    pub reason: String,
}

pub async fn route_failure(
    failure: &FailureContext<'_>,
    state: &mut RunState,
    driver: &mut dyn PromptDriver,
    log: &mut LogWriter,
) -> Result<RouteAction, EngineError> {
    if let Some(on_error) = failure.on_error {
        if let Some(auto) = &on_error.auto {
            let key = RunState::auto_count_key(failure.flow_id, failure.step_id);
            let used = state.auto_action_counts.get(&key).copied().unwrap_or(0);
            if used < auto.limit {
                state.auto_action_counts.insert(key, used + 1);
                debug!(
                    step_id = failure.step_id,
                    strategy = ?auto.strategy,
                    attempt = used + 1,
                    "applying auto error action"
                );
                match auto.strategy {
                    AutoStrategy::Retry => {
                        state.retries.push(RetryRecord {
                            flow_id: failure.flow_id.to_string(),
                            step_id: failure.step_id.to_string(),
                            attempt: used + 1,
                            reason: failure.reason.clone(),
                        });
                        return Ok(RouteAction::Retry);
                    }
                    AutoStrategy::Default => {
                        if let Some(target) = &on_error.default_next {
                            return Ok(action_for_target(target));
                        }
                    }
                    AutoStrategy::Transition => {
                        if let Some(target) = &on_error.target {
                            return Ok(action_for_target(target));
                        }
                    }
                    AutoStrategy::Exit => return Ok(RouteAction::Exit),
                }
            }
        }

        if let Some(policy) = &on_error.policy {
            let answers = Value::Object(state.answers.clone());
            let resolved = lookup_path(&answers, &policy.key).cloned();
            match resolved {
                Some(value) => {
                    let key = display_value(&value);
                    if let Some(target) = policy.map.get(&key) {
                        return Ok(action_for_target(target));
                    }
                    if policy.required || !failure.interactive {
                        return Err(EngineError::PolicyMissing {
                            key: policy.key.clone(),
                            value: key,
                        });
                    }
                    if let Some(target) = &policy.default {
                        return Ok(action_for_target(target));
                    }
                }
                None => {
                    if policy.required || !failure.interactive {
                        return Err(EngineError::PolicyMissing {
                            key: policy.key.clone(),
                            value: "<unset>".into(),
                        });
                    }
                    if let Some(target) = &policy.default {
                        return Ok(action_for_target(target));
                    }
                }
            }
        }

        if failure.interactive && !on_error.actions.is_empty() {
            let mut actions: Vec<(String, String)> = on_error
                .actions
                .iter()
                .map(|a| (a.label.clone(), a.next.clone()))
                .collect();
            actions.push(("Abort".to_string(), "exit".to_string()));
            let title = format!("Step '{}' failed: {}", failure.step_id, failure.reason);
            let chosen = driver.choose_action(&title, &actions).await?;
            if chosen == "exit" {
                log.write(TelemetryEvent::ShortcutTrigger {
                    name: "abort".into(),
                });
            }
            return Ok(action_for_target(&chosen));
        }
    }

    if failure.continue_on_error {
        return Ok(RouteAction::Continue);
    }

    Ok(RouteAction::Fail)
}
