//! The scenario walker: step dispatch, flow traversal, phases, post-run
//! hooks, checkpoints, and resume.

use std::future::Future;
use std::pin::Pin;

use chrono::Utc;
use serde_json::{Value, json};
use tracing::{debug, warn};

use rb_config::{
    BranchStep, CommandStep, ComputeStep, DryRunStrategy, GroupStep, IterateSource, IterateStep,
    MessageStep, ParseErrorMode, PromptStep, PromptValidation, Scenario, Step, WorktreeGuardStep,
};
use rb_core::EngineError;
use rb_core::types::{MessageLevel, PromptMode};
use rb_core::value::{coerce_override, lookup_path};
use rb_policy::CommandQuery;
use rb_session::state::{
    CommandRecord, ErrorInfo, FlowRun, PolicyDecisionRecord, RunPhase, RunState, RunStatus,
    ScenarioInfo, SkipRecord, StepTimings,
};
use rb_session::{TelemetryEvent, redact_keys};

use crate::command::layer;
use crate::compute::{HandlerContext, run_handler};
use crate::context::{ExecContext, PluginHelpers, PromptRequest};
use crate::options::{ResolvedOption, ResolverContext, resolve};
use crate::router::{FailureContext, RouteAction, route_failure};
use crate::worktree;

/// The completed walk: final state plus the terminal status and, when the
/// run failed, the error that ended it.
pub struct RunReport {
    pub state: RunState,
    pub status: RunStatus,
    pub error: Option<EngineError>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum NextStep {
    Advance,
    Goto(String),
    Exit,
    Repeat,
}

fn next_for(target: &str) -> NextStep {
    match target {
        "exit" => NextStep::Exit,
        "repeat" => NextStep::Repeat,
        other => NextStep::Goto(other.to_string()),
    }
}

struct StepResult {
    next: NextStep,
    succeeded: bool,
}

impl StepResult {
    fn ok(next: NextStep) -> Self {
        Self {
            next,
            succeeded: true,
        }
    }

    fn routed(next: NextStep) -> Self {
        Self {
            next,
            succeeded: false,
        }
    }
}

enum FlowExit {
    Completed,
    Exited,
}

/// Run a scenario to completion (or failure), honouring an optional resumed
/// state. Returns `Err` only for configuration-level problems discovered
/// before a run state exists; everything later is reported via
/// [`RunReport`] with a finalised checkpoint.
pub async fn execute_scenario(
    ctx: &mut ExecContext,
    resume: Option<RunState>,
) -> Result<RunReport, EngineError> {
    let scenario = ctx
        .config
        .scenario(&ctx.scenario_id)
        .cloned()
        .ok_or_else(|| {
            EngineError::Config(format!("unknown scenario '{}'", ctx.scenario_id))
        })?;

    let state = match resume {
        Some(mut state) => {
            state.ended_at = None;
            state.exited_early = false;
            state.error = None;
            // The resumed walk re-enters execution and gets its own
            // completing phase.
            if state.phase == RunPhase::Complete {
                state.phase = RunPhase::Execute;
            }
            state.post_run_cursor = 0;
            state
        }
        None => {
            let run_id = ctx
                .checkpoint
                .as_ref()
                .map(|c| c.run_id().to_string())
                .unwrap_or_else(|| format!("mem-{}", Utc::now().format("%Y%m%d-%H%M%S")));
            let phase = if ctx.phase == RunPhase::Collect {
                RunPhase::Collect
            } else {
                RunPhase::Execute
            };
            RunState::new(
                ScenarioInfo {
                    id: scenario.id.clone(),
                    label: scenario.label.clone(),
                },
                run_id,
                ctx.dry_run,
                phase,
            )
        }
    };

    let repo_root_str = ctx.repo_root.to_string_lossy().into_owned();
    let mut walker = Walker {
        ctx,
        state,
        repo_root_str,
    };
    Ok(walker.run(&scenario).await)
}

struct Walker<'a> {
    ctx: &'a mut ExecContext,
    state: RunState,
    repo_root_str: String,
}

impl Walker<'_> {
    async fn run(mut self, scenario: &Scenario) -> RunReport {
        let collect_only = self.state.phase == RunPhase::Collect;
        self.ctx.log.write(TelemetryEvent::ScenarioStart {
            run_id: self.state.run_id.clone(),
            scenario_id: scenario.id.clone(),
            dry_run: self.ctx.dry_run,
            phase: self.state.phase.to_string(),
        });

        let mut chain = vec![scenario.flow.clone()];
        chain.extend(scenario.additional_flows.iter().cloned());

        let resume_flow = self.state.flow_cursor;
        let mut outcome: Result<(), EngineError> = Ok(());

        for (index, flow_id) in chain.iter().enumerate() {
            if index < resume_flow {
                continue;
            }
            self.state.flow_cursor = index;
            let start = if index == resume_flow {
                self.state.step_cursor
            } else {
                0
            };
            match self.run_flow(flow_id.clone(), start, true).await {
                Ok(FlowExit::Completed) => {
                    self.state.step_cursor = 0;
                }
                Ok(FlowExit::Exited) => {
                    self.state.exited_early = true;
                    break;
                }
                Err(e) => {
                    outcome = Err(e);
                    break;
                }
            }
        }

        let succeeded = outcome.is_ok();

        // Completing phase: post-run hooks fire by trigger; their failures
        // never change the scenario's own status.
        if !collect_only {
            for (index, hook) in scenario.post_run.iter().enumerate() {
                if index < self.state.post_run_cursor {
                    continue;
                }
                self.state.post_run_cursor = index;
                if !hook.trigger.fires(succeeded) {
                    continue;
                }
                if let Err(e) = self.run_flow(hook.flow.clone(), 0, false).await {
                    warn!(flow = %hook.flow, error = %e, "post-run hook failed");
                }
                self.state.post_run_cursor = index + 1;
            }
            self.state.phase = RunPhase::Complete;
        }

        self.state.ended_at = Some(Utc::now());
        if let Err(error) = &outcome {
            self.state.error = Some(ErrorInfo::from_engine_error(error));
        }

        let status = if succeeded {
            RunStatus::Completed
        } else {
            RunStatus::Failed
        };
        let duration_ms = self
            .state
            .ended_at
            .map(|end| (end - self.state.started_at).num_milliseconds().max(0) as u64)
            .unwrap_or(0);
        self.ctx.log.write(TelemetryEvent::ScenarioComplete {
            run_id: self.state.run_id.clone(),
            scenario_id: scenario.id.clone(),
            status: status.to_string(),
            duration_ms,
            exited_early: self.state.exited_early,
        });

        if let Some(checkpoint) = self.ctx.checkpoint.as_mut() {
            if let Err(e) = checkpoint.finalize(&self.state, status) {
                warn!(error = %e, "failed to finalise checkpoint");
            }
        }
        self.ctx.persisted.save();
        self.ctx.log.close();

        RunReport {
            state: self.state,
            status,
            error: outcome.err(),
        }
    }

    /// Walk one flow. `track_cursor` is set for top-level flows so resume
    /// can skip already-completed steps.
    fn run_flow<'s>(
        &'s mut self,
        flow_id: String,
        start_index: usize,
        track_cursor: bool,
    ) -> Pin<Box<dyn Future<Output = Result<FlowExit, EngineError>> + Send + 's>> {
        Box::pin(async move {
            let steps: Vec<Step> = self
                .ctx
                .config
                .flow(&flow_id)
                .ok_or_else(|| EngineError::Config(format!("unknown flow '{flow_id}'")))?
                .to_vec();

            let flow_run_index = self.state.flow_runs.len();
            self.state.flow_runs.push(FlowRun {
                flow_id: flow_id.clone(),
                started_at: Utc::now(),
                ended_at: None,
                duration_ms: None,
                exited_early: false,
            });

            let result = self
                .run_steps(&flow_id, &steps, start_index, track_cursor)
                .await;

            let exited = matches!(result, Ok(FlowExit::Exited));
            if let Some(flow_run) = self.state.flow_runs.get_mut(flow_run_index) {
                let ended = Utc::now();
                flow_run.duration_ms =
                    Some((ended - flow_run.started_at).num_milliseconds().max(0) as u64);
                flow_run.ended_at = Some(ended);
                flow_run.exited_early = exited;
            }
            result
        })
    }

    async fn run_steps(
        &mut self,
        flow_id: &str,
        steps: &[Step],
        start_index: usize,
        track_cursor: bool,
    ) -> Result<FlowExit, EngineError> {
        let mut index = start_index;
        while index < steps.len() {
            if self.ctx.cancelled() {
                self.state.exited_early = true;
                return Err(EngineError::PromptCancelled);
            }
            if track_cursor {
                self.state.step_cursor = index;
            }
            let step = &steps[index];
            self.ctx.log.write(TelemetryEvent::StepStart {
                flow_id: flow_id.to_string(),
                step_id: step.id().to_string(),
                kind: step.kind().to_string(),
            });

            let result = match self.dispatch(flow_id, step).await {
                Ok(result) => result,
                Err(e) => {
                    self.state.failed_steps += 1;
                    self.ctx.log.write(TelemetryEvent::StepComplete {
                        flow_id: flow_id.to_string(),
                        step_id: step.id().to_string(),
                        kind: step.kind().to_string(),
                        status: "failed".to_string(),
                    });
                    if let Some(checkpoint) = self.ctx.checkpoint.as_mut() {
                        let _ = checkpoint.record(&self.state, true);
                    }
                    return Err(e);
                }
            };

            if result.succeeded {
                self.state.completed_steps += 1;
            } else {
                self.state.failed_steps += 1;
            }
            self.ctx.log.write(TelemetryEvent::StepComplete {
                flow_id: flow_id.to_string(),
                step_id: step.id().to_string(),
                kind: step.kind().to_string(),
                status: if result.succeeded { "ok" } else { "routed" }.to_string(),
            });
            if let Some(checkpoint) = self.ctx.checkpoint.as_mut() {
                if let Err(e) = checkpoint.record(&self.state, false) {
                    warn!(error = %e, "checkpoint write failed");
                }
            }

            match result.next {
                NextStep::Advance => index += 1,
                NextStep::Repeat => {}
                NextStep::Exit => return Ok(FlowExit::Exited),
                NextStep::Goto(target) => {
                    index = steps.iter().position(|s| s.id() == target).ok_or_else(|| {
                        EngineError::Config(format!(
                            "transition to unknown step '{target}' in flow '{flow_id}'"
                        ))
                    })?;
                }
            }
        }
        Ok(FlowExit::Completed)
    }

    async fn dispatch(&mut self, flow_id: &str, step: &Step) -> Result<StepResult, EngineError> {
        match step {
            Step::Prompt(prompt) => self.dispatch_prompt(prompt).await,
            Step::Command(cmd) => self.dispatch_command(flow_id, cmd).await,
            Step::Message(msg) => self.dispatch_message(msg),
            Step::Branch(branch) => self.dispatch_branch(branch),
            Step::Group(group) => self.dispatch_group(group).await,
            Step::Iterate(iterate) => self.dispatch_iterate(iterate).await,
            Step::Compute(compute) => self.dispatch_compute(compute),
            Step::GitWorktreeGuard(guard) => self.dispatch_worktree_guard(guard).await,
            Step::Plugin(plugin) => {
                let handler = self
                    .ctx
                    .plugins
                    .get(&plugin.step_type)
                    .cloned()
                    .ok_or_else(|| {
                        EngineError::Config(format!(
                            "no plugin handler registered for step type '{}'",
                            plugin.step_type
                        ))
                    })?;
                let mut helpers = PluginHelpers {
                    state: &mut self.state,
                    repo_root: &self.ctx.repo_root,
                    env: &self.ctx.env,
                    dry_run: self.ctx.dry_run,
                };
                let outcome = handler.run(plugin, &mut helpers).await?;
                if let Some(output) = outcome.output {
                    self.state.answers.insert(plugin.id.clone(), output);
                }
                let next = match outcome.next.as_deref() {
                    Some(target) => next_for(target),
                    None => NextStep::Advance,
                };
                Ok(StepResult::ok(next))
            }
        }
    }

    // ── Rendering helpers ────────────────────────────────────────────

    fn render_str(&self, template: &str) -> Result<String, EngineError> {
        let view = self.state.template_view();
        let tctx = rb_template::Context {
            state: &view,
            env: &self.ctx.env,
            repo_root: &self.repo_root_str,
            iteration: view.get("iteration"),
        };
        rb_template::render(template, &tctx)
    }

    fn render_nested(&self, value: &Value) -> Result<Value, EngineError> {
        let view = self.state.template_view();
        let tctx = rb_template::Context {
            state: &view,
            env: &self.ctx.env,
            repo_root: &self.repo_root_str,
            iteration: view.get("iteration"),
        };
        rb_template::render_maybe_nested(value, &tctx)
    }

    fn eval_condition(&self, expr: &str) -> Result<bool, EngineError> {
        let view = self.state.template_view();
        let tctx = rb_template::Context {
            state: &view,
            env: &self.ctx.env,
            repo_root: &self.repo_root_str,
            iteration: view.get("iteration"),
        };
        rb_template::eval_bool(expr, &tctx)
    }

    // ── Prompt ───────────────────────────────────────────────────────

    async fn dispatch_prompt(&mut self, prompt: &PromptStep) -> Result<StepResult, EngineError> {
        if let Some(raw) = self.ctx.overrides.get(&prompt.store_as).cloned() {
            let value = coerce_override(&raw, prompt.mode)?;
            validate_answer(prompt.validate.as_ref(), &value)?;
            self.store_answer(prompt, value, "override");
            return Ok(StepResult::ok(NextStep::Advance));
        }

        if let Some(persist) = &prompt.persist {
            if !self.ctx.fresh_answers {
                let key = persist.effective_key(&prompt.store_as);
                if let Some(value) = self.ctx.persisted.get(&key).cloned() {
                    self.ctx.log.write(TelemetryEvent::PromptPersistence {
                        step_id: prompt.id.clone(),
                        key,
                        status: "hit".to_string(),
                        applied: true,
                    });
                    self.store_answer(prompt, value, "persisted");
                    return Ok(StepResult::ok(NextStep::Advance));
                }
            }
        }

        let mut options: Vec<ResolvedOption> = prompt
            .options
            .iter()
            .map(|o| ResolvedOption {
                value: o.value.clone(),
                label: o.display_label(),
                hint: o.hint.clone(),
                disabled: o.disabled,
            })
            .collect();
        if let Some(dynamic) = &prompt.dynamic {
            let mut rctx = ResolverContext {
                repo_root: &self.ctx.repo_root,
                session_cache: &mut self.ctx.options_cache,
                phase: self.state.phase,
            };
            options.extend(resolve(dynamic, &mut rctx).await?);
        }

        if self.ctx.non_interactive {
            return Err(EngineError::NonInteractive(prompt.id.clone()));
        }

        let request = PromptRequest {
            step_id: prompt.id.clone(),
            mode: prompt.mode,
            text: self.render_str(&prompt.prompt)?,
            options,
            default: prompt.default.clone(),
            show_selection_order: prompt.show_selection_order,
        };
        let value = self.ctx.prompt_driver.prompt(&request).await?;
        validate_answer(prompt.validate.as_ref(), &value)?;

        if let Some(persist) = &prompt.persist {
            let key = persist.effective_key(&prompt.store_as);
            self.ctx.persisted.set(&key, value.clone());
            self.ctx.log.write(TelemetryEvent::PromptPersistence {
                step_id: prompt.id.clone(),
                key,
                status: "stored".to_string(),
                applied: false,
            });
        }
        self.store_answer(prompt, value, "interactive");
        Ok(StepResult::ok(NextStep::Advance))
    }

    fn store_answer(&mut self, prompt: &PromptStep, value: Value, source: &str) {
        self.state
            .answers
            .insert(prompt.store_as.clone(), value.clone());
        self.ctx.prompt_history.push(crate::context::PromptHistoryEntry {
            step_id: prompt.id.clone(),
            store_as: prompt.store_as.clone(),
            source: source.to_string(),
        });
        self.ctx.log.write(TelemetryEvent::PromptAnswer {
            step_id: prompt.id.clone(),
            store_as: prompt.store_as.clone(),
            value,
            source: source.to_string(),
        });
    }

    // ── Command ──────────────────────────────────────────────────────

    async fn dispatch_command(
        &mut self,
        flow_id: &str,
        cmd: &CommandStep,
    ) -> Result<StepResult, EngineError> {
        let mut index = 0;
        while index < cmd.commands.len() {
            let spec = &cmd.commands[index];
            let preset = spec
                .preset
                .as_ref()
                .and_then(|name| self.ctx.config.command_presets.get(name))
                .cloned();
            let mut layered = layer(spec, cmd.defaults.as_ref(), preset.as_ref(), &self.ctx.env);
            {
                let view = self.state.template_view();
                let tctx = rb_template::Context {
                    state: &view,
                    env: &self.ctx.env,
                    repo_root: &self.repo_root_str,
                    iteration: view.get("iteration"),
                };
                layered.render(&tctx)?;
            }

            if let Some(decision) = self.ctx.policy.evaluate_command(&CommandQuery {
                flow_id,
                step_id: &cmd.id,
                command: &layered.run,
                preset: spec.preset.as_deref(),
            }) {
                self.state.policy_decisions.push(PolicyDecisionRecord {
                    rule_id: decision.rule_id.clone(),
                    rule_level: decision.rule_level,
                    enforced_level: decision.enforced_level,
                    acknowledged: decision.acknowledged,
                    flow_id: flow_id.to_string(),
                    step_id: cmd.id.clone(),
                    command: layered.run.clone(),
                    note: decision.note.clone(),
                });
                self.ctx.log.write(TelemetryEvent::PolicyDecision {
                    flow_id: flow_id.to_string(),
                    step_id: cmd.id.clone(),
                    rule_id: decision.rule_id.clone(),
                    rule_level: decision.rule_level,
                    enforced_level: decision.enforced_level,
                    acknowledged: decision.acknowledged,
                });
                match decision.enforced_level {
                    rb_config::PolicyLevel::Block => {
                        return Err(EngineError::PolicyBlocked {
                            rule_id: decision.rule_id,
                            command: layered.run,
                        });
                    }
                    rb_config::PolicyLevel::Warn => {
                        eprintln!(
                            "policy warning ({}): {}",
                            decision.rule_id,
                            decision.note.as_deref().unwrap_or(&layered.run)
                        );
                    }
                    rb_config::PolicyLevel::Allow => {}
                }
            }

            if self.state.phase == RunPhase::Collect
                && !cmd.collect_safe
                && spec.dry_run_strategy != DryRunStrategy::Execute
            {
                return Err(EngineError::CollectMode(format!(
                    "command step '{}'",
                    cmd.id
                )));
            }

            let request = layered.to_request(&self.ctx.repo_root, &self.ctx.env, self.ctx.quiet);
            let started_at = Utc::now();
            let outcome = if self.ctx.dry_run && spec.dry_run_strategy == DryRunStrategy::Skip {
                rb_process::synthesize_dry_run(&request)
            } else {
                rb_process::run_with_cancel(&request, self.ctx.cancel.clone()).await
            };

            let record = CommandRecord {
                flow_id: flow_id.to_string(),
                step_id: cmd.id.clone(),
                step_label: cmd.label.clone(),
                command: layered.run.clone(),
                started_at,
                ended_at: Utc::now(),
                success: outcome.success,
                exit_code: outcome.exit_code,
                duration_ms: outcome.duration_ms,
                stdout: spec.capture_stdout.then(|| outcome.stdout.clone()),
                stderr: spec.capture_stdout.then(|| outcome.stderr.clone()),
                warn_after_ms: layered.warn_after_ms,
                long_running: outcome.long_running,
                timed_out: outcome.timed_out,
                dry_run: outcome.dry_run,
            };
            self.state.record_command(record);

            let timings = outcome.timings();
            if !timings.is_empty() {
                let summary = rb_process::aggregate(&timings);
                self.state.integration_timings.push(StepTimings {
                    flow_id: flow_id.to_string(),
                    step_id: cmd.id.clone(),
                    timings,
                    summary,
                });
            }

            self.ctx.log.write(TelemetryEvent::CommandResult {
                flow_id: flow_id.to_string(),
                step_id: cmd.id.clone(),
                command: layered.run.clone(),
                success: outcome.success,
                exit_code: outcome.exit_code,
                duration_ms: outcome.duration_ms,
                stdout: spec.capture_stdout.then(|| outcome.stdout.clone()),
                stderr: spec.capture_stdout.then(|| outcome.stderr.clone()),
            });

            if let Some(store_as) = &spec.store_stdout_as {
                if spec.store_when.matches(outcome.success) {
                    let value = self.parse_captured(spec, store_as, &outcome.stdout)?;
                    self.state.answers.insert(store_as.clone(), value);
                }
            }

            if outcome.cancelled {
                self.state.exited_early = true;
                return Err(EngineError::PromptCancelled);
            }

            if outcome.success {
                index += 1;
                continue;
            }
            if spec.continue_on_fail {
                debug!(command = %layered.run, "command failed, continueOnFail set");
                index += 1;
                continue;
            }

            let reason = match &outcome.error {
                Some(error) => error.clone(),
                None if outcome.timed_out => "timed out".to_string(),
                None => format!("exit code {}", outcome.exit_code),
            };
            let failure = FailureContext {
                flow_id,
                step_id: &cmd.id,
                on_error: cmd.on_error.as_ref(),
                continue_on_error: cmd.continue_on_error,
                interactive: !self.ctx.non_interactive,
                reason: reason.clone(),
            };
            let action = route_failure(
                &failure,
                &mut self.state,
                self.ctx.prompt_driver.as_mut(),
                &mut self.ctx.log,
            )
            .await?;

            let record_skip = |target: Option<&str>, state: &mut RunState| {
                state.skipped_steps.push(SkipRecord {
                    flow_id: flow_id.to_string(),
                    step_id: cmd.id.clone(),
                    reason: reason.clone(),
                    target: target.map(str::to_string),
                });
            };

            match action {
                RouteAction::Retry => continue,
                RouteAction::Continue => {
                    record_skip(None, &mut self.state);
                    return Ok(StepResult::routed(NextStep::Advance));
                }
                RouteAction::Goto(target) => {
                    record_skip(Some(&target), &mut self.state);
                    return Ok(StepResult::routed(NextStep::Goto(target)));
                }
                RouteAction::Repeat => {
                    return Ok(StepResult::routed(NextStep::Repeat));
                }
                RouteAction::Exit => {
                    record_skip(Some("exit"), &mut self.state);
                    self.state.exited_early = true;
                    return Ok(StepResult::routed(NextStep::Exit));
                }
                RouteAction::Fail => {
                    return Err(EngineError::CommandExecution {
                        command: layered.run,
                        exit_code: outcome.exit_code,
                    });
                }
            }
        }

        let next = match &cmd.on_success {
            Some(target) => next_for(target),
            None => NextStep::Advance,
        };
        Ok(StepResult::ok(next))
    }

    /// Parse captured stdout per `parseJson`, then apply `redactKeys`.
    fn parse_captured(
        &self,
        spec: &rb_config::CommandSpec,
        store_as: &str,
        stdout: &str,
    ) -> Result<Value, EngineError> {
        let mut value = match &spec.parse_json {
            Some(parse) if parse.enabled() => {
                match serde_json::from_str::<Value>(stdout.trim()) {
                    Ok(parsed) => parsed,
                    Err(e) => match parse.on_error() {
                        ParseErrorMode::Fail => {
                            return Err(EngineError::Parse {
                                store_as: store_as.to_string(),
                                message: e.to_string(),
                            });
                        }
                        ParseErrorMode::Warn => {
                            warn!(store_as, error = %e, "captured output is not JSON, storing raw text");
                            Value::String(stdout.trim_end().to_string())
                        }
                    },
                }
            }
            _ => Value::String(stdout.trim_end().to_string()),
        };
        redact_keys(&mut value, &spec.redact_keys);
        Ok(value)
    }

    // ── Message / Branch ─────────────────────────────────────────────

    fn dispatch_message(&mut self, msg: &MessageStep) -> Result<StepResult, EngineError> {
        let text = self.render_str(&msg.text)?;
        self.emit_message(msg.level, &text);
        let next = match &msg.next {
            Some(target) => next_for(target),
            None => NextStep::Advance,
        };
        Ok(StepResult::ok(next))
    }

    fn emit_message(&self, level: MessageLevel, text: &str) {
        match level {
            MessageLevel::Info | MessageLevel::Success => {
                if !self.ctx.quiet {
                    println!("{text}");
                }
            }
            MessageLevel::Warning => eprintln!("warning: {text}"),
            MessageLevel::Error => eprintln!("error: {text}"),
        }
    }

    fn dispatch_branch(&mut self, branch: &BranchStep) -> Result<StepResult, EngineError> {
        for (index, condition) in branch.conditions.iter().enumerate() {
            if self.eval_condition(&condition.when)? {
                self.ctx.log.write(TelemetryEvent::BranchDecision {
                    step_id: branch.id.clone(),
                    target: Some(condition.next.clone()),
                    condition_index: Some(index),
                    description: condition.description.clone(),
                });
                return Ok(StepResult::ok(next_for(&condition.next)));
            }
        }
        if let Some(target) = &branch.default_next {
            self.ctx.log.write(TelemetryEvent::BranchDecision {
                step_id: branch.id.clone(),
                target: Some(target.clone()),
                condition_index: None,
                description: None,
            });
            return Ok(StepResult::ok(next_for(target)));
        }
        Err(EngineError::Config(format!(
            "branch '{}' matched no condition and has no defaultNext",
            branch.id
        )))
    }

    // ── Group / Iterate ──────────────────────────────────────────────

    async fn dispatch_group(&mut self, group: &GroupStep) -> Result<StepResult, EngineError> {
        match self.run_flow(group.flow.clone(), 0, false).await? {
            FlowExit::Completed => Ok(StepResult::ok(NextStep::Advance)),
            FlowExit::Exited => Ok(StepResult::ok(NextStep::Exit)),
        }
    }

    async fn dispatch_iterate(&mut self, iterate: &IterateStep) -> Result<StepResult, EngineError> {
        let items = self.iterate_items(iterate).await?;
        let count = items.len();
        if let Some(bound) = iterate.concurrency {
            debug!(
                step_id = %iterate.id,
                bound,
                "concurrency hint accepted; execution remains sequential"
            );
        }

        let mut exited = false;
        for (index, item) in items.into_iter().enumerate() {
            self.state
                .answers
                .insert(iterate.store_each_as.clone(), item.clone());
            self.state.iteration = Some(json!({
                "index": index,
                "item": item,
                "count": count,
            }));
            match self.run_flow(iterate.flow.clone(), 0, false).await {
                Ok(FlowExit::Completed) => {}
                Ok(FlowExit::Exited) => {
                    exited = true;
                    break;
                }
                Err(e) => {
                    self.state.answers.remove(&iterate.store_each_as);
                    self.state.iteration = None;
                    return Err(e);
                }
            }
        }

        self.state.answers.remove(&iterate.store_each_as);
        self.state.iteration = None;
        if exited {
            Ok(StepResult::ok(NextStep::Exit))
        } else {
            Ok(StepResult::ok(NextStep::Advance))
        }
    }

    async fn iterate_items(&mut self, iterate: &IterateStep) -> Result<Vec<Value>, EngineError> {
        match &iterate.over {
            IterateSource::Items { items } => items
                .iter()
                .map(|item| self.render_nested(item))
                .collect(),
            IterateSource::Answers { key } => {
                let answers = Value::Object(self.state.answers.clone());
                match lookup_path(&answers, key) {
                    Some(Value::Array(items)) => Ok(items.clone()),
                    Some(other) => Err(EngineError::Config(format!(
                        "iterate step '{}' expects a list at answers key '{key}', got {}",
                        iterate.id,
                        rb_core::value::type_name(other)
                    ))),
                    None => {
                        warn!(step_id = %iterate.id, key, "iterate answers key missing, iterating nothing");
                        Ok(Vec::new())
                    }
                }
            }
            IterateSource::Dynamic { source } => {
                let mut rctx = ResolverContext {
                    repo_root: &self.ctx.repo_root,
                    session_cache: &mut self.ctx.options_cache,
                    phase: self.state.phase,
                };
                let options = resolve(source, &mut rctx).await?;
                Ok(options.into_iter().map(|option| option.value).collect())
            }
            IterateSource::Json { path, pointer } => {
                let full = if std::path::Path::new(path).is_absolute() {
                    std::path::PathBuf::from(path)
                } else {
                    self.ctx.repo_root.join(path)
                };
                let contents = std::fs::read_to_string(&full).map_err(|e| {
                    EngineError::Config(format!("cannot read iterate file '{path}': {e}"))
                })?;
                let mut parsed: Value =
                    serde_json::from_str(&contents).map_err(|e| EngineError::Parse {
                        store_as: format!("iterate items from '{path}'"),
                        message: e.to_string(),
                    })?;
                if let Some(pointer) = pointer {
                    parsed = parsed.pointer(pointer).cloned().ok_or_else(|| {
                        EngineError::Config(format!(
                            "pointer '{pointer}' not found in iterate file '{path}'"
                        ))
                    })?;
                }
                match parsed {
                    Value::Array(items) => Ok(items),
                    other => Err(EngineError::Config(format!(
                        "iterate step '{}' expects a list in '{path}', got {}",
                        iterate.id,
                        rb_core::value::type_name(&other)
                    ))),
                }
            }
        }
    }

    // ── Compute ──────────────────────────────────────────────────────

    fn dispatch_compute(&mut self, compute: &ComputeStep) -> Result<StepResult, EngineError> {
        if let Some(values) = &compute.values {
            let mut rendered = serde_json::Map::new();
            for (key, template) in values {
                let value = match template {
                    Value::String(text) => Value::String(self.render_str(text)?),
                    nested => self.render_nested(nested)?,
                };
                rendered.insert(key.clone(), value);
            }
            match &compute.store_as {
                Some(store_as) => {
                    self.state
                        .answers
                        .insert(store_as.clone(), Value::Object(rendered));
                }
                None => {
                    for (key, value) in rendered {
                        self.state.answers.insert(key, value);
                    }
                }
            }
            return Ok(StepResult::ok(NextStep::Advance));
        }

        let Some(handler) = compute.handler.as_deref() else {
            return Err(EngineError::Config(format!(
                "compute step '{}' has neither values nor handler",
                compute.id
            )));
        };
        let params = match &compute.params {
            Some(params) => self.render_nested(params)?,
            None => Value::Object(serde_json::Map::new()),
        };
        let result = run_handler(
            handler,
            &params,
            &HandlerContext {
                repo_root: &self.ctx.repo_root,
            },
        )?;
        match (&compute.store_as, result) {
            (Some(store_as), result) => {
                self.state.answers.insert(store_as.clone(), result);
            }
            (None, Value::Object(map)) => {
                for (key, value) in map {
                    self.state.answers.insert(key, value);
                }
            }
            (None, other) => {
                self.state.answers.insert(compute.id.clone(), other);
            }
        }
        Ok(StepResult::ok(NextStep::Advance))
    }

    // ── Worktree guard ───────────────────────────────────────────────

    async fn dispatch_worktree_guard(
        &mut self,
        guard: &WorktreeGuardStep,
    ) -> Result<StepResult, EngineError> {
        if !worktree::is_dirty(&self.ctx.repo_root).await? {
            let text = match &guard.clean_message {
                Some(message) => self.render_str(message)?,
                None => "Working tree clean.".to_string(),
            };
            self.emit_message(MessageLevel::Info, &text);
            return Ok(StepResult::ok(NextStep::Advance));
        }

        let strategy = if let Some(raw) = self.ctx.overrides.get(&guard.store_as).cloned() {
            let chosen = raw.as_str().unwrap_or_default().to_string();
            if !guard.strategies.iter().any(|s| s.as_str() == chosen) {
                return Err(EngineError::Validation(format!(
                    "'{chosen}' is not an offered worktree strategy"
                )));
            }
            chosen
        } else {
            if self.ctx.non_interactive {
                return Err(EngineError::NonInteractive(guard.id.clone()));
            }
            let options: Vec<ResolvedOption> = guard
                .strategies
                .iter()
                .map(|s| ResolvedOption {
                    value: Value::String(s.as_str().to_string()),
                    label: s.as_str().to_string(),
                    hint: None,
                    disabled: false,
                })
                .collect();
            let request = PromptRequest {
                step_id: guard.id.clone(),
                mode: PromptMode::Select,
                text: "Working tree has uncommitted changes. How should they be handled?"
                    .to_string(),
                options,
                default: None,
                show_selection_order: false,
            };
            let value = self.ctx.prompt_driver.prompt(&request).await?;
            value.as_str().unwrap_or_default().to_string()
        };

        self.state
            .answers
            .insert(guard.store_as.clone(), Value::String(strategy.clone()));
        self.ctx.log.write(TelemetryEvent::PromptAnswer {
            step_id: guard.id.clone(),
            store_as: guard.store_as.clone(),
            value: Value::String(strategy.clone()),
            source: "worktree-guard".to_string(),
        });

        if let Some(follow_up) = guard.prompts.get(&strategy) {
            let value = if let Some(raw) = self.ctx.overrides.get(&follow_up.store_as).cloned() {
                raw
            } else {
                if self.ctx.non_interactive {
                    return Err(EngineError::NonInteractive(guard.id.clone()));
                }
                let request = PromptRequest {
                    step_id: guard.id.clone(),
                    mode: PromptMode::Input,
                    text: self.render_str(&follow_up.prompt)?,
                    options: Vec::new(),
                    default: None,
                    show_selection_order: false,
                };
                self.ctx.prompt_driver.prompt(&request).await?
            };
            self.state
                .answers
                .insert(follow_up.store_as.clone(), value);
        }

        Ok(StepResult::ok(NextStep::Advance))
    }
}

/// Check a prompt answer against its validation rule. Only string answers
/// are validated; the rule's message (when set) becomes the user-facing
/// error line.
fn validate_answer(
    rule: Option<&PromptValidation>,
    value: &Value,
) -> Result<(), EngineError> {
    let Some(rule) = rule else {
        return Ok(());
    };
    let Some(text) = value.as_str() else {
        return Ok(());
    };

    let fail = |fallback: String| {
        EngineError::Validation(rule.message.clone().unwrap_or(fallback))
    };

    if let Some(min) = rule.min_length {
        if text.chars().count() < min {
            return Err(fail(format!("value must be at least {min} characters")));
        }
    }
    if let Some(max) = rule.max_length {
        if text.chars().count() > max {
            return Err(fail(format!("value must be at most {max} characters")));
        }
    }
    if let Some(pattern) = &rule.pattern {
        let regex = regex_for(pattern)?;
        if !regex.is_match(text) {
            return Err(fail(format!("value must match {pattern}")));
        }
    }
    Ok(())
}

fn regex_for(pattern: &str) -> Result<regex::Regex, EngineError> {
    regex::Regex::new(pattern)
        .map_err(|e| EngineError::Config(format!("invalid validation pattern '{pattern}': {e}")))
}

#[cfg(test)]
#[path = "executor_tests.rs"]
mod tests;
