//! Typed telemetry events and the sink fan-out writer.
//!
//! Events are written as one JSON object per line. Redaction happens at the
//! writer edge, so no sink ever observes a prompt value or command output
//! the run was configured to withhold.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use rb_config::PolicyLevel;

/// A telemetry event, tagged by its `type` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TelemetryEvent {
    #[serde(rename = "scenario.start", rename_all = "camelCase")]
    ScenarioStart {
        run_id: String,
        scenario_id: String,
        dry_run: bool,
        phase: String,
    },
    #[serde(rename = "scenario.complete", rename_all = "camelCase")]
    ScenarioComplete {
        run_id: String,
        scenario_id: String,
        status: String,
        duration_ms: u64,
        exited_early: bool,
    },
    #[serde(rename = "step.start", rename_all = "camelCase")]
    StepStart {
        flow_id: String,
        step_id: String,
        kind: String,
    },
    #[serde(rename = "step.complete", rename_all = "camelCase")]
    StepComplete {
        flow_id: String,
        step_id: String,
        kind: String,
        status: String,
    },
    #[serde(rename = "prompt.answer", rename_all = "camelCase")]
    PromptAnswer {
        step_id: String,
        store_as: String,
        value: Value,
        /// Where the answer came from: `override`, `persisted`, `default`,
        /// or `interactive`.
        source: String,
    },
    #[serde(rename = "prompt.persistence", rename_all = "camelCase")]
    PromptPersistence {
        step_id: String,
        key: String,
        status: String,
        applied: bool,
    },
    #[serde(rename = "branch.decision", rename_all = "camelCase")]
    BranchDecision {
        step_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        condition_index: Option<usize>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },
    #[serde(rename = "command.result", rename_all = "camelCase")]
    CommandResult {
        flow_id: String,
        step_id: String,
        command: String,
        success: bool,
        exit_code: i32,
        duration_ms: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stdout: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stderr: Option<String>,
    },
    #[serde(rename = "policy.decision", rename_all = "camelCase")]
    PolicyDecision {
        flow_id: String,
        step_id: String,
        rule_id: String,
        rule_level: PolicyLevel,
        enforced_level: PolicyLevel,
        acknowledged: bool,
    },
    #[serde(rename = "shortcut.trigger", rename_all = "camelCase")]
    ShortcutTrigger { name: String },
}

/// An event stamped at the writer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub event: TelemetryEvent,
}

/// Write-only sink interface. Multiple sinks may be composed by the writer.
pub trait LogSink: Send {
    fn write(&mut self, envelope: &EventEnvelope);
    fn close(&mut self) {}
}

/// Edge redaction options.
#[derive(Debug, Clone, Copy, Default)]
pub struct RedactionOptions {
    /// Replace `prompt.answer.value` with `"[redacted]"`.
    pub redact_prompt_values: bool,
    /// Drop `stdout`/`stderr` from `command.result`.
    pub redact_command_output: bool,
}

/// Fans events out to sinks, stamping timestamps and applying redaction.
pub struct LogWriter {
    sinks: Vec<Box<dyn LogSink>>,
    options: RedactionOptions,
}

impl LogWriter {
    pub fn new(options: RedactionOptions) -> Self {
        Self {
            sinks: Vec::new(),
            options,
        }
    }

    pub fn disabled() -> Self {
        Self::new(RedactionOptions::default())
    }

    pub fn add_sink(&mut self, sink: Box<dyn LogSink>) {
        self.sinks.push(sink);
    }

    pub fn write(&mut self, event: TelemetryEvent) {
        if self.sinks.is_empty() {
            return;
        }
        let envelope = EventEnvelope {
            timestamp: Utc::now(),
            event: self.redact(event),
        };
        for sink in &mut self.sinks {
            sink.write(&envelope);
        }
    }

    pub fn close(&mut self) {
        for sink in &mut self.sinks {
            sink.close();
        }
    }

    fn redact(&self, event: TelemetryEvent) -> TelemetryEvent {
        match event {
            TelemetryEvent::PromptAnswer {
                step_id,
                store_as,
                value,
                source,
            } => TelemetryEvent::PromptAnswer {
                step_id,
                store_as,
                value: if self.options.redact_prompt_values {
                    Value::String("[redacted]".to_string())
                } else {
                    value
                },
                source,
            },
            TelemetryEvent::CommandResult {
                flow_id,
                step_id,
                command,
                success,
                exit_code,
                duration_ms,
                stdout,
                stderr,
            } => TelemetryEvent::CommandResult {
                flow_id,
                step_id,
                command,
                success,
                exit_code,
                duration_ms,
                stdout: if self.options.redact_command_output {
                    None
                } else {
                    stdout
                },
                stderr: if self.options.redact_command_output {
                    None
                } else {
                    stderr
                },
            },
            other => other,
        }
    }
}

/// Append-mode JSONL file sink.
pub struct JsonlSink {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
}

impl JsonlSink {
    pub fn create(path: &Path) -> Self {
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let writer = match OpenOptions::new().create(true).append(true).open(path) {
            Ok(file) => Some(BufWriter::new(file)),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to open telemetry log");
                None
            }
        };
        Self {
            path: path.to_path_buf(),
            writer,
        }
    }
}

impl LogSink for JsonlSink {
    fn write(&mut self, envelope: &EventEnvelope) {
        let Some(writer) = &mut self.writer else {
            return;
        };
        #[derive(Serialize)]
        struct Line<'a> {
            timestamp: String,
            #[serde(flatten)]
            event: &'a TelemetryEvent,
        }
        let line = Line {
            timestamp: envelope
                .timestamp
                .to_rfc3339_opts(SecondsFormat::Millis, true),
            event: &envelope.event,
        };
        match serde_json::to_vec(&line) {
            Ok(mut bytes) => {
                bytes.push(b'\n');
                if writer.write_all(&bytes).is_err() {
                    warn!(path = %self.path.display(), "telemetry write failed");
                }
            }
            Err(e) => warn!(error = %e, "failed to serialise telemetry event"),
        }
    }

    fn close(&mut self) {
        if let Some(writer) = &mut self.writer {
            let _ = writer.flush();
        }
    }
}

/// In-memory sink for tests and programmatic inspection.
#[derive(Default)]
pub struct MemorySink {
    events: Arc<Mutex<Vec<EventEnvelope>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A handle that stays readable after the sink is boxed into a writer.
    pub fn handle(&self) -> Arc<Mutex<Vec<EventEnvelope>>> {
        Arc::clone(&self.events)
    }
}

impl LogSink for MemorySink {
    fn write(&mut self, envelope: &EventEnvelope) {
        let mut events = self.events.lock().unwrap_or_else(|e| e.into_inner());
        events.push(envelope.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn writer_with_memory(options: RedactionOptions) -> (LogWriter, Arc<Mutex<Vec<EventEnvelope>>>) {
        let sink = MemorySink::new();
        let handle = sink.handle();
        let mut writer = LogWriter::new(options);
        writer.add_sink(Box::new(sink));
        (writer, handle)
    }

    #[test]
    fn test_event_type_tags() {
        let event = TelemetryEvent::ScenarioStart {
            run_id: "r".into(),
            scenario_id: "s".into(),
            dry_run: true,
            phase: "execute".into(),
        };
        let encoded = serde_json::to_value(&event).unwrap();
        assert_eq!(encoded["type"], "scenario.start");
        assert_eq!(encoded["runId"], "r");
        assert_eq!(encoded["dryRun"], true);
    }

    #[test]
    fn test_prompt_value_redaction() {
        let (mut writer, handle) = writer_with_memory(RedactionOptions {
            redact_prompt_values: true,
            redact_command_output: false,
        });
        writer.write(TelemetryEvent::PromptAnswer {
            step_id: "ask".into(),
            store_as: "password".into(),
            value: json!("hunter2"),
            source: "interactive".into(),
        });
        let events = handle.lock().unwrap();
        let TelemetryEvent::PromptAnswer { value, .. } = &events[0].event else {
            panic!("expected prompt.answer");
        };
        assert_eq!(value, &json!("[redacted]"));
    }

    #[test]
    fn test_command_output_redaction() {
        let (mut writer, handle) = writer_with_memory(RedactionOptions {
            redact_prompt_values: false,
            redact_command_output: true,
        });
        writer.write(TelemetryEvent::CommandResult {
            flow_id: "main".into(),
            step_id: "build".into(),
            command: "make".into(),
            success: true,
            exit_code: 0,
            duration_ms: 5,
            stdout: Some("secret output".into()),
            stderr: Some("noise".into()),
        });
        let events = handle.lock().unwrap();
        let TelemetryEvent::CommandResult { stdout, stderr, .. } = &events[0].event else {
            panic!("expected command.result");
        };
        assert!(stdout.is_none());
        assert!(stderr.is_none());
    }

    #[test]
    fn test_no_redaction_by_default() {
        let (mut writer, handle) = writer_with_memory(RedactionOptions::default());
        writer.write(TelemetryEvent::PromptAnswer {
            step_id: "ask".into(),
            store_as: "name".into(),
            value: json!("api"),
            source: "override".into(),
        });
        let events = handle.lock().unwrap();
        let TelemetryEvent::PromptAnswer { value, .. } = &events[0].event else {
            panic!("expected prompt.answer");
        };
        assert_eq!(value, &json!("api"));
    }

    #[test]
    fn test_multiple_sinks_compose() {
        let first = MemorySink::new();
        let second = MemorySink::new();
        let first_handle = first.handle();
        let second_handle = second.handle();
        let mut writer = LogWriter::new(RedactionOptions::default());
        writer.add_sink(Box::new(first));
        writer.add_sink(Box::new(second));
        writer.write(TelemetryEvent::ShortcutTrigger { name: "abort".into() });
        assert_eq!(first_handle.lock().unwrap().len(), 1);
        assert_eq!(second_handle.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_jsonl_sink_writes_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("run.jsonl");
        let mut writer = LogWriter::new(RedactionOptions::default());
        writer.add_sink(Box::new(JsonlSink::create(&path)));
        writer.write(TelemetryEvent::StepStart {
            flow_id: "main".into(),
            step_id: "build".into(),
            kind: "command".into(),
        });
        writer.write(TelemetryEvent::StepComplete {
            flow_id: "main".into(),
            step_id: "build".into(),
            kind: "command".into(),
            status: "ok".into(),
        });
        writer.close();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["type"], "step.start");
        assert!(first["timestamp"].as_str().unwrap().contains('T'));
    }
}
