//! Helpers for the heterogeneous values that cross the engine's boundaries:
//! prompt overrides, captured command output, and template lookups.

use serde_json::Value;

use crate::EngineError;
use crate::types::PromptMode;

/// Resolve a dotted path (`answers.project.name`) against a JSON value.
///
/// Returns `None` when any segment is missing or traverses a non-object.
/// Array indices are accepted as numeric segments (`items.0.label`).
pub fn lookup_path<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = root;
    for segment in path.split('.') {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => {
                let index: usize = segment.parse().ok()?;
                items.get(index)?
            }
            _ => return None,
        };
    }
    Some(current)
}

/// JS-like truthiness over JSON values, shared by branch evaluation and
/// the error router.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Coerce an override value for a prompt step.
///
/// Overrides usually arrive as strings (CLI `--set key=value`), so confirm
/// prompts accept `"true"`/`"false"` and multiselect prompts accept a
/// comma-separated list. Already-typed values pass through unchanged.
pub fn coerce_override(raw: &Value, mode: PromptMode) -> Result<Value, EngineError> {
    match mode {
        PromptMode::Confirm => match raw {
            Value::Bool(_) => Ok(raw.clone()),
            Value::String(s) => match s.as_str() {
                "true" => Ok(Value::Bool(true)),
                "false" => Ok(Value::Bool(false)),
                other => Err(EngineError::Validation(format!(
                    "Expected 'true' or 'false' for confirm override, got '{other}'"
                ))),
            },
            other => Err(EngineError::Validation(format!(
                "Confirm override must be boolean, got {}",
                type_name(other)
            ))),
        },
        PromptMode::Multiselect => match raw {
            Value::Array(_) => Ok(raw.clone()),
            Value::String(s) => Ok(Value::Array(
                s.split(',')
                    .map(|part| Value::String(part.trim().to_string()))
                    .filter(|v| v.as_str().is_some_and(|s| !s.is_empty()))
                    .collect(),
            )),
            other => Err(EngineError::Validation(format!(
                "Multiselect override must be a list or comma-separated string, got {}",
                type_name(other)
            ))),
        },
        PromptMode::Input | PromptMode::Select => Ok(raw.clone()),
    }
}

/// Render a value the way a prompt answer is displayed: bare strings
/// unquoted, everything else compact JSON.
pub fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
