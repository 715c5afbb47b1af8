//! Recursive redaction of captured command output.

use serde_json::Value;

/// The replacement literal stored in place of redacted values.
pub const REDACTED: &str = "[REDACTED]";

/// Replace every value under a key listed in `keys` with the literal
/// `[REDACTED]`, at any nesting depth. Applied to captured output before it
/// is inserted into `state.answers`, so checkpoints and telemetry only ever
/// see the redacted form.
pub fn redact_keys(value: &mut Value, keys: &[String]) {
    if keys.is_empty() {
        return;
    }
    match value {
        Value::Object(map) => {
            for (key, child) in map.iter_mut() {
                if keys.iter().any(|k| k == key) {
                    *child = Value::String(REDACTED.to_string());
                } else {
                    redact_keys(child, keys);
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                redact_keys(item, keys);
            }
        }
        _ => {}
    }
}
