//! Command-preset layering and request assembly.
//!
//! Layering order, lowest to highest precedence: preset → step defaults →
//! per-command fields. Env maps merge key-by-key with later layers winning;
//! non-env scalars are last-write-wins in the same order. Descriptive preset
//! fields (`description`, `tags`) never reach the runner.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use rb_config::{CommandDefaults, CommandPreset, CommandSpec};
use rb_core::EngineError;
use rb_process::{CommandRequest, StreamMode};
use rb_template::Context;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvSource {
    Preset,
    Defaults,
    Command,
}

/// One env assignment in layering order, with the value it overrode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvDiffEntry {
    pub key: String,
    pub value: String,
    pub source: EnvSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous: Option<String>,
}

/// A command descriptor after preset layering, before template rendering.
#[derive(Debug, Clone)]
pub struct LayeredCommand {
    pub run: String,
    pub cwd: Option<String>,
    pub shell: bool,
    pub timeout_ms: Option<u64>,
    pub warn_after_ms: Option<u64>,
    /// The layered env (preset ∪ defaults ∪ command), not including the
    /// process environment.
    pub env: BTreeMap<String, String>,
    pub env_diff: Vec<EnvDiffEntry>,
    pub preset: Option<String>,
}

/// Layer a command descriptor over its step defaults and preset.
///
/// `process_env` is consulted only to fill `previous` on the first
/// assignment of a key the process environment already defines.
pub fn layer(
    spec: &CommandSpec,
    defaults: Option<&CommandDefaults>,
    preset: Option<&CommandPreset>,
    process_env: &BTreeMap<String, String>,
) -> LayeredCommand {
    let mut env = BTreeMap::new();
    let mut env_diff = Vec::new();

    let mut apply_layer = |layer_env: &BTreeMap<String, String>, source: EnvSource| {
        for (key, value) in layer_env {
            let previous = env
                .get(key)
                .cloned()
                .or_else(|| process_env.get(key).cloned());
            env_diff.push(EnvDiffEntry {
                key: key.clone(),
                value: value.clone(),
                source,
                previous,
            });
            env.insert(key.clone(), value.clone());
        }
    };

    if let Some(preset) = preset {
        apply_layer(&preset.env, EnvSource::Preset);
    }
    if let Some(defaults) = defaults {
        apply_layer(&defaults.env, EnvSource::Defaults);
    }
    apply_layer(&spec.env, EnvSource::Command);

    let cwd = spec
        .cwd
        .clone()
        .or_else(|| defaults.and_then(|d| d.cwd.clone()))
        .or_else(|| preset.and_then(|p| p.cwd.clone()));
    let shell = spec
        .shell
        .or_else(|| defaults.and_then(|d| d.shell))
        .or_else(|| preset.and_then(|p| p.shell))
        .unwrap_or(false);
    let timeout_ms = spec
        .timeout_ms
        .or_else(|| defaults.and_then(|d| d.timeout_ms))
        .or_else(|| preset.and_then(|p| p.timeout_ms));
    let warn_after_ms = spec
        .warn_after_ms
        .or_else(|| defaults.and_then(|d| d.warn_after_ms))
        .or_else(|| preset.and_then(|p| p.warn_after_ms));

    LayeredCommand {
        run: spec.run.clone(),
        cwd,
        shell,
        timeout_ms,
        warn_after_ms,
        env,
        env_diff,
        preset: spec.preset.clone(),
    }
}

impl LayeredCommand {
    /// Render the command line, cwd, and env values through the template
    /// engine. Env diff entries are kept in sync with the rendered values.
    pub fn render(&mut self, ctx: &Context<'_>) -> Result<(), EngineError> {
        self.run = rb_template::render(&self.run, ctx)?;
        if let Some(cwd) = &self.cwd {
            self.cwd = Some(rb_template::render(cwd, ctx)?);
        }
        let mut rendered_env = BTreeMap::new();
        for (key, value) in &self.env {
            rendered_env.insert(key.clone(), rb_template::render(value, ctx)?);
        }
        for entry in &mut self.env_diff {
            entry.value = rb_template::render(&entry.value, ctx)?;
        }
        self.env = rendered_env;
        Ok(())
    }

    /// Assemble the runner request: process env under the layered env, cwd
    /// resolved against the repo root.
    pub fn to_request(
        &self,
        repo_root: &Path,
        process_env: &BTreeMap<String, String>,
        quiet: bool,
    ) -> CommandRequest {
        let mut env = process_env.clone();
        env.extend(self.env.clone());
        let cwd = match &self.cwd {
            Some(dir) if Path::new(dir).is_absolute() => PathBuf::from(dir),
            Some(dir) => repo_root.join(dir),
            None => repo_root.to_path_buf(),
        };
        CommandRequest {
            command: self.run.clone(),
            cwd,
            env,
            shell: self.shell,
            timeout_ms: self.timeout_ms,
            warn_after_ms: self.warn_after_ms,
            stream_mode: if quiet {
                StreamMode::BufferOnly
            } else {
                StreamMode::Forward
            },
        }
    }
}
