//! Dynamic prompt-option resolution.
//!
//! Sources produce `{value, label, hint?, disabled?}` entries from shell
//! commands, file globs, JSON documents, workspace discovery, or
//! project-local tsconfig probes. Results can be cached per run, for the
//! process lifetime, or with a TTL; the process-wide cache is read-through
//! behind a mutex and is never mutated across runs except by expiry.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use rb_config::{CacheKeyword, CacheMode, DynamicSource, DynamicSourceKind, OptionMap};
use rb_core::EngineError;
use rb_core::value::{display_value, truthy};
use rb_session::state::RunPhase;

/// Directories never descended into during workspace discovery.
const DEFAULT_PROJECT_IGNORE: &[&str] = &[
    "node_modules",
    ".git",
    ".hg",
    "target",
    "dist",
    "build",
    "out",
    "coverage",
    ".cache",
    ".next",
    "vendor",
];

const DEFAULT_WORKSPACE_DEPTH: usize = 3;
const PACKAGE_MANIFESTS: &[&str] = &["package.json", "Cargo.toml", "pyproject.toml", "go.mod"];

/// Sentinel value appended by `project-tsconfigs` when a custom path entry
/// is requested.
pub const CUSTOM_PATH_SENTINEL: &str = "__custom__";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedOption {
    pub value: Value,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    #[serde(default)]
    pub disabled: bool,
}

impl ResolvedOption {
    fn plain(value: impl Into<String>) -> Self {
        let text = value.into();
        Self {
            value: Value::String(text.clone()),
            label: text,
            hint: None,
            disabled: false,
        }
    }
}

/// Per-run option cache (`cache: "session"`).
#[derive(Debug, Default)]
pub struct SessionOptionsCache {
    entries: HashMap<String, Vec<ResolvedOption>>,
}

struct ProcessEntry {
    stored_at: Instant,
    options: Vec<ResolvedOption>,
}

fn process_cache() -> &'static Mutex<HashMap<String, ProcessEntry>> {
    static CACHE: OnceLock<Mutex<HashMap<String, ProcessEntry>>> = OnceLock::new();
    CACHE.get_or_init(|| Mutex::new(HashMap::new()))
}

pub struct ResolverContext<'a> {
    pub repo_root: &'a Path,
    pub session_cache: &'a mut SessionOptionsCache,
    pub phase: RunPhase,
}

/// Resolve a dynamic source to options, consulting caches first.
pub async fn resolve(
    source: &DynamicSource,
    ctx: &mut ResolverContext<'_>,
) -> Result<Vec<ResolvedOption>, EngineError> {
    let key = cache_key(ctx.repo_root, source);

    match &source.cache {
        Some(CacheMode::Keyword(CacheKeyword::Session)) => {
            if let Some(options) = ctx.session_cache.entries.get(&key) {
                debug!(source = source.kind.kind_name(), "session cache hit");
                return Ok(options.clone());
            }
        }
        Some(CacheMode::Keyword(CacheKeyword::Always)) => {
            let cache = process_cache().lock().unwrap_or_else(|e| e.into_inner());
            if let Some(entry) = cache.get(&key) {
                debug!(source = source.kind.kind_name(), "process cache hit");
                return Ok(entry.options.clone());
            }
        }
        Some(CacheMode::Ttl { ttl_ms }) => {
            let cache = process_cache().lock().unwrap_or_else(|e| e.into_inner());
            if let Some(entry) = cache.get(&key) {
                if entry.stored_at.elapsed() < Duration::from_millis(*ttl_ms) {
                    debug!(source = source.kind.kind_name(), "ttl cache hit");
                    return Ok(entry.options.clone());
                }
            }
        }
        None => {}
    }

    let options = resolve_uncached(source, ctx).await?;

    match &source.cache {
        Some(CacheMode::Keyword(CacheKeyword::Session)) => {
            ctx.session_cache.entries.insert(key, options.clone());
        }
        Some(CacheMode::Keyword(CacheKeyword::Always)) | Some(CacheMode::Ttl { .. }) => {
            process_cache().lock().unwrap_or_else(|e| e.into_inner()).insert(
                key,
                ProcessEntry {
                    stored_at: Instant::now(),
                    options: options.clone(),
                },
            );
        }
        None => {}
    }

    Ok(options)
}

fn cache_key(repo_root: &Path, source: &DynamicSource) -> String {
    let descriptor = serde_json::to_string(source).unwrap_or_default();
    format!("{}|{descriptor}", repo_root.display())
}

async fn resolve_uncached(
    source: &DynamicSource,
    ctx: &mut ResolverContext<'_>,
) -> Result<Vec<ResolvedOption>, EngineError> {
    match &source.kind {
        DynamicSourceKind::Command { command, cwd } => {
            if ctx.phase == RunPhase::Collect {
                return Err(EngineError::CollectMode(format!(
                    "dynamic command source '{command}'"
                )));
            }
            let cwd = resolve_dir(ctx.repo_root, cwd.as_deref());
            let mut request = rb_process::CommandRequest::new(command.clone(), cwd);
            request.shell = true;
            request.env = std::env::vars().collect();
            request.stream_mode = rb_process::StreamMode::BufferOnly;
            let outcome = rb_process::run(&request).await;
            if !outcome.success {
                return Err(EngineError::CommandExecution {
                    command: command.clone(),
                    exit_code: outcome.exit_code,
                });
            }
            let parsed: Value =
                serde_json::from_str(outcome.stdout.trim()).map_err(|e| EngineError::Parse {
                    store_as: format!("options from '{command}'"),
                    message: e.to_string(),
                })?;
            normalize(parsed, source.map.as_ref())
        }
        DynamicSourceKind::Glob {
            patterns,
            cwd,
            ignore,
        } => {
            let base = resolve_dir(ctx.repo_root, cwd.as_deref());
            let mut options = Vec::new();
            for pattern in patterns {
                let full = base.join(pattern);
                let matches = glob::glob(&full.to_string_lossy()).map_err(|e| {
                    EngineError::Config(format!("invalid glob pattern '{pattern}': {e}"))
                })?;
                for path in matches.flatten() {
                    let relative = path
                        .strip_prefix(ctx.repo_root)
                        .unwrap_or(&path)
                        .to_string_lossy()
                        .into_owned();
                    if ignore.iter().any(|needle| relative.contains(needle)) {
                        continue;
                    }
                    options.push(ResolvedOption {
                        value: Value::String(path.to_string_lossy().into_owned()),
                        label: relative,
                        hint: None,
                        disabled: false,
                    });
                }
            }
            options.sort_by(|a, b| a.label.cmp(&b.label));
            Ok(options)
        }
        DynamicSourceKind::Json { path, pointer } => {
            let full = resolve_dir(ctx.repo_root, Some(path));
            let contents = std::fs::read_to_string(&full).map_err(|e| {
                EngineError::Config(format!("cannot read options file '{path}': {e}"))
            })?;
            let mut parsed: Value =
                serde_json::from_str(&contents).map_err(|e| EngineError::Parse {
                    store_as: format!("options from '{path}'"),
                    message: e.to_string(),
                })?;
            if let Some(pointer) = pointer {
                parsed = parsed.pointer(pointer).cloned().ok_or_else(|| {
                    EngineError::Config(format!(
                        "pointer '{pointer}' not found in options file '{path}'"
                    ))
                })?;
            }
            normalize(parsed, source.map.as_ref())
        }
        DynamicSourceKind::WorkspaceProjects {
            include_root,
            max_depth,
            ignore,
            limit,
        } => {
            let mut projects = discover_projects(
                ctx.repo_root,
                *include_root,
                max_depth.unwrap_or(DEFAULT_WORKSPACE_DEPTH),
                ignore,
            );
            if let Some(limit) = limit {
                if projects.len() > *limit {
                    debug!(
                        dropped = projects.len() - limit,
                        "workspace project list truncated"
                    );
                    projects.truncate(*limit);
                }
            }
            Ok(projects)
        }
        DynamicSourceKind::ProjectTsconfigs {
            dir,
            allow_custom_path,
        } => Ok(project_tsconfigs(
            &resolve_dir(ctx.repo_root, dir.as_deref()),
            *allow_custom_path,
        )),
    }
}

fn resolve_dir(repo_root: &Path, dir: Option<&str>) -> PathBuf {
    match dir {
        Some(dir) if Path::new(dir).is_absolute() => PathBuf::from(dir),
        Some(dir) => repo_root.join(dir),
        None => repo_root.to_path_buf(),
    }
}

/// Turn a parsed JSON value into options, applying the optional `map`
/// re-projection to each entry.
fn normalize(parsed: Value, map: Option<&OptionMap>) -> Result<Vec<ResolvedOption>, EngineError> {
    let Value::Array(entries) = parsed else {
        return Err(EngineError::Parse {
            store_as: "dynamic options".into(),
            message: format!(
                "expected a JSON array of options, got {}",
                rb_core::value::type_name(&parsed)
            ),
        });
    };

    let mut options = Vec::with_capacity(entries.len());
    for entry in entries {
        options.push(project_entry(entry, map));
    }
    Ok(options)
}

fn project_entry(entry: Value, map: Option<&OptionMap>) -> ResolvedOption {
    if let Some(map) = map {
        let value = map
            .value
            .as_deref()
            .and_then(|path| select_path(&entry, path).cloned())
            .unwrap_or_else(|| entry.clone());
        let label = map
            .label
            .as_deref()
            .and_then(|path| select_path(&entry, path))
            .map(display_value)
            .unwrap_or_else(|| display_value(&value));
        let hint = map
            .hint
            .as_deref()
            .and_then(|path| select_path(&entry, path))
            .map(display_value);
        let disabled = map
            .disable_when
            .as_deref()
            .and_then(|path| select_path(&entry, path))
            .is_some_and(truthy);
        return ResolvedOption {
            value,
            label,
            hint,
            disabled,
        };
    }

    match entry {
        Value::String(text) => ResolvedOption::plain(text),
        Value::Object(ref fields) => {
            let value = fields.get("value").cloned().unwrap_or(entry.clone());
            let label = fields
                .get("label")
                .map(display_value)
                .unwrap_or_else(|| display_value(&value));
            let hint = fields.get("hint").map(display_value);
            let disabled = fields.get("disabled").is_some_and(truthy);
            ResolvedOption {
                value,
                label,
                hint,
                disabled,
            }
        }
        other => {
            let label = display_value(&other);
            ResolvedOption {
                value: other,
                label,
                hint: None,
                disabled: false,
            }
        }
    }
}

/// Resolve a dotted or JSON-pointer path into an entry.
fn select_path<'a>(entry: &'a Value, path: &str) -> Option<&'a Value> {
    if let Some(pointer) = path.strip_prefix('/') {
        entry.pointer(&format!("/{pointer}"))
    } else {
        rb_core::value::lookup_path(entry, path)
    }
}

pub(crate) fn discover_projects(
    repo_root: &Path,
    include_root: bool,
    max_depth: usize,
    extra_ignore: &[String],
) -> Vec<ResolvedOption> {
    let mut found = Vec::new();
    if include_root {
        if let Some(option) = project_option(repo_root, repo_root) {
            found.push(option);
        }
    }
    walk_projects(repo_root, repo_root, max_depth, extra_ignore, &mut found);
    found.sort_by(|a, b| a.label.cmp(&b.label));
    found
}

fn walk_projects(
    repo_root: &Path,
    dir: &Path,
    depth_left: usize,
    extra_ignore: &[String],
    found: &mut Vec<ResolvedOption>,
) {
    if depth_left == 0 {
        return;
    }
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if DEFAULT_PROJECT_IGNORE.contains(&name.as_str())
            || extra_ignore.iter().any(|i| i == &name)
        {
            continue;
        }
        if let Some(option) = project_option(repo_root, &path) {
            found.push(option);
        }
        walk_projects(repo_root, &path, depth_left - 1, extra_ignore, found);
    }
}

/// Build an option for a directory if it holds a package manifest, labelled
/// from the manifest name where one can be read.
fn project_option(repo_root: &Path, dir: &Path) -> Option<ResolvedOption> {
    let manifest = PACKAGE_MANIFESTS
        .iter()
        .map(|name| dir.join(name))
        .find(|path| path.is_file())?;
    let fallback = dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| ".".into());
    let label = manifest_name(&manifest).unwrap_or(fallback);
    let relative = dir
        .strip_prefix(repo_root)
        .unwrap_or(dir)
        .to_string_lossy()
        .into_owned();
    Some(ResolvedOption {
        value: Value::String(dir.to_string_lossy().into_owned()),
        label,
        hint: (!relative.is_empty()).then_some(relative),
        disabled: false,
    })
}

fn manifest_name(manifest: &Path) -> Option<String> {
    let contents = std::fs::read_to_string(manifest).ok()?;
    match manifest.file_name()?.to_string_lossy().as_ref() {
        "package.json" => serde_json::from_str::<Value>(&contents)
            .ok()?
            .get("name")?
            .as_str()
            .map(str::to_string),
        "Cargo.toml" => {
            let parsed: toml::Value = toml::from_str(&contents).ok()?;
            parsed
                .get("package")?
                .get("name")?
                .as_str()
                .map(str::to_string)
        }
        "pyproject.toml" => {
            let parsed: toml::Value = toml::from_str(&contents).ok()?;
            parsed
                .get("project")?
                .get("name")?
                .as_str()
                .map(str::to_string)
        }
        _ => None,
    }
}

fn project_tsconfigs(dir: &Path, allow_custom_path: bool) -> Vec<ResolvedOption> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .flatten()
                .filter(|e| e.path().is_file())
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .filter(|name| name.starts_with("tsconfig") && name.ends_with(".json"))
                .collect()
        })
        .unwrap_or_default();
    names.sort();
    names.retain(|name| name != "tsconfig.json");

    // The canonical entry always leads, whether or not the file exists yet.
    let mut options = vec![ResolvedOption {
        value: Value::String("tsconfig.json".into()),
        label: "tsconfig.json".into(),
        hint: Some("default".into()),
        disabled: false,
    }];
    options.extend(names.into_iter().map(ResolvedOption::plain));
    if allow_custom_path {
        options.push(ResolvedOption {
            value: Value::String(CUSTOM_PATH_SENTINEL.into()),
            label: "Custom path…".into(),
            hint: None,
            disabled: false,
        });
    }
    options
}

#[cfg(test)]
#[path = "options_tests.rs"]
mod tests;
