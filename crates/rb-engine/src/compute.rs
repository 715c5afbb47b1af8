//! Built-in compute handlers.
//!
//! A compute step either renders an inline value map (handled by the
//! executor) or dispatches here by handler name. Handlers receive their
//! params already rendered and return a JSON value.

use std::path::Path;

use chrono::{Duration, Utc};
use serde_json::{Value, json};

use rb_core::EngineError;

use crate::options::discover_projects;

const DEFAULT_WINDOW_MINUTES: i64 = 30;
const TSCONFIG_CANDIDATES: &[&str] = &[
    "tsconfig.typecheck.json",
    "tsconfig.build.json",
    "tsconfig.json",
];

pub struct HandlerContext<'a> {
    pub repo_root: &'a Path,
}

/// Dispatch a named handler. Unknown names are configuration errors.
pub fn run_handler(
    name: &str,
    params: &Value,
    ctx: &HandlerContext<'_>,
) -> Result<Value, EngineError> {
    match name {
        "workspace-projects" => workspace_projects(params, ctx),
        "template-json" => template_json(params),
        "maintenance-window" => maintenance_window(params),
        "detect-project-tsconfig" => detect_project_tsconfig(params, ctx),
        "render-typecheck-command" => render_typecheck_command(params),
        other => Err(EngineError::Config(format!(
            "unknown compute handler '{other}'"
        ))),
    }
}

fn str_param<'a>(params: &'a Value, key: &str) -> Option<&'a str> {
    params.get(key).and_then(Value::as_str)
}

fn u64_param(params: &Value, key: &str) -> Option<u64> {
    params.get(key).and_then(Value::as_u64)
}

/// Discover workspace projects as `{name, path, relative}` records.
fn workspace_projects(params: &Value, ctx: &HandlerContext<'_>) -> Result<Value, EngineError> {
    let include_root = params
        .get("includeRoot")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let max_depth = u64_param(params, "maxDepth").unwrap_or(3) as usize;
    let ignore: Vec<String> = params
        .get("ignore")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    let limit = u64_param(params, "limit").map(|n| n as usize);

    let mut projects = discover_projects(ctx.repo_root, include_root, max_depth, &ignore);
    if let Some(limit) = limit {
        projects.truncate(limit);
    }
    Ok(Value::Array(
        projects
            .into_iter()
            .map(|option| {
                json!({
                    "name": option.label,
                    "path": option.value,
                    "relative": option.hint,
                })
            })
            .collect(),
    ))
}

/// Pass the rendered `template` param through as the result, letting flows
/// assemble structured values from templates.
fn template_json(params: &Value) -> Result<Value, EngineError> {
    Ok(params.get("template").cloned().unwrap_or_else(|| params.clone()))
}

/// Compute a maintenance window starting now (plus optional offset).
fn maintenance_window(params: &Value) -> Result<Value, EngineError> {
    let duration_minutes = params
        .get("durationMinutes")
        .and_then(Value::as_i64)
        .unwrap_or(DEFAULT_WINDOW_MINUTES);
    let offset_minutes = params
        .get("startOffsetMinutes")
        .and_then(Value::as_i64)
        .unwrap_or(0);
    if duration_minutes <= 0 {
        return Err(EngineError::Config(
            "maintenance-window needs a positive durationMinutes".into(),
        ));
    }
    let starts_at = Utc::now() + Duration::minutes(offset_minutes);
    let ends_at = starts_at + Duration::minutes(duration_minutes);
    Ok(json!({
        "startsAt": starts_at.to_rfc3339(),
        "endsAt": ends_at.to_rfc3339(),
        "durationMinutes": duration_minutes,
    }))
}

/// Pick the most specific tsconfig present in a project directory, falling
/// back to the canonical `tsconfig.json`.
fn detect_project_tsconfig(
    params: &Value,
    ctx: &HandlerContext<'_>,
) -> Result<Value, EngineError> {
    let dir = match str_param(params, "dir") {
        Some(dir) if Path::new(dir).is_absolute() => Path::new(dir).to_path_buf(),
        Some(dir) => ctx.repo_root.join(dir),
        None => ctx.repo_root.to_path_buf(),
    };
    let found = TSCONFIG_CANDIDATES
        .iter()
        .find(|candidate| dir.join(candidate).is_file());
    Ok(Value::String(
        found.copied().unwrap_or("tsconfig.json").to_string(),
    ))
}

/// Render the typecheck command line for a project/tsconfig pair.
fn render_typecheck_command(params: &Value) -> Result<Value, EngineError> {
    let runner = str_param(params, "runner").unwrap_or("npx tsc");
    let tsconfig = str_param(params, "tsconfig").unwrap_or("tsconfig.json");
    let command = match str_param(params, "project") {
        Some(project) if !project.is_empty() => {
            format!("{runner} --project {project}/{tsconfig} --noEmit")
        }
        _ => format!("{runner} --project {tsconfig} --noEmit"),
    };
    Ok(Value::String(command))
}
