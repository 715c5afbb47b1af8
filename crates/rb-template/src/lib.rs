//! The `{{ … }}` template engine and branch-expression evaluator.
//!
//! Expressions are parsed by a hand-written tokeniser and recursive-descent
//! parser; no host code is ever evaluated. Dotted paths resolve against the
//! render context (`state`, `env`, `repoRoot`, `iteration`), unresolved
//! identifiers render as the empty string, and syntax errors carry the byte
//! position of the offending token within the full template string.

use std::collections::BTreeMap;

use serde_json::Value;

use rb_core::EngineError;
use rb_core::value::truthy;

pub mod eval;
pub mod lexer;
pub mod parser;

pub use parser::Expr;

/// Everything an expression can see.
#[derive(Debug, Clone, Copy)]
pub struct Context<'a> {
    /// The run state, shaped as it serialises (`state.answers.…`).
    pub state: &'a Value,
    pub env: &'a BTreeMap<String, String>,
    pub repo_root: &'a str,
    /// Transient binding inside an iterate step's nested flow.
    pub iteration: Option<&'a Value>,
}

/// Parse an expression without evaluating it. Used by configuration
/// validation to reject malformed branch conditions up front.
pub fn parse_expression(source: &str) -> Result<Expr, EngineError> {
    parser::parse(source, 0)
}

/// Render a template string, substituting every `{{ … }}` segment.
///
/// Strings without an opening delimiter are returned unchanged (and
/// unallocated work is kept minimal for that common case).
pub fn render(template: &str, ctx: &Context<'_>) -> Result<String, EngineError> {
    if !template.contains("{{") {
        return Ok(template.to_string());
    }

    let mut output = String::with_capacity(template.len());
    let mut rest = template;
    let mut offset = 0;

    while let Some(open) = rest.find("{{") {
        output.push_str(&rest[..open]);
        let expr_start = open + 2;
        let Some(close_rel) = rest[expr_start..].find("}}") else {
            return Err(EngineError::Template {
                position: offset + open,
                message: "unterminated '{{' expression".into(),
            });
        };
        let source = &rest[expr_start..expr_start + close_rel];
        let expr = parser::parse(source, offset + expr_start)?;
        let value = eval::eval(&expr, ctx)?;
        output.push_str(&stringify(&value));

        let consumed = expr_start + close_rel + 2;
        rest = &rest[consumed..];
        offset += consumed;
    }
    output.push_str(rest);
    Ok(output)
}

/// Walk a JSON-like value and render every string leaf; non-string leaves
/// are preserved unchanged.
pub fn render_maybe_nested(value: &Value, ctx: &Context<'_>) -> Result<Value, EngineError> {
    match value {
        Value::String(template) => Ok(Value::String(render(template, ctx)?)),
        Value::Array(items) => {
            let mut rendered = Vec::with_capacity(items.len());
            for item in items {
                rendered.push(render_maybe_nested(item, ctx)?);
            }
            Ok(Value::Array(rendered))
        }
        Value::Object(map) => {
            let mut rendered = serde_json::Map::with_capacity(map.len());
            for (key, item) in map {
                rendered.insert(key.clone(), render_maybe_nested(item, ctx)?);
            }
            Ok(Value::Object(rendered))
        }
        other => Ok(other.clone()),
    }
}

/// Evaluate a branch expression to a boolean via truthiness coercion.
pub fn eval_bool(source: &str, ctx: &Context<'_>) -> Result<bool, EngineError> {
    let expr = parser::parse(source, 0)?;
    let value = eval::eval(&expr, ctx)?;
    Ok(value.as_ref().is_some_and(truthy))
}

/// Evaluate a full expression, returning the raw value (`None` = undefined).
pub fn eval_expression(source: &str, ctx: &Context<'_>) -> Result<Option<Value>, EngineError> {
    let expr = parser::parse(source, 0)?;
    eval::eval(&expr, ctx)
}

fn stringify(value: &Option<Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Bool(b)) => b.to_string(),
        Some(Value::Number(n)) => format_number(n),
        Some(other) => serde_json::to_string(other).unwrap_or_default(),
    }
}

/// Numbers render without a trailing `.0` when they are whole, so numeric
/// literals survive a render round-trip.
fn format_number(n: &serde_json::Number) -> String {
    match n.as_f64() {
        Some(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", f as i64),
        _ => n.to_string(),
    }
}
