//! Expression evaluation against a render context.
//!
//! Evaluation distinguishes "undefined" (an unresolved path, `None`) from
//! JSON null so that strict equality and `jsonLiteral` behave predictably.

use serde_json::{Value, json};

use rb_core::EngineError;
use rb_core::value::truthy;

use crate::parser::{BinaryOp, Expr};
use crate::Context;

pub fn eval(expr: &Expr, ctx: &Context<'_>) -> Result<Option<Value>, EngineError> {
    match expr {
        Expr::Str(s) => Ok(Some(Value::String(s.clone()))),
        Expr::Number(n) => Ok(Some(json!(n))),
        Expr::Bool(b) => Ok(Some(Value::Bool(*b))),
        Expr::Null => Ok(Some(Value::Null)),
        Expr::Path(segments) => Ok(resolve_path(segments, ctx)),
        Expr::Not(inner) => {
            let value = eval(inner, ctx)?;
            Ok(Some(Value::Bool(!opt_truthy(&value))))
        }
        Expr::Binary { op, left, right } => eval_binary(*op, left, right, ctx),
        Expr::Helper { name, args } => eval_helper(name, args, ctx),
    }
}

fn opt_truthy(value: &Option<Value>) -> bool {
    value.as_ref().is_some_and(truthy)
}

fn resolve_path(segments: &[String], ctx: &Context<'_>) -> Option<Value> {
    let (root, rest) = segments.split_first()?;
    let base: Value = match root.as_str() {
        "state" => ctx.state.clone(),
        "env" => {
            let (name, tail) = rest.split_first()?;
            let value = ctx.env.get(name).cloned().map(Value::String)?;
            return walk(&value, tail).cloned();
        }
        "repoRoot" => Value::String(ctx.repo_root.to_string()),
        "iteration" => ctx.iteration.cloned()?,
        _ => return None,
    };
    walk(&base, rest).cloned()
}

fn walk<'a>(base: &'a Value, segments: &[String]) -> Option<&'a Value> {
    let mut current = base;
    for segment in segments {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

fn eval_binary(
    op: BinaryOp,
    left: &Expr,
    right: &Expr,
    ctx: &Context<'_>,
) -> Result<Option<Value>, EngineError> {
    // Short-circuit logical operators return the deciding operand.
    match op {
        BinaryOp::And => {
            let lhs = eval(left, ctx)?;
            if !opt_truthy(&lhs) {
                return Ok(lhs);
            }
            return eval(right, ctx);
        }
        BinaryOp::Or => {
            let lhs = eval(left, ctx)?;
            if opt_truthy(&lhs) {
                return Ok(lhs);
            }
            return eval(right, ctx);
        }
        _ => {}
    }

    let lhs = eval(left, ctx)?;
    let rhs = eval(right, ctx)?;
    let result = match op {
        BinaryOp::StrictEq => strict_eq(&lhs, &rhs),
        BinaryOp::StrictNe => !strict_eq(&lhs, &rhs),
        BinaryOp::Eq => loose_eq(&lhs, &rhs),
        BinaryOp::Ne => !loose_eq(&lhs, &rhs),
        BinaryOp::Gt => ordering(&lhs, &rhs).is_some_and(|o| o == std::cmp::Ordering::Greater),
        BinaryOp::Lt => ordering(&lhs, &rhs).is_some_and(|o| o == std::cmp::Ordering::Less),
        BinaryOp::Ge => ordering(&lhs, &rhs).is_some_and(|o| o != std::cmp::Ordering::Less),
        BinaryOp::Le => ordering(&lhs, &rhs).is_some_and(|o| o != std::cmp::Ordering::Greater),
        BinaryOp::And | BinaryOp::Or => unreachable!("handled above"),
    };
    Ok(Some(Value::Bool(result)))
}

fn strict_eq(lhs: &Option<Value>, rhs: &Option<Value>) -> bool {
    match (lhs, rhs) {
        (None, None) => true,
        (Some(a), Some(b)) => value_eq(a, b),
        _ => false,
    }
}

/// Deep equality that compares numbers numerically, so an integer answer
/// equals the float a numeric literal lexes to.
fn value_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(a, b)| value_eq(a, b))
        }
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len() && x.iter().all(|(k, v)| y.get(k).is_some_and(|w| value_eq(v, w)))
        }
        _ => a == b,
    }
}

/// Loose equality: null and undefined compare equal, numeric strings compare
/// against numbers, booleans coerce to numbers.
fn loose_eq(lhs: &Option<Value>, rhs: &Option<Value>) -> bool {
    match (lhs, rhs) {
        (None, None) => true,
        (None, Some(Value::Null)) | (Some(Value::Null), None) => true,
        (Some(a), Some(b)) => {
            if value_eq(a, b) {
                return true;
            }
            match (as_number(a), as_number(b)) {
                (Some(x), Some(y)) => x == y,
                _ => false,
            }
        }
        _ => false,
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        Value::Bool(true) => Some(1.0),
        Value::Bool(false) => Some(0.0),
        _ => None,
    }
}

fn ordering(lhs: &Option<Value>, rhs: &Option<Value>) -> Option<std::cmp::Ordering> {
    match (lhs.as_ref()?, rhs.as_ref()?) {
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (a, b) => as_number(a)?.partial_cmp(&as_number(b)?),
    }
}

fn eval_helper(
    name: &str,
    args: &[Expr],
    ctx: &Context<'_>,
) -> Result<Option<Value>, EngineError> {
    let mut values = Vec::with_capacity(args.len());
    for arg in args {
        values.push(eval(arg, ctx)?);
    }

    match name {
        "json" => {
            let encoded = encode_json(values.first().and_then(Option::as_ref));
            Ok(Some(Value::String(encoded)))
        }
        "jsonString" => {
            let encoded = encode_json(values.first().and_then(Option::as_ref));
            Ok(Some(Value::String(escape_for_quoted_literal(&encoded))))
        }
        "jsonLiteral" => {
            let encoded = encode_json(values.first().and_then(Option::as_ref));
            Ok(Some(Value::String(encoded)))
        }
        "includes" => {
            let collection = values.first().cloned().flatten();
            let needle = values.get(1).cloned().flatten();
            Ok(Some(Value::Bool(includes(&collection, &needle))))
        }
        "array" => Ok(Some(Value::Array(
            values
                .into_iter()
                .map(|v| v.unwrap_or(Value::Null))
                .collect(),
        ))),
        other => Err(EngineError::Template {
            position: 0,
            message: format!("unknown helper '{other}'"),
        }),
    }
}

fn encode_json(value: Option<&Value>) -> String {
    match value {
        Some(v) => serde_json::to_string(v).unwrap_or_else(|_| "null".to_string()),
        None => "null".to_string(),
    }
}

/// Escape a JSON encoding for embedding in a quoted host-language string
/// literal: backslash, double-quote, single-quote, backtick, in that order.
fn escape_for_quoted_literal(encoded: &str) -> String {
    encoded
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\'', "\\'")
        .replace('`', "\\`")
}

fn includes(collection: &Option<Value>, needle: &Option<Value>) -> bool {
    let (Some(collection), Some(needle)) = (collection, needle) else {
        return false;
    };
    match collection {
        Value::Array(items) => items.iter().any(|item| value_eq(item, needle)),
        Value::String(s) => needle.as_str().is_some_and(|n| s.contains(n)),
        Value::Object(map) => needle.as_str().is_some_and(|n| map.contains_key(n)),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;
    use std::collections::BTreeMap;

    fn ctx_with<'a>(state: &'a Value, env: &'a BTreeMap<String, String>) -> Context<'a> {
        Context {
            state,
            env,
            repo_root: "/repo",
            iteration: None,
        }
    }

    fn eval_str(source: &str, state: &Value) -> Option<Value> {
        let env = BTreeMap::new();
        let expr = parse(source, 0).unwrap();
        eval(&expr, &ctx_with(state, &env)).unwrap()
    }

    #[test]
    fn test_path_resolution() {
        let state = json!({"answers": {"name": "api", "count": 2}});
        assert_eq!(eval_str("state.answers.name", &state), Some(json!("api")));
        assert_eq!(eval_str("state.answers.missing", &state), None);
        assert_eq!(eval_str("unknownRoot.x", &state), None);
    }

    #[test]
    fn test_repo_root_and_env() {
        let state = json!({});
        let mut env = BTreeMap::new();
        env.insert("HOME".to_string(), "/home/dev".to_string());
        let ctx = ctx_with(&state, &env);
        let expr = parse("env.HOME", 0).unwrap();
        assert_eq!(eval(&expr, &ctx).unwrap(), Some(json!("/home/dev")));
        let expr = parse("repoRoot", 0).unwrap();
        assert_eq!(eval(&expr, &ctx).unwrap(), Some(json!("/repo")));
    }

    #[test]
    fn test_strict_vs_loose_equality() {
        let state = json!({"answers": {"count": 2, "flag": true}});
        assert_eq!(
            eval_str("state.answers.count === 2", &state),
            Some(json!(true))
        );
        assert_eq!(
            eval_str("state.answers.count === '2'", &state),
            Some(json!(false))
        );
        assert_eq!(
            eval_str("state.answers.count == '2'", &state),
            Some(json!(true))
        );
        assert_eq!(
            eval_str("state.answers.missing == null", &state),
            Some(json!(true))
        );
        assert_eq!(
            eval_str("state.answers.missing === null", &state),
            Some(json!(false))
        );
    }

    #[test]
    fn test_logical_operators_return_operands() {
        let state = json!({"answers": {"name": "api", "empty": ""}});
        assert_eq!(
            eval_str("state.answers.empty || 'fallback'", &state),
            Some(json!("fallback"))
        );
        assert_eq!(
            eval_str("state.answers.name && 'second'", &state),
            Some(json!("second"))
        );
    }

    #[test]
    fn test_not() {
        let state = json!({"answers": {"flag": false}});
        assert_eq!(eval_str("!state.answers.flag", &state), Some(json!(true)));
        assert_eq!(eval_str("!state.answers.missing", &state), Some(json!(true)));
    }

    #[test]
    fn test_comparisons() {
        let state = json!({"answers": {"count": 5}});
        assert_eq!(eval_str("state.answers.count > 3", &state), Some(json!(true)));
        assert_eq!(
            eval_str("state.answers.count <= 4", &state),
            Some(json!(false))
        );
        assert_eq!(eval_str("'abc' < 'abd'", &state), Some(json!(true)));
        // Comparing against undefined is never true.
        assert_eq!(
            eval_str("state.answers.missing > 0", &state),
            Some(json!(false))
        );
    }

    #[test]
    fn test_json_helper() {
        let state = json!({"answers": {"tags": ["a", "b"]}});
        assert_eq!(
            eval_str("json state.answers.tags", &state),
            Some(json!("[\"a\",\"b\"]"))
        );
        assert_eq!(eval_str("json state.answers.missing", &state), Some(json!("null")));
    }

    #[test]
    fn test_json_string_helper_escapes_in_order() {
        let state = json!({"answers": {"text": "say \"hi\" to `w'orld`\\"}});
        let result = eval_str("jsonString state.answers.text", &state).unwrap();
        let escaped = result.as_str().unwrap();
        assert!(!escaped.contains("\"hi\""));
        assert!(escaped.contains("\\`w\\'orld\\`"));
        assert!(escaped.starts_with("\\\""));
    }

    #[test]
    fn test_json_literal_undefined_is_null() {
        let state = json!({});
        assert_eq!(
            eval_str("jsonLiteral state.answers", &state),
            Some(json!("null"))
        );
    }

    #[test]
    fn test_includes() {
        let state = json!({"answers": {"tags": ["prod", "eu"], "name": "frontend"}});
        assert_eq!(
            eval_str("includes state.answers.tags 'prod'", &state),
            Some(json!(true))
        );
        assert_eq!(
            eval_str("includes state.answers.tags 'dev'", &state),
            Some(json!(false))
        );
        assert_eq!(
            eval_str("includes state.answers.name 'front'", &state),
            Some(json!(true))
        );
        assert_eq!(
            eval_str("includes state.answers 'tags'", &state),
            Some(json!(true))
        );
    }

    #[test]
    fn test_array_helper() {
        let state = json!({"answers": {"x": 1}});
        assert_eq!(
            eval_str("array 1 'two' state.answers.x", &state),
            Some(json!([1.0, "two", 1]))
        );
    }
}
