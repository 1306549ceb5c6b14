//! The `transition.when` guard expression mini-language.
//!
//! Grammar (see module docs on [`WorkflowDefinition`] for the prose spec):
//! empty / `true` / `always` → true; `false` / `never` → false; a single
//! `LHS == RHS` or `LHS != RHS` comparison; a leading `not `/`!` negation; or
//! a bare lookup path evaluated for truthiness.

use serde_json::Value as Json;
use thiserror::Error;

/// Everything a guard can read from.
///
/// `context.X` and `task_result.X` both dig into the same
/// `transition_context` map — the original implementation keeps no separate
/// "task result" bag, it just writes the last task's result into the same
/// context dict it evaluates `context.*` lookups against.
pub struct GuardContext<'a> {
    pub ticket: &'a Json,
    pub workflow_input: &'a Json,
    pub transition_context: &'a Json,
}

#[derive(Debug, Error)]
pub enum GuardEvalError {
    #[error("malformed guard expression: {0:?}")]
    Malformed(String),
}

/// Parse-then-evaluate a guard string against a context.
///
/// A guard that does not parse under this grammar evaluates to `false`
/// rather than raising, matching the reference evaluator's behavior.
pub fn evaluate(expr: &str, ctx: &GuardContext<'_>) -> bool {
    parse_and_eval(expr, ctx).unwrap_or(false)
}

/// Validate a guard string at workflow-load time without a context.
///
/// Returns `Ok(())` for any expression this grammar can parse (even if, at
/// evaluation time, its lookups resolve to null); returns `Err` only for
/// strings that are not well-formed under the grammar at all.
pub fn validate(expr: &str) -> Result<(), GuardEvalError> {
    let trimmed = expr.trim();
    if trimmed.is_empty() {
        return Ok(());
    }
    let lower = trimmed.to_lowercase();
    if lower == "true" || lower == "always" || lower == "false" || lower == "never" {
        return Ok(());
    }
    if let Some((_, _, _)) = split_comparison(trimmed) {
        return Ok(());
    }
    if let Some(rest) = strip_negation(trimmed) {
        if rest.trim().is_empty() {
            return Err(GuardEvalError::Malformed(expr.to_owned()));
        }
        return Ok(());
    }
    Ok(())
}

fn parse_and_eval(expr: &str, ctx: &GuardContext<'_>) -> Result<bool, GuardEvalError> {
    let trimmed = expr.trim();
    if trimmed.is_empty() {
        return Ok(true);
    }
    let lower = trimmed.to_lowercase();
    if lower == "true" || lower == "always" {
        return Ok(true);
    }
    if lower == "false" || lower == "never" {
        return Ok(false);
    }

    if let Some((lhs, op, rhs)) = split_comparison(trimmed) {
        let lhs_value = lookup(lhs.trim(), ctx);
        let rhs_value = coerce_literal(rhs.trim());
        let equal = lhs_value == rhs_value;
        return Ok(if op == "==" { equal } else { !equal });
    }

    if let Some(rest) = strip_negation(trimmed) {
        let rest = rest.trim();
        if rest.is_empty() {
            return Err(GuardEvalError::Malformed(expr.to_owned()));
        }
        return Ok(!truthy(&lookup(rest, ctx)));
    }

    Ok(truthy(&lookup(trimmed, ctx)))
}

/// Split on the first occurrence of `==`, else the first `!=`.
fn split_comparison(expr: &str) -> Option<(&str, &str, &str)> {
    if let Some(idx) = expr.find("==") {
        return Some((&expr[..idx], "==", &expr[idx + 2..]));
    }
    if let Some(idx) = expr.find("!=") {
        return Some((&expr[..idx], "!=", &expr[idx + 2..]));
    }
    None
}

fn strip_negation(expr: &str) -> Option<&str> {
    if let Some(rest) = expr.strip_prefix("not ") {
        return Some(rest);
    }
    expr.strip_prefix('!')
}

/// Coerce a guard literal: quoted string, bool, none/null, number, else raw string.
fn coerce_literal(raw: &str) -> Json {
    let raw = raw.trim();
    if raw.len() >= 2 {
        let bytes = raw.as_bytes();
        let first = bytes[0];
        let last = bytes[bytes.len() - 1];
        if (first == b'"' || first == b'\'') && first == last {
            return Json::String(raw[1..raw.len() - 1].to_owned());
        }
    }
    let lower = raw.to_lowercase();
    if lower == "true" {
        return Json::Bool(true);
    }
    if lower == "false" {
        return Json::Bool(false);
    }
    if lower == "none" || lower == "null" {
        return Json::Null;
    }
    if raw.contains('.') {
        if let Ok(f) = raw.parse::<f64>() {
            if let Some(n) = serde_json::Number::from_f64(f) {
                return Json::Number(n);
            }
        }
    } else if let Ok(i) = raw.parse::<i64>() {
        return Json::Number(i.into());
    }
    Json::String(raw.to_owned())
}

/// Resolve a dotted lookup path against the appropriately prefixed source.
fn lookup(path: &str, ctx: &GuardContext<'_>) -> Json {
    if let Some(rest) = path.strip_prefix("ticket.") {
        return dig(ctx.ticket, rest);
    }
    if let Some(rest) = path.strip_prefix("context.") {
        return dig(ctx.transition_context, rest);
    }
    if let Some(rest) = path.strip_prefix("workflow_input.") {
        return dig(ctx.workflow_input, rest);
    }
    if let Some(rest) = path.strip_prefix("task_result.") {
        return dig(ctx.transition_context, rest);
    }

    // Bare name: transition_context, then workflow_input, then ticket attribute.
    if let Some(v) = ctx.transition_context.as_object().and_then(|m| m.get(path)) {
        return v.clone();
    }
    if let Some(v) = ctx.workflow_input.as_object().and_then(|m| m.get(path)) {
        return v.clone();
    }
    if let Some(v) = ctx.ticket.as_object().and_then(|m| m.get(path)) {
        return v.clone();
    }
    Json::Null
}

/// Descend a dotted path into nested objects only; any non-object along the
/// way (or a missing key) yields null, never an error.
fn dig(root: &Json, path: &str) -> Json {
    let mut current = root;
    for part in path.split('.') {
        match current.as_object().and_then(|m| m.get(part)) {
            Some(next) => current = next,
            None => return Json::Null,
        }
    }
    current.clone()
}

/// Python-style truthiness: null, false, 0, empty string/array/object are falsy.
fn truthy(value: &Json) -> bool {
    match value {
        Json::Null => false,
        Json::Bool(b) => *b,
        Json::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Json::String(s) => !s.is_empty(),
        Json::Array(a) => !a.is_empty(),
        Json::Object(o) => !o.is_empty(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx(ticket: Json, workflow_input: Json, transition_context: Json) -> (Json, Json, Json) {
        (ticket, workflow_input, transition_context)
    }

    #[test]
    fn empty_and_always_are_true() {
        let (t, w, c) = ctx(json!({}), json!({}), json!({}));
        let gc = GuardContext { ticket: &t, workflow_input: &w, transition_context: &c };
        assert!(evaluate("", &gc));
        assert!(evaluate("true", &gc));
        assert!(evaluate("TRUE", &gc));
        assert!(evaluate("always", &gc));
    }

    #[test]
    fn false_and_never_are_false() {
        let (t, w, c) = ctx(json!({}), json!({}), json!({}));
        let gc = GuardContext { ticket: &t, workflow_input: &w, transition_context: &c };
        assert!(!evaluate("false", &gc));
        assert!(!evaluate("never", &gc));
    }

    #[test]
    fn equality_against_workflow_input() {
        let (t, w, c) = ctx(json!({}), json!({"region": "eu"}), json!({}));
        let gc = GuardContext { ticket: &t, workflow_input: &w, transition_context: &c };
        assert!(evaluate("workflow_input.region == 'eu'", &gc));
        assert!(!evaluate("workflow_input.region == 'us'", &gc));
    }

    #[test]
    fn inequality_operator() {
        let (t, w, c) = ctx(json!({}), json!({"region": "eu"}), json!({}));
        let gc = GuardContext { ticket: &t, workflow_input: &w, transition_context: &c };
        assert!(evaluate("workflow_input.region != 'us'", &gc));
    }

    #[test]
    fn numeric_coercion() {
        let (t, w, c) = ctx(json!({}), json!({"count": 3}), json!({}));
        let gc = GuardContext { ticket: &t, workflow_input: &w, transition_context: &c };
        assert!(evaluate("workflow_input.count == 3", &gc));
        assert!(!evaluate("workflow_input.count == 3.0", &gc));
    }

    #[test]
    fn null_coercion() {
        let (t, w, c) = ctx(json!({}), json!({"region": null}), json!({}));
        let gc = GuardContext { ticket: &t, workflow_input: &w, transition_context: &c };
        assert!(evaluate("workflow_input.region == none", &gc));
        assert!(evaluate("workflow_input.region == null", &gc));
    }

    #[test]
    fn negation_with_not_prefix() {
        let (t, w, c) = ctx(json!({}), json!({"flag": false}), json!({}));
        let gc = GuardContext { ticket: &t, workflow_input: &w, transition_context: &c };
        assert!(evaluate("not workflow_input.flag", &gc));
    }

    #[test]
    fn negation_with_bang_prefix() {
        let (t, w, c) = ctx(json!({}), json!({"flag": true}), json!({}));
        let gc = GuardContext { ticket: &t, workflow_input: &w, transition_context: &c };
        assert!(!evaluate("!workflow_input.flag", &gc));
    }

    #[test]
    fn bare_identifier_truthiness() {
        let (t, w, c) = ctx(json!({}), json!({}), json!({"ready": true}));
        let gc = GuardContext { ticket: &t, workflow_input: &w, transition_context: &c };
        assert!(evaluate("ready", &gc));
    }

    #[test]
    fn bare_identifier_null_is_falsy() {
        let (t, w, c) = ctx(json!({}), json!({}), json!({"ready": null}));
        let gc = GuardContext { ticket: &t, workflow_input: &w, transition_context: &c };
        assert!(!evaluate("ready", &gc));
    }

    #[test]
    fn bare_name_checks_context_before_workflow_input_before_ticket() {
        let (t, w, c) = ctx(
            json!({"flag": "ticket"}),
            json!({"flag": "input"}),
            json!({"flag": "context"}),
        );
        let gc = GuardContext { ticket: &t, workflow_input: &w, transition_context: &c };
        assert_eq!(lookup("flag", &gc), json!("context"));
    }

    #[test]
    fn task_result_and_context_share_the_same_map() {
        let (t, w, c) = ctx(json!({}), json!({}), json!({"status": "ok"}));
        let gc = GuardContext { ticket: &t, workflow_input: &w, transition_context: &c };
        assert!(evaluate("task_result.status == 'ok'", &gc));
        assert!(evaluate("context.status == 'ok'", &gc));
    }

    #[test]
    fn dig_returns_null_on_non_object_descent() {
        let (t, w, c) = ctx(json!({}), json!({"nested": "leaf"}), json!({}));
        let gc = GuardContext { ticket: &t, workflow_input: &w, transition_context: &c };
        assert_eq!(lookup("workflow_input.nested.deeper", &gc), Json::Null);
    }

    #[test]
    fn ticket_attribute_lookup() {
        let (t, w, c) = ctx(json!({"stage": "running"}), json!({}), json!({}));
        let gc = GuardContext { ticket: &t, workflow_input: &w, transition_context: &c };
        assert!(evaluate("ticket.stage == 'running'", &gc));
    }

    #[test]
    fn malformed_guard_evaluates_to_false() {
        let (t, w, c) = ctx(json!({}), json!({}), json!({}));
        let gc = GuardContext { ticket: &t, workflow_input: &w, transition_context: &c };
        assert!(!evaluate("not ", &gc));
    }

    #[test]
    fn validate_accepts_well_formed_guards() {
        assert!(validate("").is_ok());
        assert!(validate("true").is_ok());
        assert!(validate("workflow_input.region == 'eu'").is_ok());
        assert!(validate("not ready").is_ok());
        assert!(validate("!ready").is_ok());
    }

    #[test]
    fn validate_rejects_bare_negation() {
        assert!(validate("not ").is_err());
        assert!(validate("!").is_err());
    }
}
