//! The runtime expression language.
//!
//! A jq-flavoured query language over `serde_json::Value`, used by every
//! task for input/output transformation, guards and interpolation. Two
//! modes exist:
//!
//! 1. **Expression mode**: the whole string is `${ <expr> }`; the inner
//!    expression is evaluated and its typed result returned.
//! 2. **Interpolation mode**: `\( <expr> )` inside a `${ "…" }` string
//!    literal is replaced by the stringified result.
//!
//! Strict-mode guarantee: a string *not* enclosed in `${ … }` passes
//! through verbatim, even when it contains `${…}` substrings. Only guard
//! positions (`if`, `when`, `while`) auto-normalize bare expressions.
//!
//! Name resolution: `.x.y` reads the evaluator's current input;
//! `$context.x` reads the workflow context; `$item` / `$index` the
//! innermost `for` scope; `$workflow` / `$task` expose metadata.

mod eval;
mod lexer;
mod parser;

pub use eval::{display, truthy, Vars};

use grantor_types::error::Problem;
use serde_json::{Map, Value};

use parser::Ast;

/// A parsed, reusable expression.
#[derive(Debug, Clone)]
pub struct Expression {
    ast: Ast,
}

impl Expression {
    /// Parse raw expression source (without the `${ }` wrapper).
    pub fn parse(source: &str) -> Result<Self, Problem> {
        Ok(Self {
            ast: parser::parse(source)?,
        })
    }

    pub fn evaluate(&self, input: &Value, vars: &Vars) -> Result<Value, Problem> {
        eval::eval(&self.ast, input, vars)
    }
}

/// Is this string a strict-mode expression (`${ … }`)?
pub fn is_expression(s: &str) -> bool {
    let trimmed = s.trim();
    trimmed.starts_with("${") && trimmed.ends_with('}')
}

/// Strip the `${ }` wrapper; `None` when the string is not an expression.
fn expression_source(s: &str) -> Option<&str> {
    let trimmed = s.trim();
    let inner = trimmed.strip_prefix("${")?.strip_suffix('}')?;
    Some(inner.trim())
}

/// Evaluate a string under strict-mode rules: expressions are evaluated,
/// anything else passes through verbatim.
pub fn evaluate_str(s: &str, input: &Value, vars: &Vars) -> Result<Value, Problem> {
    match expression_source(s) {
        Some(source) => Expression::parse(source)?.evaluate(input, vars),
        None => Ok(Value::String(s.to_string())),
    }
}

/// Evaluate a guard position (`if` / `when` / `while`): strict expressions
/// are unwrapped, bare sources are treated as expressions directly, and the
/// result is coerced with jq truthiness.
pub fn evaluate_guard(s: &str, input: &Value, vars: &Vars) -> Result<bool, Problem> {
    let source = expression_source(s).unwrap_or(s);
    let value = Expression::parse(source)?.evaluate(input, vars)?;
    Ok(truthy(&value))
}

/// Recursively evaluate a transform-expression: a string goes through
/// strict-mode evaluation, objects and arrays are walked with every string
/// leaf evaluated, and other scalars pass through unchanged.
pub fn traverse_and_evaluate(
    transform: &Value,
    input: &Value,
    vars: &Vars,
) -> Result<Value, Problem> {
    match transform {
        Value::String(s) => evaluate_str(s, input, vars),
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(traverse_and_evaluate(item, input, vars)?);
            }
            Ok(Value::Array(out))
        }
        Value::Object(map) => {
            let mut out = Map::new();
            for (key, value) in map {
                out.insert(key.clone(), traverse_and_evaluate(value, input, vars)?);
            }
            Ok(Value::Object(out))
        }
        other => Ok(other.clone()),
    }
}

/// Convenience for tests and simple callers: empty variable scope.
pub fn no_vars() -> Vars {
    Vars::new()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vars_with_context(context: Value) -> Vars {
        let mut vars = Vars::new();
        vars.insert("context".to_string(), context);
        vars
    }

    // -------------------------------------------------------------------
    // Strict mode
    // -------------------------------------------------------------------

    #[test]
    fn plain_string_passes_through_verbatim() {
        let input = json!({"context": {"user": {"email": "j@d.com"}}});
        let out = evaluate_str(
            "The user ${.context.user.email} has requested access",
            &input,
            &no_vars(),
        )
        .unwrap();
        assert_eq!(
            out,
            json!("The user ${.context.user.email} has requested access")
        );
    }

    #[test]
    fn full_enclosure_is_evaluated() {
        let input = json!({"user": {"name": "john.doe"}});
        let out = evaluate_str("${ .user.name }", &input, &no_vars()).unwrap();
        assert_eq!(out, json!("john.doe"));
    }

    #[test]
    fn interpolation_inside_expression_string() {
        let input = json!({"user": {"name": "john.doe"}});
        let out = evaluate_str(
            r#"${ "The user \(.user.name) is requesting access." }"#,
            &input,
            &no_vars(),
        )
        .unwrap();
        assert_eq!(out, json!("The user john.doe is requesting access."));
    }

    #[test]
    fn interpolation_renders_numbers_without_quotes() {
        let input = json!({"count": 3});
        let out =
            evaluate_str(r#"${ "found \(.count) roles" }"#, &input, &no_vars()).unwrap();
        assert_eq!(out, json!("found 3 roles"));
    }

    // -------------------------------------------------------------------
    // Name resolution
    // -------------------------------------------------------------------

    #[test]
    fn dollar_context_reads_workflow_context() {
        let vars = vars_with_context(json!({"role": {"name": "ops"}}));
        let out = evaluate_str("${ $context.role.name }", &Value::Null, &vars).unwrap();
        assert_eq!(out, json!("ops"));
    }

    #[test]
    fn unknown_variable_is_an_expression_error() {
        let err = evaluate_str("${ $missing }", &Value::Null, &no_vars()).unwrap_err();
        assert_eq!(err.kind, grantor_types::error::ErrorKind::Expression);
    }

    #[test]
    fn missing_field_yields_null() {
        let out = evaluate_str("${ .nope }", &json!({}), &no_vars()).unwrap();
        assert_eq!(out, Value::Null);
    }

    // -------------------------------------------------------------------
    // Operators
    // -------------------------------------------------------------------

    #[test]
    fn arithmetic_and_comparison() {
        let input = json!({"x": 7});
        assert_eq!(
            evaluate_str("${ .x + 1 }", &input, &no_vars()).unwrap(),
            json!(8)
        );
        assert_eq!(
            evaluate_str("${ .x > 5 }", &input, &no_vars()).unwrap(),
            json!(true)
        );
        assert_eq!(
            evaluate_str("${ .x * 2 - 4 }", &input, &no_vars()).unwrap(),
            json!(10)
        );
    }

    #[test]
    fn string_concat_with_plus() {
        let input = json!({"a": "grant", "b": "or"});
        assert_eq!(
            evaluate_str("${ .a + .b }", &input, &no_vars()).unwrap(),
            json!("grantor")
        );
    }

    #[test]
    fn division_by_zero_is_deterministic_error() {
        let err = evaluate_str("${ 1 / 0 }", &Value::Null, &no_vars()).unwrap_err();
        assert!(err.detail.contains("division by zero"));
    }

    #[test]
    fn type_errors_are_expression_problems() {
        let err = evaluate_str("${ .a + .b }", &json!({"a": 1, "b": {}}), &no_vars())
            .unwrap_err();
        assert_eq!(err.kind, grantor_types::error::ErrorKind::Expression);
        // Deterministic: the same input errors identically.
        let err2 = evaluate_str("${ .a + .b }", &json!({"a": 1, "b": {}}), &no_vars())
            .unwrap_err();
        assert_eq!(err.detail, err2.detail);
    }

    #[test]
    fn null_coalescing() {
        let input = json!({"present": "yes"});
        assert_eq!(
            evaluate_str("${ .absent // \"fallback\" }", &input, &no_vars()).unwrap(),
            json!("fallback")
        );
        assert_eq!(
            evaluate_str("${ .present // \"fallback\" }", &input, &no_vars()).unwrap(),
            json!("yes")
        );
    }

    #[test]
    fn if_then_else() {
        let input = json!({"x": 3});
        let out = evaluate_str(
            r#"${ if .x > 5 then "big" else "small" end }"#,
            &input,
            &no_vars(),
        )
        .unwrap();
        assert_eq!(out, json!("small"));
    }

    #[test]
    fn pipe_and_builtins() {
        let input = json!({"items": ["a", "b", "c"]});
        assert_eq!(
            evaluate_str("${ .items | length }", &input, &no_vars()).unwrap(),
            json!(3)
        );
        assert_eq!(
            evaluate_str(r#"${ .items | join(", ") }"#, &input, &no_vars()).unwrap(),
            json!("a, b, c")
        );
    }

    #[test]
    fn map_and_filter() {
        let input = json!({"ns": [1, 2, 3, 4]});
        assert_eq!(
            evaluate_str("${ .ns | map(. * 2) }", &input, &no_vars()).unwrap(),
            json!([2, 4, 6, 8])
        );
        assert_eq!(
            evaluate_str("${ .ns | filter(. > 2) }", &input, &no_vars()).unwrap(),
            json!([3, 4])
        );
        assert_eq!(
            evaluate_str("${ .ns | map(select(. > 2) // 0) }", &input, &no_vars()).unwrap(),
            json!([0, 0, 3, 4])
        );
    }

    #[test]
    fn array_index_and_negative_index() {
        let input = json!({"tags": ["x", "y", "z"]});
        assert_eq!(
            evaluate_str("${ .tags[0] }", &input, &no_vars()).unwrap(),
            json!("x")
        );
        assert_eq!(
            evaluate_str("${ .tags[-1] }", &input, &no_vars()).unwrap(),
            json!("z")
        );
        assert_eq!(
            evaluate_str("${ .tags[9] }", &input, &no_vars()).unwrap(),
            Value::Null
        );
    }

    #[test]
    fn object_and_array_construction() {
        let input = json!({"user": {"name": "ada"}});
        let out = evaluate_str(
            r#"${ {who: .user.name, tags: ["jit", "access"]} }"#,
            &input,
            &no_vars(),
        )
        .unwrap();
        assert_eq!(out, json!({"who": "ada", "tags": ["jit", "access"]}));
    }

    #[test]
    fn not_via_pipe() {
        assert_eq!(
            evaluate_str("${ .active | not }", &json!({"active": true}), &no_vars()).unwrap(),
            json!(false)
        );
    }

    // -------------------------------------------------------------------
    // Guards
    // -------------------------------------------------------------------

    #[test]
    fn guard_accepts_bare_and_wrapped_expressions() {
        let input = json!({"x": 7});
        assert!(evaluate_guard("${ .x > 5 }", &input, &no_vars()).unwrap());
        assert!(evaluate_guard(".x > 5", &input, &no_vars()).unwrap());
        assert!(!evaluate_guard(".x > 50", &input, &no_vars()).unwrap());
    }

    #[test]
    fn guard_truthiness_is_jq_style() {
        assert!(!evaluate_guard(".missing", &json!({}), &no_vars()).unwrap());
        assert!(evaluate_guard(".zero", &json!({"zero": 0}), &no_vars()).unwrap());
        assert!(evaluate_guard(".s", &json!({"s": ""}), &no_vars()).unwrap());
    }

    // -------------------------------------------------------------------
    // Traversal
    // -------------------------------------------------------------------

    #[test]
    fn traverse_evaluates_string_leaves() {
        let input = json!({"user": {"email": "ada@example.com"}, "role": "ops"});
        let transform = json!({
            "to": "${ .user.email }",
            "message": r#"${ "Grant \(.role) to \(.user.email)" }"#,
            "static": "unchanged",
            "nested": {"role": "${ .role }"},
            "list": ["${ .role }", "literal"],
        });
        let out = traverse_and_evaluate(&transform, &input, &no_vars()).unwrap();
        assert_eq!(
            out,
            json!({
                "to": "ada@example.com",
                "message": "Grant ops to ada@example.com",
                "static": "unchanged",
                "nested": {"role": "ops"},
                "list": ["ops", "literal"],
            })
        );
    }

    #[test]
    fn traverse_preserves_non_string_scalars() {
        let transform = json!({"approvals": true, "count": 2, "none": null});
        let out = traverse_and_evaluate(&transform, &Value::Null, &no_vars()).unwrap();
        assert_eq!(out, transform);
    }
}
