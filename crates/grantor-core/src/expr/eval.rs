//! Tree-walking evaluation of the expression AST over `serde_json::Value`.
//!
//! Semantics follow jq where the subset overlaps: missing fields and
//! out-of-range indexes yield `null`, `null` and `false` are the only falsy
//! values, `//` substitutes its right side when the left is falsy. Type
//! errors are deterministic `expression` problems, never coercions.

use std::collections::HashMap;

use grantor_types::error::Problem;
use serde_json::{Map, Value};

use super::parser::{number, Ast, BinOp, Segment};

/// Variable bindings visible to an expression (`$context`, `$item`, …),
/// keyed without the `$` sigil.
pub type Vars = HashMap<String, Value>;

pub fn eval(ast: &Ast, input: &Value, vars: &Vars) -> Result<Value, Problem> {
    match ast {
        Ast::Identity => Ok(input.clone()),
        Ast::Field(base, name) => {
            let base = eval(base, input, vars)?;
            field(&base, name)
        }
        Ast::Index(base, index) => {
            let base = eval(base, input, vars)?;
            let index = eval(index, input, vars)?;
            lookup(&base, &index)
        }
        Ast::Var(name) => vars
            .get(name)
            .cloned()
            .ok_or_else(|| Problem::expression(format!("unknown variable ${name}"))),
        Ast::Lit(value) => Ok(value.clone()),
        Ast::StrInterp(segments) => {
            let mut out = String::new();
            for segment in segments {
                match segment {
                    Segment::Literal(text) => out.push_str(text),
                    Segment::Expr(expr) => {
                        let value = eval(expr, input, vars)?;
                        out.push_str(&display(&value));
                    }
                }
            }
            Ok(Value::String(out))
        }
        Ast::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(eval(item, input, vars)?);
            }
            Ok(Value::Array(out))
        }
        Ast::Object(fields) => {
            let mut out = Map::new();
            for (key, expr) in fields {
                out.insert(key.clone(), eval(expr, input, vars)?);
            }
            Ok(Value::Object(out))
        }
        Ast::Neg(operand) => {
            let value = eval(operand, input, vars)?;
            match value.as_f64() {
                Some(n) => Ok(number(-n)),
                None => Err(type_error("negate", &value)),
            }
        }
        Ast::Not(operand) => {
            let value = eval(operand, input, vars)?;
            Ok(Value::Bool(!truthy(&value)))
        }
        Ast::Pipe(left, right) => {
            let intermediate = eval(left, input, vars)?;
            eval(right, &intermediate, vars)
        }
        Ast::If(arms, else_arm) => {
            for (cond, then) in arms {
                if truthy(&eval(cond, input, vars)?) {
                    return eval(then, input, vars);
                }
            }
            match else_arm {
                Some(else_arm) => eval(else_arm, input, vars),
                None => Ok(Value::Null),
            }
        }
        Ast::BinOp(op, left, right) => eval_binop(*op, left, right, input, vars),
        Ast::Call(name, args) => eval_call(name, args, input, vars),
    }
}

/// jq truthiness: only `null` and `false` are falsy.
pub fn truthy(value: &Value) -> bool {
    !matches!(value, Value::Null | Value::Bool(false))
}

/// Render a value for string interpolation: strings bare, the rest as
/// compact JSON.
pub fn display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

fn field(base: &Value, name: &str) -> Result<Value, Problem> {
    match base {
        Value::Object(map) => Ok(map.get(name).cloned().unwrap_or(Value::Null)),
        Value::Null => Ok(Value::Null),
        other => Err(Problem::expression(format!(
            "cannot access field '{name}' on {}",
            kind_of(other)
        ))),
    }
}

fn lookup(base: &Value, index: &Value) -> Result<Value, Problem> {
    match (base, index) {
        (Value::Array(items), Value::Number(n)) => {
            let idx = n
                .as_i64()
                .ok_or_else(|| Problem::expression("array index must be an integer"))?;
            let idx = if idx < 0 { items.len() as i64 + idx } else { idx };
            if idx < 0 {
                return Ok(Value::Null);
            }
            Ok(items.get(idx as usize).cloned().unwrap_or(Value::Null))
        }
        (Value::Object(map), Value::String(key)) => {
            Ok(map.get(key).cloned().unwrap_or(Value::Null))
        }
        (Value::Null, _) => Ok(Value::Null),
        (other, index) => Err(Problem::expression(format!(
            "cannot index {} with {}",
            kind_of(other),
            kind_of(index)
        ))),
    }
}

fn eval_binop(
    op: BinOp,
    left: &Ast,
    right: &Ast,
    input: &Value,
    vars: &Vars,
) -> Result<Value, Problem> {
    // Short-circuiting forms first.
    match op {
        BinOp::And => {
            let l = eval(left, input, vars)?;
            if !truthy(&l) {
                return Ok(Value::Bool(false));
            }
            let r = eval(right, input, vars)?;
            return Ok(Value::Bool(truthy(&r)));
        }
        BinOp::Or => {
            let l = eval(left, input, vars)?;
            if truthy(&l) {
                return Ok(Value::Bool(true));
            }
            let r = eval(right, input, vars)?;
            return Ok(Value::Bool(truthy(&r)));
        }
        BinOp::Alt => {
            // `a // b`: b when a is absent/falsy or fails to evaluate.
            let l = eval(left, input, vars);
            return match l {
                Ok(value) if truthy(&value) => Ok(value),
                _ => eval(right, input, vars),
            };
        }
        _ => {}
    }

    let l = eval(left, input, vars)?;
    let r = eval(right, input, vars)?;

    match op {
        BinOp::Add => add(&l, &r),
        BinOp::Sub => arithmetic(op, &l, &r),
        BinOp::Mul => arithmetic(op, &l, &r),
        BinOp::Div => arithmetic(op, &l, &r),
        BinOp::Mod => arithmetic(op, &l, &r),
        BinOp::Eq => Ok(Value::Bool(l == r)),
        BinOp::Ne => Ok(Value::Bool(l != r)),
        BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => compare(op, &l, &r),
        BinOp::And | BinOp::Or | BinOp::Alt => unreachable!("handled above"),
    }
}

/// `+` adds numbers, concatenates strings and arrays, merges objects.
fn add(l: &Value, r: &Value) -> Result<Value, Problem> {
    match (l, r) {
        (Value::Number(a), Value::Number(b)) => {
            Ok(number(a.as_f64().unwrap_or(0.0) + b.as_f64().unwrap_or(0.0)))
        }
        (Value::String(a), Value::String(b)) => Ok(Value::String(format!("{a}{b}"))),
        (Value::Array(a), Value::Array(b)) => {
            let mut out = a.clone();
            out.extend(b.iter().cloned());
            Ok(Value::Array(out))
        }
        (Value::Object(a), Value::Object(b)) => {
            let mut out = a.clone();
            for (k, v) in b {
                out.insert(k.clone(), v.clone());
            }
            Ok(Value::Object(out))
        }
        (Value::Null, other) | (other, Value::Null) => Ok(other.clone()),
        (l, r) => Err(Problem::expression(format!(
            "cannot add {} and {}",
            kind_of(l),
            kind_of(r)
        ))),
    }
}

fn arithmetic(op: BinOp, l: &Value, r: &Value) -> Result<Value, Problem> {
    let (Some(a), Some(b)) = (l.as_f64(), r.as_f64()) else {
        return Err(Problem::expression(format!(
            "arithmetic requires numbers, got {} and {}",
            kind_of(l),
            kind_of(r)
        )));
    };
    let result = match op {
        BinOp::Sub => a - b,
        BinOp::Mul => a * b,
        BinOp::Div => {
            if b == 0.0 {
                return Err(Problem::expression("division by zero"));
            }
            a / b
        }
        BinOp::Mod => {
            if b == 0.0 {
                return Err(Problem::expression("modulo by zero"));
            }
            (a as i64).rem_euclid(b as i64) as f64
        }
        _ => unreachable!(),
    };
    Ok(number(result))
}

fn compare(op: BinOp, l: &Value, r: &Value) -> Result<Value, Problem> {
    let ordering = match (l, r) {
        (Value::Number(a), Value::Number(b)) => a
            .as_f64()
            .unwrap_or(0.0)
            .partial_cmp(&b.as_f64().unwrap_or(0.0)),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (l, r) => {
            return Err(Problem::expression(format!(
                "cannot compare {} with {}",
                kind_of(l),
                kind_of(r)
            )));
        }
    };
    let Some(ordering) = ordering else {
        return Err(Problem::expression("incomparable numbers"));
    };
    let result = match op {
        BinOp::Lt => ordering.is_lt(),
        BinOp::Le => ordering.is_le(),
        BinOp::Gt => ordering.is_gt(),
        BinOp::Ge => ordering.is_ge(),
        _ => unreachable!(),
    };
    Ok(Value::Bool(result))
}

fn eval_call(name: &str, args: &[Ast], input: &Value, vars: &Vars) -> Result<Value, Problem> {
    match (name, args.len()) {
        ("length", 0) => match input {
            Value::Null => Ok(Value::from(0)),
            Value::String(s) => Ok(Value::from(s.chars().count())),
            Value::Array(items) => Ok(Value::from(items.len())),
            Value::Object(map) => Ok(Value::from(map.len())),
            other => Err(type_error("take length of", other)),
        },
        ("keys", 0) => match input {
            Value::Object(map) => {
                let mut keys: Vec<&String> = map.keys().collect();
                keys.sort();
                Ok(Value::Array(
                    keys.into_iter().map(|k| Value::String(k.clone())).collect(),
                ))
            }
            Value::Array(items) => Ok(Value::Array(
                (0..items.len()).map(Value::from).collect(),
            )),
            other => Err(type_error("take keys of", other)),
        },
        ("tostring", 0) => Ok(Value::String(display(input))),
        ("tonumber", 0) => match input {
            Value::Number(_) => Ok(input.clone()),
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .map(number)
                .map_err(|_| Problem::expression(format!("cannot parse '{s}' as number"))),
            other => Err(type_error("convert to number", other)),
        },
        ("not", 0) => Ok(Value::Bool(!truthy(input))),
        ("first", 0) => match input {
            Value::Array(items) => Ok(items.first().cloned().unwrap_or(Value::Null)),
            other => Err(type_error("take first of", other)),
        },
        ("last", 0) => match input {
            Value::Array(items) => Ok(items.last().cloned().unwrap_or(Value::Null)),
            other => Err(type_error("take last of", other)),
        },
        ("add", 0) => match input {
            Value::Array(items) => {
                let mut acc = Value::Null;
                for item in items {
                    acc = add(&acc, item)?;
                }
                Ok(acc)
            }
            other => Err(type_error("add elements of", other)),
        },
        ("join", 1) => {
            let sep = eval(&args[0], input, vars)?;
            let Value::String(sep) = sep else {
                return Err(type_error("join with", &sep));
            };
            let Value::Array(items) = input else {
                return Err(type_error("join", input));
            };
            let parts: Vec<String> = items.iter().map(display).collect();
            Ok(Value::String(parts.join(&sep)))
        }
        ("split", 1) => {
            let sep = eval(&args[0], input, vars)?;
            let (Value::String(s), Value::String(sep)) = (input, &sep) else {
                return Err(Problem::expression("split requires a string input and separator"));
            };
            Ok(Value::Array(
                s.split(sep.as_str())
                    .map(|part| Value::String(part.to_string()))
                    .collect(),
            ))
        }
        ("map", 1) => {
            let Value::Array(items) = input else {
                return Err(type_error("map over", input));
            };
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(eval(&args[0], item, vars)?);
            }
            Ok(Value::Array(out))
        }
        ("filter", 1) => {
            let Value::Array(items) = input else {
                return Err(type_error("filter", input));
            };
            let mut out = Vec::new();
            for item in items {
                if truthy(&eval(&args[0], item, vars)?) {
                    out.push(item.clone());
                }
            }
            Ok(Value::Array(out))
        }
        ("select", 1) => {
            if truthy(&eval(&args[0], input, vars)?) {
                Ok(input.clone())
            } else {
                Ok(Value::Null)
            }
        }
        ("contains", 1) => {
            let needle = eval(&args[0], input, vars)?;
            match (input, &needle) {
                (Value::String(s), Value::String(n)) => Ok(Value::Bool(s.contains(n.as_str()))),
                (Value::Array(items), needle) => Ok(Value::Bool(items.contains(needle))),
                (l, r) => Err(Problem::expression(format!(
                    "contains does not apply to {} and {}",
                    kind_of(l),
                    kind_of(r)
                ))),
            }
        }
        ("has", 1) => {
            let key = eval(&args[0], input, vars)?;
            match (input, &key) {
                (Value::Object(map), Value::String(k)) => Ok(Value::Bool(map.contains_key(k))),
                (Value::Array(items), Value::Number(n)) => {
                    let idx = n.as_u64().unwrap_or(u64::MAX);
                    Ok(Value::Bool((idx as usize) < items.len()))
                }
                (l, r) => Err(Problem::expression(format!(
                    "has does not apply to {} and {}",
                    kind_of(l),
                    kind_of(r)
                ))),
            }
        }
        ("ascii_downcase", 0) => match input {
            Value::String(s) => Ok(Value::String(s.to_lowercase())),
            other => Err(type_error("downcase", other)),
        },
        ("ascii_upcase", 0) => match input {
            Value::String(s) => Ok(Value::String(s.to_uppercase())),
            other => Err(type_error("upcase", other)),
        },
        (name, arity) => Err(Problem::expression(format!(
            "unknown function {name}/{arity}"
        ))),
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn type_error(action: &str, value: &Value) -> Problem {
    Problem::expression(format!("cannot {action} {}", kind_of(value)))
}
