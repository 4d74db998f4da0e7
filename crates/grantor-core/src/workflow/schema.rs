//! Minimal structural schema validation for task `input`/`output`/`export`.
//!
//! Supports the subset workflow documents actually use: `type`, `required`,
//! `properties`, `items` and `enum`. Violations are `validation` problems.

use grantor_types::error::Problem;
use serde_json::Value;

pub fn validate_schema(schema: &Value, value: &Value, location: &str) -> Result<(), Problem> {
    let Value::Object(schema) = schema else {
        return Err(Problem::validation(format!(
            "{location}: schema must be an object"
        )));
    };

    if let Some(expected) = schema.get("type") {
        check_type(expected, value, location)?;
    }

    if let Some(options) = schema.get("enum").and_then(Value::as_array) {
        if !options.contains(value) {
            return Err(Problem::validation(format!(
                "{location}: value is not one of the allowed enum options"
            )));
        }
    }

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        let Value::Object(map) = value else {
            return Err(Problem::validation(format!(
                "{location}: required properties apply to objects only"
            )));
        };
        for name in required.iter().filter_map(Value::as_str) {
            if !map.contains_key(name) {
                return Err(Problem::validation(format!(
                    "{location}: missing required property '{name}'"
                )));
            }
        }
    }

    if let Some(properties) = schema.get("properties").and_then(Value::as_object) {
        if let Value::Object(map) = value {
            for (name, sub_schema) in properties {
                if let Some(sub_value) = map.get(name) {
                    validate_schema(sub_schema, sub_value, &format!("{location}.{name}"))?;
                }
            }
        }
    }

    if let Some(items) = schema.get("items") {
        if let Value::Array(array) = value {
            for (idx, item) in array.iter().enumerate() {
                validate_schema(items, item, &format!("{location}[{idx}]"))?;
            }
        }
    }

    Ok(())
}

fn check_type(expected: &Value, value: &Value, location: &str) -> Result<(), Problem> {
    let accepted: Vec<&str> = match expected {
        Value::String(s) => vec![s.as_str()],
        Value::Array(options) => options.iter().filter_map(Value::as_str).collect(),
        _ => {
            return Err(Problem::validation(format!(
                "{location}: schema 'type' must be a string or array"
            )));
        }
    };

    let matches = accepted.iter().any(|t| match *t {
        "null" => value.is_null(),
        "boolean" => value.is_boolean(),
        "number" => value.is_number(),
        "integer" => value.as_i64().is_some() || value.as_u64().is_some(),
        "string" => value.is_string(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        _ => false,
    });

    if !matches {
        return Err(Problem::validation(format!(
            "{location}: expected type {}, got {}",
            accepted.join(" | "),
            kind_of(value)
        )));
    }
    Ok(())
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
