//! Minimal structural schema validation for task input/output declarations
//!
//! Supports the subset of JSON Schema the DSL uses in practice: `type`,
//! `required`, `properties`, `items`, `enum` and `const`. Violations are
//! reported with the offending value path so they can be wrapped into a
//! `Validation` workflow error at the raising position.

use serde_json::Value;
use snafu::prelude::*;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Schema violation at {path}: {message}"))]
    Violation { path: String, message: String },

    #[snafu(display("Malformed schema at {path}: {message}"))]
    MalformedSchema { path: String, message: String },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Validate `value` against `schema`. An empty schema accepts everything.
pub fn validate(schema: &Value, value: &Value) -> Result<()> {
    validate_at(schema, value, "")
}

fn validate_at(schema: &Value, value: &Value, path: &str) -> Result<()> {
    let Some(schema) = schema.as_object() else {
        // Boolean schemas: `true` accepts, `false` rejects.
        return match schema {
            Value::Bool(true) => Ok(()),
            Value::Bool(false) => {
                ViolationSnafu { path: display_path(path), message: "schema rejects all values" }.fail()
            }
            _ => MalformedSchemaSnafu {
                path: display_path(path),
                message: "schema must be an object or boolean",
            }
            .fail(),
        };
    };

    if let Some(expected) = schema.get("type") {
        check_type(expected, value, path)?;
    }

    if let Some(constant) = schema.get("const") {
        if value != constant {
            return ViolationSnafu {
                path: display_path(path),
                message: format!("expected constant {constant}"),
            }
            .fail();
        }
    }

    if let Some(allowed) = schema.get("enum").and_then(Value::as_array) {
        if !allowed.contains(value) {
            return ViolationSnafu {
                path: display_path(path),
                message: format!("value not in enum {allowed:?}"),
            }
            .fail();
        }
    }

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        let object = value.as_object();
        for key in required.iter().filter_map(Value::as_str) {
            if object.is_none_or(|obj| !obj.contains_key(key)) {
                return ViolationSnafu {
                    path: display_path(path),
                    message: format!("missing required property '{key}'"),
                }
                .fail();
            }
        }
    }

    if let Some(properties) = schema.get("properties").and_then(Value::as_object) {
        if let Some(object) = value.as_object() {
            for (key, prop_schema) in properties {
                if let Some(prop_value) = object.get(key) {
                    validate_at(prop_schema, prop_value, &format!("{path}/{key}"))?;
                }
            }
        }
    }

    if let Some(item_schema) = schema.get("items") {
        if let Some(items) = value.as_array() {
            for (index, item) in items.iter().enumerate() {
                validate_at(item_schema, item, &format!("{path}/{index}"))?;
            }
        }
    }

    Ok(())
}

fn check_type(expected: &Value, value: &Value, path: &str) -> Result<()> {
    let names: Vec<&str> = match expected {
        Value::String(s) => vec![s.as_str()],
        Value::Array(options) => options.iter().filter_map(Value::as_str).collect(),
        _ => {
            return MalformedSchemaSnafu {
                path: display_path(path),
                message: "'type' must be a string or array of strings",
            }
            .fail()
        }
    };

    let matches = names.iter().any(|name| match *name {
        "object" => value.is_object(),
        "array" => value.is_array(),
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "null" => value.is_null(),
        _ => false,
    });

    if matches {
        Ok(())
    } else {
        ViolationSnafu {
            path: display_path(path),
            message: format!("expected type {names:?}"),
        }
        .fail()
    }
}

fn display_path(path: &str) -> String {
    if path.is_empty() {
        "/".to_string()
    } else {
        path.to_string()
    }
}
