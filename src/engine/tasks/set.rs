//! `set`: compute a value into the data flow
//!
//! A map form evaluates each entry as a template and merges the result over
//! the (object) input, so earlier tasks' fields survive unless shadowed. An
//! expression form replaces the data outright.

use serde_json::Value;

use super::TaskOutcome;
use crate::error::{ErrorKind, WorkflowError};
use crate::expressions;
use crate::instance::Instance;
use crate::model::{SetTask, SetValue};

pub(crate) fn execute(instance: &Instance, task: &SetTask, input: Value) -> TaskOutcome {
    let vars = instance.context.expression_vars();
    match &task.set {
        SetValue::Expression(expression) => {
            match expressions::evaluate_raw(expression, &input, &vars) {
                Ok(value) => TaskOutcome::completed(value),
                Err(e) => {
                    TaskOutcome::Raised(WorkflowError::new(ErrorKind::Expression, e.to_string()))
                }
            }
        }
        SetValue::Map(map) => {
            let template =
                Value::Object(map.iter().map(|(k, v)| (k.clone(), v.clone())).collect());
            match expressions::evaluate_template(&template, &input, &vars) {
                Ok(Value::Object(computed)) => {
                    let mut merged = match input {
                        Value::Object(existing) => existing,
                        _ => serde_json::Map::new(),
                    };
                    for (key, value) in computed {
                        merged.insert(key, value);
                    }
                    TaskOutcome::completed(Value::Object(merged))
                }
                Ok(other) => TaskOutcome::completed(other),
                Err(e) => {
                    TaskOutcome::Raised(WorkflowError::new(ErrorKind::Expression, e.to_string()))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn run(yaml: &str, input: Value) -> TaskOutcome {
        let task: SetTask = serde_yaml::from_str(yaml).expect("task parses");
        let instance = Instance::new("test/set/0.1.0", input.clone());
        execute(&instance, &task, input)
    }

    #[test]
    fn test_map_merges_over_object_input() {
        let outcome = run("set:\n  y: 2", json!({"x": 1}));
        match outcome {
            TaskOutcome::Completed { output, .. } => {
                assert_eq!(output, json!({"x": 1, "y": 2}));
            }
            other => panic!("expected completed, got {other:?}"),
        }
    }

    #[test]
    fn test_map_entries_may_be_expressions() {
        let outcome = run("set:\n  doubled: '${ .x * 2 }'", json!({"x": 21}));
        match outcome {
            TaskOutcome::Completed { output, .. } => {
                assert_eq!(output["doubled"], 42);
                assert_eq!(output["x"], 21);
            }
            other => panic!("expected completed, got {other:?}"),
        }
    }

    #[test]
    fn test_expression_form_replaces_data() {
        let outcome = run("set: '${ { total: .x } }'", json!({"x": 7, "noise": true}));
        match outcome {
            TaskOutcome::Completed { output, .. } => {
                assert_eq!(output, json!({"total": 7}));
            }
            other => panic!("expected completed, got {other:?}"),
        }
    }

    #[test]
    fn test_non_object_input_is_discarded_by_map_form() {
        let outcome = run("set:\n  x: 1", json!([1, 2, 3]));
        match outcome {
            TaskOutcome::Completed { output, .. } => assert_eq!(output, json!({"x": 1})),
            other => panic!("expected completed, got {other:?}"),
        }
    }

    #[test]
    fn test_bad_expression_raises() {
        let outcome = run("set: '${ .x | nosuchfn }'", json!({}));
        assert!(matches!(outcome, TaskOutcome::Raised(_)));
    }
}
