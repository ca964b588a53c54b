//! `switch`: first matching case routes via its own `then`
//!
//! A case without `when` is the default. With no match at all the data
//! passes through and flow continues sequentially.

use serde_json::Value;

use super::TaskOutcome;
use crate::error::{ErrorKind, WorkflowError};
use crate::expressions;
use crate::instance::Instance;
use crate::model::SwitchTask;

pub(crate) fn execute(instance: &Instance, task: &SwitchTask, input: Value) -> TaskOutcome {
    let vars = instance.context.expression_vars();
    for (_, case) in task.switch.iter() {
        let matched = match &case.when {
            None => true,
            Some(when) => match expressions::evaluate_raw(when, &input, &vars) {
                Ok(value) => expressions::truthy(&value),
                Err(e) => {
                    return TaskOutcome::Raised(WorkflowError::new(
                        ErrorKind::Expression,
                        e.to_string(),
                    ));
                }
            },
        };
        if matched {
            return TaskOutcome::Completed {
                output: input,
                directive: Some(case.then.clone()),
                outbox: Vec::new(),
            };
        }
    }
    TaskOutcome::completed(input)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FlowDirective;
    use serde_json::json;

    fn run(input: Value) -> TaskOutcome {
        let task: SwitchTask = serde_yaml::from_str(
            r#"
switch:
  - high:
      when: '.amount > 100'
      then: review
  - low:
      when: '.amount > 0'
      then: approve
  - fallback:
      then: reject
"#,
        )
        .expect("task parses");
        let instance = Instance::new("test/switch/0.1.0", input.clone());
        execute(&instance, &task, input)
    }

    #[test]
    fn test_first_matching_case_wins() {
        match run(json!({"amount": 500})) {
            TaskOutcome::Completed { directive, .. } => {
                assert_eq!(directive, Some(FlowDirective::Task("review".to_string())));
            }
            other => panic!("expected completed, got {other:?}"),
        }
    }

    #[test]
    fn test_later_case_matches_when_earlier_do_not() {
        match run(json!({"amount": 10})) {
            TaskOutcome::Completed { directive, .. } => {
                assert_eq!(directive, Some(FlowDirective::Task("approve".to_string())));
            }
            other => panic!("expected completed, got {other:?}"),
        }
    }

    #[test]
    fn test_case_without_when_is_default() {
        match run(json!({"amount": -5})) {
            TaskOutcome::Completed { directive, .. } => {
                assert_eq!(directive, Some(FlowDirective::Task("reject".to_string())));
            }
            other => panic!("expected completed, got {other:?}"),
        }
    }

    #[test]
    fn test_no_match_passes_through() {
        let task: SwitchTask = serde_yaml::from_str(
            "switch:\n  - impossible:\n      when: 'false'\n      then: end",
        )
        .expect("task parses");
        let instance = Instance::new("test/switch/0.1.0", json!({}));
        match execute(&instance, &task, json!({"kept": true})) {
            TaskOutcome::Completed { output, directive, .. } => {
                assert_eq!(output, json!({"kept": true}));
                assert_eq!(directive, None);
            }
            other => panic!("expected completed, got {other:?}"),
        }
    }
}
