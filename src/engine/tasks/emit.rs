//! `emit`: publish an event through the durable outbox
//!
//! The executor only produces the outbox record; it is persisted atomically
//! with the instance snapshot and handed to the bus by the dispatcher. The
//! resolved attributes become the task's output.

use serde_json::Value;

use super::TaskOutcome;
use crate::error::{ErrorKind, WorkflowError};
use crate::expressions;
use crate::instance::Instance;
use crate::model::EmitTask;
use crate::outbox::OutboxRecord;

pub(crate) fn execute(instance: &Instance, task: &EmitTask, input: Value) -> TaskOutcome {
    let vars = instance.context.expression_vars();
    let template = Value::Object(
        task.emit.event.with.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
    );
    match expressions::evaluate_template(&template, &input, &vars) {
        Ok(attributes) => {
            let record = OutboxRecord::new(instance.id, attributes.clone());
            TaskOutcome::Completed {
                output: attributes,
                directive: None,
                outbox: vec![record],
            }
        }
        Err(e) => TaskOutcome::Raised(WorkflowError::new(ErrorKind::Expression, e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outbox::OutboxStatus;
    use serde_json::json;

    #[test]
    fn test_produces_pending_outbox_record() {
        let task: EmitTask = serde_yaml::from_str(
            r#"
emit:
  event:
    with:
      type: order.shipped
      order: '${ .id }'
"#,
        )
        .expect("task parses");
        let instance = Instance::new("test/emit/0.1.0", json!({}));
        match execute(&instance, &task, json!({"id": "o-1"})) {
            TaskOutcome::Completed { output, outbox, .. } => {
                assert_eq!(output, json!({"type": "order.shipped", "order": "o-1"}));
                assert_eq!(outbox.len(), 1);
                assert_eq!(outbox[0].status, OutboxStatus::Pending);
                assert_eq!(outbox[0].instance_id, instance.id);
                assert_eq!(outbox[0].event, output);
            }
            other => panic!("expected completed, got {other:?}"),
        }
    }
}
