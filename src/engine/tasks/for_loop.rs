//! `for`: iterate a collection one iteration at a time
//!
//! The executor only sets up iteration zero; advancing to the next item
//! happens when an iteration body runs off its end and the engine classifies
//! the scope as a loop body. Items are snapshotted into the context so a
//! resumed instance iterates the same collection it started with.

use serde_json::Value;

use super::TaskOutcome;
use crate::context::LoopFrame;
use crate::engine::navigate;
use crate::error::{ErrorKind, WorkflowError};
use crate::expressions;
use crate::instance::Instance;
use crate::model::ForTask;
use crate::position::{Position, Segment};

pub(crate) fn execute(
    instance: &mut Instance,
    position: &Position,
    task: &ForTask,
    input: Value,
) -> TaskOutcome {
    let vars = instance.context.expression_vars();
    let items = match expressions::evaluate_raw(&task.for_.in_, &input, &vars) {
        Ok(Value::Array(items)) => items,
        Ok(_) => {
            return TaskOutcome::Raised(WorkflowError::new(
                ErrorKind::Validation,
                "for.in must evaluate to an array",
            ));
        }
        Err(e) => {
            return TaskOutcome::Raised(WorkflowError::new(ErrorKind::Expression, e.to_string()));
        }
    };
    if items.is_empty() {
        return TaskOutcome::completed(input);
    }

    let each = task.for_.each.clone().unwrap_or_else(|| "item".to_string());
    let at = task.for_.at.clone().unwrap_or_else(|| "index".to_string());
    instance.context.loops.insert(position.to_string(), LoopFrame { items: items.clone() });
    instance.context.bind_var(each, items[0].clone());
    instance.context.bind_var(at, Value::from(0));

    if let Some(while_) = &task.while_ {
        let vars = instance.context.expression_vars();
        match expressions::evaluate_raw(while_, &input, &vars) {
            Ok(keep) if !expressions::truthy(&keep) => return TaskOutcome::completed(input),
            Ok(_) => {}
            Err(e) => {
                return TaskOutcome::Raised(WorkflowError::new(
                    ErrorKind::Expression,
                    e.to_string(),
                ));
            }
        }
    }

    let body = position.child(&[
        Segment::Name("for".to_string()),
        Segment::Index(0),
        Segment::Name("do".to_string()),
    ]);
    match navigate::first_task(&body, &task.do_) {
        Some(first) => TaskOutcome::Descend { position: first, data: input },
        None => TaskOutcome::completed(input),
    }
}
