//! `call`: dispatch through the connector registry
//!
//! Arguments come from the `with` template (or the raw input when absent).
//! A connector failure is a workflow error the surrounding try/catch
//! machinery can handle; a timeout takes the declared fallback route or
//! raises Timeout.

use serde_json::Value;

use super::TaskOutcome;
use crate::engine::Engine;
use crate::error::{ErrorKind, WorkflowError};
use crate::expressions;
use crate::instance::Instance;
use crate::model::CallTask;

pub(crate) async fn execute(
    engine: &Engine,
    instance: &Instance,
    task: &CallTask,
    input: Value,
) -> TaskOutcome {
    let Some(connector) = engine.connectors().get(&task.call) else {
        return TaskOutcome::Raised(WorkflowError::new(
            ErrorKind::Configuration,
            format!("unknown call target '{}'", task.call),
        ));
    };

    let vars = instance.context.expression_vars();
    let args = match &task.with {
        Some(with) => {
            let template =
                Value::Object(with.iter().map(|(k, v)| (k.clone(), v.clone())).collect());
            match expressions::evaluate_template(&template, &input, &vars) {
                Ok(args) => args,
                Err(e) => {
                    return TaskOutcome::Raised(WorkflowError::new(
                        ErrorKind::Expression,
                        e.to_string(),
                    ));
                }
            }
        }
        None => input.clone(),
    };

    let timeout = match super::task_timeout(&task.common) {
        Ok(timeout) => timeout,
        Err(e) => return TaskOutcome::Raised(e),
    };
    let invocation = connector.invoke(args);
    let result = match timeout {
        Some(after) => match tokio::time::timeout(after, invocation).await {
            Ok(result) => result,
            Err(_) => {
                return match super::timeout_fallback(&task.common) {
                    Some(directive) => TaskOutcome::Completed {
                        output: input,
                        directive: Some(directive),
                        outbox: Vec::new(),
                    },
                    None => TaskOutcome::Raised(WorkflowError::new(
                        ErrorKind::Timeout,
                        format!("call '{}' timed out", task.call),
                    )),
                };
            }
        },
        None => invocation.await,
    };

    match result {
        Ok(output) => TaskOutcome::completed(output),
        Err(error) => TaskOutcome::Raised(error),
    }
}
