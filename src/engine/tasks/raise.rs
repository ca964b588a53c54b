//! `raise`: construct a workflow error and throw it
//!
//! The error source is a bare name into `use.errors` or an inline
//! definition, optionally layered over a referenced base. Text fields may
//! carry runtime expressions evaluated against the task input.

use serde_json::Value;

use super::TaskOutcome;
use crate::error::{ErrorKind, WorkflowError};
use crate::expressions::{self, Vars};
use crate::instance::Instance;
use crate::model::{ErrorDefinition, ErrorSource, RaiseTask, WorkflowDefinition};

pub(crate) fn execute(
    instance: &Instance,
    definition: &WorkflowDefinition,
    task: &RaiseTask,
    input: Value,
) -> TaskOutcome {
    let resolved = match &task.raise.error {
        ErrorSource::Reference(name) => match definition.use_.errors.get(name) {
            Some(base) => base.clone(),
            None => return unknown_reference(name),
        },
        ErrorSource::Inline(inline) => match &inline.ref_ {
            Some(name) => match definition.use_.errors.get(name) {
                Some(base) => inline.merged_over(base),
                None => return unknown_reference(name),
            },
            None => inline.clone(),
        },
    };

    let vars = instance.context.expression_vars();
    // A failing field expression raises in place of the declared error.
    TaskOutcome::Raised(build(&resolved, &input, &vars).unwrap_or_else(|error| error))
}

fn build(
    resolved: &ErrorDefinition,
    input: &Value,
    vars: &Vars,
) -> std::result::Result<WorkflowError, WorkflowError> {
    let type_ = resolve_text(resolved.type_.as_deref(), input, vars)?
        .unwrap_or_else(|| ErrorKind::Runtime.uri());
    let title = resolve_text(resolved.title.as_deref(), input, vars)?
        .unwrap_or_else(|| ErrorKind::Runtime.title().to_string());
    let detail = resolve_text(resolved.detail.as_deref(), input, vars)?;
    Ok(WorkflowError {
        type_,
        status: resolved.status.unwrap_or_else(|| ErrorKind::Runtime.status()),
        instance: None,
        title,
        detail,
    })
}

fn resolve_text(
    text: Option<&str>,
    input: &Value,
    vars: &Vars,
) -> std::result::Result<Option<String>, WorkflowError> {
    let Some(text) = text else { return Ok(None) };
    let value = expressions::evaluate(text, input, vars)
        .map_err(|e| WorkflowError::new(ErrorKind::Expression, e.to_string()))?;
    Ok(Some(match value {
        Value::String(s) => s,
        other => other.to_string(),
    }))
}

fn unknown_reference(name: &str) -> TaskOutcome {
    TaskOutcome::Raised(WorkflowError::new(
        ErrorKind::Configuration,
        format!("unknown error reference '{name}'"),
    ))
}
