//! Task executors
//!
//! One module per task kind. An executor receives the task's transformed
//! input and reports what the cursor should do next through [`TaskOutcome`];
//! it never moves the cursor or persists anything itself.

use serde_json::Value;
use std::time::Duration as StdDuration;

use crate::engine::navigate;
use crate::engine::Engine;
use crate::error::{ErrorKind, WorkflowError};
use crate::instance::Instance;
use crate::model::{FlowDirective, TaskCommon, TaskDefinition, TaskList, WorkflowDefinition};
use crate::outbox::OutboxRecord;
use crate::position::{Position, Segment};

pub(crate) mod call;
pub(crate) mod emit;
pub(crate) mod for_loop;
pub(crate) mod fork;
pub(crate) mod listen;
pub(crate) mod raise;
pub(crate) mod set;
pub(crate) mod switch;
pub(crate) mod try_catch;
pub(crate) mod wait;

/// What a task executor decided.
#[derive(Debug)]
pub(crate) enum TaskOutcome {
    /// The task produced an output; run its output/export pipelines and
    /// route per `directive` (or its `then`).
    Completed { output: Value, directive: Option<FlowDirective>, outbox: Vec<OutboxRecord> },
    /// Enter a child scope: move the cursor there with `data` flowing in.
    Descend { position: Position, data: Value },
    /// Persist the wait record and stop stepping.
    Suspend(Box<crate::correlation::WaitRecord>),
    /// A workflow error to send through the try/catch machinery.
    Raised(WorkflowError),
}

impl TaskOutcome {
    pub(crate) fn completed(output: Value) -> Self {
        TaskOutcome::Completed { output, directive: None, outbox: Vec::new() }
    }
}

pub(crate) async fn execute(
    engine: &Engine,
    instance: &mut Instance,
    definition: &WorkflowDefinition,
    position: &Position,
    task: &TaskDefinition,
    input: Value,
) -> TaskOutcome {
    match task {
        TaskDefinition::Set(t) => set::execute(instance, t, input),
        TaskDefinition::Switch(t) => switch::execute(instance, t, input),
        TaskDefinition::Do(t) => descend(position, &t.do_, input),
        TaskDefinition::For(t) => for_loop::execute(instance, position, t, input),
        TaskDefinition::Try(t) => try_catch::execute(instance, position, t, input),
        TaskDefinition::Fork(t) => fork::execute(engine, instance, position, t, input).await,
        TaskDefinition::Raise(t) => raise::execute(instance, definition, t, input),
        TaskDefinition::Call(t) => call::execute(engine, instance, t, input).await,
        TaskDefinition::Emit(t) => emit::execute(instance, t, input),
        TaskDefinition::Listen(t) => listen::execute(instance, position, t, input),
        TaskDefinition::Wait(t) => wait::execute(instance, position, t, input),
    }
}

/// Enter a `do` group: cursor onto the first subtask, or pass the input
/// through when the group is empty.
fn descend(position: &Position, list: &TaskList, input: Value) -> TaskOutcome {
    let body = position.child(&[Segment::Name("do".to_string())]);
    match navigate::first_task(&body, list) {
        Some(first) => TaskOutcome::Descend { position: first, data: input },
        None => TaskOutcome::completed(input),
    }
}

/// Resolve the task's timeout clause to a concrete duration.
pub(crate) fn task_timeout(
    common: &TaskCommon,
) -> std::result::Result<Option<StdDuration>, WorkflowError> {
    match &common.timeout {
        Some(timeout) => timeout
            .after
            .to_std()
            .map(Some)
            .map_err(|e| WorkflowError::new(ErrorKind::Validation, e.to_string())),
        None => Ok(None),
    }
}

/// The fallback continuation of a timeout clause, if declared.
pub(crate) fn timeout_fallback(common: &TaskCommon) -> Option<FlowDirective> {
    common.timeout.as_ref().and_then(|timeout| timeout.then.clone())
}
