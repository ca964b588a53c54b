//! `try`: enter a protected block
//!
//! The executor snapshots the block's entry data so a later retry re-runs
//! the block with what it originally saw, then descends into the first
//! protected task. Catch matching and retry scheduling live in the engine's
//! raise path, where the scope chain is walked.

use serde_json::Value;

use super::TaskOutcome;
use crate::engine::navigate;
use crate::instance::Instance;
use crate::model::TryTask;
use crate::position::{Position, Segment};

pub(crate) fn execute(
    instance: &mut Instance,
    position: &Position,
    task: &TryTask,
    input: Value,
) -> TaskOutcome {
    let body = position.child(&[Segment::Name("try".to_string())]);
    match navigate::first_task(&body, &task.try_) {
        Some(first) => {
            instance.context.scopes.insert(position.to_string(), input.clone());
            TaskOutcome::Descend { position: first, data: input }
        }
        None => TaskOutcome::completed(input),
    }
}
