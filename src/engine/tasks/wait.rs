//! `wait`: suspend for a duration
//!
//! The deadline is absolute and persisted, so a restart mid-wait resumes on
//! schedule. On wake the task completes with its input.

use chrono::Utc;
use serde_json::Value;

use super::TaskOutcome;
use crate::correlation::WaitRecord;
use crate::error::{ErrorKind, WorkflowError};
use crate::instance::Instance;
use crate::model::WaitTask;
use crate::position::Position;

pub(crate) fn execute(
    instance: &Instance,
    position: &Position,
    task: &WaitTask,
    _input: Value,
) -> TaskOutcome {
    match task.wait.to_std() {
        Ok(duration) => {
            let wake_at = Utc::now()
                + chrono::Duration::milliseconds(
                    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX),
                );
            TaskOutcome::Suspend(Box::new(WaitRecord::timer(
                instance.id,
                position.clone(),
                wake_at,
            )))
        }
        Err(e) => TaskOutcome::Raised(WorkflowError::new(ErrorKind::Validation, e.to_string())),
    }
}
