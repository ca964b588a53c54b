//! `listen`: suspend until correlated events arrive
//!
//! Equality attributes are resolved to literals now, against the task input,
//! so the persisted record matches without the instance context. `when` and
//! fan-in predicates stay as expressions over the incoming events.

use chrono::Utc;
use indexmap::IndexMap;
use serde_json::Value;

use super::TaskOutcome;
use crate::correlation::{ListenMode, ListenWait, Subscription, WaitRecord};
use crate::error::{ErrorKind, WorkflowError};
use crate::expressions;
use crate::instance::Instance;
use crate::model::{EventFilter, ListenTask};
use crate::position::Position;

pub(crate) fn execute(
    instance: &Instance,
    position: &Position,
    task: &ListenTask,
    input: Value,
) -> TaskOutcome {
    let to = &task.listen.to;
    let (mode, filters): (ListenMode, Vec<(String, &EventFilter)>) = if let Some(one) = &to.one {
        (ListenMode::One, vec![("event".to_string(), one)])
    } else if let Some(all) = &to.all {
        (ListenMode::All, all.iter().map(|(name, filter)| (name.to_string(), filter)).collect())
    } else if let Some(any) = &to.any {
        (ListenMode::Any, any.iter().map(|(name, filter)| (name.to_string(), filter)).collect())
    } else {
        return TaskOutcome::Raised(WorkflowError::new(
            ErrorKind::Configuration,
            "listen.to requires one of 'one', 'all' or 'any'",
        ));
    };

    let vars = instance.context.expression_vars();
    let mut subscriptions = Vec::with_capacity(filters.len());
    for (name, filter) in filters {
        let mut with = IndexMap::new();
        for (key, value) in &filter.with {
            let resolved = match value {
                Value::String(text) => match expressions::evaluate(text, &input, &vars) {
                    Ok(resolved) => resolved,
                    Err(e) => {
                        return TaskOutcome::Raised(WorkflowError::new(
                            ErrorKind::Expression,
                            e.to_string(),
                        ));
                    }
                },
                other => other.clone(),
            };
            with.insert(key.clone(), resolved);
        }
        subscriptions.push(Subscription { name, with, when: filter.when.clone() });
    }

    let deadline = match super::task_timeout(&task.common) {
        Ok(Some(after)) => Some(
            Utc::now()
                + chrono::Duration::milliseconds(
                    i64::try_from(after.as_millis()).unwrap_or(i64::MAX),
                ),
        ),
        Ok(None) => None,
        Err(e) => return TaskOutcome::Raised(e),
    };

    let listen = ListenWait {
        mode,
        subscriptions,
        amount: to.amount,
        until: to.until.clone(),
        while_: to.while_.clone(),
        timeout_then: super::timeout_fallback(&task.common),
        matched: IndexMap::new(),
    };
    TaskOutcome::Suspend(Box::new(WaitRecord::listen(
        instance.id,
        position.clone(),
        listen,
        deadline,
    )))
}
