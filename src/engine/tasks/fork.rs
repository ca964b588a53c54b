//! `fork`: run named branches concurrently within one step
//!
//! Each branch is a sub-cursor over a clone of the instance; waits inside a
//! branch are serviced inline against the live bus. Branch exports merge
//! into the parent context in completion order. In compete mode the first
//! branch to finish wins and the rest are dropped.

use futures::stream::FuturesUnordered;
use futures::StreamExt;
use serde_json::Value;

use super::TaskOutcome;
use crate::engine::Engine;
use crate::error::{ErrorKind, WorkflowError};
use crate::instance::{Instance, InstanceStatus};
use crate::model::{ForkOutputPolicy, ForkTask};
use crate::outbox::OutboxRecord;
use crate::position::{Position, Segment};

pub(crate) async fn execute(
    engine: &Engine,
    instance: &mut Instance,
    position: &Position,
    task: &ForkTask,
    input: Value,
) -> TaskOutcome {
    if task.fork.branches.is_empty() {
        return TaskOutcome::completed(input);
    }
    let deadline = match super::task_timeout(&task.common) {
        Ok(deadline) => deadline,
        Err(e) => return TaskOutcome::Raised(e),
    };

    let branches_position = position.child(&[
        Segment::Name("fork".to_string()),
        Segment::Name("branches".to_string()),
    ]);
    let compete = task.fork.compete;

    let mut running = FuturesUnordered::new();
    for (index, (name, _)) in task.fork.branches.entries.iter().enumerate() {
        let mut branch = instance.clone();
        branch.position = branches_position.task(index, name);
        branch.status = InstanceStatus::Running;
        branch.context.data = input.clone();
        let engine = engine.clone();
        let name = name.clone();
        running.push(async move {
            let (branch, result, outbox) = engine.run_branch(branch).await;
            (name, branch, result, outbox)
        });
    }

    let collect = async {
        let mut outputs: Vec<(String, Value)> = Vec::new();
        let mut contexts: Vec<Value> = Vec::new();
        let mut outbox: Vec<OutboxRecord> = Vec::new();
        while let Some((name, branch, result, branch_outbox)) = running.next().await {
            outbox.extend(branch_outbox);
            match result {
                Ok(output) => {
                    contexts.push(branch.context.context.clone());
                    outputs.push((name, output));
                    if compete {
                        break;
                    }
                }
                Err(error) => return Err(error),
            }
        }
        Ok((outputs, contexts, outbox))
    };

    let collected = match deadline {
        Some(after) => match tokio::time::timeout(after, collect).await {
            Ok(collected) => collected,
            Err(_) => {
                return match super::timeout_fallback(&task.common) {
                    Some(directive) => TaskOutcome::Completed {
                        output: input,
                        directive: Some(directive),
                        outbox: Vec::new(),
                    },
                    None => TaskOutcome::Raised(WorkflowError::new(
                        ErrorKind::Timeout,
                        "fork timed out before its branches completed",
                    )),
                };
            }
        },
        None => collect.await,
    };
    let (outputs, contexts, outbox) = match collected {
        Ok(collected) => collected,
        Err(error) => return TaskOutcome::Raised(error),
    };

    // Completion order: a later-finishing branch overwrites shared keys.
    for context in contexts {
        instance.context.export(context);
    }

    let output = fold_outputs(task, compete, &outputs);
    TaskOutcome::Completed { output, directive: None, outbox }
}

fn fold_outputs(task: &ForkTask, compete: bool, outputs: &[(String, Value)]) -> Value {
    if compete || task.fork.output == ForkOutputPolicy::First {
        return outputs.first().map(|(_, value)| value.clone()).unwrap_or(Value::Null);
    }
    if task.fork.output == ForkOutputPolicy::Last {
        return outputs.last().map(|(_, value)| value.clone()).unwrap_or(Value::Null);
    }
    // Merge: keyed by branch name, in declaration order.
    let mut merged = serde_json::Map::new();
    for (name, _) in task.fork.branches.iter() {
        if let Some((_, value)) = outputs.iter().find(|(entry, _)| entry == name) {
            merged.insert(name.to_string(), value.clone());
        }
    }
    Value::Object(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fork_task(yaml: &str) -> ForkTask {
        serde_yaml::from_str(yaml).expect("task parses")
    }

    #[test]
    fn test_merge_folds_in_declaration_order() {
        let task = fork_task(
            r#"
fork:
  branches:
    - alpha:
        set: { a: 1 }
    - beta:
        set: { b: 2 }
"#,
        );
        let outputs = vec![
            ("beta".to_string(), json!({"b": 2})),
            ("alpha".to_string(), json!({"a": 1})),
        ];
        let folded = fold_outputs(&task, false, &outputs);
        let keys: Vec<&String> = folded.as_object().unwrap().keys().collect();
        assert_eq!(keys, vec!["alpha", "beta"]);
    }

    #[test]
    fn test_compete_takes_first_completion() {
        let task = fork_task(
            r#"
fork:
  compete: true
  branches:
    - fast:
        set: { winner: fast }
    - slow:
        set: { winner: slow }
"#,
        );
        let outputs = vec![("slow".to_string(), json!({"winner": "slow"}))];
        assert_eq!(fold_outputs(&task, true, &outputs), json!({"winner": "slow"}));
    }

    #[test]
    fn test_last_policy_takes_final_completion() {
        let task = fork_task(
            r#"
fork:
  output: last
  branches:
    - a:
        set: { v: 1 }
    - b:
        set: { v: 2 }
"#,
        );
        let outputs = vec![
            ("a".to_string(), json!({"v": 1})),
            ("b".to_string(), json!({"v": 2})),
        ];
        assert_eq!(fold_outputs(&task, false, &outputs), json!({"v": 2}));
    }
}
