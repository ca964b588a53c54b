//! Definition-load-time validation
//!
//! Everything that can fail fast does: unknown `then` targets, duplicate
//! task names in a scope, dangling error/retry references and malformed
//! listen clauses are Configuration errors surfaced at registration, never
//! at execution.

use snafu::prelude::*;
use std::collections::HashSet;

use crate::model::{
    CatchClause, FlowDirective, ListenTo, RetryPolicyOrRef, TaskDefinition, TaskList,
    WorkflowDefinition,
};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Configuration error in scope {scope}: {message}"))]
    Configuration { scope: String, message: String },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Validate a parsed definition before registration.
pub fn validate(definition: &WorkflowDefinition) -> Result<()> {
    validate_scope(definition, &definition.do_, "/do")
}

fn validate_scope(definition: &WorkflowDefinition, tasks: &TaskList, scope: &str) -> Result<()> {
    let mut names = HashSet::new();
    for (name, _) in tasks.iter() {
        if !names.insert(name) {
            return ConfigurationSnafu {
                scope,
                message: format!("duplicate task name '{name}'"),
            }
            .fail();
        }
    }

    for (index, (name, task)) in tasks.entries.iter().enumerate() {
        let task_scope = format!("{scope}/{index}/{name}");

        if let Some(directive) = &task.common().then {
            check_directive(tasks, directive, &task_scope)?;
        }
        if let Some(timeout) = &task.common().timeout {
            if let Some(directive) = &timeout.then {
                check_directive(tasks, directive, &task_scope)?;
            }
        }

        match task {
            TaskDefinition::Do(do_task) => {
                validate_scope(definition, &do_task.do_, &format!("{task_scope}/do"))?;
            }
            TaskDefinition::For(for_task) => {
                validate_scope(definition, &for_task.do_, &format!("{task_scope}/do"))?;
            }
            TaskDefinition::Fork(fork_task) => {
                validate_scope(
                    definition,
                    &fork_task.fork.branches,
                    &format!("{task_scope}/fork/branches"),
                )?;
            }
            TaskDefinition::Try(try_task) => {
                validate_scope(definition, &try_task.try_, &format!("{task_scope}/try"))?;
                validate_catch(definition, &try_task.catch, &task_scope)?;
            }
            TaskDefinition::Switch(switch_task) => {
                for (case_name, case) in switch_task.switch.iter() {
                    check_directive(tasks, &case.then, &format!("{task_scope}/switch/{case_name}"))?;
                }
            }
            TaskDefinition::Raise(raise_task) => {
                let reference = match &raise_task.raise.error {
                    crate::model::ErrorSource::Reference(reference) => Some(reference),
                    crate::model::ErrorSource::Inline(inline) => inline.ref_.as_ref(),
                };
                if let Some(reference) = reference {
                    if !definition.use_.errors.contains_key(reference) {
                        return ConfigurationSnafu {
                            scope: task_scope,
                            message: format!("unknown error reference '{reference}'"),
                        }
                        .fail();
                    }
                }
            }
            TaskDefinition::Listen(listen_task) => {
                validate_listen(&listen_task.listen.to, &task_scope)?;
            }
            TaskDefinition::Set(_)
            | TaskDefinition::Call(_)
            | TaskDefinition::Emit(_)
            | TaskDefinition::Wait(_) => {}
        }
    }

    Ok(())
}

fn validate_catch(
    definition: &WorkflowDefinition,
    catch: &CatchClause,
    scope: &str,
) -> Result<()> {
    if let Some(RetryPolicyOrRef::Reference(reference)) = &catch.retry {
        if !definition.use_.retries.contains_key(reference) {
            return ConfigurationSnafu {
                scope,
                message: format!("unknown retry reference '{reference}'"),
            }
            .fail();
        }
    }
    if let Some(handler) = &catch.do_ {
        validate_scope(definition, handler, &format!("{scope}/catch/do"))?;
    }
    Ok(())
}

fn validate_listen(to: &ListenTo, scope: &str) -> Result<()> {
    let modes =
        usize::from(to.one.is_some()) + usize::from(to.all.is_some()) + usize::from(to.any.is_some());
    if modes != 1 {
        return ConfigurationSnafu {
            scope,
            message: "listen.to requires exactly one of 'one', 'all' or 'any'".to_string(),
        }
        .fail();
    }
    if to.amount.is_some() && to.one.is_none() {
        return ConfigurationSnafu {
            scope,
            message: "listen.to.amount applies only to 'one' subscriptions".to_string(),
        }
        .fail();
    }
    if let Some(all) = &to.all {
        if all.is_empty() {
            return ConfigurationSnafu {
                scope,
                message: "listen.to.all requires at least one subscription".to_string(),
            }
            .fail();
        }
    }
    if let Some(any) = &to.any {
        if any.is_empty() {
            return ConfigurationSnafu {
                scope,
                message: "listen.to.any requires at least one subscription".to_string(),
            }
            .fail();
        }
    }
    Ok(())
}

fn check_directive(tasks: &TaskList, directive: &FlowDirective, scope: &str) -> Result<()> {
    if let FlowDirective::Task(target) = directive {
        if tasks.get(target).is_none() {
            return ConfigurationSnafu {
                scope,
                message: format!("'then' target '{target}' does not exist in the enclosing scope"),
            }
            .fail();
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(yaml: &str) -> WorkflowDefinition {
        serde_yaml::from_str(yaml).expect("definition parses")
    }

    #[test]
    fn test_unknown_then_target_fails_at_load() {
        let def = parse(
            r#"
document: { dsl: '1.0.0', namespace: test, name: bad-then, version: '0.1.0' }
do:
  - a:
      set: { x: 1 }
      then: missing
"#,
        );
        let err = validate(&def).unwrap_err();
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn test_then_target_must_be_in_same_scope() {
        // 'inner' may not jump to a task of the outer scope.
        let def = parse(
            r#"
document: { dsl: '1.0.0', namespace: test, name: cross-scope, version: '0.1.0' }
do:
  - outerTask:
      set: { x: 1 }
  - group:
      do:
        - inner:
            set: { y: 2 }
            then: outerTask
"#,
        );
        assert!(validate(&def).is_err());
    }

    #[test]
    fn test_switch_case_targets_are_checked() {
        let def = parse(
            r#"
document: { dsl: '1.0.0', namespace: test, name: switch-bad, version: '0.1.0' }
do:
  - decide:
      switch:
        - yes:
            when: '.x == 1'
            then: nowhere
"#,
        );
        assert!(validate(&def).is_err());
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let def = parse(
            r#"
document: { dsl: '1.0.0', namespace: test, name: dupes, version: '0.1.0' }
do:
  - a:
      set: { x: 1 }
  - a:
      set: { x: 2 }
"#,
        );
        assert!(validate(&def).is_err());
    }

    #[test]
    fn test_dangling_error_reference_rejected() {
        let def = parse(
            r#"
document: { dsl: '1.0.0', namespace: test, name: bad-ref, version: '0.1.0' }
do:
  - boom:
      raise:
        error: unknownError
"#,
        );
        assert!(validate(&def).is_err());
    }

    #[test]
    fn test_listen_requires_one_mode() {
        let def = parse(
            r#"
document: { dsl: '1.0.0', namespace: test, name: bad-listen, version: '0.1.0' }
do:
  - waitFor:
      listen:
        to: {}
"#,
        );
        assert!(validate(&def).is_err());
    }

    #[test]
    fn test_valid_definition_passes() {
        let def = parse(
            r#"
document: { dsl: '1.0.0', namespace: test, name: ok, version: '0.1.0' }
use:
  errors:
    notFound: { status: 404, title: Not Found }
  retries:
    brief: { delay: PT0S, limit: { attempt: { count: 2 } } }
do:
  - a:
      set: { x: 1 }
      then: c
  - b:
      set: { x: 2 }
  - c:
      try:
        - risky:
            raise:
              error: notFound
      catch:
        retry: brief
        do:
          - recover:
              set: { ok: true }
"#,
        );
        assert!(validate(&def).is_ok());
    }
}
