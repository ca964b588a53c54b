//! Position resolution against a definition
//!
//! Pure functions mapping positions to task-graph nodes and classifying the
//! scope a position lives in. Position grammar, by example:
//!
//! ```text
//! /do/1/loop/for/3/do/0/inner
//! ```
//!
//! Task addresses always end in an `<index>/<name>` pair; container lists
//! end in a field segment (`do`, `try`, `catch/do`, `for/<iter>/do`,
//! `fork/branches`).

use crate::model::{TaskDefinition, TaskList, WorkflowDefinition};
use crate::position::{Position, Segment};

/// What kind of list a position's enclosing scope is, with the address of
/// the task that owns it.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ScopeKind {
    Root,
    DoBody(Position),
    TryBody(Position),
    CatchBody(Position),
    ForBody { task: Position, iteration: usize },
    ForkBranches(Position),
}

/// Resolve the task list at a container position.
pub(crate) fn resolve_list<'a>(
    definition: &'a WorkflowDefinition,
    position: &Position,
) -> Option<&'a TaskList> {
    let segments = position.segments();
    let mut list = match segments.first()? {
        Segment::Name(name) if name == "do" => &definition.do_,
        _ => return None,
    };

    let mut i = 1;
    while i < segments.len() {
        let Segment::Index(index) = segments[i] else { return None };
        let Segment::Name(name) = segments.get(i + 1)? else { return None };
        let (entry_name, task) = list.at(index)?;
        if entry_name != name {
            return None;
        }
        i += 2;
        if i >= segments.len() {
            // Ended on a task address, not a list.
            return None;
        }
        let Segment::Name(field) = &segments[i] else { return None };
        match (task, field.as_str()) {
            (TaskDefinition::Do(t), "do") => {
                list = &t.do_;
                i += 1;
            }
            (TaskDefinition::Try(t), "try") => {
                list = &t.try_;
                i += 1;
            }
            (TaskDefinition::Try(t), "catch") => {
                if !matches!(segments.get(i + 1), Some(Segment::Name(n)) if n == "do") {
                    return None;
                }
                list = t.catch.do_.as_ref()?;
                i += 2;
            }
            (TaskDefinition::For(t), "for") => {
                let Some(Segment::Index(_)) = segments.get(i + 1) else { return None };
                if !matches!(segments.get(i + 2), Some(Segment::Name(n)) if n == "do") {
                    return None;
                }
                list = &t.do_;
                i += 3;
            }
            (TaskDefinition::Fork(t), "fork") => {
                if !matches!(segments.get(i + 1), Some(Segment::Name(n)) if n == "branches") {
                    return None;
                }
                list = &t.fork.branches;
                i += 2;
            }
            _ => return None,
        }
    }
    Some(list)
}

/// Resolve the task at a task position.
pub(crate) fn resolve_task<'a>(
    definition: &'a WorkflowDefinition,
    position: &Position,
) -> Option<&'a TaskDefinition> {
    let container = position.container()?;
    let list = resolve_list(definition, &container)?;
    let segments = position.segments();
    let Segment::Index(index) = segments[segments.len() - 2] else { return None };
    let Segment::Name(name) = &segments[segments.len() - 1] else { return None };
    let (entry_name, task) = list.at(index)?;
    (entry_name == name).then_some(task)
}

/// The index of a task within its enclosing list.
pub(crate) fn task_index(position: &Position) -> Option<usize> {
    let segments = position.segments();
    if segments.len() < 2 {
        return None;
    }
    match segments[segments.len() - 2] {
        Segment::Index(index) => Some(index),
        Segment::Name(_) => None,
    }
}

/// Classify the scope a container position represents.
pub(crate) fn classify_scope(list_position: &Position) -> Option<ScopeKind> {
    let segments = list_position.segments();
    let len = segments.len();
    if len == 1 {
        return match &segments[0] {
            Segment::Name(name) if name == "do" => Some(ScopeKind::Root),
            _ => None,
        };
    }
    let Segment::Name(last) = &segments[len - 1] else { return None };

    match last.as_str() {
        "branches" => {
            if matches!(&segments[len - 2], Segment::Name(n) if n == "fork") {
                Some(ScopeKind::ForkBranches(list_position.prefix(len - 2)))
            } else {
                None
            }
        }
        "try" => Some(ScopeKind::TryBody(list_position.prefix(len - 1))),
        "do" => {
            // A `for` body carries an iteration index between `for` and `do`.
            if len >= 3 {
                if let (Segment::Name(field), Segment::Index(iteration)) =
                    (&segments[len - 3], &segments[len - 2])
                {
                    if field == "for" {
                        return Some(ScopeKind::ForBody {
                            task: list_position.prefix(len - 3),
                            iteration: *iteration,
                        });
                    }
                }
                // A `catch` body is `<task>/catch/do`; the segment before
                // `catch` is the owning task's name, never an index.
                if let (Segment::Name(_), Segment::Name(field)) =
                    (&segments[len - 3], &segments[len - 2])
                {
                    if field == "catch" {
                        return Some(ScopeKind::CatchBody(list_position.prefix(len - 2)));
                    }
                }
            }
            Some(ScopeKind::DoBody(list_position.prefix(len - 1)))
        }
        _ => None,
    }
}

/// Whether a position lies inside a fork branch.
pub(crate) fn in_branch(position: &Position) -> bool {
    let segments = position.segments();
    segments.iter().enumerate().any(|(i, segment)| {
        i > 0
            && matches!(segment, Segment::Name(n) if n == "branches")
            && matches!(&segments[i - 1], Segment::Name(n) if n == "fork")
    })
}

/// Try-task ancestors whose protected list contains `position`, innermost
/// first. The walk stops at the nearest fork-branch boundary: an error
/// inside a branch is the branch executor's to surface, and the fork task
/// re-raises it on the main cursor where outer scopes apply.
pub(crate) fn try_ancestors(position: &Position) -> Vec<Position> {
    let segments = position.segments();
    let floor = segments
        .iter()
        .enumerate()
        .rev()
        .find_map(|(i, segment)| {
            (i > 0
                && matches!(segment, Segment::Name(n) if n == "branches")
                && matches!(&segments[i - 1], Segment::Name(n) if n == "fork"))
            .then_some(i)
        })
        .unwrap_or(0);

    let mut ancestors = Vec::new();
    for i in (floor + 1..segments.len()).rev() {
        if matches!(&segments[i], Segment::Name(n) if n == "try")
            && matches!(&segments[i - 1], Segment::Name(_))
        {
            ancestors.push(position.prefix(i));
        }
    }
    ancestors
}

/// Address of the first task in a container list.
pub(crate) fn first_task(list_position: &Position, list: &TaskList) -> Option<Position> {
    list.first().map(|(name, _)| list_position.task(0, name))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn definition() -> WorkflowDefinition {
        serde_yaml::from_str(
            r#"
document: { dsl: '1.0.0', namespace: test, name: nav, version: '0.1.0' }
do:
  - loop:
      for:
        each: item
        in: '.items'
      do:
        - inner:
            set: { seen: true }
  - guarded:
      try:
        - risky:
            set: { ok: true }
      catch:
        do:
          - recover:
              set: { recovered: true }
  - split:
      fork:
        branches:
          - left:
              set: { side: left }
          - right:
              set: { side: right }
"#,
        )
        .expect("definition parses")
    }

    fn pos(s: &str) -> Position {
        s.parse().expect("valid position")
    }

    #[test]
    fn test_resolves_nested_loop_task() {
        let def = definition();
        let task = resolve_task(&def, &pos("/do/0/loop/for/3/do/0/inner")).expect("resolves");
        assert_eq!(task.kind(), "set");
    }

    #[test]
    fn test_resolves_try_and_catch_bodies() {
        let def = definition();
        assert_eq!(
            resolve_task(&def, &pos("/do/1/guarded/try/0/risky")).map(TaskDefinition::kind),
            Some("set")
        );
        assert_eq!(
            resolve_task(&def, &pos("/do/1/guarded/catch/do/0/recover")).map(TaskDefinition::kind),
            Some("set")
        );
    }

    #[test]
    fn test_resolves_fork_branch() {
        let def = definition();
        assert_eq!(
            resolve_task(&def, &pos("/do/2/split/fork/branches/1/right")).map(TaskDefinition::kind),
            Some("set")
        );
    }

    #[test]
    fn test_mismatched_name_does_not_resolve() {
        let def = definition();
        assert!(resolve_task(&def, &pos("/do/0/wrongName")).is_none());
    }

    #[test]
    fn test_classifies_scopes() {
        assert_eq!(classify_scope(&pos("/do")), Some(ScopeKind::Root));
        assert_eq!(
            classify_scope(&pos("/do/1/guarded/try")),
            Some(ScopeKind::TryBody(pos("/do/1/guarded")))
        );
        assert_eq!(
            classify_scope(&pos("/do/1/guarded/catch/do")),
            Some(ScopeKind::CatchBody(pos("/do/1/guarded")))
        );
        assert_eq!(
            classify_scope(&pos("/do/0/loop/for/3/do")),
            Some(ScopeKind::ForBody { task: pos("/do/0/loop"), iteration: 3 })
        );
        assert_eq!(
            classify_scope(&pos("/do/2/split/fork/branches")),
            Some(ScopeKind::ForkBranches(pos("/do/2/split")))
        );
        assert_eq!(
            classify_scope(&pos("/do/3/group/do")),
            Some(ScopeKind::DoBody(pos("/do/3/group")))
        );
    }

    #[test]
    fn test_try_ancestors_innermost_first() {
        let ancestors = try_ancestors(&pos("/do/0/outer/try/0/mid/try/1/deep"));
        assert_eq!(ancestors, vec![pos("/do/0/outer/try/0/mid"), pos("/do/0/outer")]);
    }

    #[test]
    fn test_try_ancestors_stop_at_branch_boundary() {
        let ancestors = try_ancestors(&pos("/do/0/outer/try/0/split/fork/branches/0/left"));
        assert!(ancestors.is_empty());
    }

    #[test]
    fn test_catch_body_is_not_a_try_ancestor_scope() {
        // An error inside the handler must not be caught by the same try.
        let ancestors = try_ancestors(&pos("/do/1/guarded/catch/do/0/recover"));
        assert!(ancestors.is_empty());
    }
}
