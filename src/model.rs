//! The immutable, parsed task-graph model
//!
//! A [`WorkflowDefinition`] is created at registration time and never
//! mutated; new versions supersede old ones. Task collections preserve
//! declaration order (the YAML form is a list of single-key maps), because
//! sequential execution and guard-skip semantics depend on it.

use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::duration::DurationSpec;

/// Declaration-ordered list of named entries, authored in YAML as a list of
/// single-key maps (`- taskName: {...}`).
#[derive(Debug, Clone, PartialEq)]
pub struct NamedList<T> {
    pub entries: Vec<(String, T)>,
}

impl<T> Default for NamedList<T> {
    fn default() -> Self {
        Self { entries: Vec::new() }
    }
}

impl<T> NamedList<T> {
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &T)> {
        self.entries.iter().map(|(name, item)| (name.as_str(), item))
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<(usize, &T)> {
        self.entries
            .iter()
            .enumerate()
            .find(|(_, (entry_name, _))| entry_name == name)
            .map(|(index, (_, item))| (index, item))
    }

    #[must_use]
    pub fn at(&self, index: usize) -> Option<(&str, &T)> {
        self.entries
            .get(index)
            .map(|(name, item)| (name.as_str(), item))
    }

    #[must_use]
    pub fn first(&self) -> Option<(&str, &T)> {
        self.at(0)
    }
}

impl<T: Serialize> Serialize for NamedList<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let maps: Vec<IndexMap<&String, &T>> = self
            .entries
            .iter()
            .map(|(name, item)| IndexMap::from([(name, item)]))
            .collect();
        maps.serialize(serializer)
    }
}

impl<'de, T: DeserializeOwned> Deserialize<'de> for NamedList<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let maps: Vec<IndexMap<String, T>> = Vec::deserialize(deserializer)?;
        let mut entries = Vec::new();
        for map in maps {
            for (name, item) in map {
                entries.push((name, item));
            }
        }
        Ok(Self { entries })
    }
}

/// The ordered task collection of a scope.
pub type TaskList = NamedList<TaskDefinition>;

/// An immutable workflow definition, identified by (namespace, name, version).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowDefinition {
    pub document: DocumentMetadata,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<InputClause>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<OutputClause>,
    #[serde(rename = "use", default)]
    pub use_: UseDefinitions,
    #[serde(rename = "do")]
    pub do_: TaskList,
}

impl WorkflowDefinition {
    /// Registry key: `namespace/name/version`.
    #[must_use]
    pub fn key(&self) -> String {
        format!(
            "{}/{}/{}",
            self.document.namespace, self.document.name, self.document.version
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocumentMetadata {
    #[serde(default)]
    pub dsl: String,
    pub namespace: String,
    pub name: String,
    pub version: String,
}

/// Reusable declarations referenced by name from tasks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct UseDefinitions {
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub errors: IndexMap<String, ErrorDefinition>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub retries: IndexMap<String, RetryPolicy>,
    /// Accepted for round-tripping; secrets retrieval is an external concern.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub authentications: IndexMap<String, Value>,
}

/// Input transform (`from`) and optional structural schema.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct InputClause {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<Value>,
}

/// Output transform (`as`, a string expression or an object template) and
/// optional structural schema.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct OutputClause {
    #[serde(rename = "as", skip_serializing_if = "Option::is_none")]
    pub as_: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<Value>,
}

/// Export transform: merged into the instance-global context object.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ExportClause {
    #[serde(rename = "as", skip_serializing_if = "Option::is_none")]
    pub as_: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<Value>,
}

/// Task timeout. For event waits, `then` names the fallback continuation
/// taken when the timeout fires before a match.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimeoutClause {
    pub after: DurationSpec,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub then: Option<FlowDirective>,
}

/// Post-task routing: `continue`, `exit`, `end`, or a sibling task name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowDirective {
    Continue,
    Exit,
    End,
    Task(String),
}

impl Serialize for FlowDirective {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let s = match self {
            FlowDirective::Continue => "continue",
            FlowDirective::Exit => "exit",
            FlowDirective::End => "end",
            FlowDirective::Task(name) => name.as_str(),
        };
        serializer.serialize_str(s)
    }
}

impl<'de> Deserialize<'de> for FlowDirective {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(match s.as_str() {
            "continue" => FlowDirective::Continue,
            "exit" => FlowDirective::Exit,
            "end" => FlowDirective::End,
            _ => FlowDirective::Task(s),
        })
    }
}

/// Fields shared by every task type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct TaskCommon {
    /// Guard expression; when false the task is skipped entirely.
    #[serde(rename = "if", skip_serializing_if = "Option::is_none")]
    pub if_: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<InputClause>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<OutputClause>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub export: Option<ExportClause>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<TimeoutClause>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub then: Option<FlowDirective>,
}

/// A workflow task: a closed sum over the supported task kinds.
///
/// Untagged: the discriminating field (`set`, `switch`, `for`, ...) selects
/// the variant. `For` and `Try` precede `Do` because they also carry `do`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum TaskDefinition {
    For(ForTask),
    Try(TryTask),
    Fork(ForkTask),
    Switch(SwitchTask),
    Raise(RaiseTask),
    Set(SetTask),
    Call(CallTask),
    Emit(EmitTask),
    Listen(ListenTask),
    Wait(WaitTask),
    Do(DoTask),
}

impl TaskDefinition {
    #[must_use]
    pub fn common(&self) -> &TaskCommon {
        match self {
            TaskDefinition::For(t) => &t.common,
            TaskDefinition::Try(t) => &t.common,
            TaskDefinition::Fork(t) => &t.common,
            TaskDefinition::Switch(t) => &t.common,
            TaskDefinition::Raise(t) => &t.common,
            TaskDefinition::Set(t) => &t.common,
            TaskDefinition::Call(t) => &t.common,
            TaskDefinition::Emit(t) => &t.common,
            TaskDefinition::Listen(t) => &t.common,
            TaskDefinition::Wait(t) => &t.common,
            TaskDefinition::Do(t) => &t.common,
        }
    }

    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            TaskDefinition::For(_) => "for",
            TaskDefinition::Try(_) => "try",
            TaskDefinition::Fork(_) => "fork",
            TaskDefinition::Switch(_) => "switch",
            TaskDefinition::Raise(_) => "raise",
            TaskDefinition::Set(_) => "set",
            TaskDefinition::Call(_) => "call",
            TaskDefinition::Emit(_) => "emit",
            TaskDefinition::Listen(_) => "listen",
            TaskDefinition::Wait(_) => "wait",
            TaskDefinition::Do(_) => "do",
        }
    }
}

/// Sequential group of subtasks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DoTask {
    #[serde(rename = "do")]
    pub do_: TaskList,
    #[serde(flatten)]
    pub common: TaskCommon,
}

/// Conditional branch: the first matching case routes via its own `then`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SwitchTask {
    pub switch: NamedList<SwitchCase>,
    #[serde(flatten)]
    pub common: TaskCommon,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SwitchCase {
    /// Case condition; a case without `when` is the default.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub when: Option<String>,
    pub then: FlowDirective,
}

/// Loop over a collection, one iteration at a time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ForTask {
    #[serde(rename = "for")]
    pub for_: ForClause,
    /// Optional continuation condition checked before every iteration.
    #[serde(rename = "while", skip_serializing_if = "Option::is_none")]
    pub while_: Option<String>,
    #[serde(rename = "do")]
    pub do_: TaskList,
    #[serde(flatten)]
    pub common: TaskCommon,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ForClause {
    /// Iteration variable name; defaults to `item`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub each: Option<String>,
    #[serde(rename = "in")]
    pub in_: String,
    /// Index variable name; defaults to `index`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub at: Option<String>,
}

/// Parallel fork over named branches.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ForkTask {
    pub fork: ForkClause,
    #[serde(flatten)]
    pub common: TaskCommon,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ForkClause {
    pub branches: TaskList,
    /// Compete mode: the first branch to finish wins, the rest are dropped.
    #[serde(default)]
    pub compete: bool,
    #[serde(default)]
    pub output: ForkOutputPolicy,
}

/// How concurrent branch results are folded into the fork's output.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ForkOutputPolicy {
    /// Object keyed by branch name.
    #[default]
    Merge,
    /// Output of the first branch to complete.
    First,
    /// Output of the last branch to complete.
    Last,
}

/// Protected block with catch/retry handling.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TryTask {
    #[serde(rename = "try")]
    pub try_: TaskList,
    pub catch: CatchClause,
    #[serde(flatten)]
    pub common: TaskCommon,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct CatchClause {
    /// Error filter; absent means catch everything.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<ErrorFilter>,
    /// Context variable the caught error is bound to; defaults to `error`.
    #[serde(rename = "as", skip_serializing_if = "Option::is_none")]
    pub as_: Option<String>,
    /// Additional predicate over the error (bound as `$error`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub when: Option<String>,
    #[serde(rename = "exceptWhen", skip_serializing_if = "Option::is_none")]
    pub except_when: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryPolicyOrRef>,
    #[serde(rename = "do", skip_serializing_if = "Option::is_none")]
    pub do_: Option<TaskList>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ErrorFilter {
    /// Equality filter over error fields (`type`, `status`, ...).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub with: Option<IndexMap<String, Value>>,
}

/// Raise a workflow error, inline or by reference into `use.errors`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RaiseTask {
    pub raise: RaiseClause,
    #[serde(flatten)]
    pub common: TaskCommon,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RaiseClause {
    pub error: ErrorSource,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ErrorSource {
    Reference(String),
    Inline(ErrorDefinition),
}

/// Declared error shape. Fields may carry runtime expressions; they are
/// resolved when the error is raised. An inline definition with `ref` takes
/// the named declaration from `use.errors` as its base.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ErrorDefinition {
    #[serde(rename = "ref", skip_serializing_if = "Option::is_none")]
    pub ref_: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub type_: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ErrorDefinition {
    /// Inline fields take precedence over the referenced declaration.
    #[must_use]
    pub fn merged_over(&self, base: &ErrorDefinition) -> ErrorDefinition {
        ErrorDefinition {
            ref_: None,
            type_: self.type_.clone().or_else(|| base.type_.clone()),
            status: self.status.or(base.status),
            title: self.title.clone().or_else(|| base.title.clone()),
            detail: self.detail.clone().or_else(|| base.detail.clone()),
        }
    }
}

/// Set/transform task: computes a value into the data flow.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SetTask {
    pub set: SetValue,
    #[serde(flatten)]
    pub common: TaskCommon,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum SetValue {
    Expression(String),
    Map(IndexMap<String, Value>),
}

/// External call dispatched through the connector registry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CallTask {
    pub call: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub with: Option<IndexMap<String, Value>>,
    #[serde(flatten)]
    pub common: TaskCommon,
}

/// Emit an event through the durable outbox.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmitTask {
    pub emit: EmitClause,
    #[serde(flatten)]
    pub common: TaskCommon,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmitClause {
    pub event: EventTemplate,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventTemplate {
    /// Event attributes; values may carry runtime expressions.
    pub with: IndexMap<String, Value>,
}

/// Suspend until correlated events arrive.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ListenTask {
    pub listen: ListenClause,
    #[serde(flatten)]
    pub common: TaskCommon,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ListenClause {
    pub to: ListenTo,
}

/// Consumption mode over named event subscriptions. Exactly one of
/// `one`/`all`/`any` must be set (validated at load time).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ListenTo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub one: Option<EventFilter>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub all: Option<NamedList<EventFilter>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub any: Option<NamedList<EventFilter>>,
    /// Fan-in: number of matching events to accumulate before resuming.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<u64>,
    /// Fan-in: resume once this predicate over `{ events: [...] }` is true.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub until: Option<String>,
    /// Fan-in: keep consuming while this predicate stays true.
    #[serde(rename = "while", skip_serializing_if = "Option::is_none")]
    pub while_: Option<String>,
}

/// Correlation predicate for one subscription: equality attributes (values
/// may be runtime expressions over the instance context) plus an optional
/// `when` expression with `$event` semantics (the event is `.`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct EventFilter {
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub with: IndexMap<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub when: Option<String>,
}

/// Suspend for a duration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WaitTask {
    pub wait: DurationSpec,
    #[serde(flatten)]
    pub common: TaskCommon,
}

/// Retry policy: delay schedule plus attempt/duration limits.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct RetryPolicy {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delay: Option<DurationSpec>,
    #[serde(default, with = "serde_yaml::with::singleton_map", skip_serializing_if = "Option::is_none")]
    pub backoff: Option<BackoffSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jitter: Option<JitterSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<RetryLimit>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum BackoffSpec {
    Constant(ConstantBackoff),
    Linear(LinearBackoff),
    Exponential(ExponentialBackoff),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ConstantBackoff {}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct LinearBackoff {
    /// Added to the delay after every attempt; defaults to the base delay.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub increment: Option<DurationSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ExponentialBackoff {
    /// Delay multiplier per attempt; defaults to 2.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub multiplier: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JitterSpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<DurationSpec>,
    pub to: DurationSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct RetryLimit {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempt: Option<AttemptLimit>,
    /// Total wall-clock budget across all attempts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<DurationSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct AttemptLimit {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<DurationSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum RetryPolicyOrRef {
    Reference(String),
    Policy(RetryPolicy),
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
document:
  dsl: '1.0.0'
  namespace: test
  name: sample
  version: '0.1.0'
use:
  errors:
    notFound:
      type: https://rook.dev/errors/runtime
      status: 404
      title: Not Found
do:
  - prepare:
      set:
        x: 1
      then: finish
  - middle:
      set:
        x: 2
  - finish:
      set:
        y: '${ .x + 1 }'
      then: end
"#;

    #[test]
    fn test_parses_ordered_task_list() {
        let def: WorkflowDefinition = serde_yaml::from_str(SAMPLE).unwrap();
        let names: Vec<&str> = def.do_.iter().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["prepare", "middle", "finish"]);
        assert_eq!(def.key(), "test/sample/0.1.0");
    }

    #[test]
    fn test_flow_directives_parse() {
        let def: WorkflowDefinition = serde_yaml::from_str(SAMPLE).unwrap();
        let (_, prepare) = def.do_.first().unwrap();
        assert_eq!(
            prepare.common().then,
            Some(FlowDirective::Task("finish".to_string()))
        );
        let (_, finish) = def.do_.at(2).unwrap();
        assert_eq!(finish.common().then, Some(FlowDirective::End));
    }

    #[test]
    fn test_task_kinds_discriminate() {
        let yaml = r#"
- loop:
    for:
      each: item
      in: '.items'
    do:
      - body:
          set:
            seen: '${ $item }'
- guard:
    try:
      - risky:
          raise:
            error: notFound
    catch:
      as: err
- group:
    do:
      - inner:
          set:
            a: 1
"#;
        let tasks: TaskList = serde_yaml::from_str(yaml).unwrap();
        let kinds: Vec<&str> = tasks.iter().map(|(_, task)| task.kind()).collect();
        assert_eq!(kinds, vec!["for", "try", "do"]);
    }

    #[test]
    fn test_backoff_shapes_parse() {
        let policy: RetryPolicy = serde_yaml::from_str(
            "delay: PT1S\nbackoff:\n  exponential:\n    multiplier: 3\nlimit:\n  attempt:\n    count: 5",
        )
        .unwrap();
        match policy.backoff {
            Some(BackoffSpec::Exponential(exp)) => assert_eq!(exp.multiplier, Some(3.0)),
            other => panic!("expected exponential backoff, got {other:?}"),
        }
        assert_eq!(policy.limit.unwrap().attempt.unwrap().count, Some(5));
    }

    #[test]
    fn test_listen_modes_parse() {
        let task: ListenTask = serde_yaml::from_str(
            r#"
listen:
  to:
    all:
      - orderPlaced:
          with:
            type: order.placed
      - paymentReceived:
          with:
            type: payment.received
          when: '.data.amount > 0'
"#,
        )
        .unwrap();
        let all = task.listen.to.all.unwrap();
        assert_eq!(all.len(), 2);
        assert!(all.get("paymentReceived").is_some());
    }

    #[test]
    fn test_definition_round_trips_through_json() {
        let def: WorkflowDefinition = serde_yaml::from_str(SAMPLE).unwrap();
        let json = serde_json::to_string(&def).unwrap();
        let back: WorkflowDefinition = serde_json::from_str(&json).unwrap();
        assert_eq!(back, def);
    }
}
