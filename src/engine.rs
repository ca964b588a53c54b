//! The workflow engine
//!
//! One [`Engine`] owns the definition registry, the persistence and event
//! bus seams, the connector registry and the background loops (timer sweep,
//! event correlation, outbox dispatch). Execution is a pure state-machine
//! step over a persisted [`Instance`]: load snapshot, execute the task at
//! the cursor, persist snapshot plus effects, repeat. Everything the next
//! step needs is in the snapshot, so a crash between steps loses nothing.

use async_recursion::async_recursion;
use chrono::{DateTime, Utc};
use serde_json::Value;
use snafu::prelude::*;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration as StdDuration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::connector::{Connector, ConnectorRegistry};
use crate::context::RetryState;
use crate::correlation::{ListenWait, Offer, WaitKind, WaitRecord};
use crate::error::{ErrorKind, WorkflowError};
use crate::eventbus::{Event, EventBus};
use crate::expressions::{self, Vars};
use crate::instance::{Instance, InstanceStatus};
use crate::model::{
    CatchClause, FlowDirective, RetryPolicy, RetryPolicyOrRef, TaskDefinition, WorkflowDefinition,
};
use crate::outbox::{OutboxRecord, OutboxStatus};
use crate::persistence::PersistenceProvider;
use crate::position::{Position, Segment};
use crate::{retry, schema, validate};

mod navigate;
pub(crate) mod tasks;

use navigate::ScopeKind;
use tasks::TaskOutcome;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Failed to parse workflow definition: {source}"))]
    Parse { source: serde_yaml::Error },

    #[snafu(display("Invalid workflow definition: {source}"))]
    InvalidDefinition { source: validate::Error },

    #[snafu(display("Persistence error: {source}"))]
    Persistence { source: crate::persistence::Error },

    #[snafu(display("Event bus error: {source}"))]
    Bus { source: crate::eventbus::Error },

    #[snafu(display("Unknown workflow definition: {key}"))]
    UnknownDefinition { key: String },

    #[snafu(display("Unknown instance: {id}"))]
    UnknownInstance { id: Uuid },

    #[snafu(display("Instance {id} is {status}, expected {expected}"))]
    InvalidStatus { id: Uuid, status: InstanceStatus, expected: String },

    #[snafu(display("Position does not resolve to a task: {position}"))]
    UnresolvablePosition { position: String },

    #[snafu(display("Definition registry is unavailable"))]
    RegistryPoisoned,

    #[snafu(display("Timed out waiting for instance {id} to finish"))]
    WaitTimeout { id: Uuid },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Outcome of one engine step over an instance.
#[derive(Debug)]
pub struct Step {
    pub result: StepResult,
    /// Outbox records produced by this step; they must be persisted in the
    /// same atomic unit as the instance snapshot.
    pub outbox: Vec<OutboxRecord>,
}

#[derive(Debug)]
pub enum StepResult {
    /// The cursor moved; step again.
    Advance,
    /// The instance suspended on this wait record.
    Suspend(Box<WaitRecord>),
    /// The instance faulted with an uncaught error.
    Fault(WorkflowError),
    /// The instance completed with this output.
    Complete(Value),
}

/// Internal control-flow value threaded through cursor movement. Unlike
/// [`StepResult`] it is produced before the instance status is updated.
enum Flow {
    Moved,
    Finished(Value),
    Suspended(Box<WaitRecord>),
    Faulted(WorkflowError),
}

pub(crate) struct EngineInner {
    definitions: RwLock<HashMap<String, Arc<WorkflowDefinition>>>,
    persistence: Arc<dyn PersistenceProvider>,
    bus: Arc<dyn EventBus>,
    connectors: ConnectorRegistry,
    config: EngineConfig,
    background: Mutex<Vec<JoinHandle<()>>>,
}

/// The workflow engine. Cheap to clone; all clones share the same state.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Engine {
    #[must_use]
    pub fn builder() -> crate::builder::EngineBuilder {
        crate::builder::EngineBuilder::new()
    }

    pub(crate) fn assemble(
        config: EngineConfig,
        persistence: Arc<dyn PersistenceProvider>,
        bus: Arc<dyn EventBus>,
        connectors: Vec<(String, Arc<dyn Connector>)>,
    ) -> Self {
        let registry = ConnectorRegistry::new();
        for (name, connector) in connectors {
            registry.register(name, connector);
        }
        let engine = Self {
            inner: Arc::new(EngineInner {
                definitions: RwLock::new(HashMap::new()),
                persistence,
                bus,
                connectors: registry,
                config,
                background: Mutex::new(Vec::new()),
            }),
        };
        engine.spawn_background();
        engine
    }

    // ---- registry -------------------------------------------------------

    /// Parse, validate and register a YAML workflow definition. Returns the
    /// registry key (`namespace/name/version`); a key already present is
    /// superseded.
    pub fn register_yaml(&self, yaml: &str) -> Result<String> {
        let definition: WorkflowDefinition = serde_yaml::from_str(yaml).context(ParseSnafu)?;
        self.register(definition)
    }

    pub fn register(&self, definition: WorkflowDefinition) -> Result<String> {
        validate::validate(&definition).context(InvalidDefinitionSnafu)?;
        let key = definition.key();
        let mut registry = self.inner.definitions.write().map_err(|_| Error::RegistryPoisoned)?;
        registry.insert(key.clone(), Arc::new(definition));
        info!(workflow = %key, "registered workflow definition");
        Ok(key)
    }

    pub fn definition(&self, key: &str) -> Result<Arc<WorkflowDefinition>> {
        self.inner
            .definitions
            .read()
            .map_err(|_| Error::RegistryPoisoned)?
            .get(key)
            .cloned()
            .context(UnknownDefinitionSnafu { key })
    }

    #[must_use]
    pub fn connectors(&self) -> &ConnectorRegistry {
        &self.inner.connectors
    }

    pub fn register_connector(&self, name: impl Into<String>, connector: Arc<dyn Connector>) {
        self.inner.connectors.register(name, connector);
    }

    // ---- operations surface ----------------------------------------------

    /// Start an instance of a registered definition and drive it in the
    /// background. Returns immediately with the instance id.
    pub async fn start(&self, key: &str, input: Value) -> Result<Uuid> {
        self.definition(key)?;
        let mut instance = Instance::new(key, input);
        instance.status = InstanceStatus::Running;
        let id = instance.id;
        self.inner.persistence.save_instance(&instance).await.context(PersistenceSnafu)?;
        info!(instance = %id, workflow = %key, "starting workflow instance");
        let engine = self.clone();
        tokio::spawn(async move { engine.drive(id).await });
        Ok(id)
    }

    pub async fn instance(&self, id: &Uuid) -> Result<Option<Instance>> {
        self.inner.persistence.load_instance(id).await.context(PersistenceSnafu)
    }

    pub async fn instances(&self) -> Result<Vec<Instance>> {
        self.inner.persistence.list_instances().await.context(PersistenceSnafu)
    }

    /// Cancel a non-terminal instance. Takes effect at the next step
    /// boundary; the current task is never interrupted mid-flight.
    /// Idempotent on terminal instances.
    pub async fn cancel(&self, id: &Uuid) -> Result<()> {
        let Some(mut instance) = self.instance(id).await? else {
            return UnknownInstanceSnafu { id: *id }.fail();
        };
        if instance.status.is_terminal() {
            return Ok(());
        }
        for wait in
            self.inner.persistence.waits_for_instance(id).await.context(PersistenceSnafu)?
        {
            self.inner.persistence.delete_wait(&wait.id).await.context(PersistenceSnafu)?;
        }
        instance.status = InstanceStatus::Cancelled;
        instance.touch();
        self.inner.persistence.save_instance(&instance).await.context(PersistenceSnafu)?;
        info!(instance = %id, "workflow instance cancelled");
        Ok(())
    }

    /// Operator pause. The instance stops advancing at the next step
    /// boundary and stays resumable, unlike the terminal states.
    pub async fn suspend(&self, id: &Uuid) -> Result<()> {
        let Some(mut instance) = self.instance(id).await? else {
            return UnknownInstanceSnafu { id: *id }.fail();
        };
        if instance.status != InstanceStatus::Running {
            return InvalidStatusSnafu {
                id: *id,
                status: instance.status,
                expected: "running".to_string(),
            }
            .fail();
        }
        instance.status = InstanceStatus::Suspended;
        instance.touch();
        self.inner.persistence.save_instance(&instance).await.context(PersistenceSnafu)
    }

    pub async fn resume(&self, id: &Uuid) -> Result<()> {
        let Some(mut instance) = self.instance(id).await? else {
            return UnknownInstanceSnafu { id: *id }.fail();
        };
        if instance.status != InstanceStatus::Suspended {
            return InvalidStatusSnafu {
                id: *id,
                status: instance.status,
                expected: "suspended".to_string(),
            }
            .fail();
        }
        instance.status = InstanceStatus::Running;
        instance.touch();
        self.inner.persistence.save_instance(&instance).await.context(PersistenceSnafu)?;
        let engine = self.clone();
        let id = *id;
        tokio::spawn(async move { engine.drive(id).await });
        Ok(())
    }

    /// Publish an external event to the bus, where pending `listen` waits
    /// can match it.
    pub async fn publish(&self, attributes: Value) -> Result<()> {
        self.inner.bus.publish(Event::new(attributes)).await.context(BusSnafu)
    }

    /// Poll until the instance reaches a terminal status.
    pub async fn wait_for_completion(&self, id: &Uuid, timeout: StdDuration) -> Result<Instance> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            match self.instance(id).await? {
                Some(instance) if instance.status.is_terminal() => return Ok(instance),
                Some(_) => {}
                None => return UnknownInstanceSnafu { id: *id }.fail(),
            }
            if tokio::time::Instant::now() >= deadline {
                return WaitTimeoutSnafu { id: *id }.fail();
            }
            tokio::time::sleep(StdDuration::from_millis(5)).await;
        }
    }

    /// Crash recovery: re-drive every instance the last process left in
    /// `Running`. Suspended waits need no recovery, the timer sweep and
    /// event loop pick them up from their persisted records.
    pub async fn recover(&self) -> Result<usize> {
        let instances = self.instances().await?;
        let mut recovered = 0;
        for instance in instances {
            if instance.status == InstanceStatus::Running {
                let engine = self.clone();
                let id = instance.id;
                info!(instance = %id, "recovering in-flight instance");
                tokio::spawn(async move { engine.drive(id).await });
                recovered += 1;
            }
        }
        Ok(recovered)
    }

    /// Abort the background loops. Persisted state is untouched; a new
    /// engine over the same store resumes where this one stopped.
    pub fn shutdown(&self) {
        if let Ok(mut handles) = self.inner.background.lock() {
            for handle in handles.drain(..) {
                handle.abort();
            }
        }
    }

    // ---- stepping ---------------------------------------------------------

    /// Execute the single task at the instance cursor and update the
    /// instance in place. The caller persists the returned effects together
    /// with the snapshot.
    #[async_recursion]
    pub async fn step(&self, instance: &mut Instance) -> Result<Step> {
        let definition = self.definition(&instance.definition)?;
        instance.touch();

        if instance.position.is_empty() {
            let flow = self.initialize(instance, &definition);
            return Ok(Step { result: self.apply_flow(instance, flow), outbox: Vec::new() });
        }

        let position = instance.position.clone();
        let Some(task) = navigate::resolve_task(&definition, &position) else {
            return UnresolvablePositionSnafu { position: position.to_string() }.fail();
        };
        debug!(instance = %instance.id, position = %position, kind = task.kind(), "executing task");

        // Guard: a false `if` skips the task entirely, including its `then`.
        if let Some(guard) = &task.common().if_ {
            let vars = instance.context.expression_vars();
            match expressions::evaluate_raw(guard, &instance.context.data, &vars) {
                Ok(value) if !expressions::truthy(&value) => {
                    debug!(instance = %instance.id, position = %position, "guard false, skipping task");
                    let data = instance.context.data.clone();
                    let outcome = self.advance(
                        instance,
                        &definition,
                        &position,
                        data,
                        Some(FlowDirective::Continue),
                    );
                    let flow = self.settle(instance, &definition, &position, outcome);
                    return Ok(Step { result: self.apply_flow(instance, flow), outbox: Vec::new() });
                }
                Ok(_) => {}
                Err(e) => {
                    let raised = WorkflowError::new(ErrorKind::Expression, e.to_string());
                    let flow = self.raise(instance, &definition, &position, raised);
                    return Ok(Step { result: self.apply_flow(instance, flow), outbox: Vec::new() });
                }
            }
        }

        let input = {
            let vars = instance.context.expression_vars();
            match task_input(task, &instance.context.data, &vars, &position) {
                Ok(input) => input,
                Err(raised) => {
                    let flow = self.raise(instance, &definition, &position, raised);
                    return Ok(Step { result: self.apply_flow(instance, flow), outbox: Vec::new() });
                }
            }
        };
        instance.context.data = input.clone();

        let outcome = tasks::execute(self, instance, &definition, &position, task, input).await;
        let (flow, outbox) = match outcome {
            TaskOutcome::Completed { output, directive, outbox } => {
                let result = self.complete_task(instance, &definition, &position, output, directive);
                (self.settle(instance, &definition, &position, result), outbox)
            }
            TaskOutcome::Descend { position: next, data } => {
                instance.position = next;
                instance.context.data = data;
                (Flow::Moved, Vec::new())
            }
            TaskOutcome::Suspend(wait) => (Flow::Suspended(wait), Vec::new()),
            TaskOutcome::Raised(raised) => {
                (self.raise(instance, &definition, &position, raised), Vec::new())
            }
        };
        Ok(Step { result: self.apply_flow(instance, flow), outbox })
    }

    /// Run the workflow-level input pipeline and place the cursor on the
    /// first task.
    fn initialize(&self, instance: &mut Instance, definition: &WorkflowDefinition) -> Flow {
        if let Some(clause) = &definition.input {
            if let Some(schema) = &clause.schema {
                if let Err(e) = schema::validate(schema, &instance.context.input) {
                    return Flow::Faulted(WorkflowError::new(ErrorKind::Validation, e.to_string()));
                }
            }
            if let Some(from) = &clause.from {
                let vars = instance.context.expression_vars();
                match expressions::evaluate_raw(from, &instance.context.input, &vars) {
                    Ok(transformed) => {
                        instance.context.input = transformed.clone();
                        instance.context.data = transformed;
                    }
                    Err(e) => {
                        return Flow::Faulted(WorkflowError::new(
                            ErrorKind::Expression,
                            e.to_string(),
                        ));
                    }
                }
            }
        }

        let mut root = Position::root();
        root.push_name("do");
        match navigate::first_task(&root, &definition.do_) {
            Some(first) => {
                instance.position = first;
                Flow::Moved
            }
            None => {
                let output = instance.context.data.clone();
                self.finish_instance(instance, definition, output)
            }
        }
    }

    /// Run the task's output and export pipelines, clean up per-task
    /// bookkeeping and move the cursor per the flow directive.
    fn complete_task(
        &self,
        instance: &mut Instance,
        definition: &WorkflowDefinition,
        position: &Position,
        raw_output: Value,
        directive_override: Option<FlowDirective>,
    ) -> std::result::Result<Flow, WorkflowError> {
        let Some(task) = navigate::resolve_task(definition, position) else {
            return Err(WorkflowError::new(
                ErrorKind::Runtime,
                format!("completed task no longer resolves at {position}"),
            )
            .at(position));
        };

        let vars = instance.context.expression_vars();
        let mut output = raw_output;
        if let Some(clause) = &task.common().output {
            if let Some(as_) = &clause.as_ {
                output = eval_transform(as_, &output, &vars).map_err(|e| e.at(position))?;
            }
            if let Some(schema) = &clause.schema {
                schema::validate(schema, &output).map_err(|e| {
                    WorkflowError::new(ErrorKind::Validation, e.to_string()).at(position)
                })?;
            }
        }
        if let Some(clause) = &task.common().export {
            let exported = match &clause.as_ {
                Some(as_) => eval_transform(as_, &output, &vars).map_err(|e| e.at(position))?,
                None => output.clone(),
            };
            if let Some(schema) = &clause.schema {
                schema::validate(schema, &exported).map_err(|e| {
                    WorkflowError::new(ErrorKind::Validation, e.to_string()).at(position)
                })?;
            }
            instance.context.export(exported);
        }

        match task {
            TaskDefinition::Try(_) => {
                // Retry counters stay for inspection; the entry snapshot is
                // no longer needed once the scope settled.
                instance.context.scopes.shift_remove(&position.to_string());
            }
            TaskDefinition::For(for_task) => {
                instance.context.loops.shift_remove(&position.to_string());
                instance.context.unbind_var(for_task.for_.each.as_deref().unwrap_or("item"));
                instance.context.unbind_var(for_task.for_.at.as_deref().unwrap_or("index"));
            }
            _ => {}
        }

        let directive = directive_override.or_else(|| task.common().then.clone());
        self.advance(instance, definition, position, output, directive)
    }

    /// Move the cursor after a task completed with `output`.
    fn advance(
        &self,
        instance: &mut Instance,
        definition: &WorkflowDefinition,
        position: &Position,
        output: Value,
        directive: Option<FlowDirective>,
    ) -> std::result::Result<Flow, WorkflowError> {
        match directive.unwrap_or(FlowDirective::Continue) {
            FlowDirective::End => {
                if navigate::in_branch(position) {
                    // `end` inside a fork branch ends only that branch.
                    return Ok(Flow::Finished(output));
                }
                Ok(self.finish_instance(instance, definition, output))
            }
            FlowDirective::Exit => self.exit_scope(instance, definition, position, output),
            FlowDirective::Task(name) => {
                let list_position = position.container().ok_or_else(|| {
                    WorkflowError::new(ErrorKind::Runtime, "task position has no enclosing list")
                        .at(position)
                })?;
                let list = navigate::resolve_list(definition, &list_position).ok_or_else(|| {
                    WorkflowError::new(
                        ErrorKind::Runtime,
                        format!("enclosing list no longer resolves at {list_position}"),
                    )
                    .at(position)
                })?;
                let (index, _) = list.get(&name).ok_or_else(|| {
                    WorkflowError::new(
                        ErrorKind::Configuration,
                        format!("'then' target '{name}' does not exist in the enclosing scope"),
                    )
                    .at(position)
                })?;
                instance.position = list_position.task(index, &name);
                instance.context.data = output;
                Ok(Flow::Moved)
            }
            FlowDirective::Continue => {
                let Some(list_position) = position.container() else {
                    return Ok(self.finish_instance(instance, definition, output));
                };
                let list = navigate::resolve_list(definition, &list_position).ok_or_else(|| {
                    WorkflowError::new(
                        ErrorKind::Runtime,
                        format!("enclosing list no longer resolves at {list_position}"),
                    )
                    .at(position)
                })?;
                let index = navigate::task_index(position).ok_or_else(|| {
                    WorkflowError::new(ErrorKind::Runtime, "task position carries no index")
                        .at(position)
                })?;
                match list.at(index + 1) {
                    Some((name, _)) => {
                        instance.position = list_position.task(index + 1, name);
                        instance.context.data = output;
                        Ok(Flow::Moved)
                    }
                    None => self.scope_end(instance, definition, position, output),
                }
            }
        }
    }

    /// The last task of a container list finished; settle the container.
    fn scope_end(
        &self,
        instance: &mut Instance,
        definition: &WorkflowDefinition,
        position: &Position,
        output: Value,
    ) -> std::result::Result<Flow, WorkflowError> {
        let Some(list_position) = position.container() else {
            return Ok(self.finish_instance(instance, definition, output));
        };
        match navigate::classify_scope(&list_position) {
            Some(ScopeKind::Root) => Ok(self.finish_instance(instance, definition, output)),
            Some(
                ScopeKind::DoBody(parent)
                | ScopeKind::TryBody(parent)
                | ScopeKind::CatchBody(parent),
            ) => self.complete_task(instance, definition, &parent, output, None),
            Some(ScopeKind::ForBody { task, iteration }) => {
                self.continue_loop(instance, definition, &task, iteration, output)
            }
            Some(ScopeKind::ForkBranches(_)) => Ok(Flow::Finished(output)),
            None => Err(WorkflowError::new(
                ErrorKind::Runtime,
                format!("cannot classify enclosing scope {list_position}"),
            )
            .at(position)),
        }
    }

    /// `exit` directive: complete the task owning the enclosing scope. For a
    /// loop body this leaves the whole loop, not just the iteration.
    fn exit_scope(
        &self,
        instance: &mut Instance,
        definition: &WorkflowDefinition,
        position: &Position,
        output: Value,
    ) -> std::result::Result<Flow, WorkflowError> {
        let Some(list_position) = position.container() else {
            return Ok(self.finish_instance(instance, definition, output));
        };
        match navigate::classify_scope(&list_position) {
            Some(ScopeKind::Root) => Ok(self.finish_instance(instance, definition, output)),
            Some(
                ScopeKind::DoBody(parent)
                | ScopeKind::TryBody(parent)
                | ScopeKind::CatchBody(parent),
            ) => self.complete_task(instance, definition, &parent, output, None),
            Some(ScopeKind::ForBody { task, .. }) => {
                self.complete_task(instance, definition, &task, output, None)
            }
            Some(ScopeKind::ForkBranches(_)) => Ok(Flow::Finished(output)),
            None => Err(WorkflowError::new(
                ErrorKind::Runtime,
                format!("cannot classify enclosing scope {list_position}"),
            )
            .at(position)),
        }
    }

    /// An iteration of a `for` body ran to its end; bind the next item and
    /// re-enter, or complete the loop task.
    fn continue_loop(
        &self,
        instance: &mut Instance,
        definition: &WorkflowDefinition,
        for_position: &Position,
        iteration: usize,
        output: Value,
    ) -> std::result::Result<Flow, WorkflowError> {
        let Some(TaskDefinition::For(for_task)) = navigate::resolve_task(definition, for_position)
        else {
            return Err(WorkflowError::new(
                ErrorKind::Runtime,
                format!("loop task no longer resolves at {for_position}"),
            )
            .at(for_position));
        };

        let items = instance
            .context
            .loops
            .get(&for_position.to_string())
            .map(|frame| frame.items.clone())
            .unwrap_or_default();
        let next = iteration + 1;
        if next >= items.len() {
            return self.complete_task(instance, definition, for_position, output, None);
        }

        let each = for_task.for_.each.clone().unwrap_or_else(|| "item".to_string());
        let at = for_task.for_.at.clone().unwrap_or_else(|| "index".to_string());
        instance.context.bind_var(each, items[next].clone());
        instance.context.bind_var(at, Value::from(next));

        if let Some(while_) = &for_task.while_ {
            let vars = instance.context.expression_vars();
            let keep = expressions::evaluate_raw(while_, &output, &vars).map_err(|e| {
                WorkflowError::new(ErrorKind::Expression, e.to_string()).at(for_position)
            })?;
            if !expressions::truthy(&keep) {
                return self.complete_task(instance, definition, for_position, output, None);
            }
        }

        let body = for_position.child(&[
            Segment::Name("for".to_string()),
            Segment::Index(next),
            Segment::Name("do".to_string()),
        ]);
        match navigate::first_task(&body, &for_task.do_) {
            Some(first) => {
                instance.position = first;
                instance.context.data = output;
                Ok(Flow::Moved)
            }
            None => self.complete_task(instance, definition, for_position, output, None),
        }
    }

    /// Apply the workflow-level output pipeline and finish the instance.
    fn finish_instance(
        &self,
        instance: &mut Instance,
        definition: &WorkflowDefinition,
        last: Value,
    ) -> Flow {
        let mut output = last;
        if let Some(clause) = &definition.output {
            let vars = instance.context.expression_vars();
            if let Some(as_) = &clause.as_ {
                match eval_transform(as_, &output, &vars) {
                    Ok(transformed) => output = transformed,
                    Err(e) => return Flow::Faulted(e),
                }
            }
            if let Some(schema) = &clause.schema {
                if let Err(e) = schema::validate(schema, &output) {
                    return Flow::Faulted(WorkflowError::new(ErrorKind::Validation, e.to_string()));
                }
            }
        }
        Flow::Finished(output)
    }

    // ---- error propagation ------------------------------------------------

    /// Walk the try ancestors of `position` looking for a matching catch.
    /// Schedules a retry while attempts remain, otherwise routes into the
    /// handler (or settles the try with the error as its output). With no
    /// match anywhere the instance faults.
    pub(crate) fn raise(
        &self,
        instance: &mut Instance,
        definition: &WorkflowDefinition,
        position: &Position,
        error: WorkflowError,
    ) -> Flow {
        let error = error.at(position);
        warn!(instance = %instance.id, position = %position, %error, "workflow error raised");

        for try_position in navigate::try_ancestors(position) {
            let Some(TaskDefinition::Try(try_task)) =
                navigate::resolve_task(definition, &try_position)
            else {
                continue;
            };
            match catch_matches(&try_task.catch, &error, &instance.context.expression_vars()) {
                Ok(false) => continue,
                Ok(true) => {}
                Err(match_error) => return Flow::Faulted(match_error.at(&try_position)),
            }

            if let Some(policy) =
                try_task.catch.retry.as_ref().and_then(|r| resolve_retry(definition, r))
            {
                match self.schedule_retry(instance, &try_position, &try_task.try_, policy) {
                    Ok(Some(flow)) => return flow,
                    Ok(None) => {} // attempts exhausted, fall through to the handler
                    Err(e) => return Flow::Faulted(e),
                }
            }

            let var = try_task.catch.as_.clone().unwrap_or_else(|| "error".to_string());
            instance.context.bind_var(var, error.to_value());
            if let Some(handler) = &try_task.catch.do_ {
                let handler_position = try_position.child(&[
                    Segment::Name("catch".to_string()),
                    Segment::Name("do".to_string()),
                ]);
                if let Some(first) = navigate::first_task(&handler_position, handler) {
                    debug!(instance = %instance.id, position = %try_position, "error caught, running handler");
                    instance.position = first;
                    instance.context.data = error.to_value();
                    return Flow::Moved;
                }
            }
            // Caught without a handler: the error value becomes the try's
            // output.
            let outcome =
                self.complete_task(instance, definition, &try_position, error.to_value(), None);
            return self.settle(instance, definition, &try_position, outcome);
        }

        Flow::Faulted(error)
    }

    /// Schedule the next retry of a protected block if its limits allow.
    /// `Ok(None)` means the policy is exhausted.
    fn schedule_retry(
        &self,
        instance: &mut Instance,
        try_position: &Position,
        protected: &crate::model::TaskList,
        policy: &RetryPolicy,
    ) -> std::result::Result<Option<Flow>, WorkflowError> {
        let try_body = try_position.child(&[Segment::Name("try".to_string())]);
        let Some(target) = navigate::first_task(&try_body, protected) else {
            return Ok(None);
        };

        let key = try_position.to_string();
        let now = Utc::now();
        let (attempts, first_attempt_at) = {
            let state = instance
                .context
                .retries
                .entry(key.clone())
                .or_insert_with(|| RetryState { attempts: 0, first_attempt_at: now });
            (state.attempts, state.first_attempt_at)
        };

        let allowed = retry::attempt_allowed(policy.limit.as_ref(), attempts, first_attempt_at, now)
            .map_err(|e| {
                WorkflowError::new(ErrorKind::Validation, e.to_string()).at(try_position)
            })?;
        if !allowed {
            return Ok(None);
        }

        let attempt = attempts + 1;
        let delay = retry::delay_for_attempt(policy, attempt).map_err(|e| {
            WorkflowError::new(ErrorKind::Validation, e.to_string()).at(try_position)
        })?;
        if let Some(state) = instance.context.retries.get_mut(&key) {
            state.attempts = attempt;
        }
        let wake_at = now
            + chrono::Duration::milliseconds(i64::try_from(delay.as_millis()).unwrap_or(i64::MAX));
        debug!(
            instance = %instance.id,
            position = %try_position,
            attempt,
            delay_ms = delay.as_millis() as u64,
            "scheduling retry"
        );
        Ok(Some(Flow::Suspended(Box::new(WaitRecord::retry_delay(
            instance.id,
            target,
            wake_at,
        )))))
    }

    /// Turn a fallible cursor movement into a flow, raising on failure.
    fn settle(
        &self,
        instance: &mut Instance,
        definition: &WorkflowDefinition,
        position: &Position,
        outcome: std::result::Result<Flow, WorkflowError>,
    ) -> Flow {
        match outcome {
            Ok(flow) => flow,
            Err(error) => self.raise(instance, definition, position, error),
        }
    }

    /// Record the flow on the instance and translate it to a step result.
    fn apply_flow(&self, instance: &mut Instance, flow: Flow) -> StepResult {
        match flow {
            Flow::Moved => {
                instance.status = InstanceStatus::Running;
                StepResult::Advance
            }
            Flow::Finished(output) => {
                instance.status = InstanceStatus::Completed;
                instance.output = Some(output.clone());
                StepResult::Complete(output)
            }
            Flow::Faulted(error) => {
                instance.status = InstanceStatus::Faulted;
                instance.error = Some(error.clone());
                StepResult::Fault(error)
            }
            Flow::Suspended(wait) => {
                instance.status = InstanceStatus::Waiting;
                StepResult::Suspend(wait)
            }
        }
    }

    // ---- driving ----------------------------------------------------------

    /// Step the instance until it suspends or terminates. The snapshot is
    /// reloaded every iteration, so cancellation and operator suspension
    /// take effect at the next step boundary.
    pub(crate) async fn drive(&self, id: Uuid) {
        loop {
            let loaded = match self.inner.persistence.load_instance(&id).await {
                Ok(loaded) => loaded,
                Err(e) => {
                    error!(instance = %id, error = %e, "failed to load instance");
                    return;
                }
            };
            let Some(mut instance) = loaded else {
                warn!(instance = %id, "instance disappeared from the store");
                return;
            };
            if instance.status != InstanceStatus::Running {
                return;
            }

            let step = match self.step(&mut instance).await {
                Ok(step) => step,
                Err(e) => {
                    error!(instance = %id, error = %e, "engine step failed");
                    return;
                }
            };
            // An operator may have suspended or cancelled the instance while
            // the step ran. The stored status wins: the guarded save commits
            // only while the snapshot is still Running, so a discarded step
            // leaves no trace.
            match self.persist_step(&instance, &step).await {
                Ok(true) => {}
                Ok(false) => {
                    debug!(instance = %id, "discarding step after status change");
                    return;
                }
                Err(e) => {
                    error!(instance = %id, error = %e, "failed to persist step");
                    return;
                }
            }
            match step.result {
                StepResult::Advance => {}
                StepResult::Suspend(_) => {
                    debug!(instance = %id, position = %instance.position, "instance suspended");
                    return;
                }
                StepResult::Complete(_) => {
                    info!(instance = %id, "workflow instance completed");
                    return;
                }
                StepResult::Fault(error) => {
                    warn!(instance = %id, %error, "workflow instance faulted");
                    return;
                }
            }
        }
    }

    async fn persist_step(&self, instance: &Instance, step: &Step) -> Result<bool> {
        let waits: Vec<WaitRecord> = match &step.result {
            StepResult::Suspend(wait) => vec![(**wait).clone()],
            _ => Vec::new(),
        };
        // A faulting step's emits are discarded, like a failing fork
        // branch's.
        let outbox: &[OutboxRecord] = match &step.result {
            StepResult::Fault(_) => &[],
            _ => &step.outbox,
        };
        self.inner
            .persistence
            .save_instance_if_status(instance, InstanceStatus::Running, outbox, &waits)
            .await
            .context(PersistenceSnafu)
    }

    // ---- waking -----------------------------------------------------------

    /// Resume an instance whose wait record came due: timers complete the
    /// waiting task, retry delays restore the protected block's entry data,
    /// listen deadlines take the fallback route or raise Timeout.
    pub(crate) async fn wake(&self, wait: WaitRecord) -> Result<()> {
        self.inner.persistence.delete_wait(&wait.id).await.context(PersistenceSnafu)?;
        let Some(mut instance) = self.instance(&wait.instance_id).await? else {
            return Ok(());
        };
        if instance.status != InstanceStatus::Waiting {
            // Cancelled or operator-suspended while the record was in flight.
            return Ok(());
        }
        instance.status = InstanceStatus::Running;
        instance.touch();
        let definition = self.definition(&instance.definition)?;

        let flow = match &wait.kind {
            WaitKind::Timer => {
                let data = instance.context.data.clone();
                let outcome =
                    self.complete_task(&mut instance, &definition, &wait.position, data, None);
                self.settle(&mut instance, &definition, &wait.position, outcome)
            }
            WaitKind::RetryDelay => self.apply_retry_wake(&mut instance, &wait),
            WaitKind::Listen(listen) => {
                debug!(instance = %instance.id, position = %wait.position, "event wait timed out");
                match listen.timeout_then.clone() {
                    Some(directive) => {
                        let data = instance.context.data.clone();
                        let outcome = self.advance(
                            &mut instance,
                            &definition,
                            &wait.position,
                            data,
                            Some(directive),
                        );
                        self.settle(&mut instance, &definition, &wait.position, outcome)
                    }
                    None => self.raise(
                        &mut instance,
                        &definition,
                        &wait.position,
                        WorkflowError::new(ErrorKind::Timeout, "event wait timed out"),
                    ),
                }
            }
        };
        self.persist_flow(instance, flow).await
    }

    /// Re-enter a protected block with the data it originally saw.
    fn apply_retry_wake(&self, instance: &mut Instance, wait: &WaitRecord) -> Flow {
        if let Some(try_position) = navigate::try_ancestors(&wait.position).into_iter().next() {
            if let Some(snapshot) = instance.context.scopes.get(&try_position.to_string()).cloned()
            {
                instance.context.data = snapshot;
            }
        }
        instance.position = wait.position.clone();
        Flow::Moved
    }

    /// Persist the outcome of a wake. The stored snapshot still says
    /// Waiting while the wake runs, so the guarded save rejects the write
    /// when an operator cancelled or suspended the instance in between.
    async fn persist_flow(&self, mut instance: Instance, flow: Flow) -> Result<()> {
        let result = self.apply_flow(&mut instance, flow);
        let waits: Vec<WaitRecord> = match &result {
            StepResult::Suspend(wait) => vec![(**wait).clone()],
            _ => Vec::new(),
        };
        let saved = self
            .inner
            .persistence
            .save_instance_if_status(&instance, InstanceStatus::Waiting, &[], &waits)
            .await
            .context(PersistenceSnafu)?;
        if !saved {
            debug!(instance = %instance.id, "discarding wake after status change");
            return Ok(());
        }
        if matches!(result, StepResult::Advance) {
            let engine = self.clone();
            let id = instance.id;
            tokio::spawn(async move { engine.drive(id).await });
        }
        Ok(())
    }

    /// Offer an event to every pending listen record.
    pub(crate) async fn handle_event(&self, event: &Event) -> Result<()> {
        let waits = self.inner.persistence.pending_waits().await.context(PersistenceSnafu)?;
        for mut wait in waits {
            let offer = {
                let WaitKind::Listen(listen) = &mut wait.kind else { continue };
                listen.offer(event)
            };
            match offer {
                Ok(Offer::Ignored) => {}
                Ok(Offer::Accumulated) => {
                    self.inner.persistence.save_wait(&wait).await.context(PersistenceSnafu)?;
                }
                Ok(Offer::Satisfied(value)) => {
                    self.inner.persistence.delete_wait(&wait.id).await.context(PersistenceSnafu)?;
                    let Some(mut instance) = self.instance(&wait.instance_id).await? else {
                        continue;
                    };
                    if instance.status != InstanceStatus::Waiting {
                        continue;
                    }
                    instance.status = InstanceStatus::Running;
                    instance.touch();
                    let definition = self.definition(&instance.definition)?;
                    let outcome = self.complete_task(
                        &mut instance,
                        &definition,
                        &wait.position,
                        value,
                        None,
                    );
                    let flow = self.settle(&mut instance, &definition, &wait.position, outcome);
                    self.persist_flow(instance, flow).await?;
                }
                Err(raised) => {
                    self.inner.persistence.delete_wait(&wait.id).await.context(PersistenceSnafu)?;
                    let Some(mut instance) = self.instance(&wait.instance_id).await? else {
                        continue;
                    };
                    if instance.status != InstanceStatus::Waiting {
                        continue;
                    }
                    instance.status = InstanceStatus::Running;
                    instance.touch();
                    let definition = self.definition(&instance.definition)?;
                    let flow = self.raise(&mut instance, &definition, &wait.position, raised);
                    self.persist_flow(instance, flow).await?;
                }
            }
        }
        Ok(())
    }

    /// Deliver pending outbox records to the bus, at least once.
    pub(crate) async fn dispatch_outbox(&self) -> Result<()> {
        let batch = self
            .inner
            .persistence
            .pending_outbox(self.inner.config.outbox_batch_size)
            .await
            .context(PersistenceSnafu)?;
        for mut record in batch {
            record.record_attempt();
            match self.inner.bus.publish(Event::new(record.event.clone())).await {
                Ok(()) => {
                    record.status = OutboxStatus::Delivered;
                    debug!(record = %record.id, "outbox record delivered");
                }
                Err(e) => {
                    warn!(record = %record.id, error = %e, "outbox delivery failed");
                    if record.attempts >= self.inner.config.outbox_max_attempts {
                        record.status = OutboxStatus::Failed;
                        error!(record = %record.id, "outbox record gave up after max attempts");
                    }
                }
            }
            self.inner.persistence.save_outbox(&record).await.context(PersistenceSnafu)?;
        }
        Ok(())
    }

    // ---- fork branches ------------------------------------------------------

    /// Run a branch sub-cursor to completion within the current step.
    /// Suspensions inside the branch are serviced inline: timers sleep,
    /// listens subscribe to the live bus. Branch outbox records are
    /// collected for the fork's atomic persist.
    pub(crate) async fn run_branch(
        &self,
        mut instance: Instance,
    ) -> (Instance, std::result::Result<Value, WorkflowError>, Vec<OutboxRecord>) {
        let mut outbox = Vec::new();
        loop {
            let step = match self.step(&mut instance).await {
                Ok(step) => step,
                Err(e) => {
                    let raised = WorkflowError::new(ErrorKind::Runtime, e.to_string());
                    return (instance, Err(raised), outbox);
                }
            };
            outbox.extend(step.outbox);
            let result = match step.result {
                StepResult::Suspend(wait) => {
                    let flow = self.service_wait_inline(&mut instance, *wait).await;
                    self.apply_flow(&mut instance, flow)
                }
                other => other,
            };
            match result {
                StepResult::Advance => {}
                StepResult::Complete(value) => return (instance, Ok(value), outbox),
                StepResult::Fault(error) => return (instance, Err(error), outbox),
                StepResult::Suspend(_) => {
                    // service_wait_inline never re-suspends without looping.
                    let raised =
                        WorkflowError::new(ErrorKind::Runtime, "branch suspended unexpectedly");
                    return (instance, Err(raised), outbox);
                }
            }
        }
    }

    async fn service_wait_inline(&self, instance: &mut Instance, wait: WaitRecord) -> Flow {
        let definition = match self.definition(&instance.definition) {
            Ok(definition) => definition,
            Err(e) => return Flow::Faulted(WorkflowError::new(ErrorKind::Runtime, e.to_string())),
        };
        let mut wait = wait;
        loop {
            let flow = match wait.kind.clone() {
                WaitKind::Timer => {
                    sleep_until(wait.wake_at).await;
                    instance.status = InstanceStatus::Running;
                    let data = instance.context.data.clone();
                    let outcome =
                        self.complete_task(instance, &definition, &wait.position, data, None);
                    self.settle(instance, &definition, &wait.position, outcome)
                }
                WaitKind::RetryDelay => {
                    sleep_until(wait.wake_at).await;
                    instance.status = InstanceStatus::Running;
                    self.apply_retry_wake(instance, &wait)
                }
                WaitKind::Listen(listen) => {
                    self.listen_inline(instance, &definition, &wait, listen).await
                }
            };
            match flow {
                Flow::Suspended(next) => {
                    instance.status = InstanceStatus::Waiting;
                    wait = *next;
                }
                other => return other,
            }
        }
    }

    async fn listen_inline(
        &self,
        instance: &mut Instance,
        definition: &WorkflowDefinition,
        wait: &WaitRecord,
        mut listen: ListenWait,
    ) -> Flow {
        let mut rx = self.inner.bus.subscribe();
        loop {
            let received = match wait.wake_at {
                Some(deadline) => {
                    let remaining =
                        (deadline - Utc::now()).to_std().unwrap_or(StdDuration::ZERO);
                    match tokio::time::timeout(remaining, rx.recv()).await {
                        Ok(received) => received,
                        Err(_) => {
                            instance.status = InstanceStatus::Running;
                            return match listen.timeout_then.clone() {
                                Some(directive) => {
                                    let data = instance.context.data.clone();
                                    let outcome = self.advance(
                                        instance,
                                        definition,
                                        &wait.position,
                                        data,
                                        Some(directive),
                                    );
                                    self.settle(instance, definition, &wait.position, outcome)
                                }
                                None => self.raise(
                                    instance,
                                    definition,
                                    &wait.position,
                                    WorkflowError::new(ErrorKind::Timeout, "event wait timed out"),
                                ),
                            };
                        }
                    }
                }
                None => rx.recv().await,
            };
            match received {
                Ok(event) => match listen.offer(&event) {
                    Ok(Offer::Satisfied(value)) => {
                        instance.status = InstanceStatus::Running;
                        let outcome = self.complete_task(
                            instance,
                            definition,
                            &wait.position,
                            value,
                            None,
                        );
                        return self.settle(instance, definition, &wait.position, outcome);
                    }
                    Ok(Offer::Ignored | Offer::Accumulated) => {}
                    Err(raised) => {
                        instance.status = InstanceStatus::Running;
                        return self.raise(instance, definition, &wait.position, raised);
                    }
                },
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(instance = %instance.id, missed, "branch listener lagged behind the bus");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    instance.status = InstanceStatus::Running;
                    return self.raise(
                        instance,
                        definition,
                        &wait.position,
                        WorkflowError::new(ErrorKind::Communication, "event bus closed"),
                    );
                }
            }
        }
    }

    // ---- background loops ---------------------------------------------------

    fn spawn_background(&self) {
        let mut handles = Vec::with_capacity(3);

        // Timer sweep: wake due timers, retry delays and listen deadlines.
        let weak = Arc::downgrade(&self.inner);
        let interval = self.inner.config.timer_poll_interval_ms;
        handles.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(StdDuration::from_millis(interval));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let Some(engine) = Engine::upgrade(&weak) else { break };
                if let Err(e) = engine.wake_due_waits().await {
                    warn!(error = %e, "timer sweep failed");
                }
            }
        }));

        // Event correlation: offer every bus event to pending listen waits.
        let weak = Arc::downgrade(&self.inner);
        let mut rx = self.inner.bus.subscribe();
        handles.push(tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        let Some(engine) = Engine::upgrade(&weak) else { break };
                        if let Err(e) = engine.handle_event(&event).await {
                            warn!(error = %e, "event correlation failed");
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "event correlation lagged behind the bus");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }));

        // Outbox dispatch.
        let weak = Arc::downgrade(&self.inner);
        let interval = self.inner.config.outbox_poll_interval_ms;
        handles.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(StdDuration::from_millis(interval));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let Some(engine) = Engine::upgrade(&weak) else { break };
                if let Err(e) = engine.dispatch_outbox().await {
                    warn!(error = %e, "outbox dispatch failed");
                }
            }
        }));

        if let Ok(mut background) = self.inner.background.lock() {
            background.extend(handles);
        }
    }

    fn upgrade(weak: &Weak<EngineInner>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }

    async fn wake_due_waits(&self) -> Result<()> {
        let now = Utc::now();
        let due: Vec<WaitRecord> = self
            .inner
            .persistence
            .pending_waits()
            .await
            .context(PersistenceSnafu)?
            .into_iter()
            .filter(|wait| wait.is_due(now))
            .collect();
        for wait in due {
            if let Err(e) = self.wake(wait).await {
                warn!(error = %e, "failed to wake suspended instance");
            }
        }
        Ok(())
    }
}

/// Run a task's input pipeline: structural schema check, then the `from`
/// transform over the incoming data.
fn task_input(
    task: &TaskDefinition,
    data: &Value,
    vars: &Vars,
    position: &Position,
) -> std::result::Result<Value, WorkflowError> {
    let Some(clause) = &task.common().input else {
        return Ok(data.clone());
    };
    if let Some(schema) = &clause.schema {
        schema::validate(schema, data)
            .map_err(|e| WorkflowError::new(ErrorKind::Validation, e.to_string()).at(position))?;
    }
    let Some(from) = &clause.from else {
        return Ok(data.clone());
    };
    expressions::evaluate_raw(from, data, vars)
        .map_err(|e| WorkflowError::new(ErrorKind::Expression, e.to_string()).at(position))
}

/// An `as` transform is either a string expression or an object template.
pub(crate) fn eval_transform(
    template: &Value,
    data: &Value,
    vars: &Vars,
) -> std::result::Result<Value, WorkflowError> {
    let result = match template {
        Value::String(expression) => expressions::evaluate(expression, data, vars),
        other => expressions::evaluate_template(other, data, vars),
    };
    result.map_err(|e| WorkflowError::new(ErrorKind::Expression, e.to_string()))
}

/// Whether a catch clause matches the raised error: `errors.with` field
/// equality, then `when`/`exceptWhen` with the error value as input and
/// bound as `$error`.
fn catch_matches(
    catch: &CatchClause,
    error: &WorkflowError,
    base_vars: &Vars,
) -> std::result::Result<bool, WorkflowError> {
    let error_value = error.to_value();
    if let Some(filter) = &catch.errors {
        if let Some(with) = &filter.with {
            for (key, expected) in with {
                if error_value.get(key) != Some(expected) {
                    return Ok(false);
                }
            }
        }
    }

    let mut vars = base_vars.clone();
    vars.insert("error".to_string(), error_value.clone());
    if let Some(when) = &catch.when {
        let matched = expressions::evaluate_raw(when, &error_value, &vars)
            .map_err(|e| WorkflowError::new(ErrorKind::Expression, e.to_string()))?;
        if !expressions::truthy(&matched) {
            return Ok(false);
        }
    }
    if let Some(except_when) = &catch.except_when {
        let excluded = expressions::evaluate_raw(except_when, &error_value, &vars)
            .map_err(|e| WorkflowError::new(ErrorKind::Expression, e.to_string()))?;
        if expressions::truthy(&excluded) {
            return Ok(false);
        }
    }
    Ok(true)
}

fn resolve_retry<'a>(
    definition: &'a WorkflowDefinition,
    policy: &'a RetryPolicyOrRef,
) -> Option<&'a RetryPolicy> {
    match policy {
        RetryPolicyOrRef::Policy(policy) => Some(policy),
        RetryPolicyOrRef::Reference(name) => definition.use_.retries.get(name),
    }
}

async fn sleep_until(wake_at: Option<DateTime<Utc>>) {
    if let Some(at) = wake_at {
        if let Ok(remaining) = (at - Utc::now()).to_std() {
            tokio::time::sleep(remaining).await;
        }
    }
}
