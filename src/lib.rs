//! # Rook - Declarative Workflow Orchestration Engine
//!
//! Rook executes workflows declared in a YAML DSL: a named task graph with
//! data-flow pipelines, try/catch/retry error handling, timers, event
//! correlation and parallel branches, interpreted over durable snapshots.
//!
//! ## Features
//!
//! - **Resumable Interpretation**: Execution is a pure step function over a
//!   persisted instance; a crash between steps loses nothing
//! - **Position Addressing**: Every task has a stable path into the
//!   definition tree, so a snapshot pinpoints exactly where to resume
//! - **Data-Flow Pipelines**: Per-task input/output/export transforms with
//!   JQ expressions and structural schema checks
//! - **Error Machinery**: RFC-7807 shaped errors travel the scope chain
//!   through catch filters and durable retry schedules
//! - **Event Correlation**: `listen` tasks suspend on persisted
//!   subscriptions with one/all/any fan-in and timeouts
//! - **Durable Outbox**: Emitted events are persisted atomically with the
//!   step that produced them and delivered at least once
//!
//! ## Core Modules
//!
//! - [`engine`] - The stepping interpreter, flow directives and background loops
//! - [`model`] - The immutable parsed task-graph model
//! - [`position`] - Stable task addressing into the definition tree
//! - [`expressions`] - JQ expression evaluation over the data flow
//! - [`correlation`] - Suspension records and event matching
//! - [`persistence`] - The storage seam and its providers
//! - [`connector`] - The `call` task's dispatch registry
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use rook::Engine;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = Engine::builder().build();
//!
//! let key = engine.register_yaml(
//!     r#"
//! document: { dsl: '1.0.0', namespace: orders, name: greet, version: '0.1.0' }
//! do:
//!   - greet:
//!       set:
//!         greeting: '${ "hello " + .name }'
//! "#,
//! )?;
//!
//! let id = engine.start(&key, serde_json::json!({"name": "world"})).await?;
//! let instance = engine.wait_for_completion(&id, Duration::from_secs(5)).await?;
//! println!("output: {:?}", instance.output);
//! # Ok(())
//! # }
//! ```
//!
//! ## Using Durable Persistence
//!
//! ```rust,no_run
//! use rook::Engine;
//! use rook::providers::persistence::RedbPersistence;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let persistence = Arc::new(RedbPersistence::new("workflows.db")?);
//! let engine = Engine::builder().with_persistence(persistence).build();
//!
//! // Re-drive whatever the previous process left running.
//! engine.recover().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Configuration
//!
//! Rook can be configured via:
//! - Configuration file (`rook.yaml`)
//! - Environment variables (prefix: `ROOK__`)
//!
//! See [`config::EngineConfig`] for available options.

pub mod builder;
pub mod config;
pub mod connector;
pub mod context;
pub mod correlation;
pub mod duration;
pub mod engine;
pub mod error;
pub mod eventbus;
pub mod expressions;
pub mod instance;
pub mod model;
pub mod outbox;
pub mod persistence;
pub mod position;
pub mod providers;
pub mod retry;
pub mod schema;
pub mod validate;

pub use builder::EngineBuilder;
pub use config::EngineConfig;
pub use connector::{Connector, ConnectorRegistry, FnConnector};
pub use engine::{Engine, Step, StepResult};
pub use error::{ErrorKind, WorkflowError};
pub use eventbus::{Event, EventBus, InMemoryEventBus};
pub use instance::{Instance, InstanceStatus};
pub use model::WorkflowDefinition;
pub use persistence::PersistenceProvider;
pub use position::Position;
