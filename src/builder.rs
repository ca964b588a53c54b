//! Fluent construction of an [`Engine`]
//!
//! Defaults are fully in-memory, which is what tests and embedded callers
//! want; production deployments swap in [`RedbPersistence`] and tune the
//! configuration.
//!
//! [`RedbPersistence`]: crate::providers::persistence::RedbPersistence

use std::sync::Arc;

use crate::config::EngineConfig;
use crate::connector::Connector;
use crate::engine::Engine;
use crate::eventbus::{EventBus, InMemoryEventBus};
use crate::persistence::PersistenceProvider;
use crate::providers::persistence::InMemoryPersistence;

/// Builder for [`Engine`].
///
/// # Examples
///
/// ```
/// use rook::Engine;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let engine = Engine::builder().build();
/// let key = engine
///     .register_yaml(
///         r#"
/// document: { dsl: '1.0.0', namespace: demo, name: hello, version: '0.1.0' }
/// do:
///   - greet:
///       set:
///         greeting: hello
/// "#,
///     )
///     .unwrap();
/// assert_eq!(key, "demo/hello/0.1.0");
/// # }
/// ```
#[derive(Default)]
pub struct EngineBuilder {
    config: Option<EngineConfig>,
    persistence: Option<Arc<dyn PersistenceProvider>>,
    event_bus: Option<Arc<dyn EventBus>>,
    connectors: Vec<(String, Arc<dyn Connector>)>,
}

impl EngineBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = Some(config);
        self
    }

    #[must_use]
    pub fn with_persistence(mut self, persistence: Arc<dyn PersistenceProvider>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    #[must_use]
    pub fn with_event_bus(mut self, event_bus: Arc<dyn EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    /// Register a connector under the name `call` tasks address it by.
    #[must_use]
    pub fn with_connector(mut self, name: impl Into<String>, connector: Arc<dyn Connector>) -> Self {
        self.connectors.push((name.into(), connector));
        self
    }

    /// Build the engine and spawn its background loops. Must run inside a
    /// tokio runtime.
    #[must_use]
    pub fn build(self) -> Engine {
        let config = self.config.unwrap_or_default();
        let persistence = self
            .persistence
            .unwrap_or_else(|| Arc::new(InMemoryPersistence::new()));
        let event_bus = self
            .event_bus
            .unwrap_or_else(|| Arc::new(InMemoryEventBus::new(config.event_channel_capacity)));
        Engine::assemble(config, persistence, event_bus, self.connectors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::FnConnector;

    #[tokio::test]
    async fn test_defaults_build_an_in_memory_engine() {
        let engine = EngineBuilder::new().build();
        assert!(engine.instances().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_connectors_registered_at_build() {
        let engine = EngineBuilder::new()
            .with_connector(
                "echo",
                Arc::new(FnConnector::new(|args| async move { Ok(args) })),
            )
            .build();
        assert!(engine.connectors().get("echo").is_some());
        assert!(engine.connectors().get("missing").is_none());
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let config = EngineConfig { outbox_batch_size: 4, ..Default::default() };
        let engine = EngineBuilder::new().with_config(config).build();
        engine.shutdown();
        engine.shutdown();
    }
}
