//! Connector seam for `call` tasks
//!
//! Concrete transports (HTTP, gRPC, scripts, sub-workflows) live outside the
//! engine; they register here under the call target name. A connector either
//! returns a value or a [`WorkflowError`] already classified into the error
//! taxonomy, so catch-matching is uniform regardless of transport.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, RwLock};

use crate::error::{ErrorKind, WorkflowError};

pub type ConnectorResult = std::result::Result<Value, WorkflowError>;

#[async_trait]
pub trait Connector: Send + Sync {
    /// Invoke the external operation with the resolved `with` arguments.
    async fn invoke(&self, args: Value) -> ConnectorResult;
}

/// Registry of named connectors consulted by `call` tasks.
#[derive(Default, Clone)]
pub struct ConnectorRegistry {
    connectors: Arc<RwLock<HashMap<String, Arc<dyn Connector>>>>,
}

impl ConnectorRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, name: impl Into<String>, connector: Arc<dyn Connector>) {
        if let Ok(mut map) = self.connectors.write() {
            map.insert(name.into(), connector);
        }
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn Connector>> {
        self.connectors.read().ok().and_then(|map| map.get(name).cloned())
    }
}

impl std::fmt::Debug for ConnectorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<String> = self
            .connectors
            .read()
            .map(|map| map.keys().cloned().collect())
            .unwrap_or_default();
        f.debug_struct("ConnectorRegistry").field("connectors", &names).finish()
    }
}

type BoxedCall =
    dyn Fn(Value) -> Pin<Box<dyn Future<Output = ConnectorResult> + Send>> + Send + Sync;

/// Closure-backed connector, mainly for tests and embedders.
pub struct FnConnector {
    call: Box<BoxedCall>,
}

impl FnConnector {
    pub fn new<F, Fut>(call: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ConnectorResult> + Send + 'static,
    {
        Self { call: Box::new(move |args| Box::pin(call(args))) }
    }
}

#[async_trait]
impl Connector for FnConnector {
    async fn invoke(&self, args: Value) -> ConnectorResult {
        (self.call)(args).await
    }
}

/// Default classification for transport-level failures.
#[must_use]
pub fn communication_error(detail: impl Into<String>) -> WorkflowError {
    WorkflowError::new(ErrorKind::Communication, detail)
}
