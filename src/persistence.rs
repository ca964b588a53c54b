//! Persistence seam
//!
//! Everything the engine needs to survive a restart goes through this
//! trait: instance snapshots, wait records and outbox records. The one
//! atomicity requirement is [`PersistenceProvider::save_instance_if_status`]:
//! the snapshot and the effects it produced (emitted events, suspension
//! records) commit as a single unit, and only while the stored status still
//! matches, so a crash can never deliver an event for a state transition
//! that was lost, and a concurrent operator cancel is never overwritten.

use async_trait::async_trait;
use snafu::prelude::*;
use uuid::Uuid;

use crate::correlation::WaitRecord;
use crate::instance::{Instance, InstanceStatus};
use crate::outbox::OutboxRecord;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Persistence error: {message}"))]
    Persistence { message: String },

    #[snafu(display("Database error: {message}"))]
    Database { message: String },

    #[snafu(display("Serialization error: {source}"))]
    Serialization { source: serde_json::Error },

    #[snafu(display("Instance not found: {id}"))]
    InstanceNotFound { id: Uuid },
}

pub type Result<T> = std::result::Result<T, Error>;

#[async_trait]
pub trait PersistenceProvider: Send + Sync + std::fmt::Debug {
    async fn save_instance(&self, instance: &Instance) -> Result<()>;
    async fn load_instance(&self, id: &Uuid) -> Result<Option<Instance>>;
    async fn list_instances(&self) -> Result<Vec<Instance>>;

    /// Persist the instance snapshot together with the effects the step
    /// produced, in one atomic unit, and only while the stored snapshot
    /// still has the `expected` status. Returns `false` and writes nothing
    /// when the status moved on, so an operator cancel or suspend that
    /// committed mid-step is never overwritten. The check and the write
    /// happen inside one transaction (or under one lock for the in-memory
    /// provider).
    async fn save_instance_if_status(
        &self,
        instance: &Instance,
        expected: InstanceStatus,
        outbox: &[OutboxRecord],
        waits: &[WaitRecord],
    ) -> Result<bool>;

    async fn save_wait(&self, wait: &WaitRecord) -> Result<()>;
    async fn delete_wait(&self, id: &Uuid) -> Result<()>;
    async fn pending_waits(&self) -> Result<Vec<WaitRecord>>;
    async fn waits_for_instance(&self, instance_id: &Uuid) -> Result<Vec<WaitRecord>>;

    async fn save_outbox(&self, record: &OutboxRecord) -> Result<()>;
    async fn pending_outbox(&self, limit: usize) -> Result<Vec<OutboxRecord>>;
}
