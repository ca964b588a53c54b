use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

use crate::correlation::WaitRecord;
use crate::instance::{Instance, InstanceStatus};
use crate::outbox::{OutboxRecord, OutboxStatus};
use crate::persistence::{Error, PersistenceProvider, Result};

/// In-memory provider for tests and ephemeral embedding. "Atomic" effects
/// are trivially atomic under one mutex.
#[derive(Debug, Default)]
pub struct InMemoryPersistence {
    state: Mutex<State>,
}

#[derive(Debug, Default)]
struct State {
    instances: HashMap<Uuid, Instance>,
    waits: HashMap<Uuid, WaitRecord>,
    outbox: HashMap<Uuid, OutboxRecord>,
}

impl InMemoryPersistence {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn locked(&self) -> Result<std::sync::MutexGuard<'_, State>> {
        self.state
            .lock()
            .map_err(|_| Error::Persistence { message: "state mutex poisoned".to_string() })
    }
}

#[async_trait]
impl PersistenceProvider for InMemoryPersistence {
    async fn save_instance(&self, instance: &Instance) -> Result<()> {
        self.locked()?.instances.insert(instance.id, instance.clone());
        Ok(())
    }

    async fn load_instance(&self, id: &Uuid) -> Result<Option<Instance>> {
        Ok(self.locked()?.instances.get(id).cloned())
    }

    async fn list_instances(&self) -> Result<Vec<Instance>> {
        Ok(self.locked()?.instances.values().cloned().collect())
    }

    async fn save_instance_if_status(
        &self,
        instance: &Instance,
        expected: InstanceStatus,
        outbox: &[OutboxRecord],
        waits: &[WaitRecord],
    ) -> Result<bool> {
        let mut state = self.locked()?;
        match state.instances.get(&instance.id) {
            Some(stored) if stored.status == expected => {}
            _ => return Ok(false),
        }
        state.instances.insert(instance.id, instance.clone());
        for record in outbox {
            state.outbox.insert(record.id, record.clone());
        }
        for wait in waits {
            state.waits.insert(wait.id, wait.clone());
        }
        Ok(true)
    }

    async fn save_wait(&self, wait: &WaitRecord) -> Result<()> {
        self.locked()?.waits.insert(wait.id, wait.clone());
        Ok(())
    }

    async fn delete_wait(&self, id: &Uuid) -> Result<()> {
        self.locked()?.waits.remove(id);
        Ok(())
    }

    async fn pending_waits(&self) -> Result<Vec<WaitRecord>> {
        Ok(self.locked()?.waits.values().cloned().collect())
    }

    async fn waits_for_instance(&self, instance_id: &Uuid) -> Result<Vec<WaitRecord>> {
        Ok(self
            .locked()?
            .waits
            .values()
            .filter(|wait| wait.instance_id == *instance_id)
            .cloned()
            .collect())
    }

    async fn save_outbox(&self, record: &OutboxRecord) -> Result<()> {
        self.locked()?.outbox.insert(record.id, record.clone());
        Ok(())
    }

    async fn pending_outbox(&self, limit: usize) -> Result<Vec<OutboxRecord>> {
        let state = self.locked()?;
        let mut pending: Vec<OutboxRecord> = state
            .outbox
            .values()
            .filter(|record| record.status == OutboxStatus::Pending)
            .cloned()
            .collect();
        pending.sort_by_key(|record| record.created_at);
        pending.truncate(limit);
        Ok(pending)
    }
}
