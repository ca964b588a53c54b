use async_trait::async_trait;
use redb::ReadableTable;
use std::sync::Arc;
use uuid::Uuid;

use crate::correlation::WaitRecord;
use crate::instance::{Instance, InstanceStatus};
use crate::outbox::{OutboxRecord, OutboxStatus};
use crate::persistence::{Error, PersistenceProvider, Result};

/// Embedded-database provider backed by redb. Keys are UUID strings, values
/// are JSON snapshots; redb's write transactions give the atomicity that
/// `save_instance_if_status` requires.
#[derive(Debug)]
pub struct RedbPersistence {
    db: Arc<redb::Database>,
}

const INSTANCES_TABLE: redb::TableDefinition<&str, &[u8]> =
    redb::TableDefinition::new("instances");
const WAITS_TABLE: redb::TableDefinition<&str, &[u8]> = redb::TableDefinition::new("waits");
const OUTBOX_TABLE: redb::TableDefinition<&str, &[u8]> = redb::TableDefinition::new("outbox");

impl RedbPersistence {
    pub fn new(path: &str) -> Result<Self> {
        let db = redb::Database::create(path)
            .map_err(|e| Error::Database { message: format!("Failed to create database: {e}") })?;
        let write_txn = db.begin_write().map_err(|e| Error::Database {
            message: format!("Failed to begin write transaction: {e}"),
        })?;
        {
            write_txn.open_table(INSTANCES_TABLE).map_err(|e| Error::Database {
                message: format!("Failed to open instances table: {e}"),
            })?;
            write_txn.open_table(WAITS_TABLE).map_err(|e| Error::Database {
                message: format!("Failed to open waits table: {e}"),
            })?;
            write_txn.open_table(OUTBOX_TABLE).map_err(|e| Error::Database {
                message: format!("Failed to open outbox table: {e}"),
            })?;
        }
        write_txn
            .commit()
            .map_err(|e| Error::Database { message: format!("Failed to commit transaction: {e}") })?;
        Ok(Self { db: Arc::new(db) })
    }

    fn write_all(
        db: &redb::Database,
        instance: Option<&Instance>,
        outbox: &[OutboxRecord],
        waits: &[WaitRecord],
    ) -> Result<()> {
        let write_txn = db.begin_write().map_err(|e| Error::Database {
            message: format!("Failed to begin write transaction: {e}"),
        })?;
        {
            if let Some(instance) = instance {
                let mut table = write_txn.open_table(INSTANCES_TABLE).map_err(|e| {
                    Error::Database { message: format!("Failed to open instances table: {e}") }
                })?;
                let value =
                    serde_json::to_vec(instance).map_err(|e| Error::Serialization { source: e })?;
                table
                    .insert(instance.id.to_string().as_str(), value.as_slice())
                    .map_err(|e| Error::Database {
                        message: format!("Failed to insert instance: {e}"),
                    })?;
            }
            if !outbox.is_empty() {
                let mut table = write_txn.open_table(OUTBOX_TABLE).map_err(|e| {
                    Error::Database { message: format!("Failed to open outbox table: {e}") }
                })?;
                for record in outbox {
                    let value = serde_json::to_vec(record)
                        .map_err(|e| Error::Serialization { source: e })?;
                    table
                        .insert(record.id.to_string().as_str(), value.as_slice())
                        .map_err(|e| Error::Database {
                            message: format!("Failed to insert outbox record: {e}"),
                        })?;
                }
            }
            if !waits.is_empty() {
                let mut table = write_txn.open_table(WAITS_TABLE).map_err(|e| {
                    Error::Database { message: format!("Failed to open waits table: {e}") }
                })?;
                for wait in waits {
                    let value =
                        serde_json::to_vec(wait).map_err(|e| Error::Serialization { source: e })?;
                    table
                        .insert(wait.id.to_string().as_str(), value.as_slice())
                        .map_err(|e| Error::Database {
                            message: format!("Failed to insert wait record: {e}"),
                        })?;
                }
            }
        }
        write_txn
            .commit()
            .map_err(|e| Error::Database { message: format!("Failed to commit transaction: {e}") })
    }

    /// Status-guarded variant of `write_all`: the instance row is re-read
    /// inside the write transaction and the whole write aborts when the
    /// stored status no longer matches.
    fn write_all_if_status(
        db: &redb::Database,
        instance: &Instance,
        expected: InstanceStatus,
        outbox: &[OutboxRecord],
        waits: &[WaitRecord],
    ) -> Result<bool> {
        let write_txn = db.begin_write().map_err(|e| Error::Database {
            message: format!("Failed to begin write transaction: {e}"),
        })?;
        let key = instance.id.to_string();
        {
            let mut table = write_txn.open_table(INSTANCES_TABLE).map_err(|e| {
                Error::Database { message: format!("Failed to open instances table: {e}") }
            })?;
            let stored: Option<Instance> = match table.get(key.as_str()).map_err(|e| {
                Error::Database { message: format!("Failed to get instance: {e}") }
            })? {
                Some(value) => Some(
                    serde_json::from_slice(value.value())
                        .map_err(|e| Error::Serialization { source: e })?,
                ),
                None => None,
            };
            if stored.map(|stored| stored.status) != Some(expected) {
                drop(table);
                write_txn.abort().map_err(|e| Error::Database {
                    message: format!("Failed to abort transaction: {e}"),
                })?;
                return Ok(false);
            }
            let value =
                serde_json::to_vec(instance).map_err(|e| Error::Serialization { source: e })?;
            table.insert(key.as_str(), value.as_slice()).map_err(|e| Error::Database {
                message: format!("Failed to insert instance: {e}"),
            })?;
        }
        if !outbox.is_empty() {
            let mut table = write_txn.open_table(OUTBOX_TABLE).map_err(|e| Error::Database {
                message: format!("Failed to open outbox table: {e}"),
            })?;
            for record in outbox {
                let value =
                    serde_json::to_vec(record).map_err(|e| Error::Serialization { source: e })?;
                table
                    .insert(record.id.to_string().as_str(), value.as_slice())
                    .map_err(|e| Error::Database {
                        message: format!("Failed to insert outbox record: {e}"),
                    })?;
            }
        }
        if !waits.is_empty() {
            let mut table = write_txn.open_table(WAITS_TABLE).map_err(|e| Error::Database {
                message: format!("Failed to open waits table: {e}"),
            })?;
            for wait in waits {
                let value =
                    serde_json::to_vec(wait).map_err(|e| Error::Serialization { source: e })?;
                table
                    .insert(wait.id.to_string().as_str(), value.as_slice())
                    .map_err(|e| Error::Database {
                        message: format!("Failed to insert wait record: {e}"),
                    })?;
            }
        }
        write_txn
            .commit()
            .map_err(|e| Error::Database { message: format!("Failed to commit transaction: {e}") })?;
        Ok(true)
    }

    fn read_all<T: serde::de::DeserializeOwned>(
        db: &redb::Database,
        table_def: redb::TableDefinition<'_, &str, &[u8]>,
    ) -> Result<Vec<T>> {
        let read_txn = db.begin_read().map_err(|e| Error::Database {
            message: format!("Failed to begin read transaction: {e}"),
        })?;
        let table = read_txn
            .open_table(table_def)
            .map_err(|e| Error::Database { message: format!("Failed to open table: {e}") })?;
        let mut items = Vec::new();
        let range = table
            .range::<&str>(..)
            .map_err(|e| Error::Database { message: format!("Failed to create range: {e}") })?;
        for item in range {
            let (_, value) = item
                .map_err(|e| Error::Database { message: format!("Failed to read item: {e}") })?;
            let parsed: T = serde_json::from_slice(value.value())
                .map_err(|e| Error::Serialization { source: e })?;
            items.push(parsed);
        }
        Ok(items)
    }
}

#[async_trait]
impl PersistenceProvider for RedbPersistence {
    async fn save_instance(&self, instance: &Instance) -> Result<()> {
        let db = self.db.clone();
        let instance = instance.clone();
        tokio::task::spawn_blocking(move || Self::write_all(&db, Some(&instance), &[], &[]))
            .await
            .map_err(|e| Error::Database { message: format!("Task join error: {e}") })?
    }

    async fn load_instance(&self, id: &Uuid) -> Result<Option<Instance>> {
        let db = self.db.clone();
        let key = id.to_string();
        tokio::task::spawn_blocking(move || -> Result<Option<Instance>> {
            let read_txn = db.begin_read().map_err(|e| Error::Database {
                message: format!("Failed to begin read transaction: {e}"),
            })?;
            let table = read_txn.open_table(INSTANCES_TABLE).map_err(|e| Error::Database {
                message: format!("Failed to open instances table: {e}"),
            })?;
            let Some(value) = table.get(key.as_str()).map_err(|e| Error::Database {
                message: format!("Failed to get instance: {e}"),
            })?
            else {
                return Ok(None);
            };
            let instance: Instance = serde_json::from_slice(value.value())
                .map_err(|e| Error::Serialization { source: e })?;
            Ok(Some(instance))
        })
        .await
        .map_err(|e| Error::Database { message: format!("Task join error: {e}") })?
    }

    async fn list_instances(&self) -> Result<Vec<Instance>> {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || Self::read_all(&db, INSTANCES_TABLE))
            .await
            .map_err(|e| Error::Database { message: format!("Task join error: {e}") })?
    }

    async fn save_instance_if_status(
        &self,
        instance: &Instance,
        expected: InstanceStatus,
        outbox: &[OutboxRecord],
        waits: &[WaitRecord],
    ) -> Result<bool> {
        let db = self.db.clone();
        let instance = instance.clone();
        let outbox = outbox.to_vec();
        let waits = waits.to_vec();
        tokio::task::spawn_blocking(move || {
            Self::write_all_if_status(&db, &instance, expected, &outbox, &waits)
        })
        .await
        .map_err(|e| Error::Database { message: format!("Task join error: {e}") })?
    }

    async fn save_wait(&self, wait: &WaitRecord) -> Result<()> {
        let db = self.db.clone();
        let wait = wait.clone();
        tokio::task::spawn_blocking(move || Self::write_all(&db, None, &[], &[wait]))
            .await
            .map_err(|e| Error::Database { message: format!("Task join error: {e}") })?
    }

    async fn delete_wait(&self, id: &Uuid) -> Result<()> {
        let db = self.db.clone();
        let key = id.to_string();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let write_txn = db.begin_write().map_err(|e| Error::Database {
                message: format!("Failed to begin write transaction: {e}"),
            })?;
            {
                let mut table = write_txn.open_table(WAITS_TABLE).map_err(|e| Error::Database {
                    message: format!("Failed to open waits table: {e}"),
                })?;
                table.remove(key.as_str()).map_err(|e| Error::Database {
                    message: format!("Failed to remove wait record: {e}"),
                })?;
            }
            write_txn.commit().map_err(|e| Error::Database {
                message: format!("Failed to commit transaction: {e}"),
            })
        })
        .await
        .map_err(|e| Error::Database { message: format!("Task join error: {e}") })?
    }

    async fn pending_waits(&self) -> Result<Vec<WaitRecord>> {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || Self::read_all(&db, WAITS_TABLE))
            .await
            .map_err(|e| Error::Database { message: format!("Task join error: {e}") })?
    }

    async fn waits_for_instance(&self, instance_id: &Uuid) -> Result<Vec<WaitRecord>> {
        let instance_id = *instance_id;
        let all = self.pending_waits().await?;
        Ok(all.into_iter().filter(|wait| wait.instance_id == instance_id).collect())
    }

    async fn save_outbox(&self, record: &OutboxRecord) -> Result<()> {
        let db = self.db.clone();
        let record = record.clone();
        tokio::task::spawn_blocking(move || Self::write_all(&db, None, &[record], &[]))
            .await
            .map_err(|e| Error::Database { message: format!("Task join error: {e}") })?
    }

    async fn pending_outbox(&self, limit: usize) -> Result<Vec<OutboxRecord>> {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || -> Result<Vec<OutboxRecord>> {
            let mut pending: Vec<OutboxRecord> = Self::read_all(&db, OUTBOX_TABLE)?
                .into_iter()
                .filter(|record: &OutboxRecord| record.status == OutboxStatus::Pending)
                .collect();
            pending.sort_by_key(|record| record.created_at);
            pending.truncate(limit);
            Ok(pending)
        })
        .await
        .map_err(|e| Error::Database { message: format!("Task join error: {e}") })?
    }
}
