//! Durable effects: the outbox record
//!
//! An `emit` task never talks to the bus directly. The record is persisted
//! in the same atomic unit as the instance snapshot that produced it, then
//! a dispatcher (see the engine's background loops) delivers it with
//! at-least-once semantics. Idempotent consumers are a documented
//! requirement of downstream systems, not something this layer provides.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum OutboxStatus {
    Pending,
    Delivered,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OutboxRecord {
    pub id: Uuid,
    pub instance_id: Uuid,
    /// Event attributes to publish, fully resolved at emit time.
    pub event: Value,
    pub status: OutboxStatus,
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_attempt_at: Option<DateTime<Utc>>,
}

impl OutboxRecord {
    #[must_use]
    pub fn new(instance_id: Uuid, event: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            instance_id,
            event,
            status: OutboxStatus::Pending,
            attempts: 0,
            created_at: Utc::now(),
            last_attempt_at: None,
        }
    }

    pub fn record_attempt(&mut self) {
        self.attempts += 1;
        self.last_attempt_at = Some(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_new_records_start_pending() {
        let record = OutboxRecord::new(Uuid::new_v4(), json!({"type": "order.placed"}));
        assert_eq!(record.status, OutboxStatus::Pending);
        assert_eq!(record.attempts, 0);
    }

    #[test]
    fn test_attempts_are_counted() {
        let mut record = OutboxRecord::new(Uuid::new_v4(), json!({}));
        record.record_attempt();
        record.record_attempt();
        assert_eq!(record.attempts, 2);
        assert!(record.last_attempt_at.is_some());
    }
}
