//! Workflow instances and their lifecycle

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::context::ExecutionContext;
use crate::error::WorkflowError;
use crate::position::Position;

/// Instance lifecycle status.
///
/// `Running` and `Waiting` alternate as the instance suspends and resumes;
/// `Completed`, `Faulted` and `Cancelled` are terminal. `Suspended` is an
/// operator-initiated pause, resumable unlike the terminal states.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum InstanceStatus {
    Pending,
    Running,
    Waiting,
    Suspended,
    Completed,
    Faulted,
    Cancelled,
}

impl InstanceStatus {
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            InstanceStatus::Completed | InstanceStatus::Faulted | InstanceStatus::Cancelled
        )
    }
}

impl std::fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            InstanceStatus::Pending => "pending",
            InstanceStatus::Running => "running",
            InstanceStatus::Waiting => "waiting",
            InstanceStatus::Suspended => "suspended",
            InstanceStatus::Completed => "completed",
            InstanceStatus::Faulted => "faulted",
            InstanceStatus::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// One run of a workflow definition.
///
/// Mutation is serialized per instance: a single logical thread of control
/// advances it at any time, so the context needs no internal locking. The
/// whole struct is the persistence snapshot; restoring it and stepping again
/// is the crash-recovery path.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Instance {
    pub id: Uuid,
    /// Registry key of the definition (`namespace/name/version`).
    pub definition: String,
    pub status: InstanceStatus,
    /// Cursor into the task graph. Empty until the first step runs the
    /// workflow-level input pipeline.
    pub position: Position,
    pub context: ExecutionContext,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    /// Final error of a faulted instance, kept for inspection.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<WorkflowError>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Instance {
    #[must_use]
    pub fn new(definition: impl Into<String>, input: Value) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            definition: definition.into(),
            status: InstanceStatus::Pending,
            position: Position::root(),
            context: ExecutionContext::new(input),
            output: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_terminal_statuses() {
        assert!(InstanceStatus::Completed.is_terminal());
        assert!(InstanceStatus::Faulted.is_terminal());
        assert!(InstanceStatus::Cancelled.is_terminal());
        assert!(!InstanceStatus::Waiting.is_terminal());
        assert!(!InstanceStatus::Suspended.is_terminal());
    }

    #[test]
    fn test_instance_snapshot_round_trips() {
        let mut instance = Instance::new("test/sample/0.1.0", json!({"x": 1}));
        instance.status = InstanceStatus::Waiting;
        instance.position = "/do/1/waitHere".parse().expect("valid position");

        let snapshot = serde_json::to_vec(&instance).unwrap();
        let restored: Instance = serde_json::from_slice(&snapshot).unwrap();
        assert_eq!(restored, instance);
    }
}
