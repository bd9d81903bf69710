//! HistoryStore trait definition

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::workflow::HistoryEvent;

/// Error type for store operations
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    /// Instance not found
    #[error("workflow instance not found: {0}")]
    InstanceNotFound(Uuid),

    /// An instance with this id already exists
    #[error("workflow instance already exists: {0}")]
    AlreadyExists(Uuid),

    /// The instance already has a terminal event; history is closed
    #[error("workflow instance {0} is terminated")]
    Terminated(Uuid),

    /// Concurrency conflict (optimistic locking failed)
    #[error("concurrency conflict: expected sequence {expected}, got {actual}")]
    ConcurrencyConflict { expected: i64, actual: i64 },

    /// Storage could not be reached or refused the operation
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Lifecycle state of an instance, derived from its history
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    /// Instance registered, not yet started
    Pending,

    /// Steps are executing
    Running,

    /// Workflow completed successfully
    Completed,

    /// Workflow failed (including cancellation)
    Failed,
}

impl WorkflowStatus {
    /// Position in the forward-only lifecycle; terminal states share a rank
    pub fn rank(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Running => 1,
            Self::Completed | Self::Failed => 2,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Immutable facts recorded when an instance is created
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceInfo {
    pub id: Uuid,

    /// Name of the definition the instance runs
    pub definition: String,

    pub input: Value,

    pub created_at: DateTime<Utc>,
}

/// One persisted history event with its position and append time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    /// 0-based position in the instance's history
    pub sequence: i64,

    /// When the store accepted the event
    pub recorded_at: DateTime<Utc>,

    pub event: HistoryEvent,
}

/// Durable, append-only per-instance history
///
/// Implementations must guarantee:
/// - An event is durable once `append` returns `Ok`
/// - Appends to one instance are serialized through `expected_sequence`
/// - `read_all` returns a consistent snapshot; no partially written event is visible
/// - Nothing is appended after a terminal event
#[async_trait]
pub trait HistoryStore: Send + Sync + 'static {
    /// Register a new instance with an empty history
    async fn create_instance(
        &self,
        id: Uuid,
        definition: &str,
        input: Value,
    ) -> Result<InstanceInfo, StoreError>;

    /// Load the instance row
    async fn get_instance(&self, id: Uuid) -> Result<InstanceInfo, StoreError>;

    /// Append one event at position `expected_sequence`
    ///
    /// Fails with `ConcurrencyConflict` when the history length differs from
    /// `expected_sequence`, and with `Terminated` when the history is closed.
    async fn append(
        &self,
        id: Uuid,
        expected_sequence: i64,
        event: HistoryEvent,
    ) -> Result<HistoryRecord, StoreError>;

    /// Read the full ordered history
    async fn read_all(&self, id: Uuid) -> Result<Vec<HistoryRecord>, StoreError>;

    /// Instances whose history has no terminal event, oldest first
    async fn list_unfinished(&self) -> Result<Vec<InstanceInfo>, StoreError>;
}
