//! Status projection for pollers
//!
//! Status is computed from the instance row and its history on every query.
//! Nothing here takes the writer's lock, so polling never waits on a running
//! step, and the store's snapshot reads mean a half-written event is never
//! observed.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::EngineError;
use crate::persistence::{HistoryRecord, HistoryStore, InstanceInfo, StoreError, WorkflowStatus};
use crate::workflow::{HistoryEvent, WorkflowError};

/// What a poller sees for one instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceStatus {
    pub instance_id: Uuid,
    pub definition: String,
    pub status: WorkflowStatus,
    pub created_at: DateTime<Utc>,

    /// Time of the newest history event, or creation time when there is none
    pub last_updated_at: DateTime<Utc>,

    /// Result, once completed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,

    /// Failure, once failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<WorkflowError>,
}

impl InstanceStatus {
    /// Project status from an instance and its ordered history
    pub fn project(info: &InstanceInfo, records: &[HistoryRecord]) -> Self {
        let mut status = WorkflowStatus::Pending;
        let mut output = None;
        let mut error = None;

        for record in records {
            match &record.event {
                HistoryEvent::WorkflowStarted { .. } => status = WorkflowStatus::Running,
                HistoryEvent::WorkflowCompleted { result } => {
                    status = WorkflowStatus::Completed;
                    output = Some(result.clone());
                }
                HistoryEvent::WorkflowFailed { error: failure } => {
                    status = WorkflowStatus::Failed;
                    error = Some(failure.clone());
                }
                _ => {}
            }
        }

        Self {
            instance_id: info.id,
            definition: info.definition.clone(),
            status,
            created_at: info.created_at,
            last_updated_at: records
                .last()
                .map_or(info.created_at, |record| record.recorded_at),
            output,
            error,
        }
    }
}

/// Read-only query side over a [`HistoryStore`]
#[derive(Clone)]
pub struct StatusTracker {
    store: Arc<dyn HistoryStore>,
}

impl StatusTracker {
    pub fn new(store: Arc<dyn HistoryStore>) -> Self {
        Self { store }
    }

    /// Current status of an instance; unknown ids yield [`EngineError::NotFound`]
    pub async fn get_status(&self, id: Uuid) -> Result<InstanceStatus, EngineError> {
        let info = self.store.get_instance(id).await.map_err(not_found)?;
        let records = self.store.read_all(id).await.map_err(not_found)?;
        Ok(InstanceStatus::project(&info, &records))
    }

    /// Full history of an instance, for diagnostics
    pub async fn history(&self, id: Uuid) -> Result<Vec<HistoryRecord>, EngineError> {
        self.store.read_all(id).await.map_err(not_found)
    }
}

pub(crate) fn not_found(err: StoreError) -> EngineError {
    match err {
        StoreError::InstanceNotFound(id) => EngineError::NotFound(id),
        other => EngineError::Store(other),
    }
}
