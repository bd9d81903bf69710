//! History events for persistence

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::WorkflowError;
use crate::activity::ActivityErrorKind;

/// Events stored in an instance's history
///
/// These events form the append-only log for a workflow instance. They are
/// used for:
/// - Persisting workflow progress
/// - Replaying the definition after a restart
/// - Projecting status for pollers
///
/// Events are immutable once written. All in-memory state is reconstructed
/// by replaying them in sequence order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HistoryEvent {
    // =========================================================================
    // Workflow Lifecycle Events
    // =========================================================================
    /// The engine picked the instance up for the first time (Pending → Running)
    WorkflowStarted {
        /// The input provided when starting the workflow
        input: Value,
    },

    /// Workflow completed successfully
    WorkflowCompleted {
        /// The aggregated result
        result: Value,
    },

    /// Workflow failed, including cancellation
    WorkflowFailed {
        /// Error details
        error: WorkflowError,
    },

    // =========================================================================
    // Activity Lifecycle Events
    // =========================================================================
    /// An attempt of a step was scheduled
    ActivityScheduled {
        /// Step identity within the definition
        step_id: String,

        /// Registered activity name
        name: String,

        /// Input computed for the step
        input: Value,

        /// Attempt number (1-based)
        attempt: u32,
    },

    /// The in-flight attempt of a step succeeded
    ActivityCompleted {
        step_id: String,

        /// Output returned by the activity
        output: Value,
    },

    /// The in-flight attempt of a step failed
    ActivityFailed {
        step_id: String,

        /// Transient or permanent
        error_kind: ActivityErrorKind,

        message: String,

        /// Attempt that failed
        attempt: u32,
    },
}

impl HistoryEvent {
    /// Get the event type name
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::WorkflowStarted { .. } => "workflow_started",
            Self::WorkflowCompleted { .. } => "workflow_completed",
            Self::WorkflowFailed { .. } => "workflow_failed",
            Self::ActivityScheduled { .. } => "activity_scheduled",
            Self::ActivityCompleted { .. } => "activity_completed",
            Self::ActivityFailed { .. } => "activity_failed",
        }
    }

    /// Step the event belongs to, for activity events
    pub fn step_id(&self) -> Option<&str> {
        match self {
            Self::ActivityScheduled { step_id, .. }
            | Self::ActivityCompleted { step_id, .. }
            | Self::ActivityFailed { step_id, .. } => Some(step_id),
            _ => None,
        }
    }

    /// Check if this event ends the instance
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::WorkflowCompleted { .. } | Self::WorkflowFailed { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization() {
        let event = HistoryEvent::ActivityScheduled {
            step_id: "check_inventory".to_string(),
            name: "check_inventory".to_string(),
            input: serde_json::json!({"items": [{"qty": 2}]}),
            attempt: 1,
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "activity_scheduled");
        assert_eq!(json["attempt"], 1);

        let parsed: HistoryEvent = serde_json::from_value(json).unwrap();
        assert_eq!(event, parsed);
    }

    #[test]
    fn test_is_terminal() {
        assert!(HistoryEvent::WorkflowCompleted {
            result: serde_json::json!({})
        }
        .is_terminal());
        assert!(HistoryEvent::WorkflowFailed {
            error: WorkflowError::cancelled("stop")
        }
        .is_terminal());
        assert!(!HistoryEvent::WorkflowStarted {
            input: serde_json::json!({})
        }
        .is_terminal());
    }

    #[test]
    fn test_step_id() {
        let event = HistoryEvent::ActivityFailed {
            step_id: "process_payment".to_string(),
            error_kind: ActivityErrorKind::Permanent,
            message: "declined".to_string(),
            attempt: 1,
        };
        assert_eq!(event.step_id(), Some("process_payment"));
        assert_eq!(event.type_name(), "activity_failed");
    }
}
