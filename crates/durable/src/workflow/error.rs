//! Terminal workflow errors

use serde::{Deserialize, Serialize};

use crate::activity::ActivityErrorKind;

/// Why a workflow instance failed
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowErrorKind {
    /// A step failed permanently on some attempt
    ActivityFailed,

    /// A step kept failing transiently until its policy ran out of attempts
    RetryExhausted,

    /// A member of a parallel group failed; `cause` holds the member failure
    JoinPartialFailure,

    /// The instance was cancelled from outside
    Cancelled,

    /// Input or step mapping rejected the data
    Validation,
}

/// Error recorded in a `WorkflowFailed` event and surfaced through status queries
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowError {
    pub kind: WorkflowErrorKind,

    /// Step the failure is attributed to, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_id: Option<String>,

    pub message: String,

    /// Underlying failure (the member failure of a join)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<Box<WorkflowError>>,
}

impl WorkflowError {
    pub fn new(kind: WorkflowErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            step_id: None,
            message: message.into(),
            cause: None,
        }
    }

    /// Attribute the error to a step
    pub fn at_step(mut self, step_id: impl Into<String>) -> Self {
        self.step_id = Some(step_id.into());
        self
    }

    /// Terminal failure of a step, classified by how the retry policy gave up
    pub fn step_failed(
        step_id: impl Into<String>,
        last_kind: ActivityErrorKind,
        attempts: u32,
        message: impl Into<String>,
    ) -> Self {
        let message = message.into();
        match last_kind {
            ActivityErrorKind::Permanent => Self::new(WorkflowErrorKind::ActivityFailed, message),
            ActivityErrorKind::Transient => Self::new(
                WorkflowErrorKind::RetryExhausted,
                format!("gave up after {attempts} attempt(s): {message}"),
            ),
        }
        .at_step(step_id)
    }

    /// Wrap a parallel member's failure
    pub fn join_partial_failure(member: WorkflowError) -> Self {
        let step = member.step_id.clone().unwrap_or_default();
        Self {
            kind: WorkflowErrorKind::JoinPartialFailure,
            step_id: member.step_id.clone(),
            message: format!("parallel step '{step}' failed: {}", member.message),
            cause: Some(Box::new(member)),
        }
    }

    pub fn cancelled(reason: impl Into<String>) -> Self {
        Self::new(WorkflowErrorKind::Cancelled, reason)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(WorkflowErrorKind::Validation, message)
    }

    /// The innermost error in the `cause` chain
    pub fn root_cause(&self) -> &WorkflowError {
        let mut current = self;
        while let Some(cause) = current.cause.as_deref() {
            current = cause;
        }
        current
    }
}

impl std::fmt::Display for WorkflowError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.step_id {
            Some(step) => write!(f, "{} (step {step})", self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for WorkflowError {}
