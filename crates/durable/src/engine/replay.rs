//! In-memory state rebuilt from an instance's history
//!
//! [`ReplayState`] is a pure fold over [`HistoryRecord`]s. It is the only
//! place that decides whether an event may follow the ones already recorded,
//! so the writer checks every append against it before touching the store.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde_json::Value;

use super::EngineError;
use crate::activity::ActivityErrorKind;
use crate::persistence::{HistoryRecord, WorkflowStatus};
use crate::workflow::{HistoryEvent, WorkflowError};

/// What the first `ActivityScheduled` of a step recorded
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledCall {
    pub name: String,
    pub input: Value,
}

/// The most recent failed attempt of a step
#[derive(Debug, Clone, PartialEq)]
pub struct FailedAttempt {
    pub attempt: u32,
    pub kind: ActivityErrorKind,
    pub message: String,
    pub failed_at: DateTime<Utc>,
}

/// Everything history says about one step
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepHistory {
    /// Number of `ActivityScheduled` events seen
    pub attempts: u32,

    pub scheduled: Option<ScheduledCall>,

    /// Attempt scheduled without a matching terminal event
    pub in_flight: Option<u32>,

    pub output: Option<Value>,

    pub last_failure: Option<FailedAttempt>,
}

/// How the instance ended
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Completed(Value),
    Failed(WorkflowError),
}

#[derive(Debug, Clone, Default)]
pub struct ReplayState {
    next_sequence: i64,
    started: bool,
    outcome: Option<Outcome>,
    steps: HashMap<String, StepHistory>,
    last_event: Option<HistoryEvent>,
    last_updated_at: Option<DateTime<Utc>>,
}

fn violation(message: String) -> EngineError {
    EngineError::InvariantViolation(message)
}

impl ReplayState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold a full history, verifying every invariant on the way
    pub fn from_history(records: &[HistoryRecord]) -> Result<Self, EngineError> {
        let mut state = Self::new();
        for record in records {
            state.apply(record)?;
        }
        Ok(state)
    }

    /// Check that `event` may be appended next
    pub fn check(&self, event: &HistoryEvent) -> Result<(), EngineError> {
        if self.outcome.is_some() {
            return Err(violation(format!(
                "{} after terminal event",
                event.type_name()
            )));
        }

        match event {
            HistoryEvent::WorkflowStarted { .. } if self.started => {
                Err(violation("workflow_started recorded twice".to_string()))
            }
            HistoryEvent::WorkflowStarted { .. } | HistoryEvent::WorkflowFailed { .. } => Ok(()),
            _ if !self.started => Err(violation(format!(
                "{} before workflow_started",
                event.type_name()
            ))),
            HistoryEvent::WorkflowCompleted { .. } => Ok(()),
            HistoryEvent::ActivityScheduled {
                step_id, attempt, ..
            } => {
                let step = self.steps.get(step_id.as_str());
                if let Some(in_flight) = step.and_then(|s| s.in_flight) {
                    return Err(violation(format!(
                        "step '{step_id}' scheduled attempt {attempt} while attempt {in_flight} is in flight"
                    )));
                }
                if step.is_some_and(|s| s.output.is_some()) {
                    return Err(violation(format!(
                        "step '{step_id}' scheduled after it completed"
                    )));
                }
                let expected = step.map_or(0, |s| s.attempts) + 1;
                if *attempt != expected {
                    return Err(violation(format!(
                        "step '{step_id}' scheduled attempt {attempt}, expected {expected}"
                    )));
                }
                Ok(())
            }
            HistoryEvent::ActivityCompleted { step_id, .. } => {
                match self.steps.get(step_id.as_str()).and_then(|s| s.in_flight) {
                    Some(_) => Ok(()),
                    None => Err(violation(format!(
                        "step '{step_id}' completed without an attempt in flight"
                    ))),
                }
            }
            HistoryEvent::ActivityFailed {
                step_id, attempt, ..
            } => match self.steps.get(step_id.as_str()).and_then(|s| s.in_flight) {
                Some(in_flight) if in_flight == *attempt => Ok(()),
                Some(in_flight) => Err(violation(format!(
                    "step '{step_id}' failed attempt {attempt} but attempt {in_flight} is in flight"
                ))),
                None => Err(violation(format!(
                    "step '{step_id}' failed without an attempt in flight"
                ))),
            },
        }
    }

    /// Fold one record into the state
    pub fn apply(&mut self, record: &HistoryRecord) -> Result<(), EngineError> {
        if record.sequence != self.next_sequence {
            return Err(violation(format!(
                "history gap: expected sequence {}, found {}",
                self.next_sequence, record.sequence
            )));
        }
        self.check(&record.event)?;

        match &record.event {
            HistoryEvent::WorkflowStarted { .. } => self.started = true,
            HistoryEvent::WorkflowCompleted { result } => {
                self.outcome = Some(Outcome::Completed(result.clone()));
            }
            HistoryEvent::WorkflowFailed { error } => {
                self.outcome = Some(Outcome::Failed(error.clone()));
            }
            HistoryEvent::ActivityScheduled {
                step_id,
                name,
                input,
                attempt,
            } => {
                let step = self.steps.entry(step_id.clone()).or_default();
                step.attempts = *attempt;
                step.in_flight = Some(*attempt);
                step.scheduled.get_or_insert_with(|| ScheduledCall {
                    name: name.clone(),
                    input: input.clone(),
                });
            }
            HistoryEvent::ActivityCompleted { step_id, output } => {
                let step = self.steps.entry(step_id.clone()).or_default();
                step.in_flight = None;
                step.output = Some(output.clone());
            }
            HistoryEvent::ActivityFailed {
                step_id,
                error_kind,
                message,
                attempt,
            } => {
                let step = self.steps.entry(step_id.clone()).or_default();
                step.in_flight = None;
                step.last_failure = Some(FailedAttempt {
                    attempt: *attempt,
                    kind: *error_kind,
                    message: message.clone(),
                    failed_at: record.recorded_at,
                });
            }
        }

        self.next_sequence += 1;
        self.last_event = Some(record.event.clone());
        self.last_updated_at = Some(record.recorded_at);
        Ok(())
    }

    /// Sequence the next append must carry
    pub fn next_sequence(&self) -> i64 {
        self.next_sequence
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn is_terminal(&self) -> bool {
        self.outcome.is_some()
    }

    pub fn outcome(&self) -> Option<&Outcome> {
        self.outcome.as_ref()
    }

    pub fn status(&self) -> WorkflowStatus {
        match (&self.outcome, self.started) {
            (Some(Outcome::Completed(_)), _) => WorkflowStatus::Completed,
            (Some(Outcome::Failed(_)), _) => WorkflowStatus::Failed,
            (None, true) => WorkflowStatus::Running,
            (None, false) => WorkflowStatus::Pending,
        }
    }

    /// Terminal status, if the instance has ended
    pub fn terminal_status(&self) -> Option<WorkflowStatus> {
        self.outcome.as_ref().map(|_| self.status())
    }

    pub fn step(&self, step_id: &str) -> Option<&StepHistory> {
        self.steps.get(step_id)
    }

    /// Outputs of every completed step
    pub fn outputs(&self) -> HashMap<String, Value> {
        self.steps
            .iter()
            .filter_map(|(id, step)| step.output.clone().map(|output| (id.clone(), output)))
            .collect()
    }

    /// Steps with an attempt scheduled but not yet finished
    pub fn in_flight_steps(&self) -> impl Iterator<Item = (&str, u32)> {
        self.steps
            .iter()
            .filter_map(|(id, step)| step.in_flight.map(|attempt| (id.as_str(), attempt)))
    }

    pub fn last_event(&self) -> Option<&HistoryEvent> {
        self.last_event.as_ref()
    }

    pub fn last_updated_at(&self) -> Option<DateTime<Utc>> {
        self.last_updated_at
    }
}
