//! Driving one instance through its definition
//!
//! A run walks the definition from the first step. Steps whose outputs are
//! already in history are replayed without invoking anything; the first step
//! without a recorded outcome is executed, and every attempt is bracketed by
//! `ActivityScheduled` and `ActivityCompleted`/`ActivityFailed` events. The
//! only inputs to any decision are the workflow input and recorded events.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use super::join::join_all;
use super::writer::HistoryWriter;
use super::{EngineError, ExecutorConfig};
use crate::activity::{ActivityContext, ActivityError, ActivityInvoker};
use crate::persistence::{InstanceInfo, WorkflowStatus};
use crate::reliability::{with_attempt_timeout, RetryDecision};
use crate::workflow::{
    ActivityStep, HistoryEvent, StepContext, StepSpec, WorkflowDefinition, WorkflowError,
};

/// Why a step produced no output
pub(crate) enum StepError {
    /// The step failed for good; the instance fails with this error
    Failed(WorkflowError),

    /// Engine-level failure; the run stops without a terminal event
    Engine(EngineError),

    /// The run was told to stop before the step could finish
    Abandoned,
}

impl From<EngineError> for StepError {
    fn from(err: EngineError) -> Self {
        Self::Engine(err)
    }
}

pub(crate) struct InstanceRun {
    pub instance: InstanceInfo,
    pub definition: Arc<WorkflowDefinition>,
    pub writer: Arc<HistoryWriter>,
    pub invoker: Arc<dyn ActivityInvoker>,
    pub config: ExecutorConfig,
    /// Fires on cancellation or engine shutdown
    pub cancel: CancellationToken,
}

impl InstanceRun {
    /// Drive the instance to a terminal state
    ///
    /// Returns the status the history ends up in. When another party closes
    /// the history (cancellation) or the run is stopped (shutdown), the status
    /// is read back from the writer instead.
    pub async fn drive(&self) -> Result<WorkflowStatus, EngineError> {
        match self.drive_steps().await {
            Err(EngineError::Halted(_)) => Ok(self.writer.snapshot().await.status()),
            other => other,
        }
    }

    async fn drive_steps(&self) -> Result<WorkflowStatus, EngineError> {
        let snapshot = self.writer.snapshot().await;
        if let Some(status) = snapshot.terminal_status() {
            return Ok(status);
        }
        if !snapshot.is_started() {
            self.writer
                .append(HistoryEvent::WorkflowStarted {
                    input: self.instance.input.clone(),
                })
                .await?;
            info!("workflow started");
        } else {
            debug!(events = snapshot.next_sequence(), "replaying history");
        }

        let mut outputs = snapshot.outputs();
        for spec in self.definition.steps() {
            let result = match spec {
                StepSpec::Activity(step) => self
                    .run_step(step, &outputs, &self.cancel)
                    .await
                    .map(|output| vec![(step.step_id.clone(), output)]),
                StepSpec::Parallel(members) => self.run_parallel(members, &outputs).await,
            };

            match result {
                Ok(completed) => outputs.extend(completed),
                Err(StepError::Failed(error)) => {
                    warn!(error = %error, "workflow failed");
                    return self.finish(HistoryEvent::WorkflowFailed { error }).await;
                }
                Err(StepError::Engine(err)) => return Err(err),
                Err(StepError::Abandoned) => {
                    let status = self.writer.snapshot().await.status();
                    debug!(%status, "run stopped before completion");
                    return Ok(status);
                }
            }
        }

        let event = match self.definition.compute_result(&self.instance.input, &outputs) {
            Ok(result) => HistoryEvent::WorkflowCompleted { result },
            Err(error) => HistoryEvent::WorkflowFailed { error },
        };
        self.finish(event).await
    }

    async fn finish(&self, event: HistoryEvent) -> Result<WorkflowStatus, EngineError> {
        let status = match &event {
            HistoryEvent::WorkflowCompleted { .. } => WorkflowStatus::Completed,
            _ => WorkflowStatus::Failed,
        };
        self.writer.append(event).await?;
        info!(%status, "workflow finished");
        Ok(status)
    }

    /// Run every member concurrently and join in specification order
    async fn run_parallel(
        &self,
        members: &[ActivityStep],
        outputs: &HashMap<String, Value>,
    ) -> Result<Vec<(String, Value)>, StepError> {
        // Closed when the join fails so stragglers start no further retries
        let gate = self.cancel.child_token();

        let branches: Vec<BoxFuture<'_, Result<Value, StepError>>> = members
            .iter()
            .map(|step| self.run_step(step, outputs, &gate).boxed())
            .collect();

        let joined = join_all(branches).await;
        match joined {
            Ok(values) => Ok(members
                .iter()
                .map(|step| step.step_id.clone())
                .zip(values)
                .collect()),
            Err(failure) => {
                gate.cancel();
                if !failure.stragglers.is_empty() {
                    debug!(
                        remaining = failure.stragglers.len(),
                        failed_step = %members[failure.index].step_id,
                        "draining parallel branches"
                    );
                }
                failure.stragglers.drain().await;

                Err(match failure.error {
                    StepError::Failed(member) => {
                        StepError::Failed(WorkflowError::join_partial_failure(member))
                    }
                    other => other,
                })
            }
        }
    }

    /// Produce one step's output, from history or by executing it
    ///
    /// `gate` guards retries only. A first attempt is scheduled even after the
    /// gate closes, so every member of a parallel group is scheduled no matter
    /// which branch is polled first. An attempt already in flight always runs
    /// to its recorded end. Nothing is scheduled once the run itself stops.
    async fn run_step(
        &self,
        step: &ActivityStep,
        outputs: &HashMap<String, Value>,
        gate: &CancellationToken,
    ) -> Result<Value, StepError> {
        let input = step
            .compute_input(&StepContext::new(&self.instance.input, outputs))
            .map_err(StepError::Failed)?;
        let policy = step.retry_policy();
        let history = self.writer.step(&step.step_id).await.unwrap_or_default();

        if let Some(recorded) = &history.scheduled {
            if recorded.name != step.activity || recorded.input != input {
                return Err(StepError::Engine(EngineError::NonDeterminism(format!(
                    "step '{}' was recorded as activity '{}' with input {}, definition now yields '{}' with input {}",
                    step.step_id, recorded.name, recorded.input, step.activity, input
                ))));
            }
        }
        if let Some(output) = history.output {
            debug!(step_id = %step.step_id, "replayed recorded output");
            return Ok(output);
        }

        let mut attempt;
        let mut scheduled;
        if let Some(in_flight) = history.in_flight {
            // Interrupted mid-attempt: run it again under the same number
            attempt = in_flight;
            scheduled = true;
        } else if let Some(failure) = history.last_failure {
            match policy.decide(failure.attempt, failure.kind) {
                RetryDecision::GiveUp(_) => {
                    return Err(StepError::Failed(WorkflowError::step_failed(
                        &step.step_id,
                        failure.kind,
                        failure.attempt,
                        failure.message,
                    )));
                }
                RetryDecision::RetryAfter(delay) => {
                    wait_until(failure.failed_at, delay, gate).await?;
                    attempt = failure.attempt + 1;
                    scheduled = false;
                }
            }
        } else {
            attempt = 1;
            scheduled = false;
        }

        loop {
            if !scheduled {
                if self.cancel.is_cancelled() || (attempt > 1 && gate.is_cancelled()) {
                    return Err(StepError::Abandoned);
                }
                self.writer
                    .append(HistoryEvent::ActivityScheduled {
                        step_id: step.step_id.clone(),
                        name: step.activity.clone(),
                        input: input.clone(),
                        attempt,
                    })
                    .await?;
            }
            scheduled = false;

            let span = info_span!(
                "step",
                step_id = %step.step_id,
                activity = %step.activity,
                attempt
            );
            let outcome = self
                .invoke(step, &input, attempt, policy.max_attempts)
                .instrument(span)
                .await?;

            match outcome {
                Ok(output) => {
                    self.writer
                        .append(HistoryEvent::ActivityCompleted {
                            step_id: step.step_id.clone(),
                            output: output.clone(),
                        })
                        .await?;
                    return Ok(output);
                }
                Err(error) => {
                    let record = self
                        .writer
                        .append(HistoryEvent::ActivityFailed {
                            step_id: step.step_id.clone(),
                            error_kind: error.kind,
                            message: error.message.clone(),
                            attempt,
                        })
                        .await?;

                    match policy.decide(attempt, error.kind) {
                        RetryDecision::GiveUp(reason) => {
                            debug!(step_id = %step.step_id, attempt, ?reason, "giving up on step");
                            return Err(StepError::Failed(WorkflowError::step_failed(
                                &step.step_id,
                                error.kind,
                                attempt,
                                error.message,
                            )));
                        }
                        RetryDecision::RetryAfter(delay) => {
                            debug!(step_id = %step.step_id, attempt, ?delay, "retrying step");
                            wait_until(record.recorded_at, delay, gate).await?;
                            attempt += 1;
                        }
                    }
                }
            }
        }
    }

    /// One attempt through the invoker, bounded by the per-attempt timeout
    async fn invoke(
        &self,
        step: &ActivityStep,
        input: &Value,
        attempt: u32,
        max_attempts: u32,
    ) -> Result<Result<Value, ActivityError>, StepError> {
        let ctx = ActivityContext::new(self.instance.id, step.step_id.clone(), attempt, max_attempts)
            .with_cancellation(self.cancel.clone());
        let limit = step
            .options
            .start_to_close_timeout
            .or(self.config.default_activity_timeout);

        debug!("invoking activity");
        let call = with_attempt_timeout(
            limit,
            self.invoker.invoke(&ctx, &step.activity, input.clone()),
        );

        let outcome = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(StepError::Abandoned),
            outcome = call => outcome,
        };

        // An activity that observed cancellation may return before the token
        // is polled; its outcome is not recorded
        if self.cancel.is_cancelled() {
            debug!("run stopped during attempt, outcome discarded");
            return Err(StepError::Abandoned);
        }
        if let Err(error) = &outcome {
            warn!(kind = %error.kind, error = %error, "activity attempt failed");
        }
        Ok(outcome)
    }
}

/// Sleep until `delay` after `since`, or give up when `gate` closes
///
/// Measuring from the recorded failure time means a restart during backoff
/// neither skips nor restarts the wait.
async fn wait_until(
    since: DateTime<Utc>,
    delay: Duration,
    gate: &CancellationToken,
) -> Result<(), StepError> {
    let elapsed = (Utc::now() - since).to_std().unwrap_or(Duration::ZERO);
    let remaining = delay.saturating_sub(elapsed);
    if remaining.is_zero() {
        return Ok(());
    }

    tokio::select! {
        _ = tokio::time::sleep(remaining) => Ok(()),
        _ = gate.cancelled() => Err(StepError::Abandoned),
    }
}
