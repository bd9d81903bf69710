//! Single writer for one running instance
//!
//! Every append for an instance, from sequential steps, parallel branches and
//! cancellation alike, goes through one [`HistoryWriter`]. It owns the
//! sequence counter and the replay state, checks each event before it reaches
//! the store and retries appends while storage is briefly unavailable.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use super::replay::{ReplayState, StepHistory};
use super::{EngineError, ExecutorConfig};
use crate::persistence::{HistoryRecord, HistoryStore, StoreError};
use crate::workflow::HistoryEvent;

pub struct HistoryWriter {
    instance_id: Uuid,
    store: Arc<dyn HistoryStore>,
    state: Mutex<ReplayState>,
    append_attempts: u32,
    append_backoff: Duration,
    max_events: usize,
}

impl HistoryWriter {
    pub fn new(
        instance_id: Uuid,
        store: Arc<dyn HistoryStore>,
        state: ReplayState,
        config: &ExecutorConfig,
    ) -> Self {
        Self {
            instance_id,
            store,
            state: Mutex::new(state),
            append_attempts: config.append_attempts.max(1),
            append_backoff: config.append_backoff,
            max_events: config.max_events_per_instance,
        }
    }

    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    /// Copy of the current replay state
    pub async fn snapshot(&self) -> ReplayState {
        self.state.lock().await.clone()
    }

    pub async fn step(&self, step_id: &str) -> Option<StepHistory> {
        self.state.lock().await.step(step_id).cloned()
    }

    /// Durably append one event
    ///
    /// Returns [`EngineError::Halted`] once the history holds a terminal
    /// event, whoever wrote it. Storage outages are retried up to the
    /// configured number of attempts; after that the error is returned and
    /// the instance stays at its last durable event.
    pub async fn append(&self, event: HistoryEvent) -> Result<HistoryRecord, EngineError> {
        let mut state = self.state.lock().await;

        if state.is_terminal() {
            return Err(EngineError::Halted(self.instance_id));
        }
        if state.next_sequence() as usize >= self.max_events && !event.is_terminal() {
            return Err(EngineError::TooManyEvents(self.instance_id, self.max_events));
        }
        state.check(&event)?;

        let expected = state.next_sequence();
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.store.append(self.instance_id, expected, event.clone()).await {
                Ok(record) => {
                    state.apply(&record)?;
                    debug!(
                        instance_id = %self.instance_id,
                        sequence = record.sequence,
                        event_type = record.event.type_name(),
                        "appended event"
                    );
                    return Ok(record);
                }
                Err(StoreError::Unavailable(message)) if attempt < self.append_attempts => {
                    warn!(
                        instance_id = %self.instance_id,
                        attempt,
                        error = %message,
                        "history append failed, retrying"
                    );
                    tokio::time::sleep(self.append_backoff).await;
                }
                Err(StoreError::Terminated(_)) => {
                    *state = self.reload().await?;
                    return Err(EngineError::Halted(self.instance_id));
                }
                Err(StoreError::ConcurrencyConflict { .. }) => {
                    let records = self.store.read_all(self.instance_id).await?;
                    *state = ReplayState::from_history(&records)?;

                    // An earlier try may have been stored before its error surfaced
                    if let Some(record) = records
                        .last()
                        .filter(|r| r.sequence == expected && r.event == event)
                    {
                        return Ok(record.clone());
                    }
                    if state.is_terminal() {
                        return Err(EngineError::Halted(self.instance_id));
                    }
                    return Err(EngineError::InvariantViolation(format!(
                        "another writer appended to instance {} at sequence {expected}",
                        self.instance_id
                    )));
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn reload(&self) -> Result<ReplayState, EngineError> {
        let records = self.store.read_all(self.instance_id).await?;
        ReplayState::from_history(&records)
    }
}
