//! Workflow engine with replay support
//!
//! The `WorkflowEngine` is responsible for:
//! - Validating input and creating instances
//! - Running instances, replaying recorded history after a restart
//! - Resuming every unfinished instance at process start
//! - Cancelling instances and answering status queries

use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::registry::{DefinitionRegistry, RegistryError};
use super::replay::ReplayState;
use super::run::InstanceRun;
use super::status::{not_found, InstanceStatus, StatusTracker};
use super::writer::HistoryWriter;
use crate::activity::ActivityInvoker;
use crate::persistence::{HistoryRecord, HistoryStore, StoreError, WorkflowStatus};
use crate::workflow::{HistoryEvent, ValidationError, WorkflowError};

/// Configuration for the workflow engine
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Maximum events per instance (for safety)
    pub max_events_per_instance: usize,

    /// Tries per history append while storage is unavailable
    pub append_attempts: u32,

    /// Pause between append tries
    pub append_backoff: Duration,

    /// Per-attempt limit for steps that set none
    pub default_activity_timeout: Option<Duration>,

    /// First pause before a background run retries after the store went away
    pub run_retry_backoff: Duration,

    /// Upper bound for that pause as it doubles
    pub max_run_retry_backoff: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_events_per_instance: 10_000,
            append_attempts: 3,
            append_backoff: Duration::from_millis(100),
            default_activity_timeout: None,
            run_retry_backoff: Duration::from_secs(1),
            max_run_retry_backoff: Duration::from_secs(30),
        }
    }
}

/// Errors from engine operations
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Store error
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Registry error
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Caller input rejected
    #[error("invalid input: {0}")]
    Validation(#[from] ValidationError),

    /// Instance not found
    #[error("workflow instance not found: {0}")]
    NotFound(Uuid),

    /// Recorded history disagrees with what the definition computes
    #[error("non-deterministic replay: {0}")]
    NonDeterminism(String),

    /// History breaks an engine invariant
    #[error("history invariant violated: {0}")]
    InvariantViolation(String),

    /// The instance already has a terminal event
    #[error("workflow instance {0} is already terminated")]
    Halted(Uuid),

    /// Another run of the instance is active in this process
    #[error("workflow instance {0} is already running")]
    AlreadyRunning(Uuid),

    /// Too many events
    #[error("workflow instance {0} reached the event limit of {1}")]
    TooManyEvents(Uuid, usize),
}

struct ActiveInstance {
    writer: Arc<HistoryWriter>,
    cancel: CancellationToken,
}

struct EngineInner {
    store: Arc<dyn HistoryStore>,
    definitions: DefinitionRegistry,
    invoker: Arc<dyn ActivityInvoker>,
    config: ExecutorConfig,
    active: DashMap<Uuid, ActiveInstance>,
    shutdown: CancellationToken,
}

/// Removes an instance from the active set when its run ends
struct ActiveGuard<'a> {
    active: &'a DashMap<Uuid, ActiveInstance>,
    id: Uuid,
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.active.remove(&self.id);
    }
}

/// Durable workflow engine
///
/// Cheap to clone; clones share the store, registries and the set of
/// instances running in this process.
///
/// # Example
///
/// ```ignore
/// use orchestra_durable::prelude::*;
///
/// let engine = WorkflowEngine::new(Arc::new(InMemoryHistoryStore::new()), definitions, Arc::new(activities));
///
/// // Validate, create and run in the background
/// let instance_id = engine.start("process_order", input).await?;
///
/// // Poll
/// let status = engine.status(instance_id).await?;
/// ```
#[derive(Clone)]
pub struct WorkflowEngine {
    inner: Arc<EngineInner>,
}

impl WorkflowEngine {
    /// Create a new engine with default config
    pub fn new(
        store: Arc<dyn HistoryStore>,
        definitions: DefinitionRegistry,
        invoker: Arc<dyn ActivityInvoker>,
    ) -> Self {
        Self::with_config(store, definitions, invoker, ExecutorConfig::default())
    }

    /// Create a new engine with custom config
    pub fn with_config(
        store: Arc<dyn HistoryStore>,
        definitions: DefinitionRegistry,
        invoker: Arc<dyn ActivityInvoker>,
        config: ExecutorConfig,
    ) -> Self {
        info!(
            definitions = ?definitions.names().collect::<Vec<_>>(),
            "workflow engine created"
        );
        Self {
            inner: Arc::new(EngineInner {
                store,
                definitions,
                invoker,
                config,
                active: DashMap::new(),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Get a reference to the store
    pub fn store(&self) -> &Arc<dyn HistoryStore> {
        &self.inner.store
    }

    pub fn definitions(&self) -> &DefinitionRegistry {
        &self.inner.definitions
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.inner.config
    }

    /// Query side sharing this engine's store
    pub fn status_tracker(&self) -> StatusTracker {
        StatusTracker::new(self.inner.store.clone())
    }

    /// Validate input and register a new instance without running it
    #[instrument(skip(self, input))]
    pub async fn create_instance(&self, definition: &str, input: Value) -> Result<Uuid, EngineError> {
        let workflow = self.inner.definitions.get(definition)?;
        workflow.validate_input(&input)?;

        let instance_id = Uuid::now_v7();
        self.inner
            .store
            .create_instance(instance_id, workflow.name(), input)
            .await?;

        info!(%instance_id, "created workflow instance");
        Ok(instance_id)
    }

    /// Validate input, create the instance and run it in the background
    pub async fn start(&self, definition: &str, input: Value) -> Result<Uuid, EngineError> {
        let instance_id = self.create_instance(definition, input).await?;
        self.spawn(instance_id);
        Ok(instance_id)
    }

    /// Run an existing instance on a background task
    ///
    /// A run stopped by an unavailable store is retried with doubling backoff
    /// until it gets through or the engine shuts down.
    pub fn spawn(&self, instance_id: Uuid) -> JoinHandle<()> {
        let engine = self.clone();
        tokio::spawn(async move {
            let config = &engine.inner.config;
            let mut backoff = config.run_retry_backoff;
            loop {
                match engine.run_instance(instance_id).await {
                    Ok(status) => debug!(%instance_id, %status, "background run finished"),
                    Err(EngineError::AlreadyRunning(_)) => {
                        debug!(%instance_id, "instance already running")
                    }
                    Err(EngineError::Store(StoreError::Unavailable(message))) => {
                        warn!(%instance_id, error = %message, ?backoff, "history store unavailable, retrying run");
                        tokio::select! {
                            _ = tokio::time::sleep(backoff) => {}
                            _ = engine.inner.shutdown.cancelled() => return,
                        }
                        backoff = (backoff * 2).min(config.max_run_retry_backoff);
                        continue;
                    }
                    Err(e) => error!(%instance_id, error = %e, "workflow run failed"),
                }
                return;
            }
        })
    }

    /// Drive an instance until it is terminal or the run cannot continue
    ///
    /// Idempotent: a terminal instance returns its status without side
    /// effects, and a recorded step is never executed again.
    #[instrument(skip(self), fields(definition = tracing::field::Empty))]
    pub async fn run_instance(&self, instance_id: Uuid) -> Result<WorkflowStatus, EngineError> {
        let inner = &self.inner;
        let instance = inner.store.get_instance(instance_id).await.map_err(not_found)?;
        tracing::Span::current().record("definition", instance.definition.as_str());

        let definition = inner.definitions.get(&instance.definition)?;
        let records = inner.store.read_all(instance_id).await.map_err(not_found)?;
        if records.len() > inner.config.max_events_per_instance {
            return Err(EngineError::TooManyEvents(
                instance_id,
                inner.config.max_events_per_instance,
            ));
        }

        let state = ReplayState::from_history(&records)?;
        if let Some(status) = state.terminal_status() {
            debug!(%status, "instance already terminal");
            return Ok(status);
        }

        let writer = Arc::new(HistoryWriter::new(
            instance_id,
            inner.store.clone(),
            state,
            &inner.config,
        ));
        let cancel = inner.shutdown.child_token();
        match inner.active.entry(instance_id) {
            Entry::Occupied(_) => return Err(EngineError::AlreadyRunning(instance_id)),
            Entry::Vacant(slot) => {
                slot.insert(ActiveInstance {
                    writer: writer.clone(),
                    cancel: cancel.clone(),
                });
            }
        }
        let _guard = ActiveGuard {
            active: &inner.active,
            id: instance_id,
        };

        let run = InstanceRun {
            instance,
            definition,
            writer,
            invoker: inner.invoker.clone(),
            config: inner.config.clone(),
            cancel,
        };
        run.drive().await
    }

    /// Resume every instance whose history has no terminal event
    ///
    /// Called once at process start. Instances of definitions this process
    /// does not know are skipped with a warning.
    #[instrument(skip(self))]
    pub async fn resume_unfinished(&self) -> Result<Vec<Uuid>, EngineError> {
        let unfinished = self.inner.store.list_unfinished().await?;

        let mut resumed = Vec::with_capacity(unfinished.len());
        for instance in unfinished {
            if !self.inner.definitions.contains(&instance.definition) {
                warn!(
                    instance_id = %instance.id,
                    definition = %instance.definition,
                    "skipping instance of unknown definition"
                );
                continue;
            }
            self.spawn(instance.id);
            resumed.push(instance.id);
        }

        info!(count = resumed.len(), "resumed unfinished instances");
        Ok(resumed)
    }

    /// Cancel an instance by recording a terminal `Cancelled` failure
    ///
    /// A running instance stops scheduling further steps; results of
    /// attempts still in flight are discarded. Cancelling a terminal
    /// instance returns [`EngineError::Halted`].
    #[instrument(skip(self, reason))]
    pub async fn cancel(&self, instance_id: Uuid, reason: impl Into<String>) -> Result<(), EngineError> {
        let event = HistoryEvent::WorkflowFailed {
            error: WorkflowError::cancelled(reason),
        };

        let running = self
            .inner
            .active
            .get(&instance_id)
            .map(|active| (active.writer.clone(), active.cancel.clone()));

        match running {
            Some((writer, token)) => {
                writer.append(event).await?;
                token.cancel();
            }
            None => {
                let records = self
                    .inner
                    .store
                    .read_all(instance_id)
                    .await
                    .map_err(not_found)?;
                let state = ReplayState::from_history(&records)?;
                let writer = HistoryWriter::new(
                    instance_id,
                    self.inner.store.clone(),
                    state,
                    &self.inner.config,
                );
                writer.append(event).await?;
            }
        }

        info!("workflow instance cancelled");
        Ok(())
    }

    /// Current status of an instance
    pub async fn status(&self, instance_id: Uuid) -> Result<InstanceStatus, EngineError> {
        self.status_tracker().get_status(instance_id).await
    }

    /// Full recorded history of an instance
    pub async fn history(&self, instance_id: Uuid) -> Result<Vec<HistoryRecord>, EngineError> {
        self.status_tracker().history(instance_id).await
    }

    /// Check if an instance is being driven by this process
    pub fn is_running(&self, instance_id: Uuid) -> bool {
        self.inner.active.contains_key(&instance_id)
    }

    /// Number of instances being driven by this process
    pub fn active_count(&self) -> usize {
        self.inner.active.len()
    }

    /// Stop every run without recording anything, waiting up to `grace`
    ///
    /// Stopped instances stay `Running` in history and are picked up by
    /// [`resume_unfinished`](Self::resume_unfinished) on the next start.
    pub async fn shutdown(&self, grace: Duration) {
        self.inner.shutdown.cancel();

        let deadline = tokio::time::Instant::now() + grace;
        while !self.inner.active.is_empty() && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let remaining = self.inner.active.len();
        if remaining > 0 {
            warn!(remaining, "shutdown grace period elapsed with runs still active");
        } else {
            info!("workflow engine stopped");
        }
    }
}
