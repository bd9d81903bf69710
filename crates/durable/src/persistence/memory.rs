//! In-memory implementation of HistoryStore for testing

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use serde_json::Value;
use uuid::Uuid;

use super::store::*;
use crate::workflow::HistoryEvent;

struct InstanceState {
    info: InstanceInfo,
    records: Vec<HistoryRecord>,
}

impl InstanceState {
    fn is_terminated(&self) -> bool {
        self.records.last().is_some_and(|r| r.event.is_terminal())
    }
}

/// In-memory implementation of HistoryStore
///
/// This is primarily for testing and for running without a database. It
/// provides the same semantics as the PostgreSQL implementation, plus an
/// outage switch that makes every operation fail with
/// [`StoreError::Unavailable`].
///
/// # Example
///
/// ```
/// use orchestra_durable::InMemoryHistoryStore;
///
/// let store = InMemoryHistoryStore::new();
/// assert_eq!(store.instance_count(), 0);
/// ```
#[derive(Default)]
pub struct InMemoryHistoryStore {
    instances: RwLock<HashMap<Uuid, InstanceState>>,
    unavailable: AtomicBool,
}

impl InMemoryHistoryStore {
    /// Create a new in-memory store
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate a storage outage (or end one)
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Get the number of instances
    pub fn instance_count(&self) -> usize {
        self.instances.read().len()
    }

    /// Clear all data
    pub fn clear(&self) {
        self.instances.write().clear();
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("in-memory store is offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl HistoryStore for InMemoryHistoryStore {
    async fn create_instance(
        &self,
        id: Uuid,
        definition: &str,
        input: Value,
    ) -> Result<InstanceInfo, StoreError> {
        self.check_available()?;

        let mut instances = self.instances.write();
        if instances.contains_key(&id) {
            return Err(StoreError::AlreadyExists(id));
        }

        let info = InstanceInfo {
            id,
            definition: definition.to_string(),
            input,
            created_at: Utc::now(),
        };
        instances.insert(
            id,
            InstanceState {
                info: info.clone(),
                records: Vec::new(),
            },
        );
        Ok(info)
    }

    async fn get_instance(&self, id: Uuid) -> Result<InstanceInfo, StoreError> {
        self.check_available()?;

        self.instances
            .read()
            .get(&id)
            .map(|state| state.info.clone())
            .ok_or(StoreError::InstanceNotFound(id))
    }

    async fn append(
        &self,
        id: Uuid,
        expected_sequence: i64,
        event: HistoryEvent,
    ) -> Result<HistoryRecord, StoreError> {
        self.check_available()?;

        let mut instances = self.instances.write();
        let state = instances
            .get_mut(&id)
            .ok_or(StoreError::InstanceNotFound(id))?;

        let current = state.records.len() as i64;
        if current != expected_sequence {
            return Err(StoreError::ConcurrencyConflict {
                expected: expected_sequence,
                actual: current,
            });
        }
        if state.is_terminated() {
            return Err(StoreError::Terminated(id));
        }

        let record = HistoryRecord {
            sequence: current,
            recorded_at: Utc::now(),
            event,
        };
        state.records.push(record.clone());
        Ok(record)
    }

    async fn read_all(&self, id: Uuid) -> Result<Vec<HistoryRecord>, StoreError> {
        self.check_available()?;

        self.instances
            .read()
            .get(&id)
            .map(|state| state.records.clone())
            .ok_or(StoreError::InstanceNotFound(id))
    }

    async fn list_unfinished(&self) -> Result<Vec<InstanceInfo>, StoreError> {
        self.check_available()?;

        let mut unfinished: Vec<InstanceInfo> = self
            .instances
            .read()
            .values()
            .filter(|state| !state.is_terminated())
            .map(|state| state.info.clone())
            .collect();
        unfinished.sort_by_key(|info| (info.created_at, info.id));
        Ok(unfinished)
    }
}
