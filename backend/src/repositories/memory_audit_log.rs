//! In-process audit store.
//!
//! Mirrors the PostgreSQL store's visibility rules: appended rows are staged
//! on the transaction and only published on commit. Ids come from a shared
//! counter and are never reused, as with a database sequence.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::AuditResult;
use crate::models::audit_log::{AuditEvent, AuditEventFilters, NewAuditEvent};
use crate::repositories::repository::{AuditStore, AuditWriter, StoreTransaction};

#[derive(Debug, Default)]
struct MemoryState {
    rows: Vec<AuditEvent>,
    last_id: i64,
}

impl MemoryState {
    fn next_id(&mut self) -> i64 {
        self.last_id += 1;
        self.last_id
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryAuditStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryAuditStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts and publishes a row immediately, outside any transaction.
    pub fn insert_committed(&self, event: NewAuditEvent) -> AuditEvent {
        let mut state = lock(&self.state);
        let id = state.next_id();
        let stored = event.into_event(id);
        state.rows.push(stored.clone());
        stored
    }

    /// All committed rows in insertion order.
    pub fn events(&self) -> Vec<AuditEvent> {
        lock(&self.state).rows.clone()
    }

    pub fn len(&self) -> usize {
        lock(&self.state).rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn lock(state: &Mutex<MemoryState>) -> MutexGuard<'_, MemoryState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug)]
pub struct MemoryTransaction {
    state: Arc<Mutex<MemoryState>>,
    staged: Vec<AuditEvent>,
}

impl MemoryTransaction {
    pub fn staged(&self) -> &[AuditEvent] {
        &self.staged
    }
}

#[async_trait]
impl AuditWriter for MemoryTransaction {
    async fn append(&mut self, event: NewAuditEvent) -> AuditResult<AuditEvent> {
        let id = lock(&self.state).next_id();
        let stored = event.into_event(id);
        self.staged.push(stored.clone());
        Ok(stored)
    }
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    async fn commit(self) -> AuditResult<()> {
        let MemoryTransaction { state, staged } = self;
        lock(&state).rows.extend(staged);
        Ok(())
    }

    async fn rollback(self) -> AuditResult<()> {
        Ok(())
    }
}

#[async_trait]
impl AuditStore for MemoryAuditStore {
    type Transaction = MemoryTransaction;

    async fn begin(&self) -> AuditResult<Self::Transaction> {
        Ok(MemoryTransaction {
            state: Arc::clone(&self.state),
            staged: Vec::new(),
        })
    }

    async fn query(&self, filters: &AuditEventFilters) -> AuditResult<Vec<AuditEvent>> {
        let mut events: Vec<AuditEvent> = lock(&self.state)
            .rows
            .iter()
            .filter(|event| filters.matches(event))
            .cloned()
            .collect();
        events.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(events)
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> AuditResult<u64> {
        let mut state = lock(&self.state);
        let before = state.rows.len();
        state.rows.retain(|event| event.created_at >= cutoff);
        Ok((before - state.rows.len()) as u64)
    }
}
