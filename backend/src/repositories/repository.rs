//! Storage traits for audit records.
//!
//! Writes happen inside a host transaction ([`AuditWriter`]); reads and
//! retention deletes go straight to the store ([`AuditStore`]).

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::AuditResult;
use crate::models::audit_log::{AuditEvent, AuditEventFilters, NewAuditEvent};

/// Appends audit records within an open transaction. Rows become visible to
/// other readers only once that transaction commits.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AuditWriter: Send {
    async fn append(&mut self, event: NewAuditEvent) -> AuditResult<AuditEvent>;
}

/// A unit of work the audit layer can append to and finish.
#[async_trait]
pub trait StoreTransaction: AuditWriter + Sized {
    async fn commit(self) -> AuditResult<()>;

    async fn rollback(self) -> AuditResult<()>;
}

#[async_trait]
pub trait AuditStore: Send + Sync {
    type Transaction: StoreTransaction + 'static;

    async fn begin(&self) -> AuditResult<Self::Transaction>;

    /// Events matching `filters`, newest first.
    async fn query(&self, filters: &AuditEventFilters) -> AuditResult<Vec<AuditEvent>>;

    /// Bulk delete of events created strictly before `cutoff`.
    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> AuditResult<u64>;
}
