//! Transaction handling for the PostgreSQL audit store.
//!
//! A host `sqlx` transaction is the unit of work: business writes and audit
//! appends share it, so both commit or neither does.

use async_trait::async_trait;
use sqlx::Postgres;

use crate::error::AuditResult;
use crate::models::audit_log::{AuditEvent, NewAuditEvent};
use crate::repositories::audit_log::insert_audit_event;
use crate::repositories::repository::{AuditWriter, StoreTransaction};

#[async_trait]
impl<'c> AuditWriter for sqlx::Transaction<'c, Postgres> {
    async fn append(&mut self, event: NewAuditEvent) -> AuditResult<AuditEvent> {
        Ok(insert_audit_event(&mut **self, &event).await?)
    }
}

#[async_trait]
impl<'c> StoreTransaction for sqlx::Transaction<'c, Postgres> {
    /// Commits all business and audit writes made within the transaction.
    async fn commit(self) -> AuditResult<()> {
        sqlx::Transaction::commit(self).await?;
        Ok(())
    }

    /// Undoes everything written since the transaction began.
    async fn rollback(self) -> AuditResult<()> {
        sqlx::Transaction::rollback(self).await?;
        Ok(())
    }
}
