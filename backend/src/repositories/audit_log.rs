use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgTransaction, types::Json, PgConnection, PgPool, Postgres, QueryBuilder};

use crate::error::{AuditError, AuditResult};
use crate::models::audit_log::{AuditEvent, AuditEventFilters, NewAuditEvent};
use crate::repositories::repository::{AuditStore, AuditWriter};

const SELECT_COLUMNS: &str = "id, actor_id, actor_email, actor_name, actor_ip, actor_user_agent, \
     event_type, target_type, target_id, payload, created_at";

pub async fn insert_audit_event(
    conn: &mut PgConnection,
    event: &NewAuditEvent,
) -> Result<AuditEvent, sqlx::Error> {
    let query = format!(
        "INSERT INTO audit_logs \
         (actor_id, actor_email, actor_name, actor_ip, actor_user_agent, event_type, target_type, \
         target_id, payload, created_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
         RETURNING {}",
        SELECT_COLUMNS
    );
    sqlx::query_as::<_, AuditEvent>(&query)
        .bind(event.actor_id)
        .bind(&event.actor_email)
        .bind(&event.actor_name)
        .bind(&event.actor_ip)
        .bind(&event.actor_user_agent)
        .bind(&event.event_type)
        .bind(&event.target_type)
        .bind(&event.target_id)
        .bind(event.payload.clone().map(Json))
        .bind(event.created_at)
        .fetch_one(conn)
        .await
}

pub async fn list_audit_events(
    pool: &PgPool,
    filters: &AuditEventFilters,
) -> Result<Vec<AuditEvent>, sqlx::Error> {
    let mut builder: QueryBuilder<Postgres> =
        QueryBuilder::new(format!("SELECT {} FROM audit_logs", SELECT_COLUMNS));
    let mut has_clause = false;
    apply_audit_event_filters(&mut builder, &mut has_clause, filters);
    builder.push(" ORDER BY created_at DESC, id DESC");

    builder.build_query_as::<AuditEvent>().fetch_all(pool).await
}

pub async fn delete_audit_events_before(
    pool: &PgPool,
    cutoff: DateTime<Utc>,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("DELETE FROM audit_logs WHERE created_at < $1")
        .bind(cutoff)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

fn apply_audit_event_filters(
    builder: &mut QueryBuilder<'_, Postgres>,
    has_clause: &mut bool,
    filters: &AuditEventFilters,
) {
    if let Some(from) = filters.from {
        push_clause(builder, has_clause);
        builder.push("created_at >= ").push_bind(from);
    }
    if let Some(to) = filters.to {
        push_clause(builder, has_clause);
        builder.push("created_at <= ").push_bind(to);
    }
    if let Some(actor_id) = filters.actor_id {
        push_clause(builder, has_clause);
        builder.push("actor_id = ").push_bind(actor_id);
    }
    if let Some(event_type) = filters.event_type.as_ref() {
        push_clause(builder, has_clause);
        builder
            .push("event_type = ")
            .push_bind(event_type.to_string());
    }
    if let Some(target_type) = filters.target_type.as_ref() {
        push_clause(builder, has_clause);
        builder
            .push("target_type = ")
            .push_bind(target_type.to_string());
    }
    if let Some(target_id) = filters.target_id.as_ref() {
        push_clause(builder, has_clause);
        builder
            .push("target_id = ")
            .push_bind(target_id.to_string());
    }
}

fn push_clause(builder: &mut QueryBuilder<'_, Postgres>, has_clause: &mut bool) {
    if *has_clause {
        builder.push(" AND ");
    } else {
        builder.push(" WHERE ");
        *has_clause = true;
    }
}

#[async_trait]
impl AuditWriter for PgConnection {
    async fn append(&mut self, event: NewAuditEvent) -> AuditResult<AuditEvent> {
        Ok(insert_audit_event(self, &event).await?)
    }
}

/// PostgreSQL-backed audit store over the shared pool.
#[derive(Debug, Clone)]
pub struct PgAuditStore {
    pool: PgPool,
}

impl PgAuditStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl AuditStore for PgAuditStore {
    type Transaction = PgTransaction<'static>;

    async fn begin(&self) -> AuditResult<Self::Transaction> {
        Ok(self.pool.begin().await?)
    }

    async fn query(&self, filters: &AuditEventFilters) -> AuditResult<Vec<AuditEvent>> {
        Ok(list_audit_events(&self.pool, filters).await?)
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> AuditResult<u64> {
        match delete_audit_events_before(&self.pool, cutoff).await {
            Ok(deleted) => Ok(deleted),
            Err(err) => {
                let err = AuditError::from(err);
                if err.is_missing_table() {
                    tracing::debug!("Audit log table missing; skipping prune until migrations run");
                    return Ok(0);
                }
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rendered(filters: &AuditEventFilters) -> String {
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new("SELECT id FROM audit_logs");
        let mut has_clause = false;
        apply_audit_event_filters(&mut builder, &mut has_clause, filters);
        builder.sql().to_string()
    }

    #[test]
    fn no_filters_render_no_where_clause() {
        assert_eq!(rendered(&AuditEventFilters::default()), "SELECT id FROM audit_logs");
    }

    #[test]
    fn filters_are_joined_with_and() {
        let filters = AuditEventFilters {
            actor_id: Some(4),
            target_type: Some("risk".into()),
            target_id: Some("12".into()),
            ..Default::default()
        };
        assert_eq!(
            rendered(&filters),
            "SELECT id FROM audit_logs WHERE actor_id = $1 AND target_type = $2 AND target_id = $3"
        );
    }
}
