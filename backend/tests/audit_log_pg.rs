use chrono::{Duration as ChronoDuration, Utc};
use governance_backend::{
    models::audit_log::AuditEventFilters,
    repositories::{
        audit_log::{insert_audit_event, PgAuditStore},
        repository::AuditStore,
    },
    services::{
        audit_capture::EntityChange,
        audit_log::{AuditLogService, ChangeEventRequest},
        audit_sink::AuditLogSink,
        audit_watch::{Watch, WatchRegistry},
    },
};
use serde_json::json;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use std::{env, str::FromStr, sync::Arc};
use uuid::Uuid;

mod support;

use support::{aged_event, Risk};

fn service(pool: &sqlx::PgPool) -> AuditLogService<PgAuditStore> {
    let registry = WatchRegistry::builder()
        .watch(
            Watch::<Risk>::new("risk")
                .fields(["status"])
                .identity("title"),
        )
        .build();
    AuditLogService::new(PgAuditStore::new(pool.clone()), registry, AuditLogSink::disabled())
}

fn by_target(target_id: &str) -> AuditEventFilters {
    AuditEventFilters {
        target_type: Some("risk".into()),
        target_id: Some(target_id.into()),
        ..Default::default()
    }
}

#[tokio::test]
async fn audit_rows_commit_with_host_transaction() {
    let Some(pool) = support::test_pool().await else {
        return;
    };
    let service = service(&pool);
    let marker = Uuid::new_v4().to_string();

    let tx = pool.begin().await.expect("begin");
    let mut unit = service.unit(tx);
    sqlx::query("SELECT 1")
        .execute(&mut **unit.transaction())
        .await
        .expect("business write");
    unit.flush_changes(&[EntityChange::inserted(Arc::new(Risk::new(&marker, "pending")))])
        .await
        .expect("flush");
    assert!(service.query(&by_target(&marker)).await.expect("query").is_empty());

    unit.commit().await.expect("commit");

    let events = service.query(&by_target(&marker)).await.expect("query");
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type, "risk.created");
    assert_eq!(
        events[0].change("status"),
        Some(&json!({ "old": null, "new": "pending" }))
    );
}

#[tokio::test]
async fn audit_rows_roll_back_with_host_transaction() {
    let Some(pool) = support::test_pool().await else {
        return;
    };
    let service = service(&pool);
    let marker = Uuid::new_v4().to_string();

    let mut unit = service.begin().await.expect("begin");
    unit.log_change_event(ChangeEventRequest {
        entity_id: Some(marker.clone()),
        ..ChangeEventRequest::new("archived", "risk")
    })
    .await
    .expect("log")
    .expect("event");
    unit.rollback().await.expect("rollback");

    assert!(service.query(&by_target(&marker)).await.expect("query").is_empty());
}

#[tokio::test]
async fn delete_older_than_removes_only_expired_rows() {
    let Some(pool) = support::test_pool().await else {
        return;
    };
    let marker = Uuid::new_v4().to_string();
    let mut conn = pool.acquire().await.expect("acquire");
    for age in [400, 0] {
        let mut event = aged_event("risk.updated", age);
        event.target_id = Some(marker.clone());
        insert_audit_event(&mut *conn, &event).await.expect("insert");
    }
    drop(conn);

    let store = PgAuditStore::new(pool.clone());
    let deleted = store
        .delete_older_than(Utc::now() - ChronoDuration::days(365))
        .await
        .expect("delete");
    assert!(deleted >= 1);

    let remaining = store.query(&by_target(&marker)).await.expect("query");
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].payload_value(), Some(&json!({ "age_days": 0 })));
}

#[tokio::test]
async fn delete_older_than_tolerates_missing_table() {
    let Some(pool) = support::test_pool().await else {
        return;
    };
    let schema = format!("audit_missing_{}", Uuid::new_v4().simple());
    sqlx::query(&format!("CREATE SCHEMA {schema}"))
        .execute(&pool)
        .await
        .expect("create schema");

    let database_url = env::var("TEST_DATABASE_URL").expect("database url");
    let options = PgConnectOptions::from_str(&database_url)
        .expect("connect options")
        .options([("search_path", schema.as_str())]);
    let isolated = PgPoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .expect("connect");

    let deleted = PgAuditStore::new(isolated.clone())
        .delete_older_than(Utc::now())
        .await
        .expect("missing table is not an error");
    assert_eq!(deleted, 0);

    isolated.close().await;
    sqlx::query(&format!("DROP SCHEMA {schema} CASCADE"))
        .execute(&pool)
        .await
        .expect("drop schema");
}
