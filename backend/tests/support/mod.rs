#![allow(dead_code)]
use chrono::{Duration as ChronoDuration, Utc};
use governance_backend::{
    models::audit_log::NewAuditEvent,
    services::audit_watch::{Auditable, Watch, WatchRegistry},
    utils::normalize::AuditValue,
};
use serde_json::json;
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::{
    env,
    sync::{Mutex, OnceLock},
    time::Duration as StdDuration,
};

/// A watched business entity. The id is assigned by the store on insert,
/// so it lives in a `OnceLock` the host can fill after the write.
#[derive(Debug)]
pub struct Risk {
    pub id: OnceLock<i64>,
    pub title: String,
    pub status: String,
    pub notes: Mutex<String>,
}

impl Risk {
    pub fn new(title: &str, status: &str) -> Self {
        Self {
            id: OnceLock::new(),
            title: title.to_string(),
            status: status.to_string(),
            notes: Mutex::new(String::new()),
        }
    }

    pub fn saved(id: i64, title: &str, status: &str) -> Self {
        let risk = Self::new(title, status);
        risk.id.set(id).expect("fresh id");
        risk
    }

    pub fn with_status(&self, status: &str) -> Self {
        let risk = Self {
            id: OnceLock::new(),
            title: self.title.clone(),
            status: status.to_string(),
            notes: Mutex::new(self.notes.lock().expect("notes").clone()),
        };
        if let Some(id) = self.id.get() {
            risk.id.set(*id).expect("fresh id");
        }
        risk
    }
}

impl Auditable for Risk {
    fn field(&self, name: &str) -> Option<AuditValue> {
        match name {
            "id" => Some(self.id.get().copied().into()),
            "title" => Some(self.title.as_str().into()),
            "status" => Some(self.status.as_str().into()),
            "notes" => Some(self.notes.lock().expect("notes").clone().into()),
            _ => None,
        }
    }
}

/// An entity no spec watches.
#[derive(Debug)]
pub struct Comment {
    pub body: String,
}

impl Auditable for Comment {
    fn field(&self, name: &str) -> Option<AuditValue> {
        (name == "body").then(|| self.body.as_str().into())
    }
}

pub fn risk_registry() -> WatchRegistry {
    WatchRegistry::builder()
        .watch(Watch::<Risk>::new("risk").fields(["status"]))
        .build()
}

/// An audit row created `age_days` ago.
pub fn aged_event(event_type: &str, age_days: i64) -> NewAuditEvent {
    NewAuditEvent {
        actor_id: None,
        actor_email: None,
        actor_name: None,
        actor_ip: None,
        actor_user_agent: None,
        event_type: event_type.to_string(),
        target_type: "risk".to_string(),
        target_id: Some("1".to_string()),
        payload: Some(json!({ "age_days": age_days })),
        created_at: Utc::now() - ChronoDuration::days(age_days),
    }
}

/// Pool for `TEST_DATABASE_URL` with migrations applied, or `None` when the
/// variable is unset so database tests can skip.
pub async fn test_pool() -> Option<PgPool> {
    let Ok(database_url) = env::var("TEST_DATABASE_URL") else {
        eprintln!("TEST_DATABASE_URL not set; skipping database test");
        return None;
    };
    let mut retry_count = 0;
    let max_retries = 3;

    let pool = loop {
        match PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(StdDuration::from_secs(30))
            .connect(&database_url)
            .await
        {
            Ok(pool) => break pool,
            Err(e) if retry_count < max_retries => {
                retry_count += 1;
                eprintln!(
                    "Retrying DB connection (attempt {}/{}): {}",
                    retry_count, max_retries, e
                );
                tokio::time::sleep(StdDuration::from_secs(2)).await;
            }
            Err(e) => panic!(
                "Failed to connect to test database after {} retries: {}",
                max_retries, e
            ),
        }
    };

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("run migrations");
    Some(pool)
}
