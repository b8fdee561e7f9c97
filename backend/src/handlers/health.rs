use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;

use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub database: bool,
    pub audit_enabled: bool,
    pub audit_log_file: bool,
    pub watched_entities: Vec<String>,
}

pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let database = match sqlx::query("SELECT 1").execute(&state.pool).await {
        Ok(_) => true,
        Err(err) => {
            tracing::warn!(error = %err, "Health check could not reach the database");
            false
        }
    };
    let status = if database {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(HealthResponse {
            status: if database { "ok" } else { "degraded" },
            database,
            audit_enabled: state.audit.is_enabled(),
            audit_log_file: state.audit.sink().is_enabled(),
            watched_entities: state
                .audit
                .registry()
                .specs()
                .iter()
                .map(|spec| spec.entity_type.clone())
                .collect(),
        }),
    )
}
