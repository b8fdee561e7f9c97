use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sqlx::{types::Json, FromRow};

/// A durable audit record. Rows are append-only; the only mutation they ever
/// see is deletion by retention.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct AuditEvent {
    pub id: i64,
    pub actor_id: Option<i64>,
    pub actor_email: Option<String>,
    pub actor_name: Option<String>,
    pub actor_ip: Option<String>,
    pub actor_user_agent: Option<String>,
    pub event_type: String,
    pub target_type: String,
    pub target_id: Option<String>,
    pub payload: Option<Json<Value>>,
    pub created_at: DateTime<Utc>,
}

impl AuditEvent {
    pub fn payload_value(&self) -> Option<&Value> {
        self.payload.as_ref().map(|value| &value.0)
    }

    /// Entry in the payload's `changes` map for `field`, if any.
    pub fn change(&self, field: &str) -> Option<&Value> {
        self.payload_value()
            .and_then(|payload| payload.get("changes"))
            .and_then(|changes| changes.get(field))
    }

    /// Single-line JSON form written to the audit log file.
    pub fn log_line(&self) -> Value {
        json!({
            "event": self.event_type,
            "target_type": self.target_type,
            "target_id": self.target_id,
            "actor_id": self.actor_id,
            "actor_email": self.actor_email,
            "actor_ip": self.actor_ip,
            "timestamp": self.created_at.to_rfc3339(),
            "payload": self.payload_value(),
        })
    }
}

/// Insert shape of an [`AuditEvent`]; the store assigns `id`.
#[derive(Debug, Clone, PartialEq)]
pub struct NewAuditEvent {
    pub actor_id: Option<i64>,
    pub actor_email: Option<String>,
    pub actor_name: Option<String>,
    pub actor_ip: Option<String>,
    pub actor_user_agent: Option<String>,
    pub event_type: String,
    pub target_type: String,
    pub target_id: Option<String>,
    pub payload: Option<Value>,
    pub created_at: DateTime<Utc>,
}

impl NewAuditEvent {
    pub fn into_event(self, id: i64) -> AuditEvent {
        AuditEvent {
            id,
            actor_id: self.actor_id,
            actor_email: self.actor_email,
            actor_name: self.actor_name,
            actor_ip: self.actor_ip,
            actor_user_agent: self.actor_user_agent,
            event_type: self.event_type,
            target_type: self.target_type,
            target_id: self.target_id,
            payload: self.payload.map(Json),
            created_at: self.created_at,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct AuditEventFilters {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub actor_id: Option<i64>,
    pub event_type: Option<String>,
    pub target_type: Option<String>,
    pub target_id: Option<String>,
}

impl AuditEventFilters {
    pub fn matches(&self, event: &AuditEvent) -> bool {
        self.from.map_or(true, |from| event.created_at >= from)
            && self.to.map_or(true, |to| event.created_at <= to)
            && self
                .actor_id
                .map_or(true, |actor_id| event.actor_id == Some(actor_id))
            && self
                .event_type
                .as_deref()
                .map_or(true, |event_type| event.event_type == event_type)
            && self
                .target_type
                .as_deref()
                .map_or(true, |target_type| event.target_type == target_type)
            && self
                .target_id
                .as_deref()
                .map_or(true, |target_id| event.target_id.as_deref() == Some(target_id))
    }
}
