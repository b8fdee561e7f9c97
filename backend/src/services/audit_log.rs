use serde_json::{Map, Value};
use std::sync::Arc;

use crate::{
    config::AuditSettings,
    error::{AuditError, AuditResult},
    models::{
        actor::ActorProfile,
        audit_log::{AuditEvent, AuditEventFilters, NewAuditEvent},
    },
    repositories::repository::{AuditStore, AuditWriter, StoreTransaction},
    services::{
        audit_actor::{determine_ip, determine_user_agent, resolve_actor},
        audit_capture::AuditUnit,
        audit_sink::AuditLogSink,
        audit_watch::{EntityCatalog, WatchRegistry},
    },
};

/// A single explicit audit event. `action` becomes the event type verbatim.
#[derive(Debug, Clone, Default)]
pub struct AuditEventRequest {
    pub action: String,
    pub entity_type: String,
    pub entity_id: Option<String>,
    pub details: Option<Value>,
    pub actor: Option<ActorProfile>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

impl AuditEventRequest {
    pub fn new(action: impl Into<String>, entity_type: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            entity_type: entity_type.into(),
            ..Default::default()
        }
    }

    pub fn with_entity_id(mut self, entity_id: impl ToString) -> Self {
        self.entity_id = Some(entity_id.to_string());
        self
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn with_actor(mut self, actor: ActorProfile) -> Self {
        self.actor = Some(actor);
        self
    }

    fn validate(&self) -> AuditResult<()> {
        if self.action.trim().is_empty() {
            return Err(AuditError::InvalidEvent("'action' is required".into()));
        }
        if self.entity_type.trim().is_empty() {
            return Err(AuditError::InvalidEvent("'entity_type' is required".into()));
        }
        Ok(())
    }

    /// Attaches provenance from the explicit fields or the current request.
    fn into_new_event(self) -> NewAuditEvent {
        let actor = resolve_actor(self.actor.as_ref());
        NewAuditEvent {
            actor_id: actor.id,
            actor_email: actor.email,
            actor_name: actor.name,
            actor_ip: determine_ip(self.ip_address.as_deref()),
            actor_user_agent: determine_user_agent(self.user_agent.as_deref()),
            event_type: self.action,
            target_type: self.entity_type,
            target_id: self.entity_id,
            payload: self.details,
            created_at: crate::utils::time::now_utc(),
        }
    }
}

/// A mutation event: the event type is `<entity_type>.<action>` and the
/// payload carries `changes` next to any metadata.
#[derive(Debug, Clone, Default)]
pub struct ChangeEventRequest {
    pub action: String,
    pub entity_type: String,
    pub entity_id: Option<String>,
    pub changes: Option<Map<String, Value>>,
    pub metadata: Option<Map<String, Value>>,
    pub actor: Option<ActorProfile>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

impl ChangeEventRequest {
    pub fn new(action: impl Into<String>, entity_type: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            entity_type: entity_type.into(),
            ..Default::default()
        }
    }
}

impl From<ChangeEventRequest> for AuditEventRequest {
    fn from(request: ChangeEventRequest) -> Self {
        let mut details = request.metadata.unwrap_or_default();
        if let Some(changes) = request.changes.filter(|changes| !changes.is_empty()) {
            details
                .entry("changes")
                .or_insert_with(|| Value::Object(changes));
        }

        let entity_type = request.entity_type.trim();
        let (action, entity_type) = if entity_type.is_empty() {
            (request.action, "unknown".to_string())
        } else {
            (
                format!("{entity_type}.{}", request.action),
                entity_type.to_string(),
            )
        };

        AuditEventRequest {
            action,
            entity_type,
            entity_id: request.entity_id,
            details: Some(Value::Object(details)),
            actor: request.actor,
            ip_address: request.ip_address,
            user_agent: request.user_agent,
        }
    }
}

/// An authentication attempt, recorded as `auth.login.<status>`.
#[derive(Debug, Clone, Default)]
pub struct LoginEventRequest {
    pub status: String,
    pub user: Option<ActorProfile>,
    pub email: Option<String>,
    pub reason: Option<String>,
    pub metadata: Option<Map<String, Value>>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

impl LoginEventRequest {
    pub fn new(status: impl Into<String>) -> Self {
        Self {
            status: status.into(),
            ..Default::default()
        }
    }
}

fn login_status(raw: &str) -> String {
    let status = raw.trim().to_lowercase();
    if status.is_empty() {
        "unknown".to_string()
    } else {
        status
    }
}

impl From<LoginEventRequest> for AuditEventRequest {
    fn from(request: LoginEventRequest) -> Self {
        let status = login_status(&request.status);
        let email = request.email.filter(|email| !email.trim().is_empty());

        let mut details = Map::new();
        details.insert("status".into(), Value::String(status.clone()));
        if let Some(metadata) = request.metadata {
            details.extend(metadata);
        }
        if let Some(reason) = request.reason.filter(|reason| !reason.is_empty()) {
            details.insert("reason".into(), Value::String(reason));
        }
        if let Some(email) = &email {
            details.insert("email".into(), Value::String(email.clone()));
        }

        // A known user is the target even when its id is not yet assigned.
        let entity_id = match &request.user {
            Some(user) => user.id.map(|id| id.to_string()),
            None => email,
        };

        AuditEventRequest {
            action: format!("auth.login.{status}"),
            entity_type: "auth".to_string(),
            entity_id,
            details: Some(Value::Object(details)),
            actor: request.user,
            ip_address: request.ip_address,
            user_agent: request.user_agent,
        }
    }
}

/// Validates `request` and appends it through `writer`. Returns `None` when
/// audit logging is disabled.
pub(crate) async fn append_event<W>(
    writer: &mut W,
    request: AuditEventRequest,
    enabled: bool,
) -> AuditResult<Option<AuditEvent>>
where
    W: AuditWriter + ?Sized,
{
    request.validate()?;
    if !enabled {
        tracing::debug!(event_type = %request.action, "Audit logging disabled; event skipped");
        return Ok(None);
    }
    let event = writer.append(request.into_new_event()).await?;
    Ok(Some(event))
}

/// Entry point for explicit audit events and for opening capture units.
pub struct AuditLogService<S> {
    store: Arc<S>,
    registry: Arc<WatchRegistry>,
    sink: Arc<AuditLogSink>,
    enabled: bool,
}

impl<S> Clone for AuditLogService<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            registry: Arc::clone(&self.registry),
            sink: Arc::clone(&self.sink),
            enabled: self.enabled,
        }
    }
}

impl<S: AuditStore> AuditLogService<S> {
    pub fn new(store: S, registry: WatchRegistry, sink: AuditLogSink) -> Self {
        Self {
            store: Arc::new(store),
            registry: Arc::new(registry),
            sink: Arc::new(sink),
            enabled: true,
        }
    }

    /// Builds the registry and file sink from `settings`. A disabled
    /// subsystem gets neither.
    pub fn from_settings(store: S, settings: &AuditSettings, catalog: &EntityCatalog) -> Self {
        if !settings.enabled {
            return Self::new(store, WatchRegistry::default(), AuditLogSink::disabled())
                .with_enabled(false);
        }
        let registry = WatchRegistry::from_config(&settings.watch, catalog);
        tracing::debug!(specs = registry.len(), "Audit watch registry built");
        Self::new(
            store,
            registry,
            AuditLogSink::open(settings.log_path.as_deref()),
        )
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn shared_store(&self) -> Arc<S> {
        Arc::clone(&self.store)
    }

    pub fn registry(&self) -> &WatchRegistry {
        &self.registry
    }

    pub fn sink(&self) -> &AuditLogSink {
        &self.sink
    }

    /// Opens a store transaction wrapped in a capture unit.
    pub async fn begin(&self) -> AuditResult<AuditUnit<S::Transaction>> {
        let tx = self.store.begin().await?;
        Ok(self.unit(tx))
    }

    /// Wraps a transaction the caller already opened.
    pub fn unit<T: StoreTransaction>(&self, tx: T) -> AuditUnit<T> {
        AuditUnit::new(
            tx,
            Arc::clone(&self.registry),
            Arc::clone(&self.sink),
            self.enabled,
        )
    }

    /// Appends within the caller's transaction. The returned event reaches
    /// the log file once the transaction is finished through
    /// [`AuditLogService::commit`].
    pub async fn log_event<W>(
        &self,
        writer: &mut W,
        request: AuditEventRequest,
    ) -> AuditResult<Option<AuditEvent>>
    where
        W: AuditWriter + ?Sized,
    {
        append_event(writer, request, self.enabled).await
    }

    pub async fn log_change_event<W>(
        &self,
        writer: &mut W,
        request: ChangeEventRequest,
    ) -> AuditResult<Option<AuditEvent>>
    where
        W: AuditWriter + ?Sized,
    {
        append_event(writer, request.into(), self.enabled).await
    }

    pub async fn log_login_event<W>(
        &self,
        writer: &mut W,
        request: LoginEventRequest,
    ) -> AuditResult<Option<AuditEvent>>
    where
        W: AuditWriter + ?Sized,
    {
        append_event(writer, request.into(), self.enabled).await
    }

    /// Commits a caller-owned transaction, then copies `events` (those its
    /// `log_*` calls returned) to the log file. Nothing is emitted when the
    /// commit fails.
    pub async fn commit<T>(&self, tx: T, events: &[AuditEvent]) -> AuditResult<()>
    where
        T: StoreTransaction,
    {
        tx.commit().await?;
        self.sink.emit_all(events);
        Ok(())
    }

    /// Writes one event in its own transaction, commits and emits it.
    pub async fn record<R>(&self, request: R) -> AuditResult<Option<AuditEvent>>
    where
        R: Into<AuditEventRequest>,
    {
        let request = request.into();
        if !self.enabled {
            request.validate()?;
            return Ok(None);
        }
        let mut unit = self.begin().await?;
        let event = unit.log_event(request).await?;
        unit.commit().await?;
        Ok(event)
    }

    pub async fn query(&self, filters: &AuditEventFilters) -> AuditResult<Vec<AuditEvent>> {
        self.store.query(filters).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::memory_audit_log::MemoryAuditStore;
    use serde_json::json;

    fn service() -> AuditLogService<MemoryAuditStore> {
        AuditLogService::new(
            MemoryAuditStore::new(),
            WatchRegistry::default(),
            AuditLogSink::disabled(),
        )
    }

    fn metadata(value: Value) -> Option<Map<String, Value>> {
        value.as_object().cloned()
    }

    #[test]
    fn change_request_prefixes_entity_type() {
        let request = ChangeEventRequest {
            entity_id: Some("5".into()),
            changes: metadata(json!({ "status": { "old": null, "new": "draft" } })),
            metadata: metadata(json!({ "source": "api" })),
            ..ChangeEventRequest::new("created", "risk")
        };
        let event: AuditEventRequest = request.into();
        assert_eq!(event.action, "risk.created");
        assert_eq!(event.entity_type, "risk");
        assert_eq!(
            event.details,
            Some(json!({
                "source": "api",
                "changes": { "status": { "old": null, "new": "draft" } }
            }))
        );
    }

    #[test]
    fn change_request_without_entity_type_targets_unknown() {
        let event: AuditEventRequest = ChangeEventRequest::new("exported", "").into();
        assert_eq!(event.action, "exported");
        assert_eq!(event.entity_type, "unknown");
        assert_eq!(event.details, Some(json!({})));
    }

    #[test]
    fn login_request_shapes_payload() {
        let request = LoginEventRequest {
            email: Some("someone@example.com".into()),
            reason: Some("bad password".into()),
            metadata: metadata(json!({ "method": "password" })),
            ..LoginEventRequest::new(" FAILED ")
        };
        let event: AuditEventRequest = request.into();
        assert_eq!(event.action, "auth.login.failed");
        assert_eq!(event.entity_type, "auth");
        assert_eq!(event.entity_id.as_deref(), Some("someone@example.com"));
        assert_eq!(
            event.details,
            Some(json!({
                "status": "failed",
                "method": "password",
                "reason": "bad password",
                "email": "someone@example.com"
            }))
        );
    }

    #[test]
    fn login_request_prefers_user_id_and_defaults_status() {
        let request = LoginEventRequest {
            user: Some(ActorProfile::new(21, "user@example.com")),
            email: Some("user@example.com".into()),
            ..LoginEventRequest::new("")
        };
        let event: AuditEventRequest = request.into();
        assert_eq!(event.action, "auth.login.unknown");
        assert_eq!(event.entity_id.as_deref(), Some("21"));
        assert_eq!(event.actor.and_then(|actor| actor.id), Some(21));
    }

    #[tokio::test]
    async fn blank_action_is_rejected() {
        let service = service();
        let err = service
            .record(AuditEventRequest::new(" ", "risk"))
            .await
            .expect_err("blank action");
        assert!(matches!(err, AuditError::InvalidEvent(_)));

        let err = service
            .with_enabled(false)
            .record(AuditEventRequest::new("risk.viewed", ""))
            .await
            .expect_err("blank entity type");
        assert!(matches!(err, AuditError::InvalidEvent(_)));
    }

    #[tokio::test]
    async fn record_commits_with_explicit_provenance() {
        let service = service();
        let request = AuditEventRequest {
            ip_address: Some("192.0.2.10".into()),
            user_agent: Some("cli/1.0".into()),
            ..AuditEventRequest::new("report.generated", "report")
                .with_entity_id(8)
                .with_details(json!({ "format": "pdf" }))
                .with_actor(ActorProfile::new(4, "analyst@example.com").with_username("analyst"))
        };

        let event = service.record(request).await.expect("record").expect("event");

        assert_eq!(event.event_type, "report.generated");
        assert_eq!(event.target_id.as_deref(), Some("8"));
        assert_eq!(event.actor_id, Some(4));
        assert_eq!(event.actor_name.as_deref(), Some("analyst"));
        assert_eq!(event.actor_ip.as_deref(), Some("192.0.2.10"));
        assert_eq!(event.actor_user_agent.as_deref(), Some("cli/1.0"));
        assert_eq!(service.store().events(), vec![event]);
    }

    #[tokio::test]
    async fn disabled_service_writes_nothing() {
        let service = service().with_enabled(false);
        let event = service
            .record(AuditEventRequest::new("risk.viewed", "risk"))
            .await
            .expect("record");
        assert!(event.is_none());

        let mut tx = service.store().begin().await.expect("begin");
        let event = service
            .log_login_event(&mut tx, LoginEventRequest::new("success"))
            .await
            .expect("login");
        assert!(event.is_none());
        assert!(tx.staged().is_empty());
    }

    #[tokio::test]
    async fn log_event_stays_in_callers_transaction() {
        let service = service();
        let mut tx = service.store().begin().await.expect("begin");
        let event = service
            .log_change_event(&mut tx, ChangeEventRequest::new("archived", "risk"))
            .await
            .expect("log")
            .expect("event");
        assert!(service.store().is_empty());

        service.commit(tx, &[event]).await.expect("commit");
        let events = service
            .query(&AuditEventFilters {
                event_type: Some("risk.archived".into()),
                ..Default::default()
            })
            .await
            .expect("query");
        assert_eq!(events.len(), 1);
    }
}
