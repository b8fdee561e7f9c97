//! Transaction-scoped capture of entity mutations.
//!
//! An [`AuditUnit`] owns the host transaction and a buffer of pending changes.
//! The host reports what it is about to write with
//! [`AuditUnit::before_flush`], then calls [`AuditUnit::after_flush`] once the
//! business rows are written, which appends one audit row per change inside
//! the same transaction. Committing the unit commits both and copies the
//! events to the log file; rolling back or dropping it discards everything.

use serde_json::{Map, Value};
use std::{fmt, sync::Arc};

use crate::{
    error::AuditResult,
    models::audit_log::AuditEvent,
    repositories::repository::{AuditWriter, StoreTransaction},
    services::{
        audit_log::{append_event, AuditEventRequest, ChangeEventRequest, LoginEventRequest},
        audit_sink::AuditLogSink,
        audit_watch::{Auditable, ModelChangeSpec, Operation, WatchRegistry},
    },
    utils::normalize::normalize,
};

const CAPTURE_SOURCE: &str = "orm_listener";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    /// Nothing captured or written yet.
    Idle,
    /// Changes captured and waiting for `after_flush`.
    Capturing,
    /// Audit rows written and waiting for commit.
    Pending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeAction {
    Created,
    Updated,
    Deleted,
}

impl ChangeAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeAction::Created => "created",
            ChangeAction::Updated => "updated",
            ChangeAction::Deleted => "deleted",
        }
    }

    fn operation(&self) -> Operation {
        match self {
            ChangeAction::Created => Operation::Insert,
            ChangeAction::Updated => Operation::Update,
            ChangeAction::Deleted => Operation::Delete,
        }
    }
}

impl fmt::Display for ChangeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A mutation the host is about to flush.
#[derive(Clone)]
pub enum EntityChange {
    Inserted(Arc<dyn Auditable>),
    /// `before` is a snapshot of the persisted state, `after` the live entity.
    Updated {
        before: Arc<dyn Auditable>,
        after: Arc<dyn Auditable>,
    },
    Deleted(Arc<dyn Auditable>),
}

impl EntityChange {
    pub fn inserted<E: Auditable>(entity: Arc<E>) -> Self {
        EntityChange::Inserted(entity)
    }

    pub fn updated<E: Auditable>(before: E, after: Arc<E>) -> Self {
        EntityChange::Updated {
            before: Arc::new(before),
            after,
        }
    }

    pub fn deleted<E: Auditable>(entity: E) -> Self {
        EntityChange::Deleted(Arc::new(entity))
    }

    fn operation(&self) -> Operation {
        match self {
            EntityChange::Inserted(_) => Operation::Insert,
            EntityChange::Updated { .. } => Operation::Update,
            EntityChange::Deleted(_) => Operation::Delete,
        }
    }

    /// The entity whose type selects the watch spec.
    fn subject(&self) -> &dyn Auditable {
        match self {
            EntityChange::Inserted(entity) | EntityChange::Deleted(entity) => entity.as_ref(),
            EntityChange::Updated { after, .. } => after.as_ref(),
        }
    }
}

impl fmt::Debug for EntityChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityChange")
            .field("operation", &self.operation())
            .field("entity", &self.subject().entity_type_name())
            .finish()
    }
}

/// A captured change waiting to be written.
#[derive(Clone)]
pub struct PendingAuditChange {
    pub spec: Arc<ModelChangeSpec>,
    pub action: ChangeAction,
    pub entity_id: Option<String>,
    pub changes: Map<String, Value>,
    pub metadata: Map<String, Value>,
    /// Live entity, kept so identity assigned by the write can be read back.
    instance: Option<Arc<dyn Auditable>>,
}

impl fmt::Debug for PendingAuditChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingAuditChange")
            .field("entity_type", &self.spec.entity_type)
            .field("action", &self.action)
            .field("entity_id", &self.entity_id)
            .field("changes", &self.changes)
            .field("metadata", &self.metadata)
            .finish()
    }
}

impl PendingAuditChange {
    fn new(
        spec: &Arc<ModelChangeSpec>,
        action: ChangeAction,
        entity_id: Option<String>,
        changes: Map<String, Value>,
        instance: Option<Arc<dyn Auditable>>,
    ) -> Self {
        let mut metadata = Map::new();
        metadata.insert("source".into(), Value::from(CAPTURE_SOURCE));
        metadata.insert("operation".into(), Value::from(action.operation().as_str()));
        Self {
            spec: Arc::clone(spec),
            action,
            entity_id,
            changes,
            metadata,
            instance,
        }
    }

    /// Identity captured up front, else whatever the live entity reports now.
    pub fn resolved_entity_id(&self) -> Option<String> {
        self.entity_id.clone().or_else(|| {
            self.instance
                .as_deref()
                .and_then(|instance| self.spec.resolve_identity(instance))
        })
    }

    fn into_request(self) -> AuditEventRequest {
        let entity_id = self.resolved_entity_id();
        ChangeEventRequest {
            action: self.action.as_str().to_string(),
            entity_type: self.spec.entity_type.clone(),
            entity_id,
            changes: Some(self.changes),
            metadata: Some(self.metadata),
            ..Default::default()
        }
        .into()
    }
}

fn field_value(entity: &dyn Auditable, field: &str) -> Value {
    entity
        .field(field)
        .map(|value| normalize(&value))
        .unwrap_or(Value::Null)
}

fn change_entry(old: Value, new: Value) -> Value {
    let mut entry = Map::with_capacity(2);
    entry.insert("old".into(), old);
    entry.insert("new".into(), new);
    Value::Object(entry)
}

pub fn capture_insert(entity: &Arc<dyn Auditable>, spec: &Arc<ModelChangeSpec>) -> PendingAuditChange {
    let changes = spec
        .tracked_fields
        .iter()
        .map(|field| {
            (
                field.clone(),
                change_entry(Value::Null, field_value(entity.as_ref(), field)),
            )
        })
        .collect();
    PendingAuditChange::new(
        spec,
        ChangeAction::Created,
        spec.resolve_identity(entity.as_ref()),
        changes,
        Some(Arc::clone(entity)),
    )
}

/// Field-level diff of the tracked fields. Returns `None` when no tracked
/// field changed. A field missing from `before` counts as null.
pub fn capture_update(
    before: &dyn Auditable,
    after: &Arc<dyn Auditable>,
    spec: &Arc<ModelChangeSpec>,
) -> Option<PendingAuditChange> {
    let mut changes = Map::new();
    for field in &spec.tracked_fields {
        let old = field_value(before, field);
        let new = field_value(after.as_ref(), field);
        if old != new {
            changes.insert(field.clone(), change_entry(old, new));
        }
    }
    if changes.is_empty() {
        return None;
    }
    Some(PendingAuditChange::new(
        spec,
        ChangeAction::Updated,
        spec.resolve_identity(after.as_ref()),
        changes,
        Some(Arc::clone(after)),
    ))
}

pub fn capture_delete(entity: &dyn Auditable, spec: &Arc<ModelChangeSpec>) -> PendingAuditChange {
    let changes = spec
        .tracked_fields
        .iter()
        .map(|field| {
            (
                field.clone(),
                change_entry(field_value(entity, field), Value::Null),
            )
        })
        .collect();
    // Deleted rows get no live reference; their identity is final.
    PendingAuditChange::new(
        spec,
        ChangeAction::Deleted,
        spec.resolve_identity(entity),
        changes,
        None,
    )
}

/// Changes captured during one transaction and not yet written.
#[derive(Debug, Default)]
pub struct CaptureBuffer {
    pending: Vec<PendingAuditChange>,
}

impl CaptureBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Captures every change that a spec in `registry` watches. Returns how
    /// many were buffered.
    pub fn capture(&mut self, registry: &WatchRegistry, changes: &[EntityChange]) -> usize {
        let before = self.pending.len();
        for change in changes {
            let operation = change.operation();
            let Some(spec) = registry.matching(change.subject()) else {
                continue;
            };
            if !spec.watches(operation) {
                continue;
            }
            let captured = match change {
                EntityChange::Inserted(entity) => Some(capture_insert(entity, spec)),
                EntityChange::Updated { before, after } => {
                    capture_update(before.as_ref(), after, spec)
                }
                EntityChange::Deleted(entity) => Some(capture_delete(entity.as_ref(), spec)),
            };
            match captured {
                Some(pending) => self.pending.push(pending),
                None => tracing::debug!(
                    entity = %spec.entity_type,
                    "No tracked field changed; update not audited"
                ),
            }
        }
        self.pending.len() - before
    }

    /// Writes every buffered change through `writer`, pushing each stored
    /// event onto `written`. The buffer is emptied first, so a failed write
    /// leaves nothing stale behind; events appended before the failure stay
    /// in `written`.
    pub async fn flush<W>(
        &mut self,
        writer: &mut W,
        written: &mut Vec<AuditEvent>,
    ) -> AuditResult<usize>
    where
        W: AuditWriter + ?Sized,
    {
        let pending = std::mem::take(&mut self.pending);
        let start = written.len();
        for change in pending {
            let entity_type = change.spec.entity_type.clone();
            match append_event(writer, change.into_request(), true).await {
                Ok(Some(event)) => written.push(event),
                Ok(None) => {}
                Err(err) => {
                    tracing::warn!(
                        entity = %entity_type,
                        error = %err,
                        "Failed to write captured audit change"
                    );
                    return Err(err);
                }
            }
        }
        Ok(written.len() - start)
    }

    pub fn pending(&self) -> &[PendingAuditChange] {
        &self.pending
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

/// A host transaction plus the audit rows captured within it.
pub struct AuditUnit<T: StoreTransaction> {
    tx: T,
    registry: Arc<WatchRegistry>,
    sink: Arc<AuditLogSink>,
    enabled: bool,
    buffer: CaptureBuffer,
    written: Vec<AuditEvent>,
}

impl<T: StoreTransaction> AuditUnit<T> {
    pub(crate) fn new(
        tx: T,
        registry: Arc<WatchRegistry>,
        sink: Arc<AuditLogSink>,
        enabled: bool,
    ) -> Self {
        Self {
            tx,
            registry,
            sink,
            enabled,
            buffer: CaptureBuffer::new(),
            written: Vec::new(),
        }
    }

    /// The host transaction, for the business writes.
    pub fn transaction(&mut self) -> &mut T {
        &mut self.tx
    }

    pub fn state(&self) -> CaptureState {
        if !self.buffer.is_empty() {
            CaptureState::Capturing
        } else if !self.written.is_empty() {
            CaptureState::Pending
        } else {
            CaptureState::Idle
        }
    }

    pub fn pending(&self) -> &[PendingAuditChange] {
        self.buffer.pending()
    }

    /// Events written so far and not yet committed.
    pub fn written(&self) -> &[AuditEvent] {
        &self.written
    }

    /// Captures the changes about to be flushed. May be called several
    /// times; captures accumulate until the next `after_flush`.
    pub fn before_flush(&mut self, changes: &[EntityChange]) -> usize {
        if !self.enabled || self.registry.is_empty() {
            return 0;
        }
        self.buffer.capture(&self.registry, changes)
    }

    /// Appends the buffered changes inside the transaction. On error the
    /// rows appended before the failure are still tracked in `written`; the
    /// unit should be rolled back.
    pub async fn after_flush(&mut self) -> AuditResult<usize> {
        if self.buffer.is_empty() {
            return Ok(0);
        }
        self.buffer.flush(&mut self.tx, &mut self.written).await
    }

    /// `before_flush` and `after_flush` in one step, for hosts whose writes
    /// are already done.
    pub async fn flush_changes(&mut self, changes: &[EntityChange]) -> AuditResult<usize> {
        self.before_flush(changes);
        self.after_flush().await
    }

    pub async fn log_event(&mut self, request: AuditEventRequest) -> AuditResult<Option<AuditEvent>> {
        let event = append_event(&mut self.tx, request, self.enabled).await?;
        if let Some(event) = &event {
            self.written.push(event.clone());
        }
        Ok(event)
    }

    pub async fn log_change_event(
        &mut self,
        request: ChangeEventRequest,
    ) -> AuditResult<Option<AuditEvent>> {
        self.log_event(request.into()).await
    }

    pub async fn log_login_event(
        &mut self,
        request: LoginEventRequest,
    ) -> AuditResult<Option<AuditEvent>> {
        self.log_event(request.into()).await
    }

    /// Writes anything still buffered, commits, then copies the committed
    /// events to the log file.
    pub async fn commit(mut self) -> AuditResult<Vec<AuditEvent>> {
        self.after_flush().await?;
        let AuditUnit {
            tx, sink, written, ..
        } = self;
        tx.commit().await?;
        sink.emit_all(&written);
        Ok(written)
    }

    /// Discards the transaction and every captured change.
    pub async fn rollback(self) -> AuditResult<()> {
        let AuditUnit {
            tx, buffer, written, ..
        } = self;
        tracing::debug!(
            buffered = buffer.len(),
            written = written.len(),
            "Audit unit rolled back"
        );
        tx.rollback().await
    }
}
