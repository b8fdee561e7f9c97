pub mod audit_actor;
pub mod audit_capture;
pub mod audit_log;
pub mod audit_retention;
pub mod audit_sink;
pub mod audit_watch;

pub use audit_capture::{AuditUnit, CaptureState, EntityChange};
pub use audit_log::{AuditEventRequest, AuditLogService, ChangeEventRequest, LoginEventRequest};
pub use audit_retention::{spawn_retention_worker, RetentionEnforcer, RetentionReport};
pub use audit_watch::{Auditable, EntityCatalog, Watch, WatchConfig, WatchRegistry};
