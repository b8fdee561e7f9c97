pub mod audit_log;
pub mod memory_audit_log;
pub mod repository;
pub mod transaction;

pub use audit_log::PgAuditStore;
pub use memory_audit_log::{MemoryAuditStore, MemoryTransaction};
pub use repository::*;
