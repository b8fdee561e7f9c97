pub mod actor;
pub mod audit_log;
pub mod identity;

pub use actor::*;
pub use audit_log::*;
