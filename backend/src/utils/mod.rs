pub mod normalize;
pub mod time;

pub use normalize::{normalize, AuditEnum, AuditValue};
pub use time::*;
