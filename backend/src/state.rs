use crate::{
    config::Config, db::connection::DbPool, repositories::audit_log::PgAuditStore,
    services::audit_log::AuditLogService,
};

#[derive(Clone)]
pub struct AppState {
    pub pool: DbPool,
    pub audit: AuditLogService<PgAuditStore>,
    pub config: Config,
}

impl AppState {
    pub fn new(pool: DbPool, audit: AuditLogService<PgAuditStore>, config: Config) -> Self {
        Self {
            pool,
            audit,
            config,
        }
    }
}
