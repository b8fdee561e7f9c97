use clap::Parser;
use std::{path::PathBuf, sync::Arc};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use governance_backend::{
    config::Config, db::connection::create_pool, repositories::audit_log::PgAuditStore,
    services::audit_retention::RetentionEnforcer,
};

/// Prune audit rows and rotated audit log files older than the retention window.
#[derive(Parser, Debug)]
#[command(name = "audit_retention")]
#[command(author, version, about)]
struct Cli {
    /// Retention window in days; defaults to AUDIT_LOG_RETENTION_DAYS
    #[arg(long)]
    retention_days: Option<i64>,

    /// Active audit log file; defaults to AUDIT_LOG_PATH
    #[arg(long)]
    log_path: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "governance_backend=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = Config::load()?;
    let pool = create_pool(&config.database_url).await?;
    let enforcer = RetentionEnforcer::new(Arc::new(PgAuditStore::new(pool)), &config.audit);

    let report = enforcer
        .enforce(cli.retention_days, cli.log_path.as_deref())
        .await?;
    if report.files_failed > 0 {
        tracing::warn!(files_failed = report.files_failed, "Some rotated log files could not be removed");
    }

    println!(
        "Removed {} audit rows and {} rotated log files",
        report.db_deleted, report.files_deleted
    );
    Ok(())
}
