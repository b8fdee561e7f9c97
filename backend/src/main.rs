use axum::{middleware as axum_middleware, routing::get, Router};
use std::{net::SocketAddr, sync::Arc};
use tokio::sync::watch;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use governance_backend::{
    config::Config,
    db::connection::{create_pool, DbPool},
    handlers,
    middleware::request_context::request_context,
    models::identity::identity_catalog,
    repositories::audit_log::PgAuditStore,
    services::{
        audit_log::AuditLogService,
        audit_retention::{spawn_retention_worker, RetentionEnforcer},
    },
    state::AppState,
};

fn mask_database_url(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            format!("{}://***{}", &url[..scheme_end], &url[at..])
        }
        _ => url.to_string(),
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %err, "Failed to listen for shutdown signal");
    }
    tracing::info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "governance_backend=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::load()?;
    tracing::info!(
        database_url = %mask_database_url(&config.database_url),
        listen_addr = %config.listen_addr,
        audit_enabled = config.audit.enabled,
        audit_retention_days = config.audit.retention_days,
        audit_log_path = ?config.audit.log_path,
        audit_prune_interval = ?config.audit.prune_interval,
        "Loaded configuration from environment/.env"
    );

    // Initialize database
    let pool: DbPool = create_pool(&config.database_url).await?;
    sqlx::migrate!("./migrations").run(&pool).await?;

    // Audit subsystem
    let audit = AuditLogService::from_settings(
        PgAuditStore::new(pool.clone()),
        &config.audit,
        &identity_catalog(),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let retention_worker = match config.audit.prune_interval {
        Some(interval) if config.audit.enabled => {
            let enforcer = RetentionEnforcer::new(audit.shared_store(), &config.audit);
            Some(spawn_retention_worker(Arc::new(enforcer), interval, shutdown_rx))
        }
        _ => None,
    };

    let app = Router::new()
        .route("/api/health", get(handlers::health))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(axum_middleware::from_fn(request_context)),
        )
        .with_state(AppState::new(pool, audit, config.clone()));

    // Start server
    tracing::info!("Server listening on {}", config.listen_addr);
    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    // Stop the retention worker after the current cycle
    if shutdown_tx.send(true).is_err() {
        tracing::debug!("Retention worker was not running");
    }
    if let Some(handle) = retention_worker {
        if let Err(err) = handle.await {
            tracing::warn!(error = %err, "Audit retention worker ended abnormally");
        }
    }

    Ok(())
}
