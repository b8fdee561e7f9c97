//! Age-based pruning of audit rows and rotated audit log files.

use chrono::{DateTime, Utc};
use std::{
    fs, io,
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};
use tokio::{
    sync::watch,
    task::JoinHandle,
    time::MissedTickBehavior,
};

use crate::{
    config::AuditSettings,
    error::AuditResult,
    repositories::repository::AuditStore,
    utils::time::{now_utc, retention_cutoff, system_time_to_utc},
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetentionReport {
    pub db_deleted: u64,
    pub files_deleted: u64,
    pub files_failed: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FilePruneOutcome {
    pub deleted: u64,
    pub failed: u64,
}

pub struct RetentionEnforcer<S> {
    store: Arc<S>,
    enabled: bool,
    retention_days: i64,
    log_path: Option<PathBuf>,
}

impl<S: AuditStore> RetentionEnforcer<S> {
    pub fn new(store: Arc<S>, settings: &AuditSettings) -> Self {
        Self {
            store,
            enabled: settings.enabled,
            retention_days: settings.retention_days,
            log_path: settings.log_path.clone(),
        }
    }

    pub fn retention_days(&self) -> i64 {
        self.retention_days
    }

    /// Prunes with the configured window and log path unless overridden.
    /// Safe to run repeatedly and concurrently.
    pub async fn enforce(
        &self,
        retention_days: Option<i64>,
        log_path: Option<&Path>,
    ) -> AuditResult<RetentionReport> {
        self.enforce_at(now_utc(), retention_days, log_path).await
    }

    pub async fn enforce_at(
        &self,
        now: DateTime<Utc>,
        retention_days: Option<i64>,
        log_path: Option<&Path>,
    ) -> AuditResult<RetentionReport> {
        if !self.enabled {
            tracing::debug!("Audit logging disabled; retention skipped");
            return Ok(RetentionReport::default());
        }
        let days = retention_days.unwrap_or(self.retention_days);
        let Some(cutoff) = retention_cutoff(now, days) else {
            tracing::debug!(retention_days = days, "Audit retention window not set; keeping all records");
            return Ok(RetentionReport::default());
        };

        let db_deleted = self.store.delete_older_than(cutoff).await?;
        let files = match log_path.or(self.log_path.as_deref()) {
            Some(path) => prune_log_files(path, cutoff),
            None => FilePruneOutcome::default(),
        };

        Ok(RetentionReport {
            db_deleted,
            files_deleted: files.deleted,
            files_failed: files.failed,
        })
    }
}

/// Removes rotated siblings of `active` (same directory, name starting with
/// the active file's name) last modified before `cutoff`. The active file is
/// never touched.
pub fn prune_log_files(active: &Path, cutoff: DateTime<Utc>) -> FilePruneOutcome {
    prune_log_files_with(active, cutoff, |path| fs::remove_file(path))
}

fn prune_log_files_with<F>(active: &Path, cutoff: DateTime<Utc>, mut remove: F) -> FilePruneOutcome
where
    F: FnMut(&Path) -> io::Result<()>,
{
    let mut outcome = FilePruneOutcome::default();
    let Some(active_name) = active.file_name().and_then(|name| name.to_str()) else {
        return outcome;
    };
    let directory = match active.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let entries = match fs::read_dir(directory) {
        Ok(entries) => entries,
        Err(err) if err.kind() == ErrorKind::NotFound => return outcome,
        Err(err) => {
            tracing::warn!(
                directory = %directory.display(),
                error = %err,
                "Failed to list audit log directory"
            );
            return outcome;
        }
    };

    for entry in entries.flatten() {
        let file_name = entry.file_name();
        let Some(name) = file_name.to_str() else {
            continue;
        };
        if name == active_name || !name.starts_with(active_name) {
            continue;
        }
        let path = entry.path();

        let modified = match entry.metadata().and_then(|metadata| {
            if metadata.is_file() {
                metadata.modified().map(Some)
            } else {
                Ok(None)
            }
        }) {
            Ok(Some(modified)) => system_time_to_utc(modified),
            Ok(None) => continue,
            Err(err) if err.kind() == ErrorKind::NotFound => continue,
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "Failed to inspect audit log file");
                outcome.failed += 1;
                continue;
            }
        };
        if modified >= cutoff {
            continue;
        }

        match remove(&path) {
            Ok(()) => outcome.deleted += 1,
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %err,
                    "Failed to remove expired audit log file"
                );
                outcome.failed += 1;
            }
        }
    }
    outcome
}

/// Runs a retention cycle on every tick, the first one immediately, until
/// `shutdown` turns true or its sender is dropped. A running cycle is never
/// interrupted.
pub fn spawn_retention_worker<S>(
    enforcer: Arc<RetentionEnforcer<S>>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()>
where
    S: AuditStore + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(interval_secs = interval.as_secs(), "Audit retention worker started");

        while !*shutdown.borrow() {
            tokio::select! {
                _ = ticker.tick() => {
                    match enforcer.enforce(None, None).await {
                        Ok(report) => tracing::info!(
                            db_deleted = report.db_deleted,
                            files_deleted = report.files_deleted,
                            files_failed = report.files_failed,
                            "Audit retention cycle finished"
                        ),
                        Err(err) => tracing::warn!(error = %err, "Audit retention cycle failed"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        tracing::info!("Audit retention worker stopped");
    })
}
