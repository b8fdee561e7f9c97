//! Line-oriented JSON copy of committed audit events.
//!
//! Each committed event becomes one JSON object on its own line in a
//! daily-rotated file next to the configured log path. The files are named
//! `<file name>.<date>`, so retention can find them by prefix. Failures here
//! are logged and never reach the caller.

use std::{
    io::Write,
    path::{Path, PathBuf},
    sync::{Mutex, PoisonError},
};
use tracing_appender::rolling::{RollingFileAppender, Rotation};

use crate::models::audit_log::AuditEvent;

pub struct AuditLogSink {
    path: Option<PathBuf>,
    writer: Option<Mutex<RollingFileAppender>>,
}

impl std::fmt::Debug for AuditLogSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLogSink")
            .field("path", &self.path)
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

impl AuditLogSink {
    pub fn disabled() -> Self {
        Self {
            path: None,
            writer: None,
        }
    }

    /// Opens a daily-rotated appender for `path`. Without a path, or when the
    /// appender cannot be created, the sink is disabled.
    pub fn open(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Self::disabled();
        };
        let Some(file_name) = path.file_name().and_then(|name| name.to_str()) else {
            tracing::warn!(path = %path.display(), "Audit log path has no file name; file sink disabled");
            return Self::disabled();
        };
        let directory = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };

        match RollingFileAppender::builder()
            .rotation(Rotation::DAILY)
            .filename_prefix(file_name)
            .build(&directory)
        {
            Ok(appender) => Self {
                path: Some(path.to_path_buf()),
                writer: Some(Mutex::new(appender)),
            },
            Err(err) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %err,
                    "Failed to open audit log file; file sink disabled"
                );
                Self::disabled()
            }
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.writer.is_some()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn emit(&self, event: &AuditEvent) {
        let Some(writer) = self.writer.as_ref() else {
            return;
        };
        let line = event.log_line().to_string();
        let mut appender = writer.lock().unwrap_or_else(PoisonError::into_inner);
        let result = writeln!(appender, "{line}").and_then(|_| appender.flush());
        if let Err(err) = result {
            tracing::warn!(
                error = %err,
                event_id = event.id,
                event_type = %event.event_type,
                "Failed to write audit log line"
            );
        }
    }

    pub fn emit_all(&self, events: &[AuditEvent]) {
        for event in events {
            self.emit(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::audit_log::NewAuditEvent;
    use chrono::Utc;
    use serde_json::{json, Value};
    use std::fs;

    fn event() -> AuditEvent {
        NewAuditEvent {
            actor_id: Some(2),
            actor_email: Some("owner@example.com".into()),
            actor_name: None,
            actor_ip: Some("127.0.0.1".into()),
            actor_user_agent: None,
            event_type: "risk.created".into(),
            target_type: "risk".into(),
            target_id: Some("9".into()),
            payload: Some(json!({ "changes": { "status": { "old": null, "new": "pending" } } })),
            created_at: Utc::now(),
        }
        .into_event(11)
    }

    fn written_lines(dir: &Path) -> Vec<Value> {
        let mut lines = Vec::new();
        for entry in fs::read_dir(dir).expect("read dir") {
            let path = entry.expect("entry").path();
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default().to_string();
            if name.starts_with("audit.log") {
                let content = fs::read_to_string(&path).expect("read log");
                lines.extend(
                    content
                        .lines()
                        .map(|line| serde_json::from_str::<Value>(line).expect("json line")),
                );
            }
        }
        lines
    }

    #[test]
    fn disabled_sink_ignores_events() {
        let sink = AuditLogSink::open(None);
        assert!(!sink.is_enabled());
        sink.emit(&event());
    }

    #[test]
    fn unopenable_path_disables_the_sink() {
        let dir = tempfile::tempdir().expect("tempdir");
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, b"file").expect("write blocker");

        let sink = AuditLogSink::open(Some(&blocker.join("audit.log")));
        assert!(!sink.is_enabled());
        sink.emit(&event());
        assert_eq!(fs::read(&blocker).expect("read blocker"), b"file");
    }

    #[test]
    fn emits_one_json_line_per_event() {
        let dir = tempfile::tempdir().expect("tempdir");
        let sink = AuditLogSink::open(Some(&dir.path().join("audit.log")));
        assert!(sink.is_enabled());

        sink.emit_all(&[event(), event()]);

        let lines = written_lines(dir.path());
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["event"], "risk.created");
        assert_eq!(lines[0]["target_id"], "9");
        assert_eq!(lines[0]["actor_email"], "owner@example.com");
        assert_eq!(lines[0]["payload"]["changes"]["status"]["new"], "pending");
        assert!(lines[0]["timestamp"].as_str().is_some());
    }
}
