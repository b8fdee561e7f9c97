use thiserror::Error;

pub type AuditResult<T> = Result<T, AuditError>;

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("invalid audit event: {0}")]
    InvalidEvent(String),
    #[error("audit store error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("audit io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("audit serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl AuditError {
    /// True when the underlying database reports the audit table as missing
    /// (SQLSTATE 42P01), which happens before migrations have run.
    pub fn is_missing_table(&self) -> bool {
        match self {
            AuditError::Database(sqlx::Error::Database(db_err)) => {
                db_err.code().as_deref() == Some("42P01")
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_event_message_includes_reason() {
        let err = AuditError::InvalidEvent("'action' is required".into());
        assert_eq!(
            err.to_string(),
            "invalid audit event: 'action' is required"
        );
    }

    #[test]
    fn io_errors_convert() {
        let err: AuditError = std::io::Error::new(std::io::ErrorKind::Other, "disk").into();
        assert!(matches!(err, AuditError::Io(_)));
        assert!(!err.is_missing_table());
    }

    #[test]
    fn row_not_found_is_not_missing_table() {
        let err: AuditError = sqlx::Error::RowNotFound.into();
        assert!(!err.is_missing_table());
    }
}
