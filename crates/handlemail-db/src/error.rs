//! Error types for the database layer.

use thiserror::Error;

/// Database error types.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(String),

    #[error("Pool error: {0}")]
    Pool(String),

    #[error("Database connection pool exhausted: {message}")]
    PoolExhausted { message: String, pool_size: usize },

    #[error("Resource temporarily busy: {0}")]
    ResourceBusy(String),

    #[error("{entity} not found: {identifier}")]
    NotFound {
        entity: &'static str,
        identifier: String,
    },

    #[error("{entity} already exists: {identifier}")]
    Duplicate {
        entity: &'static str,
        identifier: String,
    },

    #[error("Invalid {field}: {message}")]
    InvalidArgument {
        field: &'static str,
        message: String,
    },

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type DbResult<T> = std::result::Result<T, DbError>;

impl DbError {
    #[must_use]
    pub fn not_found(entity: &'static str, identifier: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            identifier: identifier.into(),
        }
    }

    #[must_use]
    pub fn duplicate(entity: &'static str, identifier: impl Into<String>) -> Self {
        Self::Duplicate {
            entity,
            identifier: identifier.into(),
        }
    }

    #[must_use]
    pub fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            field,
            message: message.into(),
        }
    }

    /// Whether this error indicates a retryable lock/busy condition.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Sqlite(msg) | Self::Pool(msg) | Self::ResourceBusy(msg) => is_lock_error(msg),
            Self::PoolExhausted { .. } => true,
            _ => false,
        }
    }

    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::PoolExhausted { .. } => "DATABASE_POOL_EXHAUSTED",
            Self::ResourceBusy(_) => "RESOURCE_BUSY",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Duplicate { .. } => "DUPLICATE",
            Self::InvalidArgument { .. } => "INVALID_ARGUMENT",
            _ => "INTERNAL_ERROR",
        }
    }

    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::PoolExhausted { .. } | Self::ResourceBusy(_) | Self::Pool(_))
    }
}

/// Check whether an error message indicates a database lock/busy condition.
#[must_use]
pub fn is_lock_error(msg: &str) -> bool {
    let lower = msg.to_lowercase();
    lower.contains("database is locked")
        || lower.contains("database is busy")
        || lower.contains("locked")
        || lower.contains("disk i/o error")
}

impl From<serde_json::Error> for DbError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

impl From<handlemail_core::Error> for DbError {
    fn from(e: handlemail_core::Error) -> Self {
        Self::Internal(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_exhausted_is_recoverable_and_retryable() {
        let err = DbError::PoolExhausted {
            message: "timeout".into(),
            pool_size: 10,
        };
        assert!(err.is_recoverable());
        assert!(err.is_retryable());
        assert_eq!(err.error_code(), "DATABASE_POOL_EXHAUSTED");
    }

    #[test]
    fn not_found_is_not_recoverable() {
        let err = DbError::not_found("scheduled_task", "abc");
        assert!(!err.is_recoverable());
        assert_eq!(err.error_code(), "NOT_FOUND");
    }

    #[test]
    fn lock_error_detection() {
        assert!(is_lock_error("database is locked"));
        assert!(is_lock_error("disk I/O error"));
        assert!(!is_lock_error("syntax error near SELECT"));
    }
}
