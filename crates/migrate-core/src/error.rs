use std::fmt;

use thiserror::Error;

/// Why a migration lock could not be taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockFailure {
    /// The backend waited for the configured timeout and gave up.
    Timeout,
    /// The backend refused immediately because another session holds the database.
    Busy,
    /// The backend reported an error or an indeterminate result.
    Failed,
}

impl fmt::Display for LockFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockFailure::Timeout => write!(f, "lock timeout"),
            LockFailure::Busy => write!(f, "database busy"),
            LockFailure::Failed => write!(f, "lock acquisition error"),
        }
    }
}

/// Core error type for migration operations.
#[derive(Error, Debug)]
pub enum MigrateError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unsupported database: {0}")]
    UnsupportedDatabase(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Not connected to database")]
    NotConnected,

    #[error("Transaction error: {0}")]
    TransactionState(String),

    #[error("Failed to acquire advisory lock ({kind}): {message}")]
    LockAcquisition { kind: LockFailure, message: String },

    #[error(
        "Checksum mismatch for migration: {name}\n\
         Expected: {expected}\n\
         Actual:   {actual}\n\n\
         This migration was modified after being applied!\n\
         Do NOT edit applied migrations. Create a new migration instead."
    )]
    ChecksumMismatch {
        name: String,
        expected: String,
        actual: String,
    },

    #[error("Missing .down.sql for migration: {name}")]
    MigrationPair { name: String },

    #[error("Invalid migration filename format: {name} (expected YYYYMMDDHHMMSS_description)")]
    MalformedName { name: String },

    #[error("SQL execution failed: {0}")]
    SqlExecution(String),

    #[error("Migration file not found: {0}")]
    MigrationFileNotFound(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl MigrateError {
    /// Build a lock error of the given kind.
    pub fn lock(kind: LockFailure, message: impl Into<String>) -> Self {
        MigrateError::LockAcquisition {
            kind,
            message: message.into(),
        }
    }

    /// The lock failure kind, if this is a lock error.
    pub fn lock_failure(&self) -> Option<LockFailure> {
        match self {
            MigrateError::LockAcquisition { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}

/// Result type alias using MigrateError.
pub type Result<T> = std::result::Result<T, MigrateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sql_execution_preserves_driver_message() {
        let err = MigrateError::SqlExecution("relation \"users\" does not exist".into());
        assert_eq!(
            err.to_string(),
            "SQL execution failed: relation \"users\" does not exist"
        );
    }

    #[test]
    fn test_checksum_mismatch_embeds_both_digests() {
        let err = MigrateError::ChecksumMismatch {
            name: "20260101010101_create_users".into(),
            expected: "aaa".into(),
            actual: "bbb".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("20260101010101_create_users"));
        assert!(msg.contains("Expected: aaa"));
        assert!(msg.contains("Actual:   bbb"));
    }

    #[test]
    fn test_lock_failure_kind() {
        let err = MigrateError::lock(LockFailure::Timeout, "Lock timeout after 30 seconds");
        assert_eq!(err.lock_failure(), Some(LockFailure::Timeout));
        assert!(err.to_string().contains("lock timeout"));
        assert_eq!(MigrateError::NotConnected.lock_failure(), None);
    }
}
