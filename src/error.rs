//! Error types for triage-queue
//!
//! The taxonomy separates storage outages, which the intake degrades to the
//! fallback queue, from precondition violations (bad priority, malformed id),
//! which fail loudly at the parse boundary. Lock conflicts and duplicates are
//! not errors at all; those operations report them through their return
//! values.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for triage-queue operations
pub type Result<T> = std::result::Result<T, TriageError>;

/// Main error type for triage-queue operations
#[derive(Error, Debug)]
pub enum TriageError {
    /// Priority value outside P0..P4
    #[error("Invalid priority: '{value}' (expected P0, P1, P2, P3, or P4)")]
    InvalidPriority { value: String },

    /// Ticket id does not match the expected TCK-YYYYMMDD-xxxxxxxx shape
    #[error("Invalid ticket id: '{value}'")]
    InvalidTicketId { value: String },

    /// The storage backend cannot be reached or used right now
    #[error("Storage unavailable: {reason}")]
    StorageUnavailable { reason: String },

    /// Storage-layer failure that is not an availability problem
    #[error("Storage error: {0}")]
    Storage(rusqlite::Error),

    /// The fallback log exists but cannot be parsed or quarantined
    #[error("Corrupt fallback log at {}: {reason}", path.display())]
    CorruptFallbackLog { path: PathBuf, reason: String },

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// Custom error with a message
    #[error("{0}")]
    Custom(String),
}

impl TriageError {
    /// Create a custom error with a message
    pub fn custom(message: impl Into<String>) -> Self {
        Self::Custom(message.into())
    }

    /// Whether the store is unreachable and the caller should degrade to the
    /// fallback queue
    #[must_use]
    pub const fn is_storage_unavailable(&self) -> bool {
        matches!(self, Self::StorageUnavailable { .. })
    }

    /// Check if the error is recoverable by retrying or degrading
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::StorageUnavailable { .. } | Self::CorruptFallbackLog { .. } | Self::Io(_)
        )
    }

    /// Get a user-friendly error message
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::InvalidPriority { value } => {
                format!("'{value}' is not a valid priority")
            }
            Self::InvalidTicketId { value } => {
                format!("'{value}' is not a valid ticket id")
            }
            Self::StorageUnavailable { .. } => {
                "The ticket store is temporarily unavailable".to_string()
            }
            Self::CorruptFallbackLog { path, .. } => {
                format!("The fallback log at '{}' is damaged", path.display())
            }
            _ => self.to_string(),
        }
    }

    /// Get suggestions for resolving the error
    #[must_use]
    pub fn suggestions(&self) -> Vec<String> {
        match self {
            Self::InvalidPriority { .. } => {
                vec!["Use one of: P0, P1, P2, P3, P4".to_string()]
            }
            Self::InvalidTicketId { .. } => {
                vec!["Ticket ids look like TCK-20260821-a1b2c3d4".to_string()]
            }
            Self::StorageUnavailable { .. } => vec![
                "Submitted tickets are preserved in the fallback queue".to_string(),
                "Run replay once the store is reachable again".to_string(),
            ],
            Self::CorruptFallbackLog { .. } => vec![
                "The damaged file was backed up next to the log".to_string(),
                "Inspect the backup to recover entries manually".to_string(),
            ],
            _ => vec![],
        }
    }
}

impl From<rusqlite::Error> for TriageError {
    fn from(err: rusqlite::Error) -> Self {
        use rusqlite::ErrorCode;
        match &err {
            rusqlite::Error::SqliteFailure(code, _) => match code.code {
                ErrorCode::DatabaseBusy
                | ErrorCode::DatabaseLocked
                | ErrorCode::CannotOpen
                | ErrorCode::DiskFull
                | ErrorCode::SystemIoFailure
                | ErrorCode::NotADatabase => Self::StorageUnavailable {
                    reason: err.to_string(),
                },
                _ => Self::Storage(err),
            },
            _ => Self::Storage(err),
        }
    }
}

impl From<serde_json::Error> for TriageError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_unavailable_detection() {
        let err = TriageError::StorageUnavailable {
            reason: "disk unplugged".to_string(),
        };
        assert!(err.is_storage_unavailable());
        assert!(err.is_recoverable());

        let err = TriageError::InvalidPriority {
            value: "P9".to_string(),
        };
        assert!(!err.is_storage_unavailable());
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_busy_maps_to_storage_unavailable() {
        let busy = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            Some("database is locked".to_string()),
        );
        let err = TriageError::from(busy);
        assert!(err.is_storage_unavailable());
    }

    #[test]
    fn test_constraint_violation_stays_storage_error() {
        let constraint = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CONSTRAINT),
            Some("UNIQUE constraint failed".to_string()),
        );
        let err = TriageError::from(constraint);
        assert!(!err.is_storage_unavailable());
        assert!(matches!(err, TriageError::Storage(_)));
    }

    #[test]
    fn test_user_messages_and_suggestions() {
        let err = TriageError::InvalidTicketId {
            value: "TCK-bogus".to_string(),
        };
        assert!(err.user_message().contains("TCK-bogus"));
        assert!(!err.suggestions().is_empty());

        let err = TriageError::custom("something odd");
        assert_eq!(err.user_message(), "something odd");
        assert!(err.suggestions().is_empty());
    }
}
