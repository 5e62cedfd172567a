//! Error types for session-state

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Errors returned by the artifact store and session memory backends.
#[derive(Error, Debug)]
pub enum StorageError {
    /// The destination could not be written (or read) at all.
    #[error("storage unavailable at {path}: {reason}")]
    StorageUnavailable { path: PathBuf, reason: String },

    /// No records exist for the session.
    #[error("session not found: {session_id}")]
    SessionNotFound { session_id: String },

    /// Neither a journal nor a turn log exists for the session.
    #[error("no artifacts recorded for session {session_id}")]
    NoArtifacts { session_id: String },

    /// A persisted artifact could not be parsed. The file is left untouched.
    #[error("malformed artifact {path}: {reason}")]
    MalformedArtifact { path: PathBuf, reason: String },

    /// A turn was appended with an index other than `last + 1`.
    #[error("turn {turn} out of sequence for session {session_id} (expected {expected})")]
    OutOfSequence {
        session_id: String,
        turn: u64,
        expected: u64,
    },

    /// A summary tried to mark a previously resolved gap as unresolved.
    #[error("gap '{gap}' was already resolved in session {session_id}")]
    GapReverted { session_id: String, gap: String },

    /// An augmentation record already exists for the turn.
    #[error("augmentation for turn {turn} already recorded in session {session_id}")]
    DuplicateAugmentation { session_id: String, turn: u64 },

    /// Session id failed validation.
    #[error("invalid session id '{session_id}': {reason}")]
    InvalidSessionId { session_id: String, reason: String },

    /// Turn rejected by the log (e.g. system preface turns).
    #[error("invalid turn: {0}")]
    InvalidTurn(String),

    /// Database connection error
    #[error("database connection failed: {0}")]
    Connection(String),

    /// Backend-specific failure
    #[error("backend error: {0}")]
    Backend(String),
}

impl StorageError {
    /// Wrap an I/O failure against `path` as `StorageUnavailable`.
    pub fn unavailable(path: impl AsRef<Path>, err: impl std::fmt::Display) -> Self {
        StorageError::StorageUnavailable {
            path: path.as_ref().to_path_buf(),
            reason: err.to_string(),
        }
    }

    /// Wrap a parse failure against `path` as `MalformedArtifact`.
    pub fn malformed(path: impl AsRef<Path>, err: impl std::fmt::Display) -> Self {
        StorageError::MalformedArtifact {
            path: path.as_ref().to_path_buf(),
            reason: err.to_string(),
        }
    }

    /// Whether the error means "nothing stored yet" rather than a fault.
    pub fn is_missing(&self) -> bool {
        matches!(
            self,
            StorageError::SessionNotFound { .. } | StorageError::NoArtifacts { .. }
        )
    }
}

impl From<surrealdb::Error> for StorageError {
    fn from(err: surrealdb::Error) -> Self {
        StorageError::Backend(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_variants_are_classified() {
        let err = StorageError::SessionNotFound {
            session_id: "s1".into(),
        };
        assert!(err.is_missing());
        assert!(!StorageError::Backend("boom".into()).is_missing());
    }

    #[test]
    fn unavailable_keeps_path_in_message() {
        let err = StorageError::unavailable("/tmp/docs/s1", "permission denied");
        assert!(err.to_string().contains("/tmp/docs/s1"));
        assert!(err.to_string().contains("permission denied"));
    }
}
