//! Error taxonomy for Session Intel core logic.

use session_state::StorageError;

/// Failures of an external collaborator (language model, assistant process).
///
/// Callers recover from every variant with a documented fallback; none of
/// them end a session.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CollaboratorError {
    #[error("collaborator not configured: {0}")]
    Unconfigured(String),

    #[error("collaborator timed out after {0} ms")]
    Timeout(u64),

    /// Transient provider failure (5xx, 429, connection reset).
    #[error("provider failure: {0}")]
    Provider(String),

    /// The provider refused the request (auth, bad request); retrying won't help.
    #[error("provider rejected request: {0}")]
    Rejected(String),

    #[error("invalid reply: {0}")]
    InvalidReply(String),

    #[error("assistant process failed: {0}")]
    Process(String),
}

impl CollaboratorError {
    /// Whether a caller-side retry can reasonably succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Provider(_))
    }
}

/// Session Intel errors.
#[derive(Debug, thiserror::Error)]
pub enum IntelError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("collaborator failure: {0}")]
    Collaborator(#[from] CollaboratorError),

    /// Fatal: detected before the first turn.
    #[error("configuration error: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for Session Intel operations.
pub type Result<T> = std::result::Result<T, IntelError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(CollaboratorError::Timeout(100).is_retryable());
        assert!(CollaboratorError::Provider("status=503".into()).is_retryable());
        assert!(!CollaboratorError::Unconfigured("no key".into()).is_retryable());
        assert!(!CollaboratorError::Rejected("status=401".into()).is_retryable());
        assert!(!CollaboratorError::InvalidReply("not json".into()).is_retryable());
    }

    #[test]
    fn storage_errors_convert() {
        let err: IntelError = StorageError::SessionNotFound {
            session_id: "s1".into(),
        }
        .into();
        assert!(err.to_string().contains("session not found"));
    }
}
