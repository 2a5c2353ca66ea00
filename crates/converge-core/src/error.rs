// Error kinds surfaced through the platform core.
//
// Every subsystem maps its failures onto these kinds; the Session API maps
// them to HTTP statuses, reconcilers use them to decide requeue-vs-stop,
// and workers use them to decide Ack-vs-Nack.

use thiserror::Error;

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, CoreError>;

/// Classification of a failure, independent of where it occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// User input rejected; never retried
    Validation,
    /// Referenced entity does not exist
    NotFound,
    /// Optimistic concurrency collision; retryable
    Conflict,
    /// Network/timeout class failure; retry with backoff
    Transient,
    /// Configuration or credential failure; surface and stop
    Fatal,
    /// Denied by policy (opt-out, quota)
    PolicyDenied,
    /// Expected empty-queue signal, not a failure
    QueueEmpty,
    /// Decryption key missing or unusable
    KeyUnavailable,
}

/// Errors that cross subsystem boundaries
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("transient: {0}")]
    Transient(String),

    #[error("fatal: {0}")]
    Fatal(String),

    #[error("policy denied: {0}")]
    PolicyDenied(String),

    #[error("queue empty")]
    QueueEmpty,

    #[error("key unavailable: {0}")]
    KeyUnavailable(String),

    /// Wrapped lower-level error, treated as transient
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl CoreError {
    pub fn validation(msg: impl Into<String>) -> Self {
        CoreError::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        CoreError::NotFound(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        CoreError::Conflict(msg.into())
    }

    pub fn transient(msg: impl Into<String>) -> Self {
        CoreError::Transient(msg.into())
    }

    pub fn fatal(msg: impl Into<String>) -> Self {
        CoreError::Fatal(msg.into())
    }

    pub fn policy_denied(msg: impl Into<String>) -> Self {
        CoreError::PolicyDenied(msg.into())
    }

    pub fn key_unavailable(msg: impl Into<String>) -> Self {
        CoreError::KeyUnavailable(msg.into())
    }

    /// The kind of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::Validation(_) => ErrorKind::Validation,
            CoreError::NotFound(_) => ErrorKind::NotFound,
            CoreError::Conflict(_) => ErrorKind::Conflict,
            CoreError::Transient(_) => ErrorKind::Transient,
            CoreError::Fatal(_) => ErrorKind::Fatal,
            CoreError::PolicyDenied(_) => ErrorKind::PolicyDenied,
            CoreError::QueueEmpty => ErrorKind::QueueEmpty,
            CoreError::KeyUnavailable(_) => ErrorKind::KeyUnavailable,
            CoreError::Internal(_) => ErrorKind::Transient,
        }
    }

    /// Whether a caller should retry after backoff
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Conflict | ErrorKind::Transient)
    }
}
