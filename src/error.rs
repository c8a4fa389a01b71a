//! Error types for the aido self-update core.

/// Top-level error type for update, reconciliation and backup operations.
///
/// Expected failures below the orchestrator (release checks, config merges)
/// are reported as explicit outcome values, not as this error. Configuration
/// conflicts are a decision point, never an error.
#[derive(Debug, thiserror::Error)]
pub enum AidoError {
    /// Release feed or archive download unreachable, or timed out.
    #[error("network unavailable: {0}")]
    NetworkUnavailable(String),

    /// Remote response did not have the expected shape.
    #[error("malformed remote data: {0}")]
    MalformedRemoteData(String),

    /// Permission, missing path or copy failure on the local filesystem.
    #[error("filesystem error: {0}")]
    Filesystem(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Settings file could not be read or parsed.
    #[error("config error: {0}")]
    Config(String),

    /// The operator refused to proceed.
    #[error("declined: {0}")]
    UserDeclined(String),

    /// Unrecoverable condition; the operator must intervene.
    #[error("fatal: {0}")]
    Fatal(String),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, AidoError>;
