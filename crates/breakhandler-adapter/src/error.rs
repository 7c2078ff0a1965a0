/*
[INPUT]:  Failure sources at the host boundary (scripts, input queue)
[OUTPUT]: Structured host error type with retry hints
[POS]:    Error handling layer - unified error type for the adapter crate
[UPDATE]: When adding new host capabilities or failure sources
*/

use thiserror::Error;

/// Main error type for host interactions
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HostError {
    /// A host script could not be run
    #[error("script {script_id} failed: {message}")]
    Script { script_id: i32, message: String },

    /// The background input queue no longer accepts jobs
    #[error("input queue closed")]
    QueueClosed,
}

impl HostError {
    /// Check if retrying on a later tick may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, HostError::Script { .. })
    }

    /// Check if the error means the adapter is shutting down
    pub fn is_shutdown(&self) -> bool {
        matches!(self, HostError::QueueClosed)
    }
}

/// Result type alias for host operations
pub type Result<T> = std::result::Result<T, HostError>;
