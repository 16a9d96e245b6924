//! Error types for Crucible

use thiserror::Error;

/// Result type alias for Crucible operations
pub type Result<T> = std::result::Result<T, CrucibleError>;

/// Main error type for Crucible
#[derive(Error, Debug)]
pub enum CrucibleError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Memory not found: {0}")]
    NotFound(i64),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Gateway error: {0}")]
    Gateway(String),

    #[error("Gateway request timed out after {0:?}")]
    GatewayTimeout(std::time::Duration),

    #[error("Sandbox error: {0}")]
    Sandbox(String),

    #[error("Execution timed out after {0:?}")]
    ExecutionTimeout(std::time::Duration),

    #[error("No usable worker results: {0}")]
    NoCandidates(String),

    #[error("Memory write rejected: {0}")]
    WriteConflict(String),

    #[error("Write path closed")]
    WriterClosed,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP request error: {0}")]
    #[cfg(feature = "http-gateway")]
    Http(#[from] reqwest::Error),

    #[error("HTTP request error: {0}")]
    #[cfg(not(feature = "http-gateway"))]
    Http(String),

    #[error("Task cancelled")]
    Cancelled,
}

impl CrucibleError {
    /// Check if error is retryable (transient gateway/transport failures)
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CrucibleError::Gateway(_)
                | CrucibleError::GatewayTimeout(_)
                | CrucibleError::Http(_)
        )
    }

    /// Stable reason code reported to callers on task failure
    pub fn reason_code(&self) -> &'static str {
        match self {
            CrucibleError::Database(_) => "store_error",
            CrucibleError::NotFound(_) => "not_found",
            CrucibleError::InvalidInput(_) => "invalid_input",
            CrucibleError::Gateway(_) | CrucibleError::Http(_) => "gateway_failure",
            CrucibleError::GatewayTimeout(_) => "gateway_timeout",
            CrucibleError::Sandbox(_) => "sandbox_failure",
            CrucibleError::ExecutionTimeout(_) => "execution_timeout",
            CrucibleError::NoCandidates(_) => "generation_failed",
            CrucibleError::WriteConflict(_) => "write_conflict",
            CrucibleError::WriterClosed => "writer_closed",
            CrucibleError::Serialization(_) => "serialization_error",
            CrucibleError::Io(_) => "io_error",
            CrucibleError::Cancelled => "cancelled",
        }
    }
}
