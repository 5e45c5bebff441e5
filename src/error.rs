//! Error types for a3s-audit

use thiserror::Error;

/// Errors that can occur in the audit core
///
/// None of these are fatal to the store: transport and storage failures are
/// logged and degrade the store rather than propagate to the caller.
#[derive(Debug, Error)]
pub enum AuditError {
    /// Transport could not be opened or is unavailable
    #[error("Transport error ({transport}): {reason}")]
    Transport {
        transport: String,
        reason: String,
    },

    /// Key-value storage failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization/deserialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Filesystem failure (export, file-backed storage)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type alias for audit operations
pub type Result<T> = std::result::Result<T, AuditError>;
