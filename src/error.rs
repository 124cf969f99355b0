//! Error types for resumable transfers

use thiserror::Error;

/// Transfer operation result type
pub type Result<T> = std::result::Result<T, TransferError>;

/// Transfer operation errors
#[derive(Error, Debug)]
pub enum TransferError {
    /// Bad plan parameters or configuration (never retried)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Network, read, write or timeout failure (retried per part)
    #[error("Transient I/O error during {context}: {message}")]
    TransientIo { context: String, message: String },

    /// Final object size does not match the planned size
    #[error("Integrity error: expected {expected} bytes at destination, found {actual}")]
    Integrity { expected: u64, actual: u64 },

    /// The destination rejected a multipart operation
    #[error("Provider rejected {operation}: {message}")]
    Provider {
        operation: &'static str,
        message: String,
    },

    /// A part exhausted its retry ceiling
    #[error("Part {part_number} failed after {attempts} attempts: {last_error}")]
    PartFailed {
        part_number: u32,
        attempts: u32,
        last_error: Box<TransferError>,
    },

    /// Caller-initiated cancellation
    #[error("Transfer cancelled")]
    Cancelled,

    /// The transfer stopped; the ledger is retained for resume
    #[error("Transfer {transfer_id} aborted (outstanding parts: {outstanding}): {cause}")]
    Aborted {
        transfer_id: String,
        outstanding: String,
        cause: Box<TransferError>,
    },

    /// Ledger persistence failed
    #[error("Ledger error: {0}")]
    Ledger(#[from] rusqlite::Error),

    /// Snapshot (de)serialization failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration file could not be parsed
    #[error("Config error: {0}")]
    Config(#[from] toml::de::Error),

    /// Local I/O error (spool files, staging directories)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransferError {
    /// Shorthand for a transient failure with context
    pub fn transient(context: impl Into<String>, message: impl ToString) -> Self {
        TransferError::TransientIo {
            context: context.into(),
            message: message.to_string(),
        }
    }

    /// Shorthand for a provider rejection
    pub fn provider(operation: &'static str, message: impl ToString) -> Self {
        TransferError::Provider {
            operation,
            message: message.to_string(),
        }
    }

    /// Returns true if a part that hit this error may be attempted again
    pub fn is_retryable(&self) -> bool {
        matches!(self, TransferError::TransientIo { .. } | TransferError::Io(_))
    }

    /// Returns true if this error means the destination object cannot be trusted
    pub fn is_corruption(&self) -> bool {
        matches!(self, TransferError::Integrity { .. })
    }

    /// The error that caused an abort, or `self` for every other variant
    pub fn root_cause(&self) -> &TransferError {
        match self {
            TransferError::Aborted { cause, .. } => cause.root_cause(),
            TransferError::PartFailed { last_error, .. } => last_error.root_cause(),
            other => other,
        }
    }
}

impl From<validator::ValidationErrors> for TransferError {
    fn from(errors: validator::ValidationErrors) -> Self {
        TransferError::Validation(errors.to_string())
    }
}
