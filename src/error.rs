//! Error types for the intelligence core and its runtime

use thiserror::Error;

/// Result type alias using our custom Error
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for panda-live
#[derive(Error, Debug)]
pub enum Error {
    // Input contract errors (one bad transfer, never fatal to the stream)
    #[error("Invalid transfer {reference}: {reason}")]
    InvalidTransfer { reference: String, reason: String },

    #[error("Malformed transfer record: {0}")]
    MalformedRecord(String),

    // Intake queue errors
    #[error("Intake queue closed")]
    QueueClosed,

    // Output errors
    #[error("Event sink failed: {0}")]
    Sink(String),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(String),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl Error {
    /// Build an input rejection for a single transfer
    pub fn invalid_transfer(reference: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::InvalidTransfer {
            reference: reference.into(),
            reason: reason.into(),
        }
    }

    /// Check if this error only concerns a single input record.
    ///
    /// Such errors are logged and skipped; the stream keeps running.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            Error::InvalidTransfer { .. } | Error::MalformedRecord(_)
        )
    }
}

// Conversion from serde_json errors
impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

// Conversion from I/O errors
impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}
