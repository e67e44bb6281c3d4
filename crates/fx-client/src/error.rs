//! Error types for fx client operations

use transport::{StatusClass, TransportError, classify_status};

/// The single normalized failure type of the request pipeline.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    #[error("transport failure: {0}")]
    Transport(#[from] TransportError),

    /// The server rejected the bearer credential (401).
    #[error("credential rejected by the server")]
    Unauthorized,

    #[error("request rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("validation failed: {0}")]
    Validation(String),

    #[error(transparent)]
    Session(#[from] session::Error),
}

impl Error {
    /// Failure kind name for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Transport(_) => "transport",
            Error::Unauthorized => "authentication",
            Error::Rejected { .. } => "rejected",
            Error::Validation(_) => "validation",
            Error::Session(e) => e.kind(),
        }
    }

    /// Whether trying the same request later may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Transport(e) => e.is_retryable(),
            Error::Rejected { status, .. } => classify_status(*status) == StatusClass::Transient,
            _ => false,
        }
    }

    /// Message suitable for a user-facing error banner.
    pub fn user_message(&self) -> String {
        match self {
            Error::Rejected { message, .. } => message.clone(),
            Error::Unauthorized => "Your session has ended. Please log in again.".to_string(),
            other => other.to_string(),
        }
    }
}

/// Result alias for fx client operations.
pub type Result<T> = std::result::Result<T, Error>;
