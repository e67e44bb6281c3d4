//! Error types for session operations

/// Failure taxonomy of the session layer.
///
/// `Decode` and `Storage` are normally absorbed where they occur and mapped
/// to safe defaults; they surface only from the low-level helpers that
/// produce them. The type is `Clone` because a refresh outcome is shared by
/// every caller waiting on the same in-flight refresh.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("token refresh failed: {0}")]
    Refresh(String),

    #[error("transport failure: {0}")]
    Transport(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("token claims unreadable: {0}")]
    Decode(String),

    #[error("session storage failed: {0}")]
    Storage(String),
}

impl Error {
    /// Taxonomy name for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Authentication(_) => "authentication",
            Error::Refresh(_) => "refresh",
            Error::Transport(_) => "transport",
            Error::Validation(_) => "validation",
            Error::Decode(_) => "decode",
            Error::Storage(_) => "storage",
        }
    }
}

/// Result alias for session operations.
pub type Result<T> = std::result::Result<T, Error>;
