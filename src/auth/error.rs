use thiserror::Error;

use crate::error::{PipelineError, TransportError};

/// Errors from the account and refresh endpoints and from session storage.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Rejected with status {status}: {message}")]
    Rejected { status: u16, message: String },
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    #[error("Network error: {0}")]
    Network(String),
    #[error("Timed out after {0}ms")]
    Timeout(u64),
    #[error("IO error: {0}")]
    Io(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<TransportError> for AuthError {
    fn from(error: TransportError) -> Self {
        match error {
            TransportError::Timeout { timeout_ms } => Self::Timeout(timeout_ms),
            other => Self::Network(other.to_string()),
        }
    }
}

impl From<reqwest::Error> for AuthError {
    fn from(error: reqwest::Error) -> Self {
        Self::Network(error.to_string())
    }
}

impl From<std::io::Error> for AuthError {
    fn from(error: std::io::Error) -> Self {
        Self::Io(error.to_string())
    }
}

impl From<serde_json::Error> for AuthError {
    fn from(error: serde_json::Error) -> Self {
        Self::Serialization(error.to_string())
    }
}

impl From<toml::de::Error> for AuthError {
    fn from(error: toml::de::Error) -> Self {
        Self::Serialization(error.to_string())
    }
}

impl From<toml::ser::Error> for AuthError {
    fn from(error: toml::ser::Error) -> Self {
        Self::Serialization(error.to_string())
    }
}

impl From<AuthError> for PipelineError {
    fn from(error: AuthError) -> Self {
        match error {
            AuthError::Network(message) => PipelineError::Transport(TransportError::Request(message)),
            AuthError::Timeout(timeout_ms) => {
                PipelineError::Transport(TransportError::Timeout { timeout_ms })
            }
            AuthError::Io(message) => {
                PipelineError::Io(std::io::Error::new(std::io::ErrorKind::Other, message))
            }
            other => PipelineError::Authentication(other.to_string()),
        }
    }
}
