//! Error types for the request pipeline.

pub mod unified;

pub use unified::{ErrorCategory, RecoverySuggestion};

use thiserror::Error;

/// Primary error type returned by [`crate::client::ApiClient::send`] and friends.
///
/// Business-level HTTP failures (404, 422, 500, ...) are not errors here: they
/// come back as an [`ApiResponse`](crate::client::ApiResponse) untouched.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// No credential was stored, so no network call was attempted.
    #[error("Not signed in")]
    Unauthenticated,

    /// The refresh exchange failed; the session has been cleared.
    #[error("Session expired, sign in again")]
    SessionExpired,

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Authentication error: {0}")]
    Authentication(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Network-level failure of a single call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("request failed: {0}")]
    Request(String),

    #[error("failed to read response body: {0}")]
    Body(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            // reqwest does not report which limit fired
            Self::Timeout { timeout_ms: 0 }
        } else if error.is_connect() {
            Self::Connect(error.to_string())
        } else if error.is_body() || error.is_decode() {
            Self::Body(error.to_string())
        } else {
            Self::Request(error.to_string())
        }
    }
}

impl PipelineError {
    /// Classify this error into a category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Unauthenticated | Self::SessionExpired | Self::Authentication(_) => {
                ErrorCategory::Authentication
            }
            Self::Transport(TransportError::Timeout { .. }) => ErrorCategory::Timeout,
            Self::Transport(_) => ErrorCategory::Network,
            Self::Configuration(_) => ErrorCategory::Configuration,
            Self::Serialization(_) => ErrorCategory::Serialization,
            Self::InvalidArgument(_) => ErrorCategory::InvalidRequest,
            Self::Io(_) => ErrorCategory::Storage,
        }
    }

    /// Whether a caller may reasonably retry the same call.
    ///
    /// The pipeline itself never retries transport failures.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Network | ErrorCategory::Timeout
        )
    }

    /// Whether the caller should route the user to a sign-in view.
    pub fn requires_sign_in(&self) -> bool {
        matches!(self, Self::Unauthenticated | Self::SessionExpired)
    }

    /// Suggest recovery actions.
    pub fn recovery_suggestion(&self) -> RecoverySuggestion {
        match self.category() {
            ErrorCategory::Authentication => RecoverySuggestion::SignIn,
            ErrorCategory::Network => RecoverySuggestion::RetryWithBackoff,
            ErrorCategory::Timeout => RecoverySuggestion::IncreaseTimeout,
            ErrorCategory::Configuration => RecoverySuggestion::CheckConfiguration,
            ErrorCategory::Storage => RecoverySuggestion::CheckStorage,
            ErrorCategory::InvalidRequest | ErrorCategory::Serialization => {
                RecoverySuggestion::FixRequest
            }
        }
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, PipelineError>;
