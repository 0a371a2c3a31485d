//! Error classification and recovery hints.

/// Broad error category for routing recovery logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Authentication,
    Network,
    Timeout,
    Configuration,
    Serialization,
    InvalidRequest,
    Storage,
}

/// Suggested recovery action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoverySuggestion {
    SignIn,
    RetryWithBackoff,
    IncreaseTimeout,
    CheckConfiguration,
    CheckStorage,
    FixRequest,
}
