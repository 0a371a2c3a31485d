//! Convenience re-exports for common use.

pub use crate::auth::{CredentialPair, Identity};
pub use crate::client::{ApiClient, ApiRequest, ApiResponse};
pub use crate::config::ClientConfig;
pub use crate::error::{PipelineError, Result};
pub use crate::session::{SessionEvent, SessionState, SignOutReason};
