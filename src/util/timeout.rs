//! Timeout helper.

use std::future::Future;
use std::time::Duration;

use crate::error::TransportError;

/// Run `future` under `duration`, mapping expiry to [`TransportError::Timeout`]
/// converted into the caller's error type.
pub async fn with_timeout<T, E>(
    duration: Duration,
    future: impl Future<Output = Result<T, E>>,
) -> Result<T, E>
where
    E: From<TransportError>,
{
    match tokio::time::timeout(duration, future).await {
        Ok(result) => result,
        Err(_) => Err(TransportError::Timeout {
            timeout_ms: duration.as_millis() as u64,
        }
        .into()),
    }
}
