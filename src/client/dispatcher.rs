//! Bearer decoration, expired-credential detection and the single retry.

use std::sync::Arc;

use reqwest::StatusCode;
use strum::Display;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::http::{ensure_json_content_type, shared_client, with_bearer};
use super::request::{ApiRequest, ApiResponse};
use crate::auth::{CredentialStore, RefreshCoordinator};
use crate::config::ClientConfig;
use crate::error::{PipelineError, TransportError};
use crate::util::timeout::with_timeout;

/// Which send of a logical call this is. There is never a third.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum RequestAttempt {
    First,
    Retry,
}

impl RequestAttempt {
    pub fn number(self) -> u8 {
        match self {
            Self::First => 1,
            Self::Retry => 2,
        }
    }
}

/// Sends requests with the current access token and recovers from a 401 by
/// refreshing once and replaying the request once.
pub struct Dispatcher {
    client: reqwest::Client,
    config: ClientConfig,
    store: Arc<CredentialStore>,
    coordinator: Arc<RefreshCoordinator>,
}

impl Dispatcher {
    pub fn new(
        config: ClientConfig,
        store: Arc<CredentialStore>,
        coordinator: Arc<RefreshCoordinator>,
    ) -> Self {
        Self {
            client: shared_client().clone(),
            config,
            store,
            coordinator,
        }
    }

    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    /// Send `request`, returning any non-401 response unchanged.
    ///
    /// # Errors
    ///
    /// - [`PipelineError::Unauthenticated`] when no credentials are stored;
    ///   nothing is sent.
    /// - [`PipelineError::SessionExpired`] when the refresh exchange fails;
    ///   the coordinator has ended the session by then.
    /// - [`PipelineError::Transport`] for network failures and timeouts on
    ///   either attempt. These never trigger a refresh.
    pub async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, PipelineError> {
        let request_id = Uuid::new_v4();
        let Some(pair) = self.store.get() else {
            debug!(%request_id, "no credentials, request not sent");
            return Err(PipelineError::Unauthenticated);
        };
        let url = self.config.resolve_url(request.url());

        let first = self
            .attempt(request, &url, &pair.access_token, RequestAttempt::First, request_id)
            .await?;
        if first.status() != StatusCode::UNAUTHORIZED {
            return Ok(first);
        }

        info!(%request_id, "access token rejected, requesting refresh");
        match self.coordinator.request_refresh(&pair.access_token).await {
            Ok(refreshed) if refreshed.access_token == pair.access_token => {
                warn!(%request_id, "refresh returned the rejected token, not retrying");
                Ok(first)
            }
            Ok(refreshed) => {
                self.attempt(
                    request,
                    &url,
                    &refreshed.access_token,
                    RequestAttempt::Retry,
                    request_id,
                )
                .await
            }
            Err(failure) => {
                warn!(%request_id, error = %failure, "refresh failed, session expired");
                Err(PipelineError::SessionExpired)
            }
        }
    }

    async fn attempt(
        &self,
        request: &ApiRequest,
        url: &str,
        access_token: &str,
        attempt: RequestAttempt,
        request_id: Uuid,
    ) -> Result<ApiResponse, PipelineError> {
        let mut headers = with_bearer(request.headers(), access_token)?;
        if request.is_json() {
            ensure_json_content_type(&mut headers);
        }
        let mut builder = self
            .client
            .request(request.method().clone(), url)
            .headers(headers);
        if let Some(body) = request.body_bytes() {
            builder = builder.body(body.to_vec());
        }

        debug!(
            %request_id,
            attempt = attempt.number(),
            method = %request.method(),
            url,
            "dispatching request"
        );
        let result = with_timeout(self.config.request_timeout, async {
            let resp = builder.send().await?;
            let status = resp.status();
            let headers = resp.headers().clone();
            let body = resp
                .bytes()
                .await
                .map_err(|err| TransportError::Body(err.to_string()))?;
            Ok::<_, TransportError>(ApiResponse::new(status, headers, body.to_vec()))
        })
        .await;

        match result {
            Ok(response) => {
                debug!(
                    %request_id,
                    attempt = attempt.number(),
                    status = response.status().as_u16(),
                    "response received"
                );
                Ok(response)
            }
            Err(err) => {
                warn!(%request_id, attempt = attempt.number(), error = %err, "transport failure");
                Err(PipelineError::Transport(err))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attempts_are_numbered_one_and_two() {
        assert_eq!(RequestAttempt::First.number(), 1);
        assert_eq!(RequestAttempt::Retry.number(), 2);
        assert_eq!(RequestAttempt::Retry.to_string(), "retry");
    }
}
