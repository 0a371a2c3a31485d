use std::time::Duration;

use reqwest::header::HeaderValue;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::error::AuthError;
use super::token::{CredentialPair, Identity};
use crate::client::http::{error_summary, shared_client};
use crate::config::ClientConfig;
use crate::util::timeout::with_timeout;

/// Result of a successful sign-in.
#[derive(Debug, Clone)]
pub struct SignIn {
    pub pair: CredentialPair,
    pub identity: Option<Identity>,
}

/// Client for the sign-in and sign-out endpoints.
///
/// These calls carry no refresh logic: a rejected password is simply an
/// [`AuthError::Rejected`].
///
/// # Example
/// ```no_run
/// use authpipe::auth::AccountClient;
/// use authpipe::config::ClientConfig;
///
/// # async fn example() -> Result<(), authpipe::auth::AuthError> {
/// let config = ClientConfig::builder().base_url("http://localhost:8000").build();
/// let accounts = AccountClient::new(&config);
/// let sign_in = accounts.login("ada", "hunter2").await?;
/// println!("{}", sign_in.identity.map(|i| i.display_name()).unwrap_or_default());
/// # Ok(())
/// # }
/// ```
pub struct AccountClient {
    client: reqwest::Client,
    login_url: String,
    logout_url: String,
    timeout: Duration,
}

impl AccountClient {
    pub fn new(config: &ClientConfig) -> Self {
        Self {
            client: shared_client().clone(),
            login_url: config.resolve_url(&config.endpoints.login),
            logout_url: config.resolve_url(&config.endpoints.logout),
            timeout: config.request_timeout,
        }
    }

    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    /// Exchange a username and password for a credential pair.
    pub async fn login(&self, username: &str, password: &str) -> Result<SignIn, AuthError> {
        let call = async {
            let resp = self
                .client
                .post(&self.login_url)
                .json(&LoginRequest { username, password })
                .send()
                .await?;
            let status = resp.status();
            if !status.is_success() {
                let body = resp.text().await.unwrap_or_default();
                return Err(AuthError::Rejected {
                    status: status.as_u16(),
                    message: error_summary(&body),
                });
            }
            let payload: LoginResponse = resp
                .json()
                .await
                .map_err(|err| AuthError::InvalidResponse(format!("login response: {err}")))?;
            Ok::<LoginResponse, AuthError>(payload)
        };
        let payload = with_timeout(self.timeout, call).await?;
        if payload.access.is_empty() || payload.refresh.is_empty() {
            return Err(AuthError::InvalidResponse(
                "login response is missing tokens".to_string(),
            ));
        }
        if HeaderValue::from_str(&payload.access).is_err() {
            return Err(AuthError::InvalidResponse(
                "access token is not a valid header value".to_string(),
            ));
        }
        debug!(has_identity = payload.user.is_some(), "login accepted");
        Ok(SignIn {
            pair: CredentialPair::new(payload.access, payload.refresh),
            identity: payload.user,
        })
    }

    /// Tell the server to invalidate the refresh token.
    pub async fn logout(&self, pair: &CredentialPair) -> Result<(), AuthError> {
        let call = async {
            let resp = self
                .client
                .post(&self.logout_url)
                .bearer_auth(&pair.access_token)
                .json(&LogoutRequest {
                    refresh: &pair.refresh_token,
                })
                .send()
                .await?;
            let status = resp.status();
            if status.is_success() {
                return Ok::<(), AuthError>(());
            }
            let body = resp.text().await.unwrap_or_default();
            Err(AuthError::Rejected {
                status: status.as_u16(),
                message: error_summary(&body),
            })
        };
        with_timeout(self.timeout, call).await
    }
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
struct LogoutRequest<'a> {
    refresh: &'a str,
}

#[derive(Deserialize)]
struct LoginResponse {
    #[serde(alias = "access_token")]
    access: String,
    #[serde(alias = "refresh_token")]
    refresh: String,
    #[serde(default)]
    user: Option<Identity>,
}
