use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, Shared};
use reqwest::header::HeaderValue;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::error::AuthError;
use super::store::CredentialStore;
use super::token::CredentialPair;
use crate::config::ClientConfig;
use crate::session::SessionController;
use crate::util::timeout::with_timeout;

/// Tokens returned by a successful refresh exchange.
#[derive(Clone, PartialEq, Eq)]
pub struct RefreshedTokens {
    pub access_token: String,
    /// Present when the server rotates refresh tokens.
    pub refresh_token: Option<String>,
}

/// The network call that trades a refresh token for a new access token.
#[async_trait]
pub trait RefreshExchange: Send + Sync {
    async fn exchange(&self, refresh_token: &str) -> Result<RefreshedTokens, AuthError>;
}

/// `POST {"refresh": ..}` against the configured refresh endpoint.
pub struct HttpRefreshExchange {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl HttpRefreshExchange {
    pub fn new(config: &ClientConfig) -> Self {
        Self {
            client: crate::client::http::shared_client().clone(),
            url: config.resolve_url(&config.endpoints.refresh),
            timeout: config.refresh_timeout,
        }
    }

    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    async fn post(&self, refresh_token: &str) -> Result<RefreshedTokens, AuthError> {
        let resp = self
            .client
            .post(&self.url)
            .json(&RefreshRequest {
                refresh: refresh_token,
            })
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(AuthError::Rejected {
                status: status.as_u16(),
                message: crate::client::http::error_summary(&body),
            });
        }
        let payload: RefreshResponse = resp
            .json()
            .await
            .map_err(|err| AuthError::InvalidResponse(format!("refresh response: {err}")))?;
        if payload.access.is_empty() {
            return Err(AuthError::InvalidResponse(
                "refresh response carried an empty access token".to_string(),
            ));
        }
        if HeaderValue::from_str(&payload.access).is_err() {
            return Err(AuthError::InvalidResponse(
                "refreshed access token is not a valid header value".to_string(),
            ));
        }
        Ok(RefreshedTokens {
            access_token: payload.access,
            refresh_token: payload.refresh.filter(|token| !token.is_empty()),
        })
    }
}

#[async_trait]
impl RefreshExchange for HttpRefreshExchange {
    async fn exchange(&self, refresh_token: &str) -> Result<RefreshedTokens, AuthError> {
        with_timeout(self.timeout, self.post(refresh_token)).await
    }
}

#[derive(Serialize)]
struct RefreshRequest<'a> {
    refresh: &'a str,
}

#[derive(Deserialize)]
struct RefreshResponse {
    #[serde(alias = "access_token")]
    access: String,
    #[serde(default, alias = "refresh_token")]
    refresh: Option<String>,
}

/// Outcome shared by every waiter of a failed refresh.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("refresh failed: {reason}")]
pub struct RefreshFailed {
    pub reason: String,
}

impl RefreshFailed {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

type RefreshOutcome = Result<CredentialPair, RefreshFailed>;

#[derive(Clone)]
struct PendingRefresh {
    id: u64,
    outcome: Shared<BoxFuture<'static, RefreshOutcome>>,
}

/// Single-flight refresh: however many callers ask at once, one exchange runs
/// and every caller receives its outcome.
///
/// The exchange runs on its own task, so dropping every waiter does not
/// cancel it. A failed exchange ends the session through the
/// [`SessionController`] before the pending slot is released, which means a
/// late caller finds an empty store instead of starting a second exchange.
pub struct RefreshCoordinator {
    store: Arc<CredentialStore>,
    session: Arc<SessionController>,
    exchange: Arc<dyn RefreshExchange>,
    pending: Arc<Mutex<Option<PendingRefresh>>>,
    started: AtomicU64,
}

impl RefreshCoordinator {
    pub fn new(
        store: Arc<CredentialStore>,
        session: Arc<SessionController>,
        exchange: Arc<dyn RefreshExchange>,
    ) -> Self {
        Self {
            store,
            session,
            exchange,
            pending: Arc::new(Mutex::new(None)),
            started: AtomicU64::new(0),
        }
    }

    /// Obtain credentials newer than `stale_access`, the token that was just
    /// rejected with 401.
    ///
    /// Joins the in-flight exchange when there is one. When the store already
    /// holds a different access token, that pair is returned without any
    /// exchange.
    pub async fn request_refresh(&self, stale_access: &str) -> RefreshOutcome {
        let outcome = {
            let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
            match pending.as_ref() {
                Some(in_flight) => {
                    debug!(refresh_id = in_flight.id, "joining in-flight refresh");
                    in_flight.outcome.clone()
                }
                None => {
                    let Some(current) = self.store.get() else {
                        return Err(RefreshFailed::new("no credentials stored"));
                    };
                    if current.access_token != stale_access {
                        debug!("access token already rotated, skipping exchange");
                        return Ok(current);
                    }
                    let in_flight = self.start(current);
                    *pending = Some(in_flight.clone());
                    in_flight.outcome
                }
            }
        };
        outcome.await
    }

    /// Number of exchanges started since construction.
    pub fn exchanges_started(&self) -> u64 {
        self.started.load(Ordering::SeqCst)
    }

    /// Whether an exchange is currently outstanding.
    pub fn is_refreshing(&self) -> bool {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    // Caller holds the `pending` lock.
    fn start(&self, from: CredentialPair) -> PendingRefresh {
        let id = self.started.fetch_add(1, Ordering::SeqCst) + 1;
        self.session.refresh_started();
        info!(refresh_id = id, "starting refresh exchange");

        let store = self.store.clone();
        let session = self.session.clone();
        let exchange = self.exchange.clone();
        let pending = self.pending.clone();
        let task = tokio::spawn(async move {
            let outcome = run_exchange(id, exchange.as_ref(), &store, &session, from).await;
            let mut slot = pending.lock().unwrap_or_else(PoisonError::into_inner);
            if slot.as_ref().is_some_and(|p| p.id == id) {
                *slot = None;
            }
            outcome
        });

        let outcome = task
            .map(|joined| {
                joined.unwrap_or_else(|err| Err(RefreshFailed::new(format!("refresh task: {err}"))))
            })
            .boxed()
            .shared();
        PendingRefresh { id, outcome }
    }
}

async fn run_exchange(
    id: u64,
    exchange: &dyn RefreshExchange,
    store: &CredentialStore,
    session: &SessionController,
    from: CredentialPair,
) -> RefreshOutcome {
    match exchange.exchange(&from.refresh_token).await {
        Ok(tokens) => {
            let refreshed = CredentialPair {
                access_token: tokens.access_token,
                refresh_token: tokens
                    .refresh_token
                    .unwrap_or_else(|| from.refresh_token.clone()),
            };
            match store.compare_and_set(&from, refreshed.clone()) {
                Ok(true) => {}
                Ok(false) => {
                    warn!(refresh_id = id, "session changed during refresh, result discarded");
                    return store
                        .get()
                        .ok_or_else(|| RefreshFailed::new("signed out during refresh"));
                }
                Err(err) => {
                    warn!(refresh_id = id, error = %err, "refreshed credentials not persisted");
                }
            }
            session.refresh_succeeded();
            info!(refresh_id = id, "refresh succeeded");
            Ok(refreshed)
        }
        Err(err) => {
            warn!(refresh_id = id, error = %err, "refresh exchange failed");
            match store.get() {
                Some(current) if current != from => {
                    // a new sign-in landed while the old session was refreshing
                    Ok(current)
                }
                _ => {
                    session.expire_session_of(&from);
                    Err(RefreshFailed::new(err.to_string()))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use crate::session::SessionEvent;

    struct FakeExchange {
        calls: AtomicUsize,
        delay: Duration,
        result: Result<RefreshedTokens, u16>,
    }

    impl FakeExchange {
        fn succeeding(access: &str, delay: Duration) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                delay,
                result: Ok(RefreshedTokens {
                    access_token: access.to_string(),
                    refresh_token: None,
                }),
            }
        }

        fn rejecting(status: u16, delay: Duration) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                delay,
                result: Err(status),
            }
        }
    }

    #[async_trait]
    impl RefreshExchange for FakeExchange {
        async fn exchange(&self, _refresh_token: &str) -> Result<RefreshedTokens, AuthError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            match &self.result {
                Ok(tokens) => Ok(tokens.clone()),
                Err(status) => Err(AuthError::Rejected {
                    status: *status,
                    message: "token_not_valid".to_string(),
                }),
            }
        }
    }

    fn coordinator(
        exchange: Arc<FakeExchange>,
    ) -> (
        Arc<CredentialStore>,
        Arc<SessionController>,
        Arc<RefreshCoordinator>,
    ) {
        let store = Arc::new(CredentialStore::in_memory());
        store.set(CredentialPair::new("a1", "r1")).unwrap();
        let session = Arc::new(SessionController::new(store.clone()));
        let coordinator = Arc::new(RefreshCoordinator::new(
            store.clone(),
            session.clone(),
            exchange,
        ));
        (store, session, coordinator)
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_demand_runs_one_exchange() {
        let exchange = Arc::new(FakeExchange::succeeding("a2", Duration::from_millis(100)));
        let (store, _session, coordinator) = coordinator(exchange.clone());

        let outcomes = futures::future::join_all(
            (0..8).map(|_| coordinator.request_refresh("a1")),
        )
        .await;

        assert_eq!(exchange.calls.load(Ordering::SeqCst), 1);
        assert_eq!(coordinator.exchanges_started(), 1);
        for outcome in outcomes {
            assert_eq!(outcome.unwrap(), CredentialPair::new("a2", "r1"));
        }
        assert_eq!(store.get(), Some(CredentialPair::new("a2", "r1")));
        assert!(!coordinator.is_refreshing());
    }

    #[tokio::test(start_paused = true)]
    async fn late_caller_with_stale_token_reuses_rotated_pair() {
        let exchange = Arc::new(FakeExchange::succeeding("a2", Duration::from_millis(10)));
        let (_store, _session, coordinator) = coordinator(exchange.clone());

        coordinator.request_refresh("a1").await.unwrap();
        let late = coordinator.request_refresh("a1").await.unwrap();

        assert_eq!(late.access_token, "a2");
        assert_eq!(exchange.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn current_token_rejected_again_triggers_new_exchange() {
        let exchange = Arc::new(FakeExchange::succeeding("a2", Duration::from_millis(10)));
        let (_store, _session, coordinator) = coordinator(exchange.clone());

        coordinator.request_refresh("a1").await.unwrap();
        coordinator.request_refresh("a2").await.unwrap();

        assert_eq!(exchange.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn rotated_refresh_token_replaces_old_one() {
        let exchange = Arc::new(FakeExchange {
            calls: AtomicUsize::new(0),
            delay: Duration::ZERO,
            result: Ok(RefreshedTokens {
                access_token: "a2".to_string(),
                refresh_token: Some("r2".to_string()),
            }),
        });
        let (store, _session, coordinator) = coordinator(exchange);

        coordinator.request_refresh("a1").await.unwrap();
        assert_eq!(store.get(), Some(CredentialPair::new("a2", "r2")));
    }

    #[tokio::test(start_paused = true)]
    async fn failure_is_shared_and_ends_session_once() {
        let exchange = Arc::new(FakeExchange::rejecting(400, Duration::from_millis(50)));
        let (store, session, coordinator) = coordinator(exchange.clone());
        let mut events = session.subscribe();

        let (x, y) = tokio::join!(
            coordinator.request_refresh("a1"),
            coordinator.request_refresh("a1")
        );

        assert!(x.is_err());
        assert_eq!(x, y);
        assert_eq!(exchange.calls.load(Ordering::SeqCst), 1);
        assert!(store.get().is_none());
        assert!(events.try_recv().is_ok());
        assert!(events.try_recv().is_err());

        let after = coordinator.request_refresh("a1").await;
        assert_eq!(after, Err(RefreshFailed::new("no credentials stored")));
        assert_eq!(exchange.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_waiter_does_not_cancel_exchange() {
        let exchange = Arc::new(FakeExchange::succeeding("a2", Duration::from_millis(100)));
        let (store, _session, coordinator) = coordinator(exchange.clone());

        let waiter = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.request_refresh("a1").await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(coordinator.is_refreshing());
        waiter.abort();

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(store.get(), Some(CredentialPair::new("a2", "r1")));
        assert!(!coordinator.is_refreshing());
    }

    #[tokio::test(start_paused = true)]
    async fn sign_out_during_exchange_discards_result() {
        let exchange = Arc::new(FakeExchange::succeeding("a2", Duration::from_millis(100)));
        let (store, session, coordinator) = coordinator(exchange);

        let pending = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.request_refresh("a1").await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        session.sign_out();

        let outcome = pending.await.unwrap();
        assert!(outcome.is_err());
        assert!(store.get().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn failure_after_new_sign_in_keeps_new_session() {
        let exchange = Arc::new(FakeExchange::rejecting(400, Duration::from_millis(100)));
        let (store, session, coordinator) = coordinator(exchange);
        let mut events = session.subscribe();

        let pending = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.request_refresh("a1").await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        session
            .signed_in(CredentialPair::new("a9", "r9"), None)
            .unwrap();

        let outcome = pending.await.unwrap();
        assert_eq!(outcome, Ok(CredentialPair::new("a9", "r9")));
        assert_eq!(store.get(), Some(CredentialPair::new("a9", "r9")));
        assert_eq!(events.try_recv().unwrap(), SessionEvent::SignedIn);
        assert!(events.try_recv().is_err());
    }
}
