//! The authenticated API client and its building blocks.

pub mod dispatcher;
pub mod http;
pub mod request;

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tracing::{info, warn};

pub use dispatcher::{Dispatcher, RequestAttempt};
pub use request::{ApiRequest, ApiResponse};

use crate::auth::{
    AccountClient, CredentialPair, CredentialStore, FileKeyValueStore, HttpRefreshExchange,
    Identity, KeyValueStore, RefreshCoordinator, RefreshExchange,
};
use crate::config::ClientConfig;
use crate::error::PipelineError;
use crate::session::{SessionController, SessionEvent, SessionState};

/// One authenticated session against one API.
///
/// Wires the credential store, session controller, refresh coordinator and
/// dispatcher together. Clones share the same session.
///
/// # Example
/// ```no_run
/// use authpipe::client::ApiClient;
/// use authpipe::config::ClientConfig;
///
/// # async fn example() -> authpipe::error::Result<()> {
/// let client = ApiClient::new(ClientConfig::from_env()?)?;
/// if client.credentials().is_none() {
///     client.sign_in("ada", "hunter2").await?;
/// }
/// let feed = client.get("/api/social/feed/").await?;
/// assert!(feed.is_success());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ApiClient {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<CredentialStore>,
    session: Arc<SessionController>,
    coordinator: Arc<RefreshCoordinator>,
    dispatcher: Dispatcher,
    accounts: AccountClient,
}

impl ApiClient {
    /// Client persisting its session under `config.storage_dir` (or the
    /// default directory).
    pub fn new(config: ClientConfig) -> Result<Self, PipelineError> {
        let storage = match &config.storage_dir {
            Some(dir) => FileKeyValueStore::new(dir.clone()),
            None => FileKeyValueStore::new_default(),
        };
        Self::with_storage(config, Arc::new(storage))
    }

    /// Client over an explicit key-value backend.
    pub fn with_storage(
        config: ClientConfig,
        storage: Arc<dyn KeyValueStore>,
    ) -> Result<Self, PipelineError> {
        let exchange = Arc::new(HttpRefreshExchange::new(&config));
        Self::with_parts(config, storage, exchange)
    }

    /// Client with a custom refresh exchange.
    pub fn with_parts(
        config: ClientConfig,
        storage: Arc<dyn KeyValueStore>,
        exchange: Arc<dyn RefreshExchange>,
    ) -> Result<Self, PipelineError> {
        let store = Arc::new(CredentialStore::load(storage)?);
        let session = Arc::new(SessionController::new(store.clone()));
        let coordinator = Arc::new(RefreshCoordinator::new(
            store.clone(),
            session.clone(),
            exchange,
        ));
        let accounts = AccountClient::new(&config);
        let dispatcher = Dispatcher::new(config, store.clone(), coordinator.clone());
        Ok(Self {
            inner: Arc::new(Inner {
                store,
                session,
                coordinator,
                dispatcher,
                accounts,
            }),
        })
    }

    /// Send a business call through the pipeline.
    pub async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, PipelineError> {
        self.inner.dispatcher.send(request).await
    }

    pub async fn get(&self, url: &str) -> Result<ApiResponse, PipelineError> {
        self.send(&ApiRequest::get(url)).await
    }

    pub async fn post<T: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &T,
    ) -> Result<ApiResponse, PipelineError> {
        self.send(&ApiRequest::post(url).json(body)?).await
    }

    /// Sign in with a username and password and install the session.
    ///
    /// The session is installed in memory even when persisting it fails; the
    /// persistence error is still returned.
    pub async fn sign_in(
        &self,
        username: &str,
        password: &str,
    ) -> Result<Option<Identity>, PipelineError> {
        let sign_in = self.inner.accounts.login(username, password).await?;
        let identity = sign_in.identity.clone();
        self.inner.session.signed_in(sign_in.pair, sign_in.identity)?;
        info!(has_identity = identity.is_some(), "sign-in complete");
        Ok(identity)
    }

    /// Sign out locally, telling the server first on a best-effort basis.
    ///
    /// Returns `false` when there was no session to end.
    pub async fn sign_out(&self) -> bool {
        if let Some(pair) = self.inner.store.get() {
            if let Err(err) = self.inner.accounts.logout(&pair).await {
                warn!(error = %err, "server logout failed, clearing local session anyway");
            }
        }
        self.inner.session.sign_out()
    }

    pub fn credentials(&self) -> Option<CredentialPair> {
        self.inner.store.get()
    }

    pub fn identity(&self) -> Option<Identity> {
        self.inner.store.identity()
    }

    pub fn session_state(&self) -> SessionState {
        self.inner.session.state()
    }

    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.inner.session.watch_state()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.session.subscribe()
    }

    pub fn session(&self) -> &Arc<SessionController> {
        &self.inner.session
    }

    pub fn coordinator(&self) -> &Arc<RefreshCoordinator> {
        &self.inner.coordinator
    }
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("state", &self.session_state())
            .finish_non_exhaustive()
    }
}
