//! Session lifecycle: signed-in state, forced sign-out and observer events.

use std::sync::{Arc, Mutex, PoisonError};

use strum::Display;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use crate::auth::{AuthError, CredentialPair, CredentialStore, Identity};

const EVENT_CHANNEL_CAPACITY: usize = 16;

/// Pipeline state as seen by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum SessionState {
    Authenticated,
    /// A refresh exchange is in flight; requests that hit 401 wait on it.
    RefreshingOnce,
    /// Terminal until the next sign-in.
    SignedOut,
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum SignOutReason {
    UserInitiated,
    SessionExpired,
}

/// Lifecycle notifications for UI collaborators (e.g. navigate to sign-in).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    SignedIn,
    SignedOut { reason: SignOutReason },
}

/// Owns the decision to end a session.
///
/// Forced sign-out is idempotent: when many requests fail at once, the store
/// is cleared and [`SessionEvent::SignedOut`] is published exactly once.
///
/// # Example
/// ```
/// use std::sync::Arc;
/// use authpipe::auth::{CredentialPair, CredentialStore};
/// use authpipe::session::{SessionController, SessionState};
///
/// let store = Arc::new(CredentialStore::in_memory());
/// let session = SessionController::new(store);
/// assert_eq!(session.state(), SessionState::SignedOut);
/// session.signed_in(CredentialPair::new("a1", "r1"), None)?;
/// assert_eq!(session.state(), SessionState::Authenticated);
/// assert!(session.on_session_expired());
/// assert!(!session.on_session_expired());
/// # Ok::<(), authpipe::auth::AuthError>(())
/// ```
pub struct SessionController {
    store: Arc<CredentialStore>,
    state_tx: watch::Sender<SessionState>,
    events: broadcast::Sender<SessionEvent>,
    // serializes sign-in and sign-out transitions
    transition: Mutex<()>,
}

impl SessionController {
    /// Seeds the state from whatever the store loaded at startup.
    pub fn new(store: Arc<CredentialStore>) -> Self {
        let initial = if store.is_signed_in() {
            SessionState::Authenticated
        } else {
            SessionState::SignedOut
        };
        let (state_tx, _) = watch::channel(initial);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            store,
            state_tx,
            events,
            transition: Mutex::new(()),
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state_tx.borrow()
    }

    /// Subscribe to state changes via a [`watch::Receiver`].
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    /// Subscribe to sign-in / sign-out events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Install a fresh session after a successful sign-in.
    pub fn signed_in(
        &self,
        pair: CredentialPair,
        identity: Option<Identity>,
    ) -> Result<(), AuthError> {
        let _guard = self.transition.lock().unwrap_or_else(PoisonError::into_inner);
        let persisted = self.store.set_session(pair, identity);
        self.state_tx.send_replace(SessionState::Authenticated);
        info!("signed in");
        let _ = self.events.send(SessionEvent::SignedIn);
        persisted
    }

    /// User-initiated sign-out. Returns `false` when already signed out.
    pub fn sign_out(&self) -> bool {
        self.end_session(SignOutReason::UserInitiated)
    }

    /// Forced sign-out after an unrecoverable refresh failure.
    ///
    /// Returns `true` only for the call that actually ended the session.
    pub fn on_session_expired(&self) -> bool {
        self.end_session(SignOutReason::SessionExpired)
    }

    pub(crate) fn refresh_started(&self) {
        self.state_tx.send_if_modified(|state| {
            if *state == SessionState::Authenticated {
                *state = SessionState::RefreshingOnce;
                true
            } else {
                false
            }
        });
    }

    pub(crate) fn refresh_succeeded(&self) {
        self.state_tx.send_if_modified(|state| {
            if *state == SessionState::RefreshingOnce {
                *state = SessionState::Authenticated;
                true
            } else {
                false
            }
        });
    }

    /// Forced sign-out of the session that held `expired`.
    ///
    /// A no-op when the store has since been cleared or replaced by a new
    /// sign-in, so a stale refresh failure never ends a newer session.
    pub(crate) fn expire_session_of(&self, expired: &CredentialPair) -> bool {
        let _guard = self.transition.lock().unwrap_or_else(PoisonError::into_inner);
        if self.store.get().as_ref() != Some(expired) {
            debug!("session already replaced, not expiring");
            return false;
        }
        self.end_session_locked(SignOutReason::SessionExpired)
    }

    fn end_session(&self, reason: SignOutReason) -> bool {
        let _guard = self.transition.lock().unwrap_or_else(PoisonError::into_inner);
        self.end_session_locked(reason)
    }

    // Caller holds `transition`.
    fn end_session_locked(&self, reason: SignOutReason) -> bool {
        if self.state() == SessionState::SignedOut && !self.store.is_signed_in() {
            debug!(%reason, "already signed out");
            return false;
        }
        // Memory is cleared even if the session file cannot be rewritten.
        if let Err(err) = self.store.clear() {
            warn!(error = %err, "failed to remove persisted session");
        }
        self.state_tx.send_replace(SessionState::SignedOut);
        info!(%reason, "session ended");
        let _ = self.events.send(SessionEvent::SignedOut { reason });
        true
    }
}

impl std::fmt::Debug for SessionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionController")
            .field("state", &self.state())
            .finish()
    }
}
