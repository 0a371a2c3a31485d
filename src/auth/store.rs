use std::sync::{Arc, PoisonError, RwLock};

use tracing::warn;

use super::error::AuthError;
use super::storage::{
    KeyValueStore, MemoryKeyValueStore, ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY, USER_DATA_KEY,
};
use super::token::{CredentialPair, Identity};

#[derive(Debug, Clone)]
struct Session {
    pair: CredentialPair,
    identity: Option<Identity>,
}

/// Process-wide holder of the current credential pair and identity.
///
/// Reads take a shared lock; `set`, `set_session` and `clear` replace the
/// whole session under the write lock, so a reader never sees half of an
/// update. Every change is written through to the backing [`KeyValueStore`];
/// memory is updated even when persistence fails, and the failure is
/// returned to the caller.
///
/// # Example
/// ```
/// use std::sync::Arc;
/// use authpipe::auth::{CredentialPair, CredentialStore, MemoryKeyValueStore};
///
/// let store = CredentialStore::load(Arc::new(MemoryKeyValueStore::new()))?;
/// assert!(store.get().is_none());
/// store.set(CredentialPair::new("a1", "r1"))?;
/// assert_eq!(store.get().unwrap().access_token, "a1");
/// # Ok::<(), authpipe::auth::AuthError>(())
/// ```
pub struct CredentialStore {
    session: RwLock<Option<Session>>,
    storage: Arc<dyn KeyValueStore>,
}

impl std::fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialStore")
            .field("signed_in", &self.is_signed_in())
            .finish()
    }
}

impl CredentialStore {
    /// Seed the store from persisted state.
    ///
    /// A half-written session (only one of the two tokens) loads as signed
    /// out. Unreadable `user_data` loads as no identity.
    pub fn load(storage: Arc<dyn KeyValueStore>) -> Result<Self, AuthError> {
        let access = storage.get(ACCESS_TOKEN_KEY)?;
        let refresh = storage.get(REFRESH_TOKEN_KEY)?;
        let session = match (access, refresh) {
            (Some(access), Some(refresh)) => {
                let identity = match storage.get(USER_DATA_KEY)? {
                    Some(raw) => match serde_json::from_str::<Identity>(&raw) {
                        Ok(identity) => Some(identity),
                        Err(err) => {
                            warn!(error = %err, "ignoring unreadable user_data");
                            None
                        }
                    },
                    None => None,
                };
                Some(Session {
                    pair: CredentialPair::new(access, refresh),
                    identity,
                })
            }
            (None, None) => None,
            _ => {
                warn!("persisted session is incomplete, starting signed out");
                None
            }
        };
        Ok(Self {
            session: RwLock::new(session),
            storage,
        })
    }

    /// Empty store that never touches disk.
    pub fn in_memory() -> Self {
        Self {
            session: RwLock::new(None),
            storage: Arc::new(MemoryKeyValueStore::new()),
        }
    }

    pub fn get(&self) -> Option<CredentialPair> {
        self.read(|session| session.map(|s| s.pair.clone()))
    }

    pub fn identity(&self) -> Option<Identity> {
        self.read(|session| session.and_then(|s| s.identity.clone()))
    }

    pub fn is_signed_in(&self) -> bool {
        self.read(|session| session.is_some())
    }

    /// Replace the credential pair, keeping the cached identity.
    pub fn set(&self, pair: CredentialPair) -> Result<(), AuthError> {
        let mut guard = self.session.write().unwrap_or_else(PoisonError::into_inner);
        let identity = guard.take().and_then(|s| s.identity);
        *guard = Some(Session {
            pair: pair.clone(),
            identity,
        });
        self.storage.write(&pair_changes(&pair))
    }

    /// Replace the pair only while the stored one still equals `expected`.
    ///
    /// Returns `Ok(false)` without writing when the session was cleared or
    /// replaced in the meantime.
    pub fn compare_and_set(
        &self,
        expected: &CredentialPair,
        pair: CredentialPair,
    ) -> Result<bool, AuthError> {
        let mut guard = self.session.write().unwrap_or_else(PoisonError::into_inner);
        match guard.as_mut() {
            Some(session) if session.pair == *expected => {
                session.pair = pair.clone();
            }
            _ => return Ok(false),
        }
        self.storage.write(&pair_changes(&pair))?;
        Ok(true)
    }

    /// Store a freshly signed-in session.
    pub fn set_session(
        &self,
        pair: CredentialPair,
        identity: Option<Identity>,
    ) -> Result<(), AuthError> {
        let user_data = identity.as_ref().map(serde_json::to_string).transpose()?;
        let mut guard = self.session.write().unwrap_or_else(PoisonError::into_inner);
        let mut changes = pair_changes(&pair);
        changes.push((USER_DATA_KEY, user_data));
        *guard = Some(Session { pair, identity });
        self.storage.write(&changes)
    }

    /// Wipe the pair and identity. Returns whether a session was present.
    pub fn clear(&self) -> Result<bool, AuthError> {
        let mut guard = self.session.write().unwrap_or_else(PoisonError::into_inner);
        let was_signed_in = guard.take().is_some();
        self.storage.write(&[
            (ACCESS_TOKEN_KEY, None),
            (REFRESH_TOKEN_KEY, None),
            (USER_DATA_KEY, None),
        ])?;
        Ok(was_signed_in)
    }

    fn read<T>(&self, f: impl FnOnce(Option<&Session>) -> T) -> T {
        let guard = self.session.read().unwrap_or_else(PoisonError::into_inner);
        f(guard.as_ref())
    }
}

fn pair_changes(pair: &CredentialPair) -> Vec<(&'static str, Option<String>)> {
    vec![
        (ACCESS_TOKEN_KEY, Some(pair.access_token.clone())),
        (REFRESH_TOKEN_KEY, Some(pair.refresh_token.clone())),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::storage::FileKeyValueStore;
    use tempfile::TempDir;

    fn identity() -> Identity {
        Identity {
            id: "7".to_string(),
            username: Some("ada".to_string()),
            email: None,
            first_name: None,
            last_name: None,
            role: None,
        }
    }

    #[test]
    fn set_keeps_identity() {
        let store = CredentialStore::in_memory();
        store
            .set_session(CredentialPair::new("a1", "r1"), Some(identity()))
            .unwrap();
        store.set(CredentialPair::new("a2", "r1")).unwrap();
        assert_eq!(store.get(), Some(CredentialPair::new("a2", "r1")));
        assert_eq!(store.identity(), Some(identity()));
    }

    #[test]
    fn clear_drops_pair_and_identity() {
        let store = CredentialStore::in_memory();
        store
            .set_session(CredentialPair::new("a1", "r1"), Some(identity()))
            .unwrap();
        assert!(store.clear().unwrap());
        assert!(store.get().is_none());
        assert!(store.identity().is_none());
        assert!(!store.clear().unwrap());
    }

    #[test]
    fn compare_and_set_rejects_stale_expectation() {
        let store = CredentialStore::in_memory();
        store.set(CredentialPair::new("a1", "r1")).unwrap();
        let stale = CredentialPair::new("a0", "r0");
        assert!(!store
            .compare_and_set(&stale, CredentialPair::new("a2", "r1"))
            .unwrap());
        assert_eq!(store.get().unwrap().access_token, "a1");

        let current = store.get().unwrap();
        assert!(store
            .compare_and_set(&current, CredentialPair::new("a2", "r1"))
            .unwrap());
        assert_eq!(store.get().unwrap().access_token, "a2");
    }

    #[test]
    fn compare_and_set_on_empty_store_is_noop() {
        let store = CredentialStore::in_memory();
        let expected = CredentialPair::new("a1", "r1");
        assert!(!store
            .compare_and_set(&expected, CredentialPair::new("a2", "r1"))
            .unwrap());
        assert!(store.get().is_none());
    }

    #[test]
    fn session_survives_reload_from_disk() {
        let dir = TempDir::new().unwrap();
        let storage = Arc::new(FileKeyValueStore::new(dir.path().to_path_buf()));
        let store = CredentialStore::load(storage.clone()).unwrap();
        store
            .set_session(CredentialPair::new("a1", "r1"), Some(identity()))
            .unwrap();

        let reloaded = CredentialStore::load(storage).unwrap();
        assert_eq!(reloaded.get(), Some(CredentialPair::new("a1", "r1")));
        assert_eq!(reloaded.identity(), Some(identity()));
    }

    #[test]
    fn incomplete_persisted_session_loads_signed_out() {
        let storage = Arc::new(MemoryKeyValueStore::new());
        storage
            .write(&[(ACCESS_TOKEN_KEY, Some("a1".to_string()))])
            .unwrap();
        let store = CredentialStore::load(storage).unwrap();
        assert!(!store.is_signed_in());
    }

    #[test]
    fn corrupt_user_data_keeps_credentials() {
        let storage = Arc::new(MemoryKeyValueStore::new());
        storage
            .write(&[
                (ACCESS_TOKEN_KEY, Some("a1".to_string())),
                (REFRESH_TOKEN_KEY, Some("r1".to_string())),
                (USER_DATA_KEY, Some("{not json".to_string())),
            ])
            .unwrap();
        let store = CredentialStore::load(storage).unwrap();
        assert!(store.is_signed_in());
        assert!(store.identity().is_none());
    }
}
