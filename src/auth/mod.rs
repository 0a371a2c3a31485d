//! Credentials: storage, sign-in and the single-flight refresh.

pub mod error;
pub mod login;
pub mod refresh;
pub mod storage;
pub mod store;
pub mod token;

pub use error::AuthError;
pub use login::{AccountClient, SignIn};
pub use refresh::{
    HttpRefreshExchange, RefreshCoordinator, RefreshExchange, RefreshFailed, RefreshedTokens,
};
pub use storage::{FileKeyValueStore, KeyValueStore, MemoryKeyValueStore};
pub use store::CredentialStore;
pub use token::{CredentialPair, Identity, UserRole};
