use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
#[cfg(unix)]
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::AuthError;

/// Persisted key for the access token.
pub const ACCESS_TOKEN_KEY: &str = "access_token";
/// Persisted key for the refresh token.
pub const REFRESH_TOKEN_KEY: &str = "refresh_token";
/// Persisted key for the JSON-encoded identity.
pub const USER_DATA_KEY: &str = "user_data";

const SESSION_FILE_NAME: &str = "session.toml";
const SESSION_FILE_VERSION: u32 = 1;

/// One entry of a write batch: `Some` sets the key, `None` removes it.
pub type KeyChange<'a> = (&'a str, Option<String>);

/// Local key-value storage that survives restarts.
///
/// `write` must apply the whole batch or nothing so that a crash never leaves
/// an access token next to a refresh token from a different session.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, AuthError>;
    fn write(&self, batch: &[KeyChange<'_>]) -> Result<(), AuthError>;
}

/// Volatile store, useful for tests and for sessions that must not touch disk.
#[derive(Debug, Default)]
pub struct MemoryKeyValueStore {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KeyValueStore for MemoryKeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>, AuthError> {
        Ok(self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned())
    }

    fn write(&self, batch: &[KeyChange<'_>]) -> Result<(), AuthError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        apply_batch(&mut entries, batch);
        Ok(())
    }
}

/// File-backed store: a single TOML document replaced via temp file + rename.
///
/// # Example
/// ```no_run
/// use authpipe::auth::{FileKeyValueStore, KeyValueStore};
///
/// let store = FileKeyValueStore::new(std::path::PathBuf::from("/tmp/authpipe"));
/// store.write(&[("access_token", Some("abc".to_string()))])?;
/// assert_eq!(store.get("access_token")?.as_deref(), Some("abc"));
/// # Ok::<(), authpipe::auth::AuthError>(())
/// ```
#[derive(Debug)]
pub struct FileKeyValueStore {
    path: PathBuf,
    // serializes read-modify-write cycles within this process
    lock: Mutex<()>,
}

impl FileKeyValueStore {
    pub fn new(base_dir: PathBuf) -> Self {
        Self {
            path: base_dir.join(SESSION_FILE_NAME),
            lock: Mutex::new(()),
        }
    }

    pub fn new_default() -> Self {
        Self::new(default_storage_dir())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_file(&self) -> Result<BTreeMap<String, String>, AuthError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(err) => return Err(AuthError::Io(err.to_string())),
        };
        let file: SessionFile = toml::from_str(&raw)?;
        if file.version != SESSION_FILE_VERSION {
            return Err(AuthError::Serialization(format!(
                "unsupported session file version {} at {}",
                file.version,
                self.path.display()
            )));
        }
        Ok(file.entries)
    }
}

impl KeyValueStore for FileKeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>, AuthError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(self.read_file()?.remove(key))
    }

    fn write(&self, batch: &[KeyChange<'_>]) -> Result<(), AuthError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut entries = self.read_file()?;
        apply_batch(&mut entries, batch);
        if entries.is_empty() {
            return match fs::remove_file(&self.path) {
                Ok(()) => Ok(()),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(err) => Err(AuthError::Io(err.to_string())),
            };
        }
        let file = SessionFile {
            version: SESSION_FILE_VERSION,
            saved_at: Utc::now(),
            entries,
        };
        let serialized = toml::to_string(&file)?;
        atomic_write(&self.path, serialized.as_bytes())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct SessionFile {
    version: u32,
    saved_at: DateTime<Utc>,
    entries: BTreeMap<String, String>,
}

fn apply_batch(entries: &mut BTreeMap<String, String>, batch: &[KeyChange<'_>]) {
    for (key, value) in batch {
        match value {
            Some(value) => {
                entries.insert((*key).to_string(), value.clone());
            }
            None => {
                entries.remove(*key);
            }
        }
    }
}

/// `$AUTHPIPE_HOME` when set, otherwise `~/.authpipe`.
pub fn default_storage_dir() -> PathBuf {
    if let Some(value) = std::env::var_os("AUTHPIPE_HOME") {
        let path = PathBuf::from(value);
        if !path.as_os_str().is_empty() {
            return path;
        }
    }
    directories::UserDirs::new()
        .map(|dirs| dirs.home_dir().join(".authpipe"))
        .unwrap_or_else(|| PathBuf::from(".authpipe"))
}

fn atomic_write(path: &Path, data: &[u8]) -> Result<(), AuthError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let file_name = path
        .file_name()
        .ok_or_else(|| AuthError::Io(format!("session path {} has no file name", path.display())))?;

    let nonce = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let temp_name = format!(
        ".{}.tmp-{}-{nonce}",
        file_name.to_string_lossy(),
        std::process::id()
    );
    let temp_path = path.with_file_name(temp_name);

    let mut options = fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    options.mode(0o600);

    let write_result = (|| -> std::io::Result<()> {
        let mut temp_file = options.open(&temp_path)?;
        temp_file.write_all(data)?;
        temp_file.sync_all()?;
        Ok(())
    })();

    if let Err(err) = write_result {
        let _ = fs::remove_file(&temp_path);
        return Err(err.into());
    }

    if let Err(err) = fs::rename(&temp_path, path) {
        let _ = fs::remove_file(&temp_path);
        return Err(err.into());
    }

    #[cfg(unix)]
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;

    Ok(())
}
