//! Session state shared by the API client and the chat front-end.
//!
//! A [`SessionManager`] is created once at startup and handed to everything
//! that needs tokens or identity fields.  Writers never hold the lock while
//! notifying observers, so an observer may read the session back.

use std::collections::BTreeMap;
use std::fmt;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::{from_reader, to_writer_pretty};

use crate::error::{Error, Result};
use crate::types::User;

/// Keys stored in the session.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SessionKey {
    /// `"1"` once a login succeeded.
    IsAuthenticated,
    /// Email of the signed-in user.
    UserEmail,
    /// Display name of the signed-in user.
    UserName,
    /// Avatar URL of the signed-in user.
    UserPicture,
    /// Bearer token for authenticated requests.
    AccessToken,
    /// Token exchanged for a new access token.
    RefreshToken,
    /// `"true"` while temporary mode is on.
    NoSave,
}

impl SessionKey {
    /// Every key, in storage order.
    pub const ALL: [SessionKey; 7] = [
        SessionKey::IsAuthenticated,
        SessionKey::UserEmail,
        SessionKey::UserName,
        SessionKey::UserPicture,
        SessionKey::AccessToken,
        SessionKey::RefreshToken,
        SessionKey::NoSave,
    ];

    /// The storage name of this key.
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionKey::IsAuthenticated => "isAuthenticated",
            SessionKey::UserEmail => "userEmail",
            SessionKey::UserName => "userName",
            SessionKey::UserPicture => "userPicture",
            SessionKey::AccessToken => "accessToken",
            SessionKey::RefreshToken => "refreshToken",
            SessionKey::NoSave => "noSave",
        }
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        SessionKey::ALL
            .into_iter()
            .find(|key| key.as_str() == s)
            .ok_or_else(|| Error::validation(format!("unknown session key: {s}"), None))
    }
}

/// A snapshot of the session in typed form.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Session {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub user_email: Option<String>,
    pub user_name: Option<String>,
    pub user_picture: Option<String>,
    pub is_authenticated: bool,
}

/// A single change to the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionChange {
    /// The key that changed.
    pub key: SessionKey,
    /// The new value; `None` when the key was removed.
    pub value: Option<String>,
}

/// Receives every change made to the session.
pub trait SessionObserver: Send + Sync {
    /// Called after `changes` were applied, outside the session lock.
    fn session_changed(&self, changes: &[SessionChange]);
}

/// Durable backing store for session entries.
pub trait SessionStorage: Send + Sync {
    /// Load all stored entries.
    fn load(&self) -> Result<BTreeMap<String, String>>;

    /// Replace all stored entries.
    fn store(&self, entries: &BTreeMap<String, String>) -> Result<()>;
}

/// Storage that forgets everything when the process exits.
#[derive(Debug, Default)]
pub struct MemoryStorage;

impl SessionStorage for MemoryStorage {
    fn load(&self) -> Result<BTreeMap<String, String>> {
        Ok(BTreeMap::new())
    }

    fn store(&self, _: &BTreeMap<String, String>) -> Result<()> {
        Ok(())
    }
}

/// Storage in a pretty-printed JSON object on disk.
#[derive(Debug, Clone)]
pub struct FileStorage {
    path: PathBuf,
}

impl FileStorage {
    /// Create storage at `path`.  The file is created on first write.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The file backing this storage.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SessionStorage for FileStorage {
    fn load(&self) -> Result<BTreeMap<String, String>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let file =
            File::open(&self.path).map_err(|err| Error::io("failed to open session file", err))?;
        from_reader(BufReader::new(file)).map_err(|err| {
            Error::serialization("failed to parse session file", Some(Box::new(err)))
        })
    }

    fn store(&self, entries: &BTreeMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .map_err(|err| Error::io("failed to create session directory", err))?;
        }
        let staging = self.staging_path();
        let file = File::create(&staging)
            .map_err(|err| Error::io("failed to create session file", err))?;
        let mut writer = BufWriter::new(file);
        to_writer_pretty(&mut writer, entries).map_err(|err| {
            Error::serialization("failed to serialize session", Some(Box::new(err)))
        })?;
        let file = writer
            .into_inner()
            .map_err(|err| Error::io("failed to write session file", err.into_error()))?;
        file.sync_all()
            .map_err(|err| Error::io("failed to write session file", err))?;
        fs::rename(&staging, &self.path)
            .map_err(|err| Error::io("failed to replace session file", err))
    }
}

impl FileStorage {
    /// Sibling file written first and renamed over the real one.
    fn staging_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

/// Process-wide session state with change notification.
pub struct SessionManager {
    entries: Mutex<BTreeMap<SessionKey, String>>,
    storage: Box<dyn SessionStorage>,
    observers: Mutex<Vec<Arc<dyn SessionObserver>>>,
}

impl SessionManager {
    /// Create a session backed by `storage`, loading whatever it holds.
    ///
    /// Unknown keys in storage are ignored.
    pub fn new(storage: impl SessionStorage + 'static) -> Result<Self> {
        let stored = storage.load()?;
        let entries = stored
            .into_iter()
            .filter_map(|(k, v)| k.parse::<SessionKey>().ok().map(|key| (key, v)))
            .collect();
        Ok(Self {
            entries: Mutex::new(entries),
            storage: Box::new(storage),
            observers: Mutex::new(Vec::new()),
        })
    }

    /// Create a session that is never persisted.
    pub fn in_memory() -> Self {
        Self {
            entries: Mutex::new(BTreeMap::new()),
            storage: Box::new(MemoryStorage),
            observers: Mutex::new(Vec::new()),
        }
    }

    /// Register an observer for every future change.
    pub fn subscribe(&self, observer: Arc<dyn SessionObserver>) {
        lock(&self.observers).push(observer);
    }

    /// Read a value.
    pub fn get(&self, key: SessionKey) -> Option<String> {
        lock(&self.entries).get(&key).cloned()
    }

    /// Write a value.
    pub fn set(&self, key: SessionKey, value: impl Into<String>) {
        self.apply(vec![SessionChange {
            key,
            value: Some(value.into()),
        }]);
    }

    /// Remove a value.
    pub fn remove(&self, key: SessionKey) {
        self.remove_all(&[key]);
    }

    /// Remove every listed key that is present.
    pub fn remove_all(&self, keys: &[SessionKey]) {
        let changes = keys
            .iter()
            .map(|key| SessionChange {
                key: *key,
                value: None,
            })
            .collect();
        self.apply(changes);
    }

    /// Remove every key.
    pub fn clear(&self) {
        self.remove_all(&SessionKey::ALL);
    }

    /// Remove the tokens and the authenticated flag, keeping identity
    /// fields and preferences.
    pub fn clear_tokens(&self) {
        self.remove_all(&[
            SessionKey::AccessToken,
            SessionKey::RefreshToken,
            SessionKey::IsAuthenticated,
        ]);
    }

    /// Record a successful sign-in.
    pub fn store_login(
        &self,
        user: &User,
        access_token: Option<&str>,
        refresh_token: Option<&str>,
    ) {
        let mut changes = vec![
            change(SessionKey::IsAuthenticated, "1"),
            change(SessionKey::UserName, user.display_name()),
        ];
        if let Some(email) = user.email.as_deref().filter(|e| !e.is_empty()) {
            changes.push(change(SessionKey::UserEmail, email));
        }
        if let Some(picture) = user.avatar() {
            changes.push(change(SessionKey::UserPicture, picture));
        }
        if let Some(token) = access_token {
            changes.push(change(SessionKey::AccessToken, token));
        }
        if let Some(token) = refresh_token {
            changes.push(change(SessionKey::RefreshToken, token));
        }
        self.apply(changes);
    }

    /// Returns true if a login succeeded and has not been cleared.
    pub fn is_authenticated(&self) -> bool {
        self.get(SessionKey::IsAuthenticated).as_deref() == Some("1")
    }

    /// Returns true if a user identity is cached.
    pub fn has_user(&self) -> bool {
        self.get(SessionKey::UserName).is_some()
    }

    /// Returns true while temporary mode is on.
    pub fn temporary_mode(&self) -> bool {
        self.get(SessionKey::NoSave).as_deref() == Some("true")
    }

    /// Turn temporary mode on or off.
    pub fn set_temporary_mode(&self, on: bool) {
        self.set(SessionKey::NoSave, if on { "true" } else { "false" });
    }

    /// Typed snapshot of the current values.
    pub fn snapshot(&self) -> Session {
        let entries = lock(&self.entries);
        let get = |key| entries.get(&key).cloned();
        Session {
            access_token: get(SessionKey::AccessToken),
            refresh_token: get(SessionKey::RefreshToken),
            user_email: get(SessionKey::UserEmail),
            user_name: get(SessionKey::UserName),
            user_picture: get(SessionKey::UserPicture),
            is_authenticated: entries.get(&SessionKey::IsAuthenticated).map(String::as_str)
                == Some("1"),
        }
    }

    fn apply(&self, changes: Vec<SessionChange>) {
        let applied = {
            let mut entries = lock(&self.entries);
            let mut applied = Vec::with_capacity(changes.len());
            for change in changes {
                let previous = match &change.value {
                    Some(value) => entries.insert(change.key, value.clone()),
                    None => entries.remove(&change.key),
                };
                if previous != change.value {
                    applied.push(change);
                }
            }
            if !applied.is_empty() {
                // Stored under the lock so the file never trails memory.
                let persisted: BTreeMap<String, String> = entries
                    .iter()
                    .map(|(k, v)| (k.as_str().to_string(), v.clone()))
                    .collect();
                if let Err(err) = self.storage.store(&persisted) {
                    log::warn!("[session] could not persist session: {err}");
                }
            }
            applied
        };
        if applied.is_empty() {
            return;
        }
        let observers = lock(&self.observers).clone();
        for observer in observers {
            observer.session_changed(&applied);
        }
    }
}

impl fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let keys: Vec<&'static str> = lock(&self.entries).keys().map(|k| k.as_str()).collect();
        f.debug_struct("SessionManager").field("keys", &keys).finish()
    }
}

fn change(key: SessionKey, value: impl Into<String>) -> SessionChange {
    SessionChange {
        key,
        value: Some(value.into()),
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
