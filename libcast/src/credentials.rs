//! Credential Store
//!
//! Persisted key/value state for every platform. Keys are namespaced by
//! platform prefix (`instagram_access_token`, `youtube_channel_title`, ...)
//! so a platform can be wiped with a single prefix scan.
//!
//! The [`CredentialStore`] facade is the only writer. Components that need to
//! react to changes call [`CredentialStore::subscribe`] instead of polling the
//! backend.
//!
//! # Example
//!
//! ```no_run
//! use libcast::credentials::CredentialStore;
//! use libcast::types::Platform;
//!
//! # fn example() -> libcast::Result<()> {
//! let store = CredentialStore::open("~/.config/cast/credentials.json")?;
//! let mut changes = store.subscribe();
//!
//! store.set(Platform::Instagram, "user_id", "17841400000000000")?;
//! let removed = store.clear_platform(Platform::Instagram)?;
//! assert_eq!(removed, 1);
//! # Ok(())
//! # }
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

use crate::error::{CredentialError, Result};
use crate::types::{AccountSummary, CredentialStatus, Platform, PlatformCredential};

/// Field names stored under each platform prefix
pub mod fields {
    pub const ACCESS_TOKEN: &str = "access_token";
    pub const REFRESH_TOKEN: &str = "refresh_token";
    pub const EXPIRES_AT: &str = "expires_at";
    pub const SCOPES: &str = "scopes";
    pub const STATUS: &str = "status";
    pub const USER_ID: &str = "user_id";
    pub const DISPLAY_NAME: &str = "display_name";
    pub const USERNAME: &str = "username";
    pub const ACCOUNT_TYPE: &str = "account_type";
    pub const CHANNEL_TITLE: &str = "channel_title";
    pub const THUMBNAIL_URL: &str = "thumbnail_url";
    pub const SUBSCRIBER_COUNT: &str = "subscriber_count";
    pub const AVATAR_URL: &str = "avatar_url";
    pub const FOLLOWER_COUNT: &str = "follower_count";
}

/// Raw key/value persistence used by [`CredentialStore`]
pub trait KeyValueBackend: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;

    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Returns whether the key existed
    fn remove(&self, key: &str) -> Result<bool>;

    fn keys(&self) -> Result<Vec<String>>;

    fn backend_name(&self) -> &str;

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .keys()?
            .into_iter()
            .filter(|key| key.starts_with(prefix))
            .collect())
    }
}

/// Process-local backend, nothing survives a restart
#[derive(Default)]
pub struct MemoryBackend {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, String>>> {
        self.entries
            .lock()
            .map_err(|_| CredentialError::Store("memory backend lock poisoned".to_string()).into())
    }
}

impl KeyValueBackend for MemoryBackend {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.lock()?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<bool> {
        Ok(self.lock()?.remove(key).is_some())
    }

    fn keys(&self) -> Result<Vec<String>> {
        Ok(self.lock()?.keys().cloned().collect())
    }

    fn backend_name(&self) -> &str {
        "memory"
    }
}

/// JSON file backend
///
/// The whole map is rewritten on every change through a temporary file and
/// a rename. Concurrent writers in different processes are last-writer-wins.
pub struct FileBackend {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_map(&self) -> Result<BTreeMap<String, String>> {
        if std::fs::symlink_metadata(&self.path).is_err() {
            return Ok(BTreeMap::new());
        }
        validate_not_symlink(&self.path)?;

        let content = std::fs::read_to_string(&self.path).map_err(CredentialError::Io)?;
        if content.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_str(&content).map_err(|e| {
            CredentialError::Serialization(format!(
                "Credential file '{}' is not a JSON object of strings: {}",
                self.path.display(),
                e
            ))
            .into()
        })
    }

    fn write_map(&self, map: &BTreeMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(CredentialError::Io)?;
        }

        let json = serde_json::to_string_pretty(map)
            .map_err(|e| CredentialError::Serialization(e.to_string()))?;
        let tmp_path = self.path.with_extension("json.tmp");
        std::fs::write(&tmp_path, json).map_err(CredentialError::Io)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            std::fs::set_permissions(&tmp_path, perms).map_err(CredentialError::Io)?;
        }

        std::fs::rename(&tmp_path, &self.path).map_err(CredentialError::Io)?;
        Ok(())
    }

    fn modify<T>(&self, f: impl FnOnce(&mut BTreeMap<String, String>) -> T) -> Result<T> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| CredentialError::Store("file backend lock poisoned".to_string()))?;
        let mut map = self.read_map()?;
        let out = f(&mut map);
        self.write_map(&map)?;
        Ok(out)
    }
}

impl KeyValueBackend for FileBackend {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.read_map()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.modify(|map| {
            map.insert(key.to_string(), value.to_string());
        })?;
        tracing::debug!("Stored {} in {:?}", key, self.path);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<bool> {
        self.modify(|map| map.remove(key).is_some())
    }

    fn keys(&self) -> Result<Vec<String>> {
        Ok(self.read_map()?.into_keys().collect())
    }

    fn backend_name(&self) -> &str {
        "file"
    }
}

/// Refuse to read credential files through a symlink
pub fn validate_not_symlink(path: &Path) -> Result<()> {
    let metadata = std::fs::symlink_metadata(path).map_err(|e| {
        CredentialError::Io(std::io::Error::new(
            e.kind(),
            format!("Failed to read metadata for '{}': {}", path.display(), e),
        ))
    })?;

    if metadata.is_symlink() {
        return Err(CredentialError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!(
                "Credential file '{}' is a symbolic link. Credential files must be regular files.",
                path.display()
            ),
        ))
        .into());
    }

    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Set,
    Removed,
    /// Every key of the platform was removed
    Cleared,
}

/// Notification sent to store subscribers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreChange {
    pub platform: Platform,
    /// Full key, or the platform prefix for [`ChangeKind::Cleared`]
    pub key: String,
    pub kind: ChangeKind,
}

/// Observable credential store shared by every component
#[derive(Clone)]
pub struct CredentialStore {
    backend: Arc<dyn KeyValueBackend>,
    changes: broadcast::Sender<StoreChange>,
}

impl CredentialStore {
    pub fn new(backend: Arc<dyn KeyValueBackend>) -> Self {
        let (changes, _) = broadcast::channel(64);
        Self { backend, changes }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryBackend::new()))
    }

    /// Open a file-backed store, expanding `~`
    pub fn open(path: &str) -> Result<Self> {
        let expanded = PathBuf::from(shellexpand::tilde(path).to_string());
        if std::fs::symlink_metadata(&expanded).is_ok() {
            validate_not_symlink(&expanded)?;
        }
        tracing::debug!("Using credential file {:?}", expanded);
        Ok(Self::new(Arc::new(FileBackend::new(expanded))))
    }

    pub fn backend_name(&self) -> &str {
        self.backend.backend_name()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.changes.subscribe()
    }

    fn notify(&self, platform: Platform, key: String, kind: ChangeKind) {
        let _ = self.changes.send(StoreChange {
            platform,
            key,
            kind,
        });
    }

    pub fn get(&self, platform: Platform, field: &str) -> Result<Option<String>> {
        self.backend.get(&platform.key(field))
    }

    pub fn set(&self, platform: Platform, field: &str, value: &str) -> Result<()> {
        let key = platform.key(field);
        self.backend.set(&key, value)?;
        self.notify(platform, key, ChangeKind::Set);
        Ok(())
    }

    pub fn remove(&self, platform: Platform, field: &str) -> Result<()> {
        let key = platform.key(field);
        if self.backend.remove(&key)? {
            self.notify(platform, key, ChangeKind::Removed);
        }
        Ok(())
    }

    fn set_optional(&self, platform: Platform, field: &str, value: Option<&str>) -> Result<()> {
        match value {
            Some(value) => self.set(platform, field, value),
            None => self.remove(platform, field),
        }
    }

    /// All persisted keys of one platform
    pub fn keys(&self, platform: Platform) -> Result<Vec<String>> {
        self.backend.keys_with_prefix(&platform.key_prefix())
    }

    /// Remove every key under the platform prefix, returning how many went
    pub fn clear_platform(&self, platform: Platform) -> Result<usize> {
        let keys = self.keys(platform)?;
        for key in &keys {
            self.backend.remove(key)?;
        }
        tracing::debug!("Cleared {} stored keys for {}", keys.len(), platform);
        self.notify(platform, platform.key_prefix(), ChangeKind::Cleared);
        Ok(keys.len())
    }

    /// Persisted status; a platform with nothing stored is disconnected
    pub fn status(&self, platform: Platform) -> Result<CredentialStatus> {
        match self.get(platform, fields::STATUS)? {
            Some(raw) => raw.parse(),
            None => Ok(CredentialStatus::Disconnected),
        }
    }

    pub fn set_status(&self, platform: Platform, status: CredentialStatus) -> Result<()> {
        self.set(platform, fields::STATUS, status.as_str())
    }

    pub fn save(&self, credential: &PlatformCredential) -> Result<()> {
        let platform = credential.platform;
        self.set(platform, fields::ACCESS_TOKEN, &credential.access_token)?;
        self.set_optional(
            platform,
            fields::REFRESH_TOKEN,
            credential.refresh_token.as_deref(),
        )?;
        self.set_optional(
            platform,
            fields::EXPIRES_AT,
            credential.expires_at.map(|at| at.to_rfc3339()).as_deref(),
        )?;
        let scopes = credential
            .scopes
            .iter()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(" ");
        self.set(platform, fields::SCOPES, &scopes)?;
        self.set(platform, fields::USER_ID, &credential.account_id)?;
        self.set(platform, fields::DISPLAY_NAME, &credential.display_name)?;
        self.set_status(platform, credential.status)?;
        Ok(())
    }

    /// Rebuild the stored credential, `None` when no access token is stored
    pub fn load(&self, platform: Platform) -> Result<Option<PlatformCredential>> {
        let Some(access_token) = self.get(platform, fields::ACCESS_TOKEN)? else {
            return Ok(None);
        };

        let expires_at = match self.get(platform, fields::EXPIRES_AT)? {
            Some(raw) => Some(
                DateTime::parse_from_rfc3339(&raw)
                    .map_err(|e| {
                        CredentialError::Serialization(format!(
                            "{}: {}",
                            platform.key(fields::EXPIRES_AT),
                            e
                        ))
                    })?
                    .with_timezone(&Utc),
            ),
            None => None,
        };
        let scopes: BTreeSet<String> = self
            .get(platform, fields::SCOPES)?
            .map(|raw| raw.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default();

        Ok(Some(PlatformCredential {
            platform,
            account_id: self.get(platform, fields::USER_ID)?.unwrap_or_default(),
            display_name: self.get(platform, fields::DISPLAY_NAME)?.unwrap_or_default(),
            access_token,
            refresh_token: self.get(platform, fields::REFRESH_TOKEN)?,
            expires_at,
            scopes,
            status: self.status(platform)?,
        }))
    }

    /// Persist the profile details shown next to a connected account
    pub fn save_summary(&self, platform: Platform, summary: &AccountSummary) -> Result<()> {
        self.set(platform, fields::USER_ID, &summary.account_id)?;
        self.set(platform, fields::DISPLAY_NAME, &summary.display_name)?;
        let followers = summary.follower_count.map(|n| n.to_string());
        match platform {
            Platform::Instagram => {
                self.set_optional(platform, fields::USERNAME, summary.username.as_deref())?;
                self.set_optional(
                    platform,
                    fields::ACCOUNT_TYPE,
                    summary.account_type.as_deref(),
                )?;
            }
            Platform::YouTube => {
                self.set(platform, fields::CHANNEL_TITLE, &summary.display_name)?;
                self.set_optional(platform, fields::THUMBNAIL_URL, summary.avatar_url.as_deref())?;
                self.set_optional(platform, fields::SUBSCRIBER_COUNT, followers.as_deref())?;
            }
            Platform::TikTok => {
                self.set_optional(platform, fields::AVATAR_URL, summary.avatar_url.as_deref())?;
                self.set_optional(platform, fields::FOLLOWER_COUNT, followers.as_deref())?;
            }
        }
        Ok(())
    }

    pub fn load_summary(&self, platform: Platform) -> Result<Option<AccountSummary>> {
        let Some(account_id) = self.get(platform, fields::USER_ID)? else {
            return Ok(None);
        };
        let display_name = self.get(platform, fields::DISPLAY_NAME)?.unwrap_or_default();
        let (avatar_field, count_field) = match platform {
            Platform::YouTube => (fields::THUMBNAIL_URL, fields::SUBSCRIBER_COUNT),
            _ => (fields::AVATAR_URL, fields::FOLLOWER_COUNT),
        };

        Ok(Some(AccountSummary {
            account_id,
            display_name,
            username: self.get(platform, fields::USERNAME)?,
            account_type: self.get(platform, fields::ACCOUNT_TYPE)?,
            avatar_url: self.get(platform, avatar_field)?,
            follower_count: self
                .get(platform, count_field)?
                .and_then(|raw| raw.parse().ok()),
        }))
    }
}
