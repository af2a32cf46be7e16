//! Persisted connection state.
//!
//! One JSON document per device holds the auth record, the calendar binding
//! and one storage binding per provider. It is rewritten atomically after
//! every change.

use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::DEFAULT_SNAPSHOT_FILE_NAME;
use crate::error::{CloudError, CloudResult};

/// OAuth session record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthState {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub granted_scopes: BTreeSet<String>,
    pub connected_at: Option<DateTime<Utc>>,
    pub last_validated: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl AuthState {
    pub fn is_connected(&self) -> bool {
        self.access_token.is_some()
    }

    /// Returns true if every scope in `scopes` has been granted.
    pub fn has_scopes(&self, scopes: &[String]) -> bool {
        scopes.iter().all(|s| self.granted_scopes.contains(s))
    }

    /// Returns true if the token was validated less than `window` ago.
    pub fn validated_within(&self, window: std::time::Duration, now: DateTime<Utc>) -> bool {
        let Ok(window) = chrono::Duration::from_std(window) else {
            return false;
        };
        self.last_validated.is_some_and(|at| now - at < window)
    }
}

/// The calendar shown next to journal entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarBinding {
    pub calendar_id: String,
    pub calendar_name: String,
    pub last_sync_at: Option<DateTime<Utc>>,
}

impl CalendarBinding {
    pub fn new(calendar_id: impl Into<String>, calendar_name: impl Into<String>) -> Self {
        Self {
            calendar_id: calendar_id.into(),
            calendar_name: calendar_name.into(),
            last_sync_at: None,
        }
    }
}

/// When snapshots are pushed to a provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    /// Only on explicit push.
    #[default]
    Manual,
    /// After every auto-save.
    Auto,
}

impl FromStr for SyncMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "manual" => Ok(Self::Manual),
            "auto" => Ok(Self::Auto),
            other => Err(format!("unknown sync mode '{}' (expected manual or auto)", other)),
        }
    }
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Manual => "manual",
            Self::Auto => "auto",
        })
    }
}

/// A remote storage provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    GoogleDrive,
    Webdav,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 2] = [ProviderKind::GoogleDrive, ProviderKind::Webdav];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::GoogleDrive => "google-drive",
            Self::Webdav => "webdav",
        }
    }

    /// Name shown in notifications.
    pub fn display_name(self) -> &'static str {
        match self {
            Self::GoogleDrive => "Google Drive",
            Self::Webdav => "WebDAV",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "google-drive" | "google_drive" | "drive" | "google" => Ok(Self::GoogleDrive),
            "webdav" | "dav" => Ok(Self::Webdav),
            other => Err(format!(
                "unknown provider '{}' (expected google-drive or webdav)",
                other
            )),
        }
    }
}

/// Where a provider keeps the snapshot, and the sync preferences for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageBinding {
    /// Resolved lazily on first push or pull.
    pub remote_file_id: Option<String>,
    pub file_name: String,
    pub last_sync_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub sync_mode: SyncMode,
    #[serde(default)]
    pub sync_on_startup: bool,
}

impl StorageBinding {
    pub fn new(file_name: impl Into<String>) -> Self {
        Self {
            remote_file_id: None,
            file_name: file_name.into(),
            last_sync_at: None,
            sync_mode: SyncMode::Manual,
            sync_on_startup: false,
        }
    }

    /// Forgets the remote file while keeping preferences.
    pub fn reset_remote(&mut self) {
        self.remote_file_id = None;
        self.last_sync_at = None;
    }
}

impl Default for StorageBinding {
    fn default() -> Self {
        Self::new(DEFAULT_SNAPSHOT_FILE_NAME)
    }
}

/// One binding per storage provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageBindings {
    #[serde(default)]
    pub google_drive: StorageBinding,
    #[serde(default)]
    pub webdav: StorageBinding,
}

impl StorageBindings {
    pub fn with_file_name(file_name: &str) -> Self {
        Self {
            google_drive: StorageBinding::new(file_name),
            webdav: StorageBinding::new(file_name),
        }
    }

    pub fn get(&self, kind: ProviderKind) -> &StorageBinding {
        match kind {
            ProviderKind::GoogleDrive => &self.google_drive,
            ProviderKind::Webdav => &self.webdav,
        }
    }

    pub fn get_mut(&mut self, kind: ProviderKind) -> &mut StorageBinding {
        match kind {
            ProviderKind::GoogleDrive => &mut self.google_drive,
            ProviderKind::Webdav => &mut self.webdav,
        }
    }
}

/// Everything the sync core persists for a device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionState {
    #[serde(default)]
    pub auth: AuthState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calendar: Option<CalendarBinding>,
    #[serde(default)]
    pub storage: StorageBindings,
}

impl ConnectionState {
    /// Creates a disconnected state using `file_name` for every provider.
    pub fn new(file_name: &str) -> Self {
        Self {
            auth: AuthState::default(),
            calendar: None,
            storage: StorageBindings::with_file_name(file_name),
        }
    }
}

/// Process-wide owner of the [`ConnectionState`].
#[derive(Debug)]
pub struct StateStore {
    path: Option<PathBuf>,
    state: RwLock<ConnectionState>,
    /// Held from mutation to rename so the file sees changes in order.
    writer: Mutex<()>,
    writes: AtomicU64,
}

impl StateStore {
    /// Opens the state file at `path`, starting fresh if it is missing.
    ///
    /// An unreadable document is logged and replaced by a disconnected
    /// state; reconnecting rebuilds it.
    pub fn open(path: impl Into<PathBuf>, file_name: &str) -> CloudResult<Self> {
        let path = path.into();
        let state = match fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(state) => {
                    debug!(path = %path.display(), "loaded connection state");
                    state
                }
                Err(e) => {
                    warn!(path = %path.display(), "ignoring corrupt connection state: {}", e);
                    ConnectionState::new(file_name)
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => ConnectionState::new(file_name),
            Err(e) => {
                return Err(CloudError::persistence(format!(
                    "failed to read {}: {}",
                    path.display(),
                    e
                )));
            }
        };
        Ok(Self {
            path: Some(path),
            state: RwLock::new(state),
            writer: Mutex::new(()),
            writes: AtomicU64::new(0),
        })
    }

    /// Creates a store that never touches the filesystem.
    pub fn in_memory(file_name: &str) -> Self {
        Self {
            path: None,
            state: RwLock::new(ConnectionState::new(file_name)),
            writer: Mutex::new(()),
            writes: AtomicU64::new(0),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Returns a copy of the whole state.
    pub fn snapshot(&self) -> ConnectionState {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn auth(&self) -> AuthState {
        self.read(|s| s.auth.clone())
    }

    pub fn calendar(&self) -> Option<CalendarBinding> {
        self.read(|s| s.calendar.clone())
    }

    pub fn storage(&self, kind: ProviderKind) -> StorageBinding {
        self.read(|s| s.storage.get(kind).clone())
    }

    /// Applies `f` and persists the result.
    ///
    /// The in-memory state keeps the change even if writing fails.
    pub fn update<R>(&self, f: impl FnOnce(&mut ConnectionState) -> R) -> CloudResult<R> {
        let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let (result, state) = {
            let mut guard = self.state.write().unwrap_or_else(PoisonError::into_inner);
            let result = f(&mut guard);
            (result, guard.clone())
        };
        self.save(&state)?;
        Ok(result)
    }

    /// Forgets the session.
    pub fn clear_auth(&self) -> CloudResult<()> {
        self.update(|s| s.auth = AuthState::default())
    }

    fn read<R>(&self, f: impl FnOnce(&ConnectionState) -> R) -> R {
        f(&self.state.read().unwrap_or_else(PoisonError::into_inner))
    }

    fn save(&self, state: &ConnectionState) -> CloudResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|e| {
                CloudError::persistence(format!("failed to create {}: {}", parent.display(), e))
            })?;
        }

        let content = serde_json::to_string_pretty(state)?;

        let temp_path = path.with_extension(format!(
            "json.{}.{}.tmp",
            std::process::id(),
            self.writes.fetch_add(1, Ordering::Relaxed)
        ));
        fs::write(&temp_path, content).map_err(|e| {
            CloudError::persistence(format!("failed to write connection state: {}", e))
        })?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = fs::Permissions::from_mode(0o600);
            let _ = fs::set_permissions(&temp_path, perms);
        }

        fs::rename(&temp_path, path).map_err(|e| {
            let _ = fs::remove_file(&temp_path);
            CloudError::persistence(format!("failed to rename connection state: {}", e))
        })?;

        debug!(path = %path.display(), "saved connection state");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn new_state_is_disconnected_with_manual_bindings() {
        let state = ConnectionState::new("journal.json");
        assert!(!state.auth.is_connected());
        assert!(state.calendar.is_none());
        for kind in ProviderKind::ALL {
            let binding = state.storage.get(kind);
            assert_eq!(binding.file_name, "journal.json");
            assert_eq!(binding.sync_mode, SyncMode::Manual);
            assert!(!binding.sync_on_startup);
        }
    }

    #[test]
    fn json_shape() {
        let mut state = ConnectionState::new("backup.json");
        state.calendar = Some(CalendarBinding::new("primary", "Me"));
        state.storage.webdav.sync_mode = SyncMode::Auto;

        let json: serde_json::Value = serde_json::to_value(&state).unwrap();
        assert_eq!(json["calendar"]["calendar_id"], "primary");
        assert_eq!(json["storage"]["webdav"]["sync_mode"], "auto");
        assert_eq!(json["storage"]["google_drive"]["sync_mode"], "manual");
        assert!(json["auth"]["granted_scopes"].as_array().unwrap().is_empty());
    }

    #[test]
    fn partial_document_fills_defaults() {
        let state: ConnectionState =
            serde_json::from_str(r#"{"auth":{"access_token":"t"}}"#).unwrap();
        assert!(state.auth.is_connected());
        assert_eq!(state.storage.google_drive.file_name, DEFAULT_SNAPSHOT_FILE_NAME);
    }

    #[test]
    fn store_persists_across_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("wellsync").join("connection.json");

        let store = StateStore::open(&path, "backup.json").unwrap();
        store
            .update(|s| {
                s.auth.access_token = Some("token".to_string());
                s.auth.granted_scopes.insert("scope-a".to_string());
                s.storage.google_drive.remote_file_id = Some("file-1".to_string());
            })
            .unwrap();

        let reopened = StateStore::open(&path, "backup.json").unwrap();
        assert_eq!(reopened.auth().access_token.as_deref(), Some("token"));
        assert_eq!(
            reopened.storage(ProviderKind::GoogleDrive).remote_file_id.as_deref(),
            Some("file-1")
        );
        let leftovers: Vec<_> = fs::read_dir(path.parent().unwrap())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn concurrent_updates_all_reach_the_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("connection.json");
        let store = std::sync::Arc::new(StateStore::open(&path, "backup.json").unwrap());

        for round in 0..20 {
            let writers: Vec<_> = (0..8)
                .map(|i| {
                    let store = store.clone();
                    std::thread::spawn(move || {
                        store.update(|s| {
                            s.auth.granted_scopes.insert(format!("scope-{round}-{i}"));
                        })
                    })
                })
                .collect();
            for writer in writers {
                writer.join().unwrap().unwrap();
            }

            let on_disk = StateStore::open(&path, "backup.json").unwrap();
            assert_eq!(on_disk.auth().granted_scopes, store.auth().granted_scopes);
            assert_eq!(on_disk.auth().granted_scopes.len(), (round + 1) * 8);
        }
    }

    #[cfg(unix)]
    #[test]
    fn state_file_is_private() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("connection.json");
        let store = StateStore::open(&path, "backup.json").unwrap();
        store.update(|s| s.auth.access_token = Some("t".to_string())).unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn corrupt_file_starts_fresh() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("connection.json");
        fs::write(&path, "{ not json").unwrap();

        let store = StateStore::open(&path, "backup.json").unwrap();
        assert_eq!(store.snapshot(), ConnectionState::new("backup.json"));
    }

    #[test]
    fn clear_auth_keeps_bindings() {
        let store = StateStore::in_memory("backup.json");
        store
            .update(|s| {
                s.auth.access_token = Some("t".to_string());
                s.storage.webdav.sync_on_startup = true;
            })
            .unwrap();

        store.clear_auth().unwrap();
        assert!(!store.auth().is_connected());
        assert!(store.storage(ProviderKind::Webdav).sync_on_startup);
    }

    #[test]
    fn provider_kind_parsing() {
        assert_eq!("google-drive".parse(), Ok(ProviderKind::GoogleDrive));
        assert_eq!("WebDAV".parse(), Ok(ProviderKind::Webdav));
        assert!("dropbox".parse::<ProviderKind>().is_err());
        assert_eq!("auto".parse(), Ok(SyncMode::Auto));
    }

    #[test]
    fn validation_freshness() {
        let now = Utc::now();
        let mut auth = AuthState::default();
        let window = std::time::Duration::from_secs(300);
        assert!(!auth.validated_within(window, now));

        auth.last_validated = Some(now - chrono::Duration::minutes(2));
        assert!(auth.validated_within(window, now));

        auth.last_validated = Some(now - chrono::Duration::minutes(6));
        assert!(!auth.validated_within(window, now));
    }
}
