//! Whole-snapshot sync against one storage provider.
//!
//! A push overwrites the remote file with the full local snapshot and a
//! pull replaces every local record with the remote one; nothing is merged.
//! The remote modification time compared against `last_sync_at` tells the
//! caller whether a pull is worthwhile.
//!
//! Each engine serializes its own operations: a push requested while a
//! pull runs waits for it instead of interleaving.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use wellsync_providers::{ProviderError, ProviderResult, RemoteFile, StorageBackend};

use crate::error::{CloudError, CloudResult, ErrorKind};
use crate::local::LocalStore;
use crate::session::AuthSession;
use crate::state::{ProviderKind, StateStore, SyncMode};

/// Outcome of a push or pull.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncResult {
    pub success: bool,
    /// Snapshot received by a pull.
    pub payload: Option<String>,
    pub error: Option<String>,
    pub error_kind: Option<ErrorKind>,
    pub remote_modified_at: Option<DateTime<Utc>>,
}

impl SyncResult {
    fn ok(remote_modified_at: Option<DateTime<Utc>>) -> Self {
        Self {
            success: true,
            remote_modified_at,
            ..Default::default()
        }
    }

    pub fn failed(err: &CloudError) -> Self {
        Self {
            success: false,
            error: Some(err.to_string()),
            error_kind: Some(err.kind()),
            ..Default::default()
        }
    }
}

/// Syncs the snapshot with one storage provider.
pub struct SnapshotSyncEngine {
    kind: ProviderKind,
    backend: Arc<dyn StorageBackend>,
    session: Arc<AuthSession>,
    store: Arc<StateStore>,
    local: Arc<dyn LocalStore>,
    freshness: Duration,
    guard: Mutex<()>,
}

impl SnapshotSyncEngine {
    pub fn new(
        kind: ProviderKind,
        backend: Arc<dyn StorageBackend>,
        session: Arc<AuthSession>,
        store: Arc<StateStore>,
        local: Arc<dyn LocalStore>,
        freshness: Duration,
    ) -> Self {
        Self {
            kind,
            backend,
            session,
            store,
            local,
            freshness,
            guard: Mutex::new(()),
        }
    }

    pub fn kind(&self) -> ProviderKind {
        self.kind
    }

    pub fn requires_session(&self) -> bool {
        self.backend.requires_session()
    }

    /// Returns true if snapshots are pushed after every auto-save.
    pub fn is_auto(&self) -> bool {
        self.store.storage(self.kind).sync_mode == SyncMode::Auto
    }

    /// Overwrites the remote snapshot with `snapshot`.
    pub async fn push(&self, snapshot: &str) -> SyncResult {
        let _guard = self.guard.lock().await;
        match self.push_inner(snapshot).await {
            Ok(file) => {
                let synced_at = sync_stamp(file.modified_at);
                let recorded = self.store.update(|state| {
                    let binding = state.storage.get_mut(self.kind);
                    binding.remote_file_id = Some(file.id.clone());
                    binding.last_sync_at = Some(synced_at);
                });
                if let Err(e) = recorded {
                    warn!(provider = %self.kind, "pushed but failed to record sync: {}", e);
                    return SyncResult::failed(&e);
                }
                info!(provider = %self.kind, bytes = snapshot.len(), "snapshot pushed");
                SyncResult::ok(file.modified_at)
            }
            Err(e) => {
                warn!(provider = %self.kind, "push failed: {}", e);
                SyncResult::failed(&e)
            }
        }
    }

    /// Downloads the remote snapshot and replaces local data with it.
    ///
    /// A missing remote file is an empty, successful pull.
    pub async fn pull(&self) -> SyncResult {
        let _guard = self.guard.lock().await;
        let (file, content) = match self.pull_inner().await {
            Ok(Some(found)) => found,
            Ok(None) => {
                info!(provider = %self.kind, "no remote snapshot yet");
                return SyncResult::ok(None);
            }
            Err(e) => {
                warn!(provider = %self.kind, "pull failed: {}", e);
                return SyncResult::failed(&e);
            }
        };

        if let Err(e) = self.local.import_snapshot(&content).await {
            let err = CloudError::from(e);
            warn!(provider = %self.kind, "failed to import snapshot: {}", err);
            return SyncResult::failed(&err);
        }

        let synced_at = sync_stamp(file.modified_at);
        let recorded = self.store.update(|state| {
            let binding = state.storage.get_mut(self.kind);
            binding.remote_file_id = Some(file.id.clone());
            binding.last_sync_at = Some(synced_at);
        });
        if let Err(e) = recorded {
            return SyncResult::failed(&e);
        }

        info!(provider = %self.kind, bytes = content.len(), "snapshot pulled");
        SyncResult {
            payload: Some(content),
            ..SyncResult::ok(file.modified_at)
        }
    }

    /// Returns true if the remote snapshot changed since the last sync.
    ///
    /// Without a recorded sync this is true and no request is made. Only
    /// metadata is fetched.
    pub async fn check_remote_newer(&self) -> CloudResult<bool> {
        let _guard = self.guard.lock().await;
        let Some(last_sync_at) = self.store.storage(self.kind).last_sync_at else {
            debug!(provider = %self.kind, "never synced, remote counts as newer");
            return Ok(true);
        };

        let token = self.authorize().await?;
        let file = match self.locate().await {
            Err(e) if self.is_session_rejection(&e) => {
                self.recover(token.as_deref()).await?;
                self.locate().await.map_err(|e| self.classify(e))?
            }
            other => other.map_err(|e| self.classify(e))?,
        };

        let newer = file
            .and_then(|f| f.modified_at)
            .is_some_and(|modified| modified > last_sync_at);
        debug!(provider = %self.kind, newer, "compared remote snapshot");
        Ok(newer)
    }

    async fn push_inner(&self, snapshot: &str) -> CloudResult<RemoteFile> {
        let token = self.authorize().await?;
        match self.upload(snapshot).await {
            Err(e) if self.is_session_rejection(&e) => {
                self.recover(token.as_deref()).await?;
                self.upload(snapshot).await.map_err(|e| self.classify(e))
            }
            other => other.map_err(|e| self.classify(e)),
        }
    }

    async fn pull_inner(&self) -> CloudResult<Option<(RemoteFile, String)>> {
        let token = self.authorize().await?;
        match self.download().await {
            Err(e) if self.is_session_rejection(&e) => {
                self.recover(token.as_deref()).await?;
                self.download().await.map_err(|e| self.classify(e))
            }
            other => other.map_err(|e| self.classify(e)),
        }
    }

    /// Writes `snapshot` to the bound file, creating it when needed.
    async fn upload(&self, snapshot: &str) -> ProviderResult<RemoteFile> {
        let binding = self.store.storage(self.kind);
        let file_id = match binding.remote_file_id {
            Some(id) => Some(id),
            None => self
                .backend
                .find_file(&binding.file_name)
                .await?
                .map(|f| f.id),
        };

        match file_id {
            Some(id) => match self.backend.update_file(&id, snapshot).await {
                Err(e) if e.is_not_found() => {
                    debug!(provider = %self.kind, "remote file vanished, creating it again");
                    self.backend.create_file(&binding.file_name, snapshot).await
                }
                other => other,
            },
            None => {
                debug!(provider = %self.kind, file = %binding.file_name, "creating remote snapshot");
                self.backend.create_file(&binding.file_name, snapshot).await
            }
        }
    }

    async fn download(&self) -> ProviderResult<Option<(RemoteFile, String)>> {
        let Some(file) = self.locate().await? else {
            return Ok(None);
        };
        Ok(self
            .backend
            .download_file(&file.id)
            .await?
            .map(|content| (file, content)))
    }

    /// Finds the remote file's metadata by id, then by name.
    async fn locate(&self) -> ProviderResult<Option<RemoteFile>> {
        let binding = self.store.storage(self.kind);
        if let Some(id) = &binding.remote_file_id
            && let Some(file) = self.backend.file_metadata(id).await?
        {
            return Ok(Some(file));
        }
        self.backend.find_file(&binding.file_name).await
    }

    /// Returns the token the request will carry, for backends that use one.
    async fn authorize(&self) -> CloudResult<Option<String>> {
        if !self.backend.requires_session() {
            return Ok(None);
        }
        self.session.ensure_valid(self.freshness).await.map(Some)
    }

    fn is_session_rejection(&self, err: &ProviderError) -> bool {
        self.backend.requires_session() && err.is_auth_failure()
    }

    /// Single refresh after a rejected token.
    async fn recover(&self, rejected: Option<&str>) -> CloudResult<()> {
        info!(provider = %self.kind, "token rejected, refreshing once");
        self.session
            .refresh_after_auth_failure(rejected.unwrap_or_default())
            .await
            .map(|_| ())
    }

    fn classify(&self, err: ProviderError) -> CloudError {
        if err.is_auth_failure() {
            if self.backend.requires_session() {
                self.session.mark_session_expired();
                return CloudError::SessionExpired;
            }
            return CloudError::auth_provider(format!(
                "{} rejected the configured credentials",
                self.kind.display_name()
            ));
        }
        err.into()
    }
}

/// `last_sync_at` for a file the device just exchanged: never earlier than
/// the remote clock, so the file does not later look newer than our copy.
fn sync_stamp(remote_modified_at: Option<DateTime<Utc>>) -> DateTime<Utc> {
    let now = Utc::now();
    remote_modified_at.map_or(now, |modified| modified.max(now))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::ServiceScope;
    use crate::testing::{FakeIdentity, FakeStorage, MemoryStore};
    use chrono::TimeZone;

    struct Fixture {
        identity: Arc<FakeIdentity>,
        storage: Arc<FakeStorage>,
        store: Arc<StateStore>,
        local: Arc<MemoryStore>,
        engine: SnapshotSyncEngine,
    }

    async fn fixture(storage: FakeStorage) -> Fixture {
        let identity = Arc::new(FakeIdentity::new());
        let store = Arc::new(StateStore::in_memory("backup.json"));
        let session = Arc::new(AuthSession::new(identity.clone(), store.clone()));
        let storage = Arc::new(storage);
        session.register_sink(storage.clone());
        session.sign_in(ServiceScope::Storage).await.unwrap();
        let local = Arc::new(MemoryStore::new(r#"{"entries":["local"]}"#));
        let engine = SnapshotSyncEngine::new(
            ProviderKind::GoogleDrive,
            storage.clone(),
            session,
            store.clone(),
            local.clone(),
            Duration::from_secs(300),
        );
        Fixture {
            identity,
            storage,
            store,
            local,
            engine,
        }
    }

    #[tokio::test]
    async fn first_push_creates_file_and_records_binding() {
        let f = fixture(FakeStorage::session_backed()).await;

        let result = f.engine.push(r#"{"entries":[1]}"#).await;

        assert!(result.success, "{:?}", result.error);
        assert_eq!(f.storage.create_count(), 1);
        let binding = f.store.storage(ProviderKind::GoogleDrive);
        let id = binding.remote_file_id.unwrap();
        assert_eq!(f.storage.content(&id).as_deref(), Some(r#"{"entries":[1]}"#));
        assert!(binding.last_sync_at.is_some());
    }

    #[tokio::test]
    async fn push_reuses_file_found_by_name() {
        let storage = FakeStorage::session_backed();
        let existing = storage.seed_file("backup.json", "{}", Utc::now());
        let f = fixture(storage).await;

        assert!(f.engine.push("{\"v\":2}").await.success);
        assert_eq!(f.storage.create_count(), 0);
        assert_eq!(f.storage.content(&existing).as_deref(), Some("{\"v\":2}"));
    }

    #[tokio::test]
    async fn push_recreates_deleted_file() {
        let f = fixture(FakeStorage::session_backed()).await;
        assert!(f.engine.push("{}").await.success);
        let first_id = f.store.storage(ProviderKind::GoogleDrive).remote_file_id.unwrap();

        f.storage.delete(&first_id);
        assert!(f.engine.push("{\"again\":true}").await.success);

        let second_id = f.store.storage(ProviderKind::GoogleDrive).remote_file_id.unwrap();
        assert_ne!(first_id, second_id);
        assert_eq!(f.storage.create_count(), 2);
    }

    #[tokio::test]
    async fn push_retries_once_after_rejected_token() {
        let f = fixture(FakeStorage::session_backed()).await;
        f.storage.fail_next(ProviderError::authentication("401"));

        let result = f.engine.push("{}").await;

        assert!(result.success, "{:?}", result.error);
        assert_eq!(f.identity.refresh_count(), 1);
    }

    #[tokio::test]
    async fn push_gives_up_after_second_rejection() {
        let f = fixture(FakeStorage::session_backed()).await;
        f.storage.fail_next(ProviderError::authentication("401"));
        f.storage.fail_next(ProviderError::authentication("401"));

        let result = f.engine.push("{}").await;

        assert!(!result.success);
        assert_eq!(result.error_kind, Some(ErrorKind::SessionExpired));
        assert_eq!(f.identity.refresh_count(), 1);
    }

    #[tokio::test]
    async fn network_failure_is_not_retried() {
        let f = fixture(FakeStorage::session_backed()).await;
        f.storage.fail_next(ProviderError::network("connection reset"));

        let result = f.engine.push("{}").await;

        assert!(!result.success);
        assert_eq!(result.error_kind, Some(ErrorKind::Network));
        assert_eq!(f.identity.refresh_count(), 0);
    }

    #[tokio::test]
    async fn credential_backend_never_refreshes_session() {
        let f = fixture(FakeStorage::with_own_credentials()).await;
        f.storage.fail_next(ProviderError::authentication("bad password"));

        let result = f.engine.push("{}").await;

        assert!(!result.success);
        assert_eq!(result.error_kind, Some(ErrorKind::AuthProvider));
        assert_eq!(f.identity.refresh_count(), 0);
    }

    #[tokio::test]
    async fn pull_missing_file_is_empty_success() {
        let f = fixture(FakeStorage::session_backed()).await;

        let result = f.engine.pull().await;

        assert!(result.success);
        assert_eq!(result.payload, None);
        assert_eq!(f.local.import_count(), 0);
        assert_eq!(f.store.storage(ProviderKind::GoogleDrive).last_sync_at, None);
    }

    #[tokio::test]
    async fn pull_replaces_local_snapshot() {
        let storage = FakeStorage::session_backed();
        let modified = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
        storage.seed_file("backup.json", r#"{"entries":["remote"]}"#, modified);
        let f = fixture(storage).await;

        let result = f.engine.pull().await;

        assert!(result.success);
        assert_eq!(result.payload.as_deref(), Some(r#"{"entries":["remote"]}"#));
        assert_eq!(result.remote_modified_at, Some(modified));
        assert_eq!(f.local.snapshot(), r#"{"entries":["remote"]}"#);
        let last = f.store.storage(ProviderKind::GoogleDrive).last_sync_at.unwrap();
        assert!(last > modified);
    }

    #[tokio::test]
    async fn pull_from_server_with_fast_clock_is_not_newer_afterwards() {
        let storage = FakeStorage::session_backed();
        let ahead = Utc::now() + chrono::Duration::minutes(10);
        storage.seed_file("backup.json", r#"{"entries":["remote"]}"#, ahead);
        let f = fixture(storage).await;

        assert!(f.engine.pull().await.success);
        assert_eq!(
            f.store.storage(ProviderKind::GoogleDrive).last_sync_at,
            Some(ahead)
        );
        assert!(!f.engine.check_remote_newer().await.unwrap());
        assert_eq!(f.local.import_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_push_and_pull_run_one_after_the_other() {
        let storage = FakeStorage::session_backed();
        storage.set_latency(Duration::from_secs(1));
        let f = fixture(storage).await;

        let (pushed, pulled) = tokio::join!(
            f.engine.push(r#"{"entries":["pushed"]}"#),
            f.engine.pull()
        );

        assert!(pushed.success, "{:?}", pushed.error);
        assert!(pulled.success, "{:?}", pulled.error);
        assert_eq!(pulled.payload.as_deref(), Some(r#"{"entries":["pushed"]}"#));
        assert_eq!(f.local.snapshot(), r#"{"entries":["pushed"]}"#);
        assert_eq!(f.storage.max_in_flight(), 1);
    }

    #[tokio::test]
    async fn never_synced_counts_as_newer_without_requests() {
        let f = fixture(FakeStorage::session_backed()).await;

        assert!(f.engine.check_remote_newer().await.unwrap());
        assert_eq!(f.storage.metadata_count(), 0);
        assert_eq!(f.storage.find_count(), 0);
    }

    #[tokio::test]
    async fn own_push_is_not_newer() {
        let f = fixture(FakeStorage::session_backed()).await;
        assert!(f.engine.push("{}").await.success);

        assert!(!f.engine.check_remote_newer().await.unwrap());
        assert_eq!(f.storage.download_count(), 0);
    }

    #[tokio::test]
    async fn remote_change_after_sync_is_newer() {
        let storage = FakeStorage::session_backed();
        let modified = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
        let id = storage.seed_file("backup.json", "{}", modified);
        let f = fixture(storage).await;
        f.store
            .update(|s| {
                let b = s.storage.get_mut(ProviderKind::GoogleDrive);
                b.remote_file_id = Some(id);
                b.last_sync_at = Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
            })
            .unwrap();

        assert!(f.engine.check_remote_newer().await.unwrap());
        assert_eq!(f.storage.metadata_count(), 1);
        assert_eq!(f.storage.download_count(), 0);
    }

    #[tokio::test]
    async fn missing_remote_is_not_newer() {
        let f = fixture(FakeStorage::session_backed()).await;
        f.store
            .update(|s| s.storage.google_drive.last_sync_at = Some(Utc::now()))
            .unwrap();

        assert!(!f.engine.check_remote_newer().await.unwrap());
    }

    #[test]
    fn failed_result_carries_kind_and_message() {
        let result = SyncResult::failed(&CloudError::network("timeout"));
        assert!(!result.success);
        assert_eq!(result.error_kind, Some(ErrorKind::Network));
        assert_eq!(result.error.as_deref(), Some("network error: timeout"));
        assert_eq!(result.payload, None);
    }
}
