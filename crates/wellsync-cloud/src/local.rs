//! Local collaborators: the journal record store and the local backup file.
//!
//! The record store is opaque to the sync core. It is only exported as a
//! whole snapshot or replaced by one.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::fs;
use tracing::{debug, warn};
use wellsync_providers::BoxFuture;

/// Failure reported by a local collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct LocalStoreError(String);

impl LocalStoreError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl From<io::Error> for LocalStoreError {
    fn from(err: io::Error) -> Self {
        Self(err.to_string())
    }
}

impl From<LocalStoreError> for crate::CloudError {
    fn from(err: LocalStoreError) -> Self {
        Self::persistence(err.0)
    }
}

/// The journal's record store.
pub trait LocalStore: Send + Sync {
    /// Serializes every record into one snapshot.
    fn export_snapshot(&self) -> BoxFuture<'_, Result<String, LocalStoreError>>;

    /// Replaces every record with the content of `snapshot`.
    fn import_snapshot<'a>(&'a self, snapshot: &'a str)
    -> BoxFuture<'a, Result<(), LocalStoreError>>;

    /// Monotonic counter bumped by every local mutation.
    fn mutation_count(&self) -> u64;
}

/// A user-chosen local file that mirrors every saved snapshot.
pub trait LocalSnapshotFile: Send + Sync {
    /// Returns true if the file can currently be written.
    fn has_permission(&self) -> BoxFuture<'_, bool>;

    /// Tries once to regain access to the stored file reference.
    fn reresolve(&self) -> BoxFuture<'_, bool>;

    fn write<'a>(&'a self, snapshot: &'a str) -> BoxFuture<'a, Result<(), LocalStoreError>>;
}

/// A [`LocalSnapshotFile`] on the local filesystem.
#[derive(Debug, Clone)]
pub struct FsSnapshotFile {
    path: PathBuf,
}

impl FsSnapshotFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn check_permission(&self) -> bool {
        let Some(parent) = self.path.parent() else {
            return false;
        };
        let parent = if parent.as_os_str().is_empty() {
            Path::new(".")
        } else {
            parent
        };
        match fs::metadata(parent).await {
            Ok(meta) if meta.is_dir() => {}
            _ => return false,
        }
        match fs::metadata(&self.path).await {
            Ok(meta) => !meta.permissions().readonly(),
            Err(e) => e.kind() == io::ErrorKind::NotFound,
        }
    }

    /// Recreates a missing parent directory.
    async fn recreate_parent(&self) -> bool {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
            && let Err(e) = fs::create_dir_all(parent).await
        {
            debug!(path = %parent.display(), "cannot recreate backup directory: {}", e);
            return false;
        }
        self.check_permission().await
    }

    async fn write_atomic(&self, snapshot: &str) -> Result<(), LocalStoreError> {
        let temp_path = self.path.with_extension("json.tmp");
        fs::write(&temp_path, snapshot).await?;
        if let Err(e) = fs::rename(&temp_path, &self.path).await {
            warn!(path = %self.path.display(), "failed to replace local backup: {}", e);
            let _ = fs::remove_file(&temp_path).await;
            return Err(e.into());
        }
        Ok(())
    }
}

impl LocalSnapshotFile for FsSnapshotFile {
    fn has_permission(&self) -> BoxFuture<'_, bool> {
        Box::pin(self.check_permission())
    }

    fn reresolve(&self) -> BoxFuture<'_, bool> {
        Box::pin(self.recreate_parent())
    }

    fn write<'a>(&'a self, snapshot: &'a str) -> BoxFuture<'a, Result<(), LocalStoreError>> {
        Box::pin(self.write_atomic(snapshot))
    }
}
