//! Journal store backed by a single JSON file.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::fs;
use tracing::{debug, warn};
use wellsync_cloud::{LocalStore, LocalStoreError};
use wellsync_providers::BoxFuture;

/// Content exported when no journal has been written yet.
pub const EMPTY_JOURNAL: &str = r#"{"entries":[]}"#;

/// The journal as one JSON document on disk.
#[derive(Debug)]
pub struct JournalFile {
    path: PathBuf,
    mutations: AtomicU64,
}

impl JournalFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            mutations: AtomicU64::new(0),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Marks the journal as changed so the next auto-save persists it.
    pub fn record_mutation(&self) -> u64 {
        self.mutations.fetch_add(1, Ordering::SeqCst) + 1
    }

    async fn read(&self) -> Result<String, LocalStoreError> {
        let content = match fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "journal not created yet");
                return Ok(EMPTY_JOURNAL.to_string());
            }
            Err(e) => return Err(e.into()),
        };
        check_document(&content)?;
        Ok(content)
    }

    async fn replace(&self, snapshot: &str) -> Result<(), LocalStoreError> {
        check_document(snapshot)?;
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let temp_path = self.path.with_extension("json.tmp");
        fs::write(&temp_path, snapshot).await?;
        if let Err(e) = fs::rename(&temp_path, &self.path).await {
            warn!(path = %self.path.display(), "failed to replace journal: {}", e);
            let _ = fs::remove_file(&temp_path).await;
            return Err(e.into());
        }
        debug!(path = %self.path.display(), bytes = snapshot.len(), "journal replaced");
        Ok(())
    }
}

/// A snapshot must be a JSON object.
fn check_document(content: &str) -> Result<(), LocalStoreError> {
    match serde_json::from_str::<serde_json::Value>(content) {
        Ok(value) if value.is_object() => Ok(()),
        Ok(_) => Err(LocalStoreError::new("journal snapshot is not a JSON object")),
        Err(e) => Err(LocalStoreError::new(format!(
            "journal snapshot is not valid JSON: {}",
            e
        ))),
    }
}

impl LocalStore for JournalFile {
    fn export_snapshot(&self) -> BoxFuture<'_, Result<String, LocalStoreError>> {
        Box::pin(self.read())
    }

    fn import_snapshot<'a>(
        &'a self,
        snapshot: &'a str,
    ) -> BoxFuture<'a, Result<(), LocalStoreError>> {
        Box::pin(self.replace(snapshot))
    }

    fn mutation_count(&self) -> u64 {
        self.mutations.load(Ordering::SeqCst)
    }
}
