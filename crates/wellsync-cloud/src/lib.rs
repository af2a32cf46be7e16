//! Cloud connection and sync core of the wellness journal.
//!
//! This crate keeps one device connected to the user's Google account and
//! storage providers:
//! - OAuth session with silent refresh and scope escalation
//! - Background and visibility-triggered token revalidation
//! - Calendar events projected onto journal days
//! - Whole-snapshot push and pull against Google Drive or WebDAV
//! - Debounced auto-save of local mutations
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use wellsync_cloud::{CloudConfig, CloudConnection, ServiceScope};
//! # use wellsync_cloud::testing::{FakeCalendar, FakeIdentity, MemoryStore};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! #   let identity = Arc::new(FakeIdentity::new());
//! #   let calendar = Arc::new(FakeCalendar::new());
//! #   let journal = Arc::new(MemoryStore::new("{}"));
//!     let connection = CloudConnection::builder(CloudConfig::default(), journal)
//!         .with_identity(identity)
//!         .with_calendar(calendar)
//!         .build()?;
//!
//!     connection.initialize().await;
//!     connection.connect(ServiceScope::Calendar).await?;
//!     connection.dispose().await;
//!     Ok(())
//! }
//! ```

mod autosave;
mod config;
mod connection;
mod error;
mod lifecycle;
mod local;
mod notify;
mod projector;
mod session;
mod state;
mod sync;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use autosave::{AutoSaveCoordinator, MutationEvent, Persist, SnapshotFlush};
pub use config::{CloudConfig, DEFAULT_SNAPSHOT_FILE_NAME, default_state_path};
pub use connection::{CloudConnection, CloudConnectionBuilder, ConnectionStatus, ProviderStatus};
pub use error::{CloudError, CloudResult, ErrorKind};
pub use lifecycle::{LifecycleConfig, TokenLifecycleManager};
pub use local::{FsSnapshotFile, LocalSnapshotFile, LocalStore, LocalStoreError};
pub use notify::{
    DesktopNotifier, LogNotifier, Notifier, NotifyConfig, NotifyKind, NotifyState,
    notification_hash,
};
pub use projector::{CalendarProjector, CalendarWindow, project_events};
pub use session::{AuthSession, CALENDAR_SCOPE, STORAGE_SCOPE, ServiceScope};
pub use state::{
    AuthState, CalendarBinding, ConnectionState, ProviderKind, StateStore, StorageBinding,
    StorageBindings, SyncMode,
};
pub use sync::{SnapshotSyncEngine, SyncResult};
