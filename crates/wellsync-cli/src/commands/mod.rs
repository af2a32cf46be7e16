//! Subcommand implementations.

pub mod account;
pub mod calendar;
pub mod config;
pub mod sync;

use std::sync::Arc;

use tracing::{debug, warn};
use wellsync_cloud::{CloudConnection, DesktopNotifier, FsSnapshotFile};

use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};
use crate::store::JournalFile;

/// The sync core wired to the providers in `config.toml`.
pub struct Workspace {
    pub connection: CloudConnection,
    pub journal: Arc<JournalFile>,
}

impl Workspace {
    /// Builds the connection and runs its startup work.
    pub async fn open(config: &ClientConfig) -> ClientResult<Self> {
        config.validate().map_err(ClientError::Config)?;

        let journal = Arc::new(JournalFile::new(config.journal_path()));
        let mut builder = CloudConnection::builder(config.cloud_config(), journal.clone())
            .with_notifier(Arc::new(DesktopNotifier::new(config.notify_config())));

        #[cfg(feature = "google")]
        if let Some(ref google) = config.google {
            use wellsync_providers::google::{DriveClient, GoogleCalendarClient, GoogleIdentity};

            let provider_config = google.to_provider_config().map_err(ClientError::Config)?;
            builder = builder
                .with_identity(Arc::new(GoogleIdentity::new(provider_config.clone())?))
                .with_calendar(Arc::new(GoogleCalendarClient::new(&provider_config)?))
                .with_drive(Arc::new(DriveClient::new(&provider_config)?));
        }

        #[cfg(feature = "webdav")]
        if let Some(ref webdav) = config.webdav {
            use wellsync_providers::webdav::WebDavStorage;

            let provider_config = webdav.to_provider_config().map_err(ClientError::Config)?;
            builder = builder.with_webdav(Arc::new(WebDavStorage::new(provider_config)?));
        }

        if let Some(ref path) = config.sync.local_file {
            builder = builder.with_local_file(Arc::new(FsSnapshotFile::new(path)));
        }

        let connection = builder.build()?;
        for (kind, result) in connection.initialize().await {
            if result.success {
                debug!(provider = %kind, "startup sync finished");
            } else {
                warn!(provider = %kind, "startup sync failed: {:?}", result.error);
            }
        }

        Ok(Self {
            connection,
            journal,
        })
    }

    /// Saves pending work and stops background tasks.
    pub async fn close(self) {
        self.connection.dispose().await;
    }
}
