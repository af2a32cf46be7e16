//! Wiring tests for a workspace without any account configured.

use std::path::Path;

use tempfile::TempDir;
use wellsync_cli::commands::{self, Workspace};
use wellsync_cli::config::ClientConfig;
use wellsync_cli::store::EMPTY_JOURNAL;
use wellsync_cli::ClientError;
use wellsync_cloud::{CloudError, ProviderKind, ServiceScope, SyncMode};

fn offline_config(dir: &Path) -> ClientConfig {
    let toml = format!(
        r#"
[sync]
file_name = "backup.json"
debounce_ms = 50
journal_path = "{journal}"
state_path = "{state}"
local_file = "{backup}"

[notifications]
enabled = false
"#,
        journal = dir.join("journal.json").display(),
        state = dir.join("connection.json").display(),
        backup = dir.join("backups").join("journal-backup.json").display(),
    );
    toml::from_str(&toml).unwrap()
}

#[tokio::test]
async fn status_without_accounts() {
    let dir = TempDir::new().unwrap();
    let workspace = Workspace::open(&offline_config(dir.path())).await.unwrap();

    let status = workspace.connection.status();
    assert!(!status.configured);
    assert!(!status.connected);
    assert!(status.providers.iter().all(|p| !p.available));

    workspace.close().await;
}

#[tokio::test]
async fn connect_without_client_is_a_config_error() {
    let dir = TempDir::new().unwrap();
    let workspace = Workspace::open(&offline_config(dir.path())).await.unwrap();

    let err = commands::account::connect(&workspace, ServiceScope::Calendar)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ClientError::Cloud(CloudError::NotConfigured { .. })
    ));
    assert_eq!(err.code(), 78);

    workspace.close().await;
}

#[tokio::test]
async fn push_to_missing_provider_fails() {
    let dir = TempDir::new().unwrap();
    let workspace = Workspace::open(&offline_config(dir.path())).await.unwrap();

    let err = commands::sync::push(&workspace, ProviderKind::Webdav)
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Sync { .. }));
    assert_eq!(err.code(), 78);

    workspace.close().await;
}

#[tokio::test]
async fn save_writes_local_backup() {
    let dir = TempDir::new().unwrap();
    let workspace = Workspace::open(&offline_config(dir.path())).await.unwrap();

    commands::sync::save(&workspace).await.unwrap();

    let backup = dir.path().join("backups").join("journal-backup.json");
    assert_eq!(std::fs::read_to_string(backup).unwrap(), EMPTY_JOURNAL);

    workspace.close().await;
}

#[tokio::test]
async fn prefs_survive_reopening() {
    let dir = TempDir::new().unwrap();
    let config = offline_config(dir.path());

    let workspace = Workspace::open(&config).await.unwrap();
    commands::sync::prefs(
        &workspace,
        ProviderKind::GoogleDrive,
        Some(SyncMode::Auto),
        Some(true),
    )
    .unwrap();
    workspace.close().await;

    let workspace = Workspace::open(&config).await.unwrap();
    let binding = workspace.connection.store().storage(ProviderKind::GoogleDrive);
    assert_eq!(binding.sync_mode, SyncMode::Auto);
    assert!(binding.sync_on_startup);
    assert_eq!(binding.file_name, "backup.json");
    workspace.close().await;
}
