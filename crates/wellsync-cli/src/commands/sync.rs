//! Snapshot commands: push, pull, check, save and prefs.

use chrono::Local;
use wellsync_cloud::{MutationEvent, ProviderKind, SyncMode, SyncResult};

use super::Workspace;
use crate::error::{ClientError, ClientResult};

pub async fn push(workspace: &Workspace, provider: ProviderKind) -> ClientResult<()> {
    let result = checked(workspace.connection.sync_push(provider).await)?;
    match result.remote_modified_at {
        Some(at) => println!(
            "Backed up to {} at {}.",
            provider.display_name(),
            at.with_timezone(&Local).format("%Y-%m-%d %H:%M")
        ),
        None => println!("Backed up to {}.", provider.display_name()),
    }
    Ok(())
}

pub async fn pull(workspace: &Workspace, provider: ProviderKind) -> ClientResult<()> {
    let result = checked(workspace.connection.sync_pull(provider).await)?;
    match result.payload {
        Some(snapshot) => println!(
            "Restored journal from {} ({} bytes).",
            provider.display_name(),
            snapshot.len()
        ),
        None => println!("No snapshot on {} yet.", provider.display_name()),
    }
    Ok(())
}

pub async fn check(workspace: &Workspace, provider: ProviderKind) -> ClientResult<()> {
    if workspace.connection.check_remote_newer(provider).await? {
        println!(
            "{} holds a newer snapshot, run `wellsync pull --provider {}`.",
            provider.display_name(),
            provider
        );
    } else {
        println!("Journal is up to date with {}.", provider.display_name());
    }
    Ok(())
}

/// Saves the journal the way an edit would: local backup file first, then
/// every provider in auto mode.
pub async fn save(workspace: &Workspace) -> ClientResult<()> {
    workspace.journal.record_mutation();
    workspace
        .connection
        .on_auto_save_trigger(MutationEvent::new("journal"));
    workspace.connection.flush_auto_save().await;
    println!("Journal saved.");
    Ok(())
}

/// Updates the preferences given, then prints the current ones.
pub fn prefs(
    workspace: &Workspace,
    provider: ProviderKind,
    mode: Option<SyncMode>,
    startup: Option<bool>,
) -> ClientResult<()> {
    if let Some(mode) = mode {
        workspace.connection.set_sync_mode(provider, mode)?;
    }
    if let Some(enabled) = startup {
        workspace.connection.set_sync_on_startup(provider, enabled)?;
    }

    let binding = workspace.connection.store().storage(provider);
    println!("{}:", provider.display_name());
    println!("  file:       {}", binding.file_name);
    println!("  mode:       {}", binding.sync_mode);
    println!("  on startup: {}", binding.sync_on_startup);
    Ok(())
}

fn checked(result: SyncResult) -> ClientResult<SyncResult> {
    if result.success {
        Ok(result)
    } else {
        Err(ClientError::Sync {
            message: result
                .error
                .unwrap_or_else(|| "unknown error".to_string()),
            kind: result.error_kind,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wellsync_cloud::{CloudError, ErrorKind};

    #[test]
    fn failed_result_becomes_sync_error() {
        let err = checked(SyncResult::failed(&CloudError::SessionExpired)).unwrap_err();
        let ClientError::Sync { message, kind } = err else {
            panic!("expected sync error");
        };
        assert_eq!(message, "session expired, reconnect to continue");
        assert_eq!(kind, Some(ErrorKind::SessionExpired));
    }

    #[test]
    fn successful_result_passes_through() {
        let result = SyncResult {
            success: true,
            payload: Some("{}".to_string()),
            ..Default::default()
        };
        assert_eq!(checked(result).unwrap().payload.as_deref(), Some("{}"));
    }
}
