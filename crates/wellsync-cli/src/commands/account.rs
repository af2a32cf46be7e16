//! Account commands: connect, disconnect, status and calendars.

use chrono::{DateTime, Local, Utc};
use wellsync_cloud::{
    CALENDAR_SCOPE, ConnectionStatus, ProviderStatus, STORAGE_SCOPE, ServiceScope,
};

use super::Workspace;
use crate::error::ClientResult;

/// Runs the consent flow for `service` and binds a calendar if needed.
pub async fn connect(workspace: &Workspace, service: ServiceScope) -> ClientResult<()> {
    workspace.connection.connect(service).await?;

    println!("Connected to Google ({}).", service);
    if let Some(calendar) = workspace.connection.status().calendar {
        println!("Calendar: {}", calendar.calendar_name);
    }
    Ok(())
}

pub fn disconnect(workspace: &Workspace) -> ClientResult<()> {
    workspace.connection.disconnect()?;
    println!("Disconnected from Google. Sync preferences were kept.");
    Ok(())
}

pub fn status(workspace: &Workspace, json: bool) -> ClientResult<()> {
    let status = workspace.connection.status();
    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        print!("{}", render_status(&status));
    }
    Ok(())
}

/// Lists calendars, or binds `select` when given.
pub async fn calendars(workspace: &Workspace, select: Option<String>) -> ClientResult<()> {
    if let Some(id) = select {
        let binding = workspace.connection.select_calendar(&id).await?;
        println!("Selected calendar: {}", binding.calendar_name);
        return Ok(());
    }

    let bound = workspace
        .connection
        .status()
        .calendar
        .map(|c| c.calendar_id);
    let calendars = workspace.connection.list_calendars().await?;
    if calendars.is_empty() {
        println!("No calendars found.");
    }
    for calendar in calendars {
        let marker = if bound.as_deref() == Some(calendar.id.as_str()) {
            '*'
        } else {
            ' '
        };
        let primary = if calendar.is_primary { " (primary)" } else { "" };
        println!("{} {}{}  [{}]", marker, calendar.name, primary, calendar.id);
    }
    Ok(())
}

fn render_status(status: &ConnectionStatus) -> String {
    let mut out = String::new();

    let account = if !status.configured {
        "not configured (add a [google] section to config.toml)".to_string()
    } else if status.session_expired {
        "session expired, run `wellsync connect` again".to_string()
    } else if status.connected {
        let services: Vec<&str> = [(CALENDAR_SCOPE, "calendar"), (STORAGE_SCOPE, "storage")]
            .into_iter()
            .filter(|(scope, _)| status.granted_scopes.iter().any(|s| s == scope))
            .map(|(_, name)| name)
            .collect();
        format!("connected ({})", services.join(", "))
    } else {
        "not connected".to_string()
    };
    out.push_str(&format!("Google:      {}\n", account));

    if let Some(at) = status.connected_at {
        out.push_str(&format!("  since:     {}\n", local_time(at)));
    }
    if let Some(at) = status.last_validated {
        out.push_str(&format!("  validated: {}\n", local_time(at)));
    }
    if let Some(ref calendar) = status.calendar {
        out.push_str(&format!("Calendar:    {}\n", calendar.calendar_name));
    }

    for provider in &status.providers {
        out.push_str(&render_provider(provider));
    }
    out
}

fn render_provider(provider: &ProviderStatus) -> String {
    let name = provider.provider.display_name();
    if !provider.available {
        return format!("{:<12} not configured\n", format!("{}:", name));
    }
    let binding = &provider.binding;
    let last_sync = binding
        .last_sync_at
        .map(local_time)
        .unwrap_or_else(|| "never".to_string());
    format!(
        "{:<12} {} sync, last synced {}{}\n",
        format!("{}:", name),
        binding.sync_mode,
        last_sync,
        if binding.sync_on_startup {
            ", pulls on startup"
        } else {
            ""
        }
    )
}

fn local_time(at: DateTime<Utc>) -> String {
    at.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string()
}
