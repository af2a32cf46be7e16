//! Command-line interface definition.

use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use wellsync_cloud::{ProviderKind, ServiceScope, SyncMode};

/// wellsync - cloud connection and sync for the wellness journal
#[derive(Debug, Parser)]
#[command(name = "wellsync")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(long, short, env = "WELLSYNC_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable debug output
    #[arg(long, short = 'v')]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Connect the Google account for calendar, storage or both
    Connect {
        /// Service to grant access to
        #[arg(default_value = "both")]
        service: ServiceScope,
    },

    /// Disconnect the Google account
    Disconnect,

    /// Show connection and sync status
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// List calendars, optionally binding one
    Calendars {
        /// Calendar id to project events from
        #[arg(long)]
        select: Option<String>,
    },

    /// Show calendar events projected onto journal days
    Events {
        /// First day (YYYY-MM-DD), defaults to today
        #[arg(long)]
        from: Option<NaiveDate>,

        /// Last day, inclusive (YYYY-MM-DD), defaults to `--from`
        #[arg(long)]
        to: Option<NaiveDate>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Upload the journal snapshot
    Push {
        #[arg(long, default_value = "google-drive")]
        provider: ProviderKind,
    },

    /// Replace the journal with the remote snapshot
    Pull {
        #[arg(long, default_value = "google-drive")]
        provider: ProviderKind,
    },

    /// Check whether the remote snapshot is newer than the last sync
    Check {
        #[arg(long, default_value = "google-drive")]
        provider: ProviderKind,
    },

    /// Save the journal now: local backup file and auto-sync providers
    Save,

    /// Show or change sync preferences of a provider
    Prefs {
        #[arg(long)]
        provider: ProviderKind,

        /// When snapshots are pushed
        #[arg(long)]
        mode: Option<SyncMode>,

        /// Pull a newer remote snapshot on startup
        #[arg(long)]
        startup: Option<bool>,
    },

    /// Configuration commands
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Configuration actions.
#[derive(Debug, Subcommand)]
pub enum ConfigAction {
    /// Dump current configuration
    Dump,

    /// Validate configuration
    Validate,

    /// Show configuration and data paths
    Path,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_connect_scope() {
        let cli = Cli::try_parse_from(["wellsync", "connect", "calendar"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Connect {
                service: ServiceScope::Calendar
            }
        ));
    }

    #[test]
    fn connect_defaults_to_both() {
        let cli = Cli::try_parse_from(["wellsync", "connect"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Connect {
                service: ServiceScope::Both
            }
        ));
    }

    #[test]
    fn parses_event_window() {
        let cli = Cli::try_parse_from([
            "wellsync", "events", "--from", "2025-03-10", "--to", "2025-03-16", "--json",
        ])
        .unwrap();
        let Command::Events { from, to, json } = cli.command else {
            panic!("expected events command");
        };
        assert_eq!(from, NaiveDate::from_ymd_opt(2025, 3, 10));
        assert_eq!(to, NaiveDate::from_ymd_opt(2025, 3, 16));
        assert!(json);
    }

    #[test]
    fn parses_prefs() {
        let cli = Cli::try_parse_from([
            "wellsync", "prefs", "--provider", "webdav", "--mode", "auto", "--startup", "true",
        ])
        .unwrap();
        let Command::Prefs {
            provider,
            mode,
            startup,
        } = cli.command
        else {
            panic!("expected prefs command");
        };
        assert_eq!(provider, ProviderKind::Webdav);
        assert_eq!(mode, Some(SyncMode::Auto));
        assert_eq!(startup, Some(true));
    }

    #[test]
    fn push_defaults_to_drive() {
        let cli = Cli::try_parse_from(["wellsync", "push"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Push {
                provider: ProviderKind::GoogleDrive
            }
        ));
    }

    #[test]
    fn rejects_unknown_provider() {
        assert!(Cli::try_parse_from(["wellsync", "pull", "--provider", "dropbox"]).is_err());
    }
}
