//! Sync core configuration.

use std::path::PathBuf;
use std::time::Duration;

use chrono::FixedOffset;
use wellsync_core::local_offset;

/// File name of the remote snapshot when none is configured.
pub const DEFAULT_SNAPSHOT_FILE_NAME: &str = "wellness-journal-backup.json";

/// Sync core configuration.
#[derive(Debug, Clone)]
pub struct CloudConfig {
    /// Where the connection state is persisted.
    pub state_path: PathBuf,

    /// Name of the snapshot file on every storage backend.
    pub snapshot_file_name: String,

    /// Interval between background token checks.
    pub refresh_interval: Duration,

    /// How long a validated token is trusted by on-demand operations.
    pub on_demand_freshness: Duration,

    /// Minimum time since the last validation before a visibility change
    /// triggers a check.
    pub visibility_freshness: Duration,

    /// Quiet period before a burst of mutations is persisted.
    pub autosave_debounce: Duration,

    /// Offset used to turn calendar days into UTC bounds.
    pub utc_offset: FixedOffset,
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            state_path: default_state_path(),
            snapshot_file_name: DEFAULT_SNAPSHOT_FILE_NAME.to_string(),
            refresh_interval: Duration::from_secs(15 * 60),
            on_demand_freshness: Duration::from_secs(5 * 60),
            visibility_freshness: Duration::from_secs(5 * 60),
            autosave_debounce: Duration::from_secs(2),
            utc_offset: local_offset(),
        }
    }
}

impl CloudConfig {
    /// Creates a configuration persisting state at `state_path`.
    pub fn new(state_path: impl Into<PathBuf>) -> Self {
        Self {
            state_path: state_path.into(),
            ..Default::default()
        }
    }

    /// Builder: set the snapshot file name.
    pub fn with_snapshot_file_name(mut self, name: impl Into<String>) -> Self {
        self.snapshot_file_name = name.into();
        self
    }

    /// Builder: set the background check interval.
    pub fn with_refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = interval;
        self
    }

    /// Builder: set both freshness windows.
    pub fn with_freshness(mut self, on_demand: Duration, visibility: Duration) -> Self {
        self.on_demand_freshness = on_demand;
        self.visibility_freshness = visibility;
        self
    }

    /// Builder: set the auto-save debounce.
    pub fn with_autosave_debounce(mut self, debounce: Duration) -> Self {
        self.autosave_debounce = debounce;
        self
    }

    /// Builder: set the offset for day boundaries.
    pub fn with_utc_offset(mut self, offset: FixedOffset) -> Self {
        self.utc_offset = offset;
        self
    }
}

/// Returns the default connection state path.
///
/// Uses `$XDG_DATA_HOME/wellsync/connection.json` (or the platform
/// equivalent), falling back to the working directory.
pub fn default_state_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("wellsync")
        .join("connection.json")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = CloudConfig::default();
        assert!(config.state_path.ends_with("wellsync/connection.json"));
        assert_eq!(config.snapshot_file_name, DEFAULT_SNAPSHOT_FILE_NAME);
        assert_eq!(config.refresh_interval, Duration::from_secs(900));
        assert_eq!(config.on_demand_freshness, Duration::from_secs(300));
        assert_eq!(config.visibility_freshness, Duration::from_secs(300));
        assert_eq!(config.autosave_debounce, Duration::from_secs(2));
    }

    #[test]
    fn custom_config() {
        let offset = FixedOffset::east_opt(3600).unwrap();
        let config = CloudConfig::new("/tmp/state.json")
            .with_snapshot_file_name("journal.json")
            .with_refresh_interval(Duration::from_secs(60))
            .with_freshness(Duration::from_secs(10), Duration::from_secs(20))
            .with_autosave_debounce(Duration::from_millis(500))
            .with_utc_offset(offset);

        assert_eq!(config.state_path, PathBuf::from("/tmp/state.json"));
        assert_eq!(config.snapshot_file_name, "journal.json");
        assert_eq!(config.refresh_interval, Duration::from_secs(60));
        assert_eq!(config.on_demand_freshness, Duration::from_secs(10));
        assert_eq!(config.visibility_freshness, Duration::from_secs(20));
        assert_eq!(config.autosave_debounce, Duration::from_millis(500));
        assert_eq!(config.utc_offset, offset);
    }
}
