//! Client configuration.
//!
//! All settings live in a single `config.toml` file at
//! `~/.config/wellsync/config.toml` by default.
//!
//! Credential values support secret references (see [`crate::secret`]):
//! - `pass::path/in/store` resolved via `pass show`
//! - `env::VAR_NAME` resolved from the environment
//! - plain text used as-is

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use wellsync_cloud::{CloudConfig, DEFAULT_SNAPSHOT_FILE_NAME, NotifyConfig};

// ---------------------------------------------------------------------------
// ClientConfig (config.toml)
// ---------------------------------------------------------------------------

/// Configuration for the wellsync client.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Google account settings (calendar and Drive).
    #[cfg(feature = "google")]
    pub google: Option<GoogleSettings>,

    /// WebDAV storage settings.
    #[cfg(feature = "webdav")]
    pub webdav: Option<WebDavSettings>,

    /// Snapshot and auto-save settings.
    pub sync: SyncSettings,

    /// Display settings.
    pub display: DisplaySettings,

    /// Notification settings.
    pub notifications: NotificationSettings,
}

/// Snapshot and auto-save settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// Name of the snapshot file on every storage backend.
    pub file_name: String,

    /// Quiet period before a burst of changes is saved.
    pub debounce_ms: u64,

    /// Local file that mirrors every auto-save (optional).
    pub local_file: Option<PathBuf>,

    /// Journal store; defaults to `journal.json` in the data directory.
    pub journal_path: Option<PathBuf>,

    /// Connection state; defaults to `connection.json` in the data directory.
    pub state_path: Option<PathBuf>,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            file_name: DEFAULT_SNAPSHOT_FILE_NAME.to_string(),
            debounce_ms: 2000,
            local_file: None,
            journal_path: None,
            state_path: None,
        }
    }
}

/// Display settings for output formatting.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplaySettings {
    /// Maximum title length (truncated with ellipsis).
    pub max_title_length: Option<usize>,

    /// Text to show when a window has no events.
    pub no_events_text: String,
}

impl Default for DisplaySettings {
    fn default() -> Self {
        Self {
            max_title_length: None,
            no_events_text: "No events".to_string(),
        }
    }
}

/// Notification settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationSettings {
    /// Show desktop notifications.
    pub enabled: bool,

    /// Notification timeout in seconds.
    pub timeout_secs: u32,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_secs: 10,
        }
    }
}

impl ClientConfig {
    /// Loads configuration from the default path.
    pub fn load() -> Result<Self, String> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Loads configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self, String> {
        let content =
            std::fs::read_to_string(path).map_err(|e| format!("failed to read config: {}", e))?;
        toml::from_str(&content).map_err(|e| format!("failed to parse config: {}", e))
    }

    /// Returns the default configuration file path.
    pub fn default_path() -> PathBuf {
        Self::default_config_dir().join("config.toml")
    }

    /// Returns the default configuration directory.
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("wellsync")
    }

    /// Returns the default data directory path.
    pub fn default_data_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("wellsync")
    }

    /// Path of the journal store.
    pub fn journal_path(&self) -> PathBuf {
        self.sync
            .journal_path
            .clone()
            .unwrap_or_else(|| Self::default_data_dir().join("journal.json"))
    }

    /// Builds the sync core configuration.
    pub fn cloud_config(&self) -> CloudConfig {
        let state_path = self
            .sync
            .state_path
            .clone()
            .unwrap_or_else(|| Self::default_data_dir().join("connection.json"));
        CloudConfig::new(state_path)
            .with_snapshot_file_name(&self.sync.file_name)
            .with_autosave_debounce(Duration::from_millis(self.sync.debounce_ms))
    }

    /// Builds the desktop notification configuration.
    pub fn notify_config(&self) -> NotifyConfig {
        NotifyConfig::default()
            .with_enabled(self.notifications.enabled)
            .with_timeout(self.notifications.timeout_secs)
    }

    /// Checks values that parse fine but cannot work.
    pub fn validate(&self) -> Result<(), String> {
        if self.sync.file_name.trim().is_empty() {
            return Err("[sync] file_name must not be empty".to_string());
        }
        if self.sync.file_name.contains('/') {
            return Err(format!(
                "[sync] file_name '{}' must be a bare file name",
                self.sync.file_name
            ));
        }
        if self.display.max_title_length == Some(0) {
            return Err("[display] max_title_length must be greater than zero".to_string());
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// GoogleSettings
// ---------------------------------------------------------------------------

/// Google account settings.
///
/// Credentials (`client_id`, `client_secret`) are stored inline and support
/// secret references (`pass::…`, `env::…`).
#[cfg(feature = "google")]
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GoogleSettings {
    /// OAuth client ID (supports `pass::` and `env::` prefixes).
    pub client_id: Option<String>,

    /// OAuth client secret (supports `pass::` and `env::` prefixes).
    pub client_secret: Option<String>,

    /// How long to wait for the browser consent, in seconds.
    pub consent_timeout_secs: Option<u64>,
}

#[cfg(feature = "google")]
impl GoogleSettings {
    /// Resolves credentials and builds the provider configuration.
    pub fn to_provider_config(&self) -> Result<wellsync_providers::google::GoogleConfig, String> {
        use wellsync_providers::google::GoogleConfig;

        let credentials = self.resolve_credentials()?;
        credentials.validate().map_err(|e| e.to_string())?;

        let mut config = GoogleConfig::new(credentials);
        if let Some(secs) = self.consent_timeout_secs {
            config = config.with_consent_timeout(Duration::from_secs(secs));
        }
        Ok(config)
    }

    /// Resolves the OAuth client from the inline fields.
    pub(crate) fn resolve_credentials(
        &self,
    ) -> Result<wellsync_providers::google::OAuthCredentials, String> {
        use wellsync_providers::google::OAuthCredentials;

        let raw_id = self.client_id.as_deref().ok_or_else(|| {
            format!(
                "Google OAuth client not found. Add to {}:\n  \
                 [google]\n  \
                 client_id = \"YOUR_ID.apps.googleusercontent.com\"\n  \
                 client_secret = \"YOUR_SECRET\"",
                ClientConfig::default_path().display()
            )
        })?;
        let raw_secret = self.client_secret.as_deref().ok_or_else(|| {
            "client_secret is missing from [google] section in config.toml".to_string()
        })?;

        let client_id = crate::secret::resolve(raw_id)
            .map_err(|e| format!("failed to resolve client_id: {}", e))?;
        let client_secret = crate::secret::resolve(raw_secret)
            .map_err(|e| format!("failed to resolve client_secret: {}", e))?;

        Ok(OAuthCredentials::new(client_id, client_secret))
    }
}

// ---------------------------------------------------------------------------
// WebDavSettings
// ---------------------------------------------------------------------------

/// WebDAV folder holding the snapshot.
#[cfg(feature = "webdav")]
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct WebDavSettings {
    /// Folder URL, e.g. `https://cloud.example.com/remote.php/dav/files/me/Journal/`.
    pub url: String,

    /// Username (supports `pass::` and `env::` prefixes).
    pub username: Option<String>,

    /// Password or app token (supports `pass::` and `env::` prefixes).
    pub password: Option<String>,

    /// Accept self-signed certificates.
    #[serde(default)]
    pub insecure_tls: bool,
}

#[cfg(feature = "webdav")]
impl WebDavSettings {
    /// Resolves credentials and builds the provider configuration.
    pub fn to_provider_config(&self) -> Result<wellsync_providers::webdav::WebDavConfig, String> {
        use wellsync_providers::webdav::WebDavConfig;

        let mut config = WebDavConfig::new(&self.url)
            .map_err(|e| format!("invalid [webdav] url '{}': {}", self.url, e))?;

        match (self.username.as_deref(), self.password.as_deref()) {
            (Some(username), Some(password)) => {
                let username = crate::secret::resolve(username)
                    .map_err(|e| format!("failed to resolve webdav username: {}", e))?;
                let password = crate::secret::resolve(password)
                    .map_err(|e| format!("failed to resolve webdav password: {}", e))?;
                config = config.with_credentials(username, password);
            }
            (None, None) => {}
            _ => {
                return Err(
                    "[webdav] username and password must be set together".to_string(),
                );
            }
        }

        if self.insecure_tls {
            config = config.with_insecure_tls();
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let config: ClientConfig = toml::from_str("").unwrap();
        assert_eq!(config.sync.file_name, DEFAULT_SNAPSHOT_FILE_NAME);
        assert_eq!(config.sync.debounce_ms, 2000);
        assert!(config.notifications.enabled);
        assert_eq!(config.display.no_events_text, "No events");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn sync_section_feeds_cloud_config() {
        let config: ClientConfig = toml::from_str(
            r#"
[sync]
file_name = "journal-backup.json"
debounce_ms = 500
state_path = "/tmp/wellsync-test/connection.json"
"#,
        )
        .unwrap();
        let cloud = config.cloud_config();
        assert_eq!(cloud.snapshot_file_name, "journal-backup.json");
        assert_eq!(cloud.autosave_debounce, Duration::from_millis(500));
        assert_eq!(
            cloud.state_path,
            PathBuf::from("/tmp/wellsync-test/connection.json")
        );
    }

    #[test]
    fn journal_path_defaults_to_data_dir() {
        let config = ClientConfig::default();
        assert!(config.journal_path().ends_with("wellsync/journal.json"));
    }

    #[test]
    fn validate_rejects_unusable_values() {
        let mut config = ClientConfig::default();
        config.sync.file_name = "  ".to_string();
        assert!(config.validate().is_err());

        config.sync.file_name = "backups/journal.json".to_string();
        assert!(config.validate().unwrap_err().contains("bare file name"));

        config.sync.file_name = "journal.json".to_string();
        config.display.max_title_length = Some(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn load_from_reports_parse_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[sync]\ndebounce_ms = \"soon\"\n").unwrap();
        let err = ClientConfig::load_from(&path).unwrap_err();
        assert!(err.contains("failed to parse config"));
    }

    #[test]
    fn load_from_missing_file_errors() {
        let dir = tempfile::tempdir().unwrap();
        let err = ClientConfig::load_from(&dir.path().join("absent.toml")).unwrap_err();
        assert!(err.contains("failed to read config"));
    }

    #[cfg(feature = "google")]
    mod google {
        use super::*;

        #[test]
        fn plain_credentials() {
            let settings = GoogleSettings {
                client_id: Some("test-id.apps.googleusercontent.com".to_string()),
                client_secret: Some("test-secret".to_string()),
                ..Default::default()
            };
            let creds = settings.resolve_credentials().unwrap();
            assert_eq!(creds.client_id, "test-id.apps.googleusercontent.com");
            assert_eq!(creds.client_secret, "test-secret");
        }

        #[test]
        fn env_references_in_toml() {
            unsafe {
                std::env::set_var("_WS_TOML_CLIENT_ID", "env-id.apps.googleusercontent.com");
                std::env::set_var("_WS_TOML_CLIENT_SECRET", "env-secret");
            }

            let config: ClientConfig = toml::from_str(
                r#"
[google]
client_id = "env::_WS_TOML_CLIENT_ID"
client_secret = "env::_WS_TOML_CLIENT_SECRET"
consent_timeout_secs = 60
"#,
            )
            .unwrap();
            let provider = config.google.unwrap().to_provider_config().unwrap();
            assert_eq!(
                provider.credentials.client_id,
                "env-id.apps.googleusercontent.com"
            );
            assert_eq!(provider.credentials.client_secret, "env-secret");
            assert_eq!(provider.consent_timeout, Duration::from_secs(60));

            unsafe {
                std::env::remove_var("_WS_TOML_CLIENT_ID");
                std::env::remove_var("_WS_TOML_CLIENT_SECRET");
            }
        }

        #[test]
        fn missing_client_id_points_at_config() {
            let settings = GoogleSettings {
                client_secret: Some("secret".to_string()),
                ..Default::default()
            };
            let err = settings.resolve_credentials().unwrap_err();
            assert!(err.contains("OAuth client not found"));
        }

        #[test]
        fn missing_secret_errors() {
            let settings = GoogleSettings {
                client_id: Some("id.apps.googleusercontent.com".to_string()),
                ..Default::default()
            };
            assert!(
                settings
                    .resolve_credentials()
                    .unwrap_err()
                    .contains("client_secret")
            );
        }

        #[test]
        fn bare_section_errors() {
            let config: ClientConfig = toml::from_str("[google]\n").unwrap();
            assert!(config.google.unwrap().resolve_credentials().is_err());
        }
    }

    #[cfg(feature = "webdav")]
    mod webdav {
        use super::*;

        #[test]
        fn credentials_and_tls() {
            let config: ClientConfig = toml::from_str(
                r#"
[webdav]
url = "https://nas.local/dav/journal"
username = "me"
password = "app-token"
insecure_tls = true
"#,
            )
            .unwrap();
            let provider = config.webdav.unwrap().to_provider_config().unwrap();
            assert_eq!(provider.url.as_str(), "https://nas.local/dav/journal/");
            assert!(provider.has_credentials());
            assert!(!provider.verify_tls);
        }

        #[test]
        fn anonymous_folder() {
            let settings = WebDavSettings {
                url: "https://nas.local/public/".to_string(),
                ..Default::default()
            };
            let provider = settings.to_provider_config().unwrap();
            assert!(!provider.has_credentials());
            assert!(provider.verify_tls);
        }

        #[test]
        fn half_credentials_rejected() {
            let settings = WebDavSettings {
                url: "https://nas.local/dav/".to_string(),
                username: Some("me".to_string()),
                ..Default::default()
            };
            assert!(
                settings
                    .to_provider_config()
                    .unwrap_err()
                    .contains("together")
            );
        }

        #[test]
        fn invalid_url_rejected() {
            let settings = WebDavSettings {
                url: "not a url".to_string(),
                ..Default::default()
            };
            assert!(settings.to_provider_config().unwrap_err().contains("invalid"));
        }
    }
}
