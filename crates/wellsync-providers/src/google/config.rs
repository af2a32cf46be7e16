//! Settings shared by the Google identity, Calendar and Drive clients.

use std::ops::RangeInclusive;
use std::time::Duration;

use crate::{ProviderError, ProviderResult};

/// Read/write access to the user's calendars.
pub const CALENDAR_SCOPE: &str = "https://www.googleapis.com/auth/calendar";

/// Access limited to files this app created in Drive.
pub const DRIVE_FILE_SCOPE: &str = "https://www.googleapis.com/auth/drive.file";

const CLIENT_ID_SUFFIX: &str = ".apps.googleusercontent.com";

/// A "Desktop app" OAuth client from the Google Cloud console.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthCredentials {
    pub client_id: String,
    pub client_secret: String,
}

impl OAuthCredentials {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        }
    }

    pub fn validate(&self) -> Result<(), &'static str> {
        match (self.client_id.as_str(), self.client_secret.as_str()) {
            ("", _) => Err("client_id is required"),
            (id, _) if !id.ends_with(CLIENT_ID_SUFFIX) => {
                Err("client_id should end with .apps.googleusercontent.com")
            }
            (_, "") => Err("client_secret is required"),
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GoogleConfig {
    pub credentials: OAuthCredentials,
    /// Per-request HTTP timeout.
    pub timeout: Duration,
    pub user_agent: String,
    /// Ports tried, in order, for the consent redirect listener.
    pub loopback_ports: RangeInclusive<u16>,
    /// How long the user has to finish the consent page.
    pub consent_timeout: Duration,
}

impl GoogleConfig {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
    pub const DEFAULT_CONSENT_TIMEOUT: Duration = Duration::from_secs(300);

    pub fn new(credentials: OAuthCredentials) -> Self {
        Self {
            credentials,
            timeout: Self::DEFAULT_TIMEOUT,
            user_agent: concat!("wellsync/", env!("CARGO_PKG_VERSION")).to_string(),
            loopback_ports: 8080..=8090,
            consent_timeout: Self::DEFAULT_CONSENT_TIMEOUT,
        }
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        Self { timeout, ..self }
    }

    pub fn with_loopback_ports(self, loopback_ports: RangeInclusive<u16>) -> Self {
        Self {
            loopback_ports,
            ..self
        }
    }

    pub fn with_consent_timeout(self, consent_timeout: Duration) -> Self {
        Self {
            consent_timeout,
            ..self
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        self.credentials
            .validate()
            .map_err(|e| format!("invalid credentials: {}", e))?;
        if self.loopback_ports.is_empty() {
            return Err(format!(
                "empty loopback port range {}-{}",
                self.loopback_ports.start(),
                self.loopback_ports.end()
            ));
        }
        Ok(())
    }

    /// HTTP client carrying the timeout and user agent.
    pub(crate) fn http_client(&self) -> ProviderResult<reqwest::Client> {
        reqwest::Client::builder()
            .timeout(self.timeout)
            .user_agent(self.user_agent.as_str())
            .build()
            .map_err(|e| {
                ProviderError::configuration(format!("cannot build HTTP client: {}", e))
                    .with_source(e)
            })
    }
}
