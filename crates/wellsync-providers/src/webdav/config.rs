//! Connection settings for a WebDAV snapshot folder.

use std::fmt;
use std::time::Duration;

use url::Url;

/// Username plus password or app token. `Debug` hides the secret.
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Where the snapshot folder lives and how to reach it.
#[derive(Debug, Clone)]
pub struct WebDavConfig {
    /// Collection URL, normalised to end with `/`.
    pub url: Url,
    pub credentials: Option<Credentials>,
    /// `false` accepts self-signed NAS certificates.
    pub verify_tls: bool,
    pub timeout: Duration,
    pub user_agent: String,
}

impl WebDavConfig {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

    /// Parses the folder URL. A missing trailing slash is added so that
    /// [`WebDavConfig::file_url`] resolves inside the folder rather than
    /// next to it.
    pub fn new(url: impl AsRef<str>) -> Result<Self, url::ParseError> {
        let mut url = Url::parse(url.as_ref())?;
        if !url.path().ends_with('/') {
            let folder = format!("{}/", url.path());
            url.set_path(&folder);
        }
        Ok(Self {
            url,
            credentials: None,
            verify_tls: true,
            timeout: Self::DEFAULT_TIMEOUT,
            user_agent: concat!("wellsync/", env!("CARGO_PKG_VERSION")).to_string(),
        })
    }

    pub fn with_credentials(
        self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            credentials: Some(Credentials {
                username: username.into(),
                password: password.into(),
            }),
            ..self
        }
    }

    pub fn with_insecure_tls(self) -> Self {
        Self {
            verify_tls: false,
            ..self
        }
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        Self { timeout, ..self }
    }

    pub fn has_credentials(&self) -> bool {
        self.credentials.is_some()
    }

    /// URL of `file_name` inside the folder, percent-encoded.
    pub fn file_url(&self, file_name: &str) -> Result<Url, url::ParseError> {
        self.url.join(&urlencoding::encode(file_name))
    }
}
