//! Failures reported by identity, calendar and storage providers.
//!
//! Every remote call in this crate (OAuth endpoints, Calendar API, Drive
//! API, WebDAV) fails with a [`ProviderError`]. The sync core only looks at
//! the [`ProviderErrorCode`] to choose between refreshing the token,
//! retrying later and giving up.

use std::error::Error as StdError;
use std::fmt;

use thiserror::Error;

/// What went wrong, independent of the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderErrorCode {
    /// 401, or a token the provider no longer accepts.
    AuthenticationFailed,
    /// 403.
    AuthorizationFailed,
    /// The user dismissed the consent screen.
    Cancelled,
    NetworkError,
    /// 429.
    RateLimited,
    /// 5xx.
    ServerError,
    /// A body that could not be parsed.
    InvalidResponse,
    /// 404.
    NotFound,
    /// 400 or 409.
    BadRequest,
    /// Missing or invalid client setup.
    ConfigurationError,
    InternalError,
}

impl ProviderErrorCode {
    /// Transient failures: the same request may succeed later.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::NetworkError | Self::RateLimited | Self::ServerError
        )
    }

    /// The bearer credential was rejected; a refreshed token may succeed.
    pub fn is_auth_failure(self) -> bool {
        self == Self::AuthenticationFailed
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::AuthenticationFailed => "authentication_failed",
            Self::AuthorizationFailed => "authorization_failed",
            Self::Cancelled => "cancelled",
            Self::NetworkError => "network_error",
            Self::RateLimited => "rate_limited",
            Self::ServerError => "server_error",
            Self::InvalidResponse => "invalid_response",
            Self::NotFound => "not_found",
            Self::BadRequest => "bad_request",
            Self::ConfigurationError => "configuration_error",
            Self::InternalError => "internal_error",
        }
    }
}

impl fmt::Display for ProviderErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed call to a remote provider.
#[derive(Debug, Error)]
#[error("{}{code}: {message}", provider_prefix(.provider.as_deref()))]
pub struct ProviderError {
    code: ProviderErrorCode,
    message: String,
    /// Backend name such as `google-drive` or `webdav`.
    provider: Option<String>,
    #[source]
    source: Option<Box<dyn StdError + Send + Sync>>,
}

fn provider_prefix(provider: Option<&str>) -> String {
    provider.map(|p| format!("[{}] ", p)).unwrap_or_default()
}

macro_rules! code_constructors {
    ($($name:ident => $code:ident),* $(,)?) => {
        $(
            pub fn $name(message: impl Into<String>) -> Self {
                Self::new(ProviderErrorCode::$code, message)
            }
        )*
    };
}

impl ProviderError {
    pub fn new(code: ProviderErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            provider: None,
            source: None,
        }
    }

    code_constructors! {
        authentication => AuthenticationFailed,
        authorization => AuthorizationFailed,
        cancelled => Cancelled,
        network => NetworkError,
        rate_limited => RateLimited,
        server => ServerError,
        invalid_response => InvalidResponse,
        not_found => NotFound,
        bad_request => BadRequest,
        configuration => ConfigurationError,
        internal => InternalError,
    }

    /// Tags the error with the backend that produced it.
    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    /// Keeps the underlying transport or parse error.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        self.source = Some(Box::new(source));
        self
    }

    pub fn code(&self) -> ProviderErrorCode {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn provider(&self) -> Option<&str> {
        self.provider.as_deref()
    }

    pub fn is_retryable(&self) -> bool {
        self.code.is_retryable()
    }

    pub fn is_auth_failure(&self) -> bool {
        self.code.is_auth_failure()
    }

    pub fn is_not_found(&self) -> bool {
        self.code == ProviderErrorCode::NotFound
    }
}

/// Result type for provider operations.
pub type ProviderResult<T> = Result<T, ProviderError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_codes() {
        let retryable: Vec<_> = [
            ProviderErrorCode::NetworkError,
            ProviderErrorCode::RateLimited,
            ProviderErrorCode::ServerError,
            ProviderErrorCode::AuthenticationFailed,
            ProviderErrorCode::Cancelled,
            ProviderErrorCode::NotFound,
        ]
        .into_iter()
        .filter(|c| c.is_retryable())
        .collect();
        assert_eq!(
            retryable,
            vec![
                ProviderErrorCode::NetworkError,
                ProviderErrorCode::RateLimited,
                ProviderErrorCode::ServerError,
            ]
        );
    }

    #[test]
    fn rejected_token_is_the_only_auth_failure() {
        assert!(ProviderError::authentication("401").is_auth_failure());
        assert!(!ProviderError::authorization("403").is_auth_failure());
        assert!(!ProviderError::cancelled("access_denied").is_auth_failure());
    }

    #[test]
    fn missing_snapshot_is_not_found() {
        let err = ProviderError::not_found("no such file").with_provider("google-drive");
        assert!(err.is_not_found());
        assert!(!err.is_retryable());
        assert_eq!(err.provider(), Some("google-drive"));
        assert_eq!(err.message(), "no such file");
    }

    #[test]
    fn display_includes_backend_and_code() {
        let err = ProviderError::rate_limited("slow down").with_provider("webdav");
        assert_eq!(err.to_string(), "[webdav] rate_limited: slow down");

        let err = ProviderError::configuration("client_id is empty");
        assert_eq!(err.to_string(), "configuration_error: client_id is empty");
    }

    #[test]
    fn keeps_transport_source() {
        use std::error::Error;
        let io_err = std::io::Error::other("connection reset");
        let err = ProviderError::network("upload interrupted").with_source(io_err);
        assert_eq!(err.source().map(|s| s.to_string()).as_deref(), Some("connection reset"));
    }
}
