//! Error taxonomy of the sync core.
//!
//! Provider and transport failures never leave this crate as-is: they are
//! folded into one of the [`CloudError`] kinds at the boundary so callers
//! only decide whether to show a notification.

use std::io;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use wellsync_providers::{ProviderError, ProviderErrorCode};

/// Result type for sync core operations.
pub type CloudResult<T> = Result<T, CloudError>;

/// Coarse classification of a [`CloudError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    AuthCancelled,
    AuthProvider,
    SessionExpired,
    Network,
    NotConfigured,
    Persistence,
}

impl ErrorKind {
    /// Returns true if errors of this kind are shown to the user.
    ///
    /// A dismissed consent screen and a feature used before setup are
    /// silent.
    pub fn is_user_visible(self) -> bool {
        !matches!(self, Self::AuthCancelled | Self::NotConfigured)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::AuthCancelled => "auth_cancelled",
            Self::AuthProvider => "auth_provider",
            Self::SessionExpired => "session_expired",
            Self::Network => "network",
            Self::NotConfigured => "not_configured",
            Self::Persistence => "persistence",
        }
    }
}

/// Errors reported by the sync core.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CloudError {
    /// The user dismissed the consent screen.
    #[error("sign-in was cancelled")]
    AuthCancelled,

    /// The provider rejected a request.
    #[error("provider error: {message}")]
    AuthProvider { message: String },

    /// The token is invalid and could not be refreshed silently.
    #[error("session expired, reconnect to continue")]
    SessionExpired,

    /// Transient I/O failure talking to a provider.
    #[error("network error: {message}")]
    Network { message: String },

    /// A feature was used before it was set up.
    #[error("not configured: {message}")]
    NotConfigured { message: String },

    /// Local state or file I/O failed.
    #[error("persistence error: {message}")]
    Persistence { message: String },
}

impl CloudError {
    pub fn auth_provider(message: impl Into<String>) -> Self {
        Self::AuthProvider {
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    pub fn not_configured(message: impl Into<String>) -> Self {
        Self::NotConfigured {
            message: message.into(),
        }
    }

    pub fn persistence(message: impl Into<String>) -> Self {
        Self::Persistence {
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::AuthCancelled => ErrorKind::AuthCancelled,
            Self::AuthProvider { .. } => ErrorKind::AuthProvider,
            Self::SessionExpired => ErrorKind::SessionExpired,
            Self::Network { .. } => ErrorKind::Network,
            Self::NotConfigured { .. } => ErrorKind::NotConfigured,
            Self::Persistence { .. } => ErrorKind::Persistence,
        }
    }

    /// Returns true if this error should produce a notification.
    pub fn is_user_visible(&self) -> bool {
        self.kind().is_user_visible()
    }

    /// Converts a failure of an interactive consent flow.
    ///
    /// Unlike the general conversion, a rejected credential here is the
    /// provider refusing the grant, not an expired session.
    pub fn from_sign_in(err: ProviderError) -> Self {
        match err.code() {
            ProviderErrorCode::Cancelled => Self::AuthCancelled,
            ProviderErrorCode::ConfigurationError => Self::not_configured(err.message()),
            code if code.is_retryable() => Self::network(err.to_string()),
            _ => Self::auth_provider(err.to_string()),
        }
    }
}

impl From<ProviderError> for CloudError {
    fn from(err: ProviderError) -> Self {
        match err.code() {
            ProviderErrorCode::Cancelled => Self::AuthCancelled,
            ProviderErrorCode::AuthenticationFailed => Self::SessionExpired,
            ProviderErrorCode::ConfigurationError => Self::not_configured(err.message()),
            code if code.is_retryable() => Self::network(err.to_string()),
            _ => Self::auth_provider(err.to_string()),
        }
    }
}

impl From<io::Error> for CloudError {
    fn from(err: io::Error) -> Self {
        Self::persistence(err.to_string())
    }
}

impl From<serde_json::Error> for CloudError {
    fn from(err: serde_json::Error) -> Self {
        Self::persistence(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancelled_and_unconfigured_are_silent() {
        assert!(!CloudError::AuthCancelled.is_user_visible());
        assert!(!CloudError::not_configured("no calendar").is_user_visible());
        assert!(CloudError::auth_provider("denied").is_user_visible());
        assert!(CloudError::SessionExpired.is_user_visible());
        assert!(CloudError::network("timeout").is_user_visible());
        assert!(CloudError::persistence("disk full").is_user_visible());
    }

    #[test]
    fn provider_errors_fold_into_kinds() {
        let cases = [
            (ProviderError::cancelled("closed"), ErrorKind::AuthCancelled),
            (ProviderError::authentication("401"), ErrorKind::SessionExpired),
            (ProviderError::network("dns"), ErrorKind::Network),
            (ProviderError::rate_limited("slow down"), ErrorKind::Network),
            (ProviderError::server("502"), ErrorKind::Network),
            (ProviderError::authorization("403"), ErrorKind::AuthProvider),
            (ProviderError::configuration("no client id"), ErrorKind::NotConfigured),
        ];
        for (err, kind) in cases {
            assert_eq!(CloudError::from(err).kind(), kind);
        }
    }

    #[test]
    fn rejected_consent_is_a_provider_error() {
        let err = CloudError::from_sign_in(ProviderError::authentication("invalid_client"));
        assert_eq!(err.kind(), ErrorKind::AuthProvider);

        let err = CloudError::from_sign_in(ProviderError::cancelled("access_denied"));
        assert_eq!(err, CloudError::AuthCancelled);
    }

    #[test]
    fn kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::SessionExpired).unwrap();
        assert_eq!(json, "\"session_expired\"");
    }
}
