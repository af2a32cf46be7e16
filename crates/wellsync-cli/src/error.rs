//! Client error types.

use std::fmt;
use std::process::ExitCode;

use wellsync_cloud::{CloudError, ErrorKind};

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors that can occur in the client.
#[derive(Debug)]
pub enum ClientError {
    /// Configuration error.
    Config(String),
    /// Provider setup error.
    Provider(String),
    /// Sync core error.
    Cloud(CloudError),
    /// A push or pull failed.
    Sync {
        message: String,
        kind: Option<ErrorKind>,
    },
    /// IO error.
    Io(std::io::Error),
    /// Output could not be rendered.
    Output(String),
}

impl ClientError {
    /// Process exit status, following `sysexits.h` where one fits.
    pub fn code(&self) -> u8 {
        match self {
            Self::Config(_) => 78,
            Self::Provider(_) => 78,
            Self::Cloud(err) => kind_code(err.kind()),
            Self::Sync { kind, .. } => kind.map_or(1, kind_code),
            Self::Io(_) => 74,
            Self::Output(_) => 1,
        }
    }

    pub fn exit_code(&self) -> ExitCode {
        ExitCode::from(self.code())
    }
}

fn kind_code(kind: ErrorKind) -> u8 {
    match kind {
        ErrorKind::NotConfigured => 78,
        ErrorKind::AuthProvider | ErrorKind::SessionExpired => 77,
        ErrorKind::Network => 69,
        ErrorKind::Persistence => 74,
        ErrorKind::AuthCancelled => 1,
    }
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "configuration error: {}", msg),
            Self::Provider(msg) => write!(f, "provider error: {}", msg),
            Self::Cloud(err) => write!(f, "{}", err),
            Self::Sync { message, .. } => write!(f, "sync failed: {}", message),
            Self::Io(err) => write!(f, "IO error: {}", err),
            Self::Output(msg) => write!(f, "output error: {}", msg),
        }
    }
}

impl std::error::Error for ClientError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::Cloud(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ClientError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<CloudError> for ClientError {
    fn from(err: CloudError) -> Self {
        Self::Cloud(err)
    }
}

impl From<wellsync_providers::ProviderError> for ClientError {
    fn from(err: wellsync_providers::ProviderError) -> Self {
        Self::Provider(err.to_string())
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        Self::Output(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cloud_errors_map_to_exit_codes() {
        let cases = [
            (CloudError::SessionExpired, 77),
            (CloudError::network("timed out"), 69),
            (CloudError::not_configured("no client"), 78),
            (CloudError::AuthCancelled, 1),
        ];
        for (err, code) in cases {
            assert_eq!(ClientError::from(err).code(), code);
        }
    }

    #[test]
    fn sync_failure_uses_its_kind() {
        let err = ClientError::Sync {
            message: "offline".into(),
            kind: Some(ErrorKind::Network),
        };
        assert_eq!(err.code(), 69);
        assert_eq!(err.to_string(), "sync failed: offline");
    }

    #[test]
    fn display_keeps_cloud_message() {
        let err = ClientError::from(CloudError::SessionExpired);
        assert_eq!(err.to_string(), "session expired, reconnect to continue");
        assert_eq!(
            ClientError::Config("bad".into()).to_string(),
            "configuration error: bad"
        );
    }
}
