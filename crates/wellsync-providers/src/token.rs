//! OAuth token values exchanged between identity providers and API clients.

use std::sync::{PoisonError, RwLock};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ProviderError, ProviderResult};

/// The result of a successful authorization or refresh grant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenGrant {
    /// The bearer token for API requests.
    pub access_token: String,

    /// Long-lived credential for silent re-authorization, when issued.
    pub refresh_token: Option<String>,

    /// When the access token expires.
    pub expires_at: Option<DateTime<Utc>>,

    /// Scopes the provider reports as granted to this token.
    pub scopes: Vec<String>,
}

impl TokenGrant {
    /// Creates a grant from raw token-endpoint fields.
    ///
    /// `scope` is the space-delimited list returned by the endpoint. When the
    /// endpoint omits it, `requested` is used instead.
    pub fn from_response(
        access_token: impl Into<String>,
        refresh_token: Option<String>,
        expires_in_secs: Option<i64>,
        scope: Option<&str>,
        requested: &[String],
    ) -> Self {
        let scopes = match scope {
            Some(scope) if !scope.trim().is_empty() => parse_scopes(scope),
            _ => requested.to_vec(),
        };
        Self {
            access_token: access_token.into(),
            refresh_token,
            expires_at: expires_in_secs.map(|secs| Utc::now() + Duration::seconds(secs)),
            scopes,
        }
    }
}

/// What the identity provider reports about a live access token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenIntrospection {
    /// Scopes actually attached to the token.
    pub scopes: Vec<String>,
    /// When the token stops being accepted.
    pub expires_at: Option<DateTime<Utc>>,
}

impl TokenIntrospection {
    /// Returns true if the token has already expired.
    pub fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| at <= Utc::now())
    }
}

/// Splits a space-delimited OAuth scope string.
pub fn parse_scopes(scope: &str) -> Vec<String> {
    scope.split_whitespace().map(str::to_string).collect()
}

/// Holds the bearer token an API client attaches to its requests.
///
/// API clients own one of these and expose it through
/// [`TokenSink`](crate::TokenSink) so the session can push every new token
/// to every client.
#[derive(Debug, Default)]
pub struct BearerToken {
    inner: RwLock<Option<String>>,
}

impl BearerToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the installed token, if any.
    pub fn get(&self) -> Option<String> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Returns the installed token or an authentication error.
    pub fn require(&self) -> ProviderResult<String> {
        self.get()
            .ok_or_else(|| ProviderError::authentication("no access token installed"))
    }

    pub fn set(&self, token: &str) {
        *self.inner.write().unwrap_or_else(PoisonError::into_inner) = Some(token.to_string());
    }

    pub fn clear(&self) {
        *self.inner.write().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grant_uses_reported_scopes() {
        let grant = TokenGrant::from_response(
            "at",
            Some("rt".to_string()),
            Some(3600),
            Some("openid https://www.googleapis.com/auth/calendar"),
            &["ignored".to_string()],
        );
        assert_eq!(
            grant.scopes,
            vec!["openid", "https://www.googleapis.com/auth/calendar"]
        );
        assert!(grant.expires_at.is_some_and(|at| at > Utc::now()));
    }

    #[test]
    fn grant_falls_back_to_requested_scopes() {
        let requested = vec!["https://www.googleapis.com/auth/drive.file".to_string()];
        let grant = TokenGrant::from_response("at", None, None, Some("  "), &requested);
        assert_eq!(grant.scopes, requested);
        assert!(grant.expires_at.is_none());
    }

    #[test]
    fn introspection_expiry() {
        let live = TokenIntrospection {
            scopes: vec![],
            expires_at: Some(Utc::now() + Duration::minutes(10)),
        };
        assert!(!live.is_expired());

        let dead = TokenIntrospection {
            scopes: vec![],
            expires_at: Some(Utc::now() - Duration::seconds(1)),
        };
        assert!(dead.is_expired());
    }

    #[test]
    fn bearer_token_lifecycle() {
        let bearer = BearerToken::new();
        assert!(bearer.require().unwrap_err().is_auth_failure());

        bearer.set("first");
        bearer.set("second");
        assert_eq!(bearer.get().as_deref(), Some("second"));

        bearer.clear();
        assert!(bearer.get().is_none());
    }
}
