//! [`IdentityProvider`] backed by Google OAuth.

use crate::error::ProviderResult;
use crate::provider::{BoxFuture, IdentityProvider};
use crate::token::{TokenGrant, TokenIntrospection};

use super::config::GoogleConfig;
use super::oauth::OAuthClient;

/// Google identity: PKCE consent, refresh grants and tokeninfo lookups.
#[derive(Debug)]
pub struct GoogleIdentity {
    oauth: OAuthClient,
}

impl GoogleIdentity {
    pub fn new(config: GoogleConfig) -> ProviderResult<Self> {
        Ok(Self {
            oauth: OAuthClient::new(config)?,
        })
    }
}

impl IdentityProvider for GoogleIdentity {
    fn authorize<'a>(&'a self, scopes: &'a [String]) -> BoxFuture<'a, ProviderResult<TokenGrant>> {
        Box::pin(self.oauth.authorize(scopes))
    }

    fn refresh<'a>(
        &'a self,
        refresh_token: &'a str,
    ) -> BoxFuture<'a, ProviderResult<Option<TokenGrant>>> {
        Box::pin(self.oauth.refresh(refresh_token))
    }

    fn introspect<'a>(
        &'a self,
        access_token: &'a str,
    ) -> BoxFuture<'a, ProviderResult<TokenIntrospection>> {
        Box::pin(self.oauth.introspect(access_token))
    }
}
