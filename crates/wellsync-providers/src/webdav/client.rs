//! HTTP client for WebDAV operations.
//!
//! Handles Basic and Digest authentication and the PROPFIND, GET and PUT
//! methods. A Digest challenge is cached after the first 401 so later
//! requests sign up front instead of paying a second round trip.

use std::sync::{Mutex, PoisonError};

use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, WWW_AUTHENTICATE};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use tracing::{debug, trace, warn};

use crate::error::{ProviderError, ProviderResult};

use super::auth::{DigestAuth, basic_auth};
use super::config::{Credentials, WebDavConfig};

const PROVIDER: &str = "webdav";

/// A request body and its content type.
#[derive(Debug, Clone, Copy)]
pub struct Body<'a> {
    pub content: &'a str,
    pub content_type: &'static str,
}

impl<'a> Body<'a> {
    pub fn xml(content: &'a str) -> Self {
        Self {
            content,
            content_type: "application/xml; charset=utf-8",
        }
    }

    pub fn json(content: &'a str) -> Self {
        Self {
            content,
            content_type: "application/json",
        }
    }
}

/// HTTP client for WebDAV operations.
#[derive(Debug)]
pub struct WebDavClient {
    client: Client,
    config: WebDavConfig,
    /// Cached digest challenge, shared by concurrent requests.
    digest_auth: Mutex<Option<DigestAuth>>,
}

impl WebDavClient {
    pub fn new(config: WebDavConfig) -> ProviderResult<Self> {
        let client = Client::builder()
            .danger_accept_invalid_certs(!config.verify_tls)
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| {
                ProviderError::configuration(format!("failed to create HTTP client: {}", e))
                    .with_provider(PROVIDER)
            })?;

        Ok(Self {
            client,
            config,
            digest_auth: Mutex::new(None),
        })
    }

    /// Performs a PROPFIND request and returns the multistatus body.
    pub async fn propfind(&self, url: &str, body: &str, depth: u8) -> ProviderResult<String> {
        self.request("PROPFIND", url, Some(Body::xml(body)), Some(depth))
            .await
    }

    /// Performs a GET request.
    pub async fn get(&self, url: &str) -> ProviderResult<String> {
        self.request("GET", url, None, None).await
    }

    /// Performs a PUT request, replacing the resource.
    pub async fn put(&self, url: &str, body: Body<'_>) -> ProviderResult<()> {
        self.request("PUT", url, Some(body), None).await.map(|_| ())
    }

    /// Returns the configuration.
    pub fn config(&self) -> &WebDavConfig {
        &self.config
    }

    /// Sends a request, answering one authentication challenge if needed.
    async fn request(
        &self,
        method: &str,
        url: &str,
        body: Option<Body<'_>>,
        depth: Option<u8>,
    ) -> ProviderResult<String> {
        let has_digest = self.cached_digest().is_some();
        if has_digest && self.config.has_credentials() {
            let response = self.send(method, url, body, depth, true).await?;
            if response.status() != StatusCode::UNAUTHORIZED {
                return handle_response(response).await;
            }
            // Stale nonce: fall through and take the fresh challenge.
            self.take_challenge(&response);
            let response = self.send(method, url, body, depth, true).await?;
            return handle_response(response).await;
        }

        let response = self.send(method, url, body, depth, false).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return handle_response(response).await;
        }

        if !self.config.has_credentials() {
            return Err(ProviderError::authentication(
                "server requires authentication but no credentials are configured",
            )
            .with_provider(PROVIDER));
        }

        debug!("received 401, retrying with credentials");
        self.take_challenge(&response);
        let response = self.send(method, url, body, depth, true).await?;
        handle_response(response).await
    }

    /// Stores a Digest challenge from a 401 response, if it carries one.
    fn take_challenge(&self, response: &Response) {
        let digest = response
            .headers()
            .get_all(WWW_AUTHENTICATE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .find_map(DigestAuth::parse);
        *self
            .digest_auth
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = digest;
    }

    fn cached_digest(&self) -> Option<DigestAuth> {
        self.digest_auth
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    async fn send(
        &self,
        method: &str,
        url: &str,
        body: Option<Body<'_>>,
        depth: Option<u8>,
        authenticated: bool,
    ) -> ProviderResult<Response> {
        let http_method = Method::from_bytes(method.as_bytes())
            .map_err(|_| ProviderError::internal(format!("invalid HTTP method: {}", method)))?;

        let mut request = self.client.request(http_method, url);

        if let Some(d) = depth {
            request = request.header("Depth", d.to_string());
        }
        if authenticated {
            request = self.authorize(request, method, url)?;
        }
        if let Some(b) = body {
            request = request
                .header(CONTENT_TYPE, b.content_type)
                .body(b.content.to_string());
        }

        trace!(method = %method, url = %url, authenticated, "sending request");

        request.send().await.map_err(|e| {
            ProviderError::network(format!("request failed: {}", e))
                .with_provider(PROVIDER)
                .with_source(e)
        })
    }

    fn authorize(
        &self,
        request: RequestBuilder,
        method: &str,
        url: &str,
    ) -> ProviderResult<RequestBuilder> {
        let Some(Credentials { username, password }) = &self.config.credentials else {
            return Err(ProviderError::authentication(
                "credentials required but not configured",
            )
            .with_provider(PROVIDER));
        };

        let uri_path = url::Url::parse(url)
            .map(|u| u.path().to_string())
            .unwrap_or_else(|_| url.to_string());

        let mut digest = self
            .digest_auth
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let header = match digest.as_mut() {
            Some(digest) => digest.authorize(method, &uri_path, username, password),
            None => basic_auth(username, password),
        };
        Ok(request.header(AUTHORIZATION, header))
    }
}

/// Maps the response status and extracts the body.
async fn handle_response(response: Response) -> ProviderResult<String> {
    let status = response.status();
    trace!(status = %status, "received response");

    let result = match status {
        StatusCode::OK | StatusCode::CREATED | StatusCode::NO_CONTENT | StatusCode::MULTI_STATUS => {
            return response.text().await.map_err(|e| {
                ProviderError::network(format!("failed to read response: {}", e))
                    .with_provider(PROVIDER)
            });
        }
        StatusCode::UNAUTHORIZED => Err(ProviderError::authentication(
            "authentication failed: invalid credentials",
        )),
        StatusCode::FORBIDDEN => Err(ProviderError::authorization("access denied")),
        StatusCode::NOT_FOUND => Err(ProviderError::not_found("resource not found")),
        StatusCode::CONFLICT => Err(ProviderError::bad_request(
            "parent folder does not exist on the server",
        )),
        StatusCode::TOO_MANY_REQUESTS => {
            Err(ProviderError::rate_limited("too many requests to server"))
        }
        s if s.is_server_error() => {
            let body = response.text().await.unwrap_or_default();
            Err(ProviderError::server(format!("server error ({}): {}", s, body)))
        }
        s => {
            let body = response.text().await.unwrap_or_default();
            warn!(status = %s, body = %body, "unexpected response status");
            Err(ProviderError::invalid_response(format!(
                "unexpected status {}: {}",
                s, body
            )))
        }
    };
    result.map_err(|e| e.with_provider(PROVIDER))
}
