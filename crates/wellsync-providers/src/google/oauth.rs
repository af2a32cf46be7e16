//! OAuth 2.0 PKCE flow for Google identity.
//!
//! Implements the Authorization Code flow with PKCE using a loopback
//! redirect, plus the refresh-token grant and token introspection used for
//! silent re-authorization.
//!
//! # Flow Overview
//!
//! 1. Generate a code verifier and its SHA-256 challenge
//! 2. Bind a local HTTP listener on a port from the configured range
//! 3. Open the browser on Google's consent page for the requested scopes
//! 4. Google redirects to the listener with an authorization code
//! 5. Exchange the code (with verifier) for access and refresh tokens

use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::ops::RangeInclusive;
use std::io::ErrorKind;
use std::thread;
use std::time::{Duration, Instant};

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::Rng as _;
use reqwest::StatusCode;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::{debug, error, info, warn};

use crate::error::{ProviderError, ProviderResult};
use crate::token::{TokenGrant, TokenIntrospection, parse_scopes};

use super::config::GoogleConfig;

const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const GOOGLE_TOKENINFO_URL: &str = "https://oauth2.googleapis.com/tokeninfo";

/// Random bytes behind the PKCE verifier; 43 characters once encoded.
const CODE_VERIFIER_LENGTH: usize = 32;
const STATE_LENGTH: usize = 16;

const PROVIDER: &str = "google";

const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(50);
const CALLBACK_READ_TIMEOUT: Duration = Duration::from_secs(5);

/// OAuth client for Google identity endpoints.
#[derive(Debug)]
pub struct OAuthClient {
    config: GoogleConfig,
    http_client: reqwest::Client,
}

impl OAuthClient {
    pub fn new(config: GoogleConfig) -> ProviderResult<Self> {
        config.validate().map_err(ProviderError::configuration)?;
        let http_client = config.http_client()?;
        Ok(Self {
            config,
            http_client,
        })
    }

    /// Runs the interactive consent flow for `scopes`.
    ///
    /// # Errors
    ///
    /// - `Cancelled` if the user denies consent
    /// - `AuthenticationFailed` on state mismatch, timeout or a rejected exchange
    /// - `ConfigurationError` if no loopback port is free
    pub async fn authorize(&self, scopes: &[String]) -> ProviderResult<TokenGrant> {
        let pkce = PkceFlow::new();

        let (listener, port) = Self::bind_loopback_server(self.config.loopback_ports.clone())?;
        let redirect_uri = format!("http://127.0.0.1:{}/callback", port);
        let auth_url = pkce.build_auth_url(&self.config.credentials.client_id, &redirect_uri, scopes);

        info!(scopes = %scopes.join(" "), "starting OAuth consent flow");
        debug!("authorization URL: {}", auth_url);

        if let Err(e) = open::that(&auth_url) {
            warn!("failed to open browser: {}", e);
            eprintln!("\nOpen this URL in your browser to continue:\n\n{}\n", auth_url);
        }

        let timeout = self.config.consent_timeout;
        let (code, received_state) =
            tokio::task::spawn_blocking(move || Self::wait_for_callback(listener, timeout))
                .await
                .map_err(|e| ProviderError::internal(format!("callback listener failed: {}", e)))??;

        if received_state != pkce.state {
            return Err(ProviderError::authentication(
                "OAuth state mismatch - possible CSRF attack",
            )
            .with_provider(PROVIDER));
        }

        debug!("received authorization code, exchanging for tokens");
        self.exchange_code(&code, &pkce.verifier, &redirect_uri, scopes)
            .await
    }

    /// Exchanges a refresh token for a new access token.
    ///
    /// Returns `Ok(None)` when Google rejects the refresh token (revoked,
    /// expired or issued to another client).
    pub async fn refresh(&self, refresh_token: &str) -> ProviderResult<Option<TokenGrant>> {
        let credentials = &self.config.credentials;
        let params = [
            ("client_id", credentials.client_id.as_str()),
            ("client_secret", credentials.client_secret.as_str()),
            ("refresh_token", refresh_token),
            ("grant_type", "refresh_token"),
        ];

        let (status, body) = self.post_token_endpoint(&params, "token refresh").await?;

        if status == StatusCode::BAD_REQUEST || status == StatusCode::UNAUTHORIZED {
            info!(%status, "refresh token rejected");
            debug!("refresh rejection body: {}", body);
            return Ok(None);
        }
        if !status.is_success() {
            return Err(status_error(status, &body, "token refresh"));
        }

        let response: TokenResponse = parse_json(&body, "token response")?;
        let mut grant = TokenGrant::from_response(
            response.access_token,
            response.refresh_token,
            response.expires_in,
            response.scope.as_deref(),
            &[],
        );
        // Google omits the refresh token on refresh grants; keep the one we used.
        if grant.refresh_token.is_none() {
            grant.refresh_token = Some(refresh_token.to_string());
        }
        debug!("refreshed access token");
        Ok(Some(grant))
    }

    /// Asks Google's tokeninfo endpoint about `access_token`.
    pub async fn introspect(&self, access_token: &str) -> ProviderResult<TokenIntrospection> {
        let response = self
            .http_client
            .get(GOOGLE_TOKENINFO_URL)
            .query(&[("access_token", access_token)])
            .send()
            .await
            .map_err(|e| network_error("token introspection", e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| network_error("token introspection", e))?;

        if status == StatusCode::BAD_REQUEST || status == StatusCode::UNAUTHORIZED {
            return Err(
                ProviderError::authentication("access token is no longer valid")
                    .with_provider(PROVIDER),
            );
        }
        if !status.is_success() {
            return Err(status_error(status, &body, "token introspection"));
        }

        let info: TokenInfoResponse = parse_json(&body, "tokeninfo response")?;
        Ok(TokenIntrospection {
            scopes: info.scope.as_deref().map(parse_scopes).unwrap_or_default(),
            expires_at: info
                .expires_in_secs()
                .map(|secs| chrono::Utc::now() + chrono::Duration::seconds(secs)),
        })
    }

    async fn exchange_code(
        &self,
        code: &str,
        verifier: &str,
        redirect_uri: &str,
        scopes: &[String],
    ) -> ProviderResult<TokenGrant> {
        let credentials = &self.config.credentials;
        let params = [
            ("client_id", credentials.client_id.as_str()),
            ("client_secret", credentials.client_secret.as_str()),
            ("code", code),
            ("code_verifier", verifier),
            ("grant_type", "authorization_code"),
            ("redirect_uri", redirect_uri),
        ];

        let (status, body) = self.post_token_endpoint(&params, "token exchange").await?;
        if !status.is_success() {
            return Err(ProviderError::authentication(format!(
                "token exchange failed ({}): {}",
                status, body
            ))
            .with_provider(PROVIDER));
        }

        let response: TokenResponse = parse_json(&body, "token response")?;
        info!("obtained tokens from consent flow");
        Ok(TokenGrant::from_response(
            response.access_token,
            response.refresh_token,
            response.expires_in,
            response.scope.as_deref(),
            scopes,
        ))
    }

    async fn post_token_endpoint(
        &self,
        params: &[(&str, &str)],
        what: &str,
    ) -> ProviderResult<(StatusCode, String)> {
        let response = self
            .http_client
            .post(GOOGLE_TOKEN_URL)
            .form(params)
            .send()
            .await
            .map_err(|e| network_error(what, e))?;

        let status = response.status();
        let body = response.text().await.map_err(|e| network_error(what, e))?;
        Ok((status, body))
    }

    /// Tries to bind a TCP listener on an available port in the given range.
    fn bind_loopback_server(ports: RangeInclusive<u16>) -> ProviderResult<(TcpListener, u16)> {
        let (first, last) = (*ports.start(), *ports.end());
        ports
            .into_iter()
            .find_map(|port| {
                let listener = TcpListener::bind(("127.0.0.1", port)).ok()?;
                debug!(port, "consent listener bound");
                Some((listener, port))
            })
            .ok_or_else(|| {
                ProviderError::configuration(format!(
                    "no free loopback port in {}-{}",
                    first, last
                ))
            })
    }

    /// Blocks until the consent redirect arrives or `timeout` elapses.
    ///
    /// The listener is polled on the calling thread and dropped on return,
    /// so the port is free again whatever the outcome.
    fn wait_for_callback(
        listener: TcpListener,
        timeout: Duration,
    ) -> ProviderResult<(String, String)> {
        listener.set_nonblocking(true).map_err(|e| {
            ProviderError::internal(format!("cannot poll consent listener: {}", e)).with_source(e)
        })?;
        let deadline = Instant::now() + timeout;

        loop {
            match listener.accept() {
                Ok((stream, _)) => {
                    let _ = stream.set_nonblocking(false);
                    let _ = stream.set_read_timeout(Some(CALLBACK_READ_TIMEOUT));
                    if let Some(result) = handle_callback(stream) {
                        return result;
                    }
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => {}
                Err(e) => error!("failed to accept connection: {}", e),
            }
            if Instant::now() >= deadline {
                return Err(ProviderError::authentication(
                    "timed out waiting for the consent page",
                )
                .with_provider(PROVIDER));
            }
            thread::sleep(ACCEPT_POLL_INTERVAL);
        }
    }
}

/// Parses the redirect request and answers the browser.
///
/// Returns `None` for requests that are not the OAuth callback (favicon
/// probes and the like) so the listener keeps waiting.
fn handle_callback(mut stream: TcpStream) -> Option<ProviderResult<(String, String)>> {
    let mut request_line = String::new();
    BufReader::new(&stream).read_line(&mut request_line).ok()?;

    // GET /callback?code=...&state=... HTTP/1.1
    let mut parts = request_line.split_whitespace();
    if parts.next() != Some("GET") {
        return None;
    }
    let path = parts.next()?;
    let query = path.strip_prefix("/callback")?.trim_start_matches('?');

    let outcome = parse_callback_query(query);

    let response = if outcome.is_ok() {
        "HTTP/1.1 200 OK\r\nContent-Type: text/html\r\n\r\n\
        <html><body><h1>Connected</h1>\
        <p>You can close this window and return to your journal.</p></body></html>"
    } else {
        "HTTP/1.1 400 Bad Request\r\nContent-Type: text/html\r\n\r\n\
        <html><body><h1>Authorization was not completed</h1>\
        <p>You can close this window.</p></body></html>"
    };
    let _ = stream.write_all(response.as_bytes());
    let _ = stream.flush();

    Some(outcome)
}

/// Extracts `(code, state)` from the callback query string.
fn parse_callback_query(query: &str) -> ProviderResult<(String, String)> {
    let mut code = None;
    let mut state = None;
    let mut error = None;

    for param in query.split('&') {
        let Some((key, value)) = param.split_once('=') else {
            continue;
        };
        let value = urlencoding::decode(value).unwrap_or_default().into_owned();
        match key {
            "code" => code = Some(value),
            "state" => state = Some(value),
            "error" => error = Some(value),
            _ => {}
        }
    }

    match (error, code) {
        (Some(error), _) if error == "access_denied" => Err(ProviderError::cancelled(
            "consent was denied or dismissed",
        )
        .with_provider(PROVIDER)),
        (Some(error), _) => Err(ProviderError::authentication(format!(
            "authorization failed: {}",
            error
        ))
        .with_provider(PROVIDER)),
        (None, Some(code)) => Ok((code, state.unwrap_or_default())),
        (None, None) => Err(ProviderError::authentication(
            "missing authorization code in callback",
        )),
    }
}

fn network_error(what: &str, e: reqwest::Error) -> ProviderError {
    ProviderError::network(format!("{} request failed: {}", what, e))
        .with_provider(PROVIDER)
        .with_source(e)
}

fn status_error(status: StatusCode, body: &str, what: &str) -> ProviderError {
    let message = format!("{} failed ({}): {}", what, status, body);
    let error = if status.is_server_error() {
        ProviderError::server(message)
    } else if status == StatusCode::TOO_MANY_REQUESTS {
        ProviderError::rate_limited(message)
    } else {
        ProviderError::bad_request(message)
    };
    error.with_provider(PROVIDER)
}

fn parse_json<T: for<'de> Deserialize<'de>>(body: &str, what: &str) -> ProviderResult<T> {
    serde_json::from_str(body).map_err(|e| {
        ProviderError::invalid_response(format!("invalid {}: {}", what, e)).with_provider(PROVIDER)
    })
}

/// One consent attempt under RFC 7636: a fresh verifier, its S256
/// challenge and an anti-forgery `state`.
#[derive(Debug)]
pub struct PkceFlow {
    pub verifier: String,
    pub challenge: String,
    pub state: String,
}

impl PkceFlow {
    pub fn new() -> Self {
        let verifier = random_token(CODE_VERIFIER_LENGTH);
        Self {
            challenge: s256_challenge(&verifier),
            verifier,
            state: random_token(STATE_LENGTH),
        }
    }

    /// Consent page URL. Asks for offline access so a refresh token comes
    /// back, and for incremental consent so adding the Drive scope later
    /// keeps the calendar grant.
    pub fn build_auth_url(&self, client_id: &str, redirect_uri: &str, scopes: &[String]) -> String {
        let scope = scopes.join(" ");
        let query: Vec<String> = [
            ("client_id", client_id),
            ("redirect_uri", redirect_uri),
            ("response_type", "code"),
            ("scope", scope.as_str()),
            ("code_challenge", self.challenge.as_str()),
            ("code_challenge_method", "S256"),
            ("state", self.state.as_str()),
            ("access_type", "offline"),
            ("include_granted_scopes", "true"),
            ("prompt", "consent"),
        ]
        .iter()
        .map(|(key, value)| format!("{}={}", key, urlencoding::encode(value)))
        .collect();
        format!("{}?{}", GOOGLE_AUTH_URL, query.join("&"))
    }
}

impl Default for PkceFlow {
    fn default() -> Self {
        Self::new()
    }
}

/// `len` random bytes, base64url without padding.
fn random_token(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    rand::rng().fill(bytes.as_mut_slice());
    URL_SAFE_NO_PAD.encode(bytes)
}

fn s256_challenge(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

/// Response from Google's token endpoint.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    scope: Option<String>,
}

/// Response from Google's tokeninfo endpoint.
///
/// `expires_in` arrives as a string on this endpoint.
#[derive(Debug, Deserialize)]
struct TokenInfoResponse {
    #[serde(default)]
    scope: Option<String>,
    #[serde(default)]
    expires_in: Option<serde_json::Value>,
}

impl TokenInfoResponse {
    fn expires_in_secs(&self) -> Option<i64> {
        match self.expires_in.as_ref()? {
            serde_json::Value::Number(n) => n.as_i64(),
            serde_json::Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }
}
