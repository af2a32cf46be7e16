//! HTTP plumbing shared by the Google API clients.

use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;

use crate::error::{ProviderError, ProviderResult};

/// Maps a transport failure into a network error.
pub(crate) fn request_error(provider: &str, e: reqwest::Error) -> ProviderError {
    let message = if e.is_timeout() {
        "request timeout".to_string()
    } else if e.is_connect() {
        format!("connection failed: {}", e)
    } else {
        format!("request failed: {}", e)
    };
    ProviderError::network(message)
        .with_provider(provider)
        .with_source(e)
}

/// Turns a non-success response into the matching [`ProviderError`].
///
/// 401 becomes an authentication failure so callers can retry after a token
/// refresh; 403 and 404 are not retryable through a refresh.
pub(crate) async fn check_status(provider: &str, response: Response) -> ProviderResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let error = match status {
        StatusCode::UNAUTHORIZED => ProviderError::authentication("access token expired or invalid"),
        StatusCode::FORBIDDEN => ProviderError::authorization("access denied"),
        StatusCode::NOT_FOUND => ProviderError::not_found("resource not found"),
        StatusCode::TOO_MANY_REQUESTS => {
            let retry_after = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok());
            ProviderError::rate_limited(format!(
                "rate limit exceeded{}",
                retry_after
                    .map(|s| format!(", retry after {} seconds", s))
                    .unwrap_or_default()
            ))
        }
        s if s.is_server_error() => {
            let body = response.text().await.unwrap_or_default();
            ProviderError::server(format!("API error ({}): {}", s, body))
        }
        s => {
            let body = response.text().await.unwrap_or_default();
            ProviderError::bad_request(format!("API error ({}): {}", s, body))
        }
    };
    Err(error.with_provider(provider))
}

/// Reads a JSON body.
pub(crate) async fn read_json<T: DeserializeOwned>(
    provider: &str,
    response: Response,
) -> ProviderResult<T> {
    let body = response
        .text()
        .await
        .map_err(|e| request_error(provider, e))?;
    serde_json::from_str(&body).map_err(|e| {
        ProviderError::invalid_response(format!("failed to parse response: {}", e))
            .with_provider(provider)
    })
}
