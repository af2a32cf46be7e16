//! Provider trait definitions.
//!
//! The sync core talks to remote services only through the traits in this
//! module:
//!
//! - [`IdentityProvider`] runs consent flows, refresh grants and token
//!   introspection
//! - [`TokenSink`] receives every access token the session obtains
//! - [`CalendarSource`] lists calendars and events for a time window
//! - [`StorageBackend`] stores a single named snapshot file remotely

use std::future::Future;
use std::pin::Pin;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use wellsync_core::TimeWindow;

use crate::error::ProviderResult;
use crate::raw_event::RawEvent;
use crate::token::{TokenGrant, TokenIntrospection};

/// A boxed future for async trait methods.
///
/// Boxed futures keep the traits object-safe so the sync core can hold
/// `Arc<dyn StorageBackend>` and swap in fakes under test.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Information about a calendar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarInfo {
    /// Unique identifier for the calendar.
    pub id: String,
    /// Human-readable name of the calendar.
    pub name: String,
    /// Whether this is the account's primary calendar.
    pub is_primary: bool,
    /// The timezone of the calendar (IANA identifier).
    pub timezone: Option<String>,
}

impl CalendarInfo {
    /// Creates a new CalendarInfo with the given ID and name.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            is_primary: false,
            timezone: None,
        }
    }

    /// Builder method to mark as primary.
    pub fn with_primary(mut self, is_primary: bool) -> Self {
        self.is_primary = is_primary;
        self
    }

    /// Builder method to set timezone.
    pub fn with_timezone(mut self, timezone: impl Into<String>) -> Self {
        self.timezone = Some(timezone.into());
        self
    }
}

/// Metadata of a file held by a storage backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFile {
    /// Backend-specific identifier (Drive file id, WebDAV path).
    pub id: String,
    pub name: String,
    /// Last modification time reported by the backend.
    pub modified_at: Option<DateTime<Utc>>,
}

/// Runs OAuth flows against an identity provider.
pub trait IdentityProvider: Send + Sync {
    /// Opens an interactive consent flow for exactly `scopes`.
    ///
    /// A user who dismisses or denies consent yields an error whose code is
    /// [`Cancelled`](crate::ProviderErrorCode::Cancelled).
    fn authorize<'a>(&'a self, scopes: &'a [String]) -> BoxFuture<'a, ProviderResult<TokenGrant>>;

    /// Obtains a fresh access token without user interaction.
    ///
    /// Returns `Ok(None)` when the provider refuses the refresh credential.
    fn refresh<'a>(
        &'a self,
        refresh_token: &'a str,
    ) -> BoxFuture<'a, ProviderResult<Option<TokenGrant>>>;

    /// Asks the provider whether `access_token` is still live, and with
    /// which scopes.
    fn introspect<'a>(
        &'a self,
        access_token: &'a str,
    ) -> BoxFuture<'a, ProviderResult<TokenIntrospection>>;
}

/// Receives access tokens from the session.
///
/// Every API client that authenticates with a bearer token implements this
/// so a refreshed token reaches all of them at once.
pub trait TokenSink: Send + Sync {
    fn install_token(&self, token: &str);
    fn clear_token(&self);
}

/// Reads events from a calendar service.
pub trait CalendarSource: Send + Sync {
    /// Returns the provider name for logs.
    fn name(&self) -> &str;

    /// Lists events of `calendar_id` intersecting `window`, with recurring
    /// events already expanded into instances.
    fn list_events<'a>(
        &'a self,
        calendar_id: &'a str,
        window: &'a TimeWindow,
    ) -> BoxFuture<'a, ProviderResult<Vec<RawEvent>>>;

    /// Lists calendars visible to the account.
    fn list_calendars(&self) -> BoxFuture<'_, ProviderResult<Vec<CalendarInfo>>>;
}

/// Stores named files on a remote service.
pub trait StorageBackend: Send + Sync {
    /// Returns the provider name for logs.
    fn name(&self) -> &str;

    /// Returns true if requests authenticate with the session's OAuth token.
    ///
    /// Backends with their own credentials return false and are never
    /// retried through a token refresh.
    fn requires_session(&self) -> bool;

    /// Looks up a file by name.
    fn find_file<'a>(&'a self, name: &'a str) -> BoxFuture<'a, ProviderResult<Option<RemoteFile>>>;

    /// Creates a new file with the given content.
    fn create_file<'a>(
        &'a self,
        name: &'a str,
        content: &'a str,
    ) -> BoxFuture<'a, ProviderResult<RemoteFile>>;

    /// Overwrites the content of an existing file.
    fn update_file<'a>(
        &'a self,
        id: &'a str,
        content: &'a str,
    ) -> BoxFuture<'a, ProviderResult<RemoteFile>>;

    /// Downloads file content, or `None` if the file no longer exists.
    fn download_file<'a>(&'a self, id: &'a str) -> BoxFuture<'a, ProviderResult<Option<String>>>;

    /// Fetches file metadata only, or `None` if the file no longer exists.
    fn file_metadata<'a>(
        &'a self,
        id: &'a str,
    ) -> BoxFuture<'a, ProviderResult<Option<RemoteFile>>>;
}
