//! Remote providers for the wellness journal's cloud features.
//!
//! This crate contains the clients the sync core drives through traits:
//!
//! - [`IdentityProvider`]: OAuth consent, refresh and introspection
//! - [`CalendarSource`]: calendars and events for a time window
//! - [`StorageBackend`]: one named snapshot file on a remote service
//! - [`TokenSink`]: receives each new access token
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐  ┌─────────────────────┐  ┌──────────────┐  ┌──────────────┐
//! │  GoogleIdentity  │  │ GoogleCalendarClient│  │  DriveClient │  │ WebDavStorage│
//! └────────┬─────────┘  └──────────┬──────────┘  └──────┬───────┘  └──────┬───────┘
//!          │ IdentityProvider      │ CalendarSource     │ StorageBackend  │
//!          │                       │ + TokenSink        │ + TokenSink     │
//!          └───────────────────────┴──────────┬─────────┴─────────────────┘
//!                                             ▼
//!                                      wellsync-cloud
//! ```

#[cfg(feature = "google")]
pub mod google;
#[cfg(feature = "webdav")]
pub mod webdav;

pub mod error;
pub mod provider;
pub mod raw_event;
pub mod token;

pub use error::{ProviderError, ProviderErrorCode, ProviderResult};
pub use provider::{
    BoxFuture, CalendarInfo, CalendarSource, IdentityProvider, RemoteFile, StorageBackend,
    TokenSink,
};
pub use raw_event::RawEvent;
pub use token::{BearerToken, TokenGrant, TokenIntrospection, parse_scopes};
