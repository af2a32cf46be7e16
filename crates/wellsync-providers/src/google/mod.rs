//! Google identity, Calendar and Drive clients.
//!
//! # Authentication Flow
//!
//! 1. The user registers a desktop OAuth client and supplies its id/secret
//! 2. [`GoogleIdentity`] binds a loopback listener and opens the consent page
//!    for exactly the scopes the requested service needs
//! 3. Google redirects back with a code that is exchanged for tokens
//! 4. The session pushes the access token into every [`TokenSink`]
//!    ([`GoogleCalendarClient`], [`DriveClient`])
//! 5. Later refreshes use the refresh-token grant without user interaction
//!
//! [`TokenSink`]: crate::TokenSink

mod api;
mod calendar;
mod config;
mod drive;
mod identity;
mod oauth;

pub use calendar::GoogleCalendarClient;
pub use config::{CALENDAR_SCOPE, DRIVE_FILE_SCOPE, GoogleConfig, OAuthCredentials};
pub use drive::DriveClient;
pub use identity::GoogleIdentity;
pub use oauth::{OAuthClient, PkceFlow};
