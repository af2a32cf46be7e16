//! WebDAV snapshot storage.
//!
//! Stores the journal snapshot as a single file in a WebDAV folder
//! (Nextcloud, ownCloud, a NAS share). Uses its own credentials rather than
//! the Google session:
//!
//! - HTTP Digest and Basic authentication
//! - PROPFIND (Depth 0) for the file's last-modified time
//! - GET to download, PUT to create or overwrite

mod auth;
mod client;
mod config;
mod storage;
mod xml;

pub use config::{Credentials, WebDavConfig};
pub use storage::WebDavStorage;
