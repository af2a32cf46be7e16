//! [`StorageBackend`] on a WebDAV folder.
//!
//! The snapshot file is addressed by name inside the configured folder, so
//! the remote id is simply the file name.

use tracing::debug;

use crate::error::{ProviderError, ProviderResult};
use crate::provider::{BoxFuture, RemoteFile, StorageBackend};

use super::client::{Body, WebDavClient};
use super::config::WebDavConfig;
use super::xml::{parse_multistatus, propfind_file_body};

/// WebDAV storage with its own Basic/Digest credentials.
#[derive(Debug)]
pub struct WebDavStorage {
    client: WebDavClient,
}

impl WebDavStorage {
    pub fn new(config: WebDavConfig) -> ProviderResult<Self> {
        Ok(Self {
            client: WebDavClient::new(config)?,
        })
    }

    fn file_url(&self, name: &str) -> ProviderResult<String> {
        self.client
            .config()
            .file_url(name)
            .map(String::from)
            .map_err(|e| {
                ProviderError::configuration(format!("invalid file name {:?}: {}", name, e))
                    .with_provider("webdav")
            })
    }

    /// PROPFIND (Depth 0) on the file; `None` if it does not exist.
    pub async fn stat(&self, name: &str) -> ProviderResult<Option<RemoteFile>> {
        let url = self.file_url(name)?;
        let body = propfind_file_body()?;

        let xml = match self.client.propfind(&url, &body, 0).await {
            Ok(xml) => xml,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e),
        };

        let entry = parse_multistatus(&xml)
            .into_iter()
            .find(|entry| !entry.is_collection);
        debug!("webdav stat {}: {:?}", name, entry);

        Ok(entry.map(|entry| RemoteFile {
            id: name.to_string(),
            name: name.to_string(),
            modified_at: entry.last_modified,
        }))
    }

    /// Uploads `content` and reads back the server's modification time.
    pub async fn upload(&self, name: &str, content: &str) -> ProviderResult<RemoteFile> {
        let url = self.file_url(name)?;
        self.client.put(&url, Body::json(content)).await?;

        Ok(self.stat(name).await?.unwrap_or_else(|| RemoteFile {
            id: name.to_string(),
            name: name.to_string(),
            modified_at: None,
        }))
    }

    /// Downloads the file; `None` if it does not exist.
    pub async fn download(&self, name: &str) -> ProviderResult<Option<String>> {
        let url = self.file_url(name)?;
        match self.client.get(&url).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }
}

impl StorageBackend for WebDavStorage {
    fn name(&self) -> &str {
        "webdav"
    }

    fn requires_session(&self) -> bool {
        false
    }

    fn find_file<'a>(&'a self, name: &'a str) -> BoxFuture<'a, ProviderResult<Option<RemoteFile>>> {
        Box::pin(self.stat(name))
    }

    fn create_file<'a>(
        &'a self,
        name: &'a str,
        content: &'a str,
    ) -> BoxFuture<'a, ProviderResult<RemoteFile>> {
        Box::pin(self.upload(name, content))
    }

    fn update_file<'a>(
        &'a self,
        id: &'a str,
        content: &'a str,
    ) -> BoxFuture<'a, ProviderResult<RemoteFile>> {
        Box::pin(self.upload(id, content))
    }

    fn download_file<'a>(&'a self, id: &'a str) -> BoxFuture<'a, ProviderResult<Option<String>>> {
        Box::pin(self.download(id))
    }

    fn file_metadata<'a>(
        &'a self,
        id: &'a str,
    ) -> BoxFuture<'a, ProviderResult<Option<RemoteFile>>> {
        Box::pin(self.stat(id))
    }
}
