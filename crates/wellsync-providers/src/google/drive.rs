//! Google Drive API client for the snapshot file.
//!
//! Only the `drive.file` scope is needed: the app sees files it created
//! itself. A file is created with a metadata-only POST and its content is
//! uploaded with a media PATCH, so create and update share one upload path.

use chrono::{DateTime, Utc};
use reqwest::header::CONTENT_TYPE;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::ProviderResult;
use crate::provider::{BoxFuture, RemoteFile, StorageBackend, TokenSink};
use crate::token::BearerToken;

use super::api::{check_status, read_json, request_error};
use super::config::GoogleConfig;

const DRIVE_API_BASE: &str = "https://www.googleapis.com/drive/v3";
const DRIVE_UPLOAD_BASE: &str = "https://www.googleapis.com/upload/drive/v3";

const PROVIDER: &str = "google-drive";

/// Metadata fields requested on every call.
const FILE_FIELDS: &str = "id,name,modifiedTime";

/// Google Drive client storing JSON snapshots.
#[derive(Debug)]
pub struct DriveClient {
    http_client: reqwest::Client,
    token: BearerToken,
    api_base: String,
    upload_base: String,
}

impl DriveClient {
    pub fn new(config: &GoogleConfig) -> ProviderResult<Self> {
        Ok(Self {
            http_client: config.http_client()?,
            token: BearerToken::new(),
            api_base: DRIVE_API_BASE.to_string(),
            upload_base: DRIVE_UPLOAD_BASE.to_string(),
        })
    }

    /// Overrides both API base URLs.
    pub fn with_base_urls(
        mut self,
        api_base: impl Into<String>,
        upload_base: impl Into<String>,
    ) -> Self {
        self.api_base = api_base.into();
        self.upload_base = upload_base.into();
        self
    }

    /// Searches for a non-trashed file with exactly `name`.
    ///
    /// When several match, the most recently modified one wins.
    pub async fn find_file(&self, name: &str) -> ProviderResult<Option<RemoteFile>> {
        let query = format!("name = '{}' and trashed = false", escape_query(name));
        let fields = format!("files({})", FILE_FIELDS);
        let response = self
            .http_client
            .get(format!("{}/files", self.api_base))
            .bearer_auth(self.token.require()?)
            .query(&[
                ("q", query.as_str()),
                ("fields", fields.as_str()),
                ("orderBy", "modifiedTime desc"),
                ("spaces", "drive"),
            ])
            .send()
            .await
            .map_err(|e| request_error(PROVIDER, e))?;
        let response = check_status(PROVIDER, response).await?;
        let list: FileListResponse = read_json(PROVIDER, response).await?;

        debug!("drive search for {:?} matched {} files", name, list.files.len());
        Ok(list.files.into_iter().next().map(DriveFile::into_remote))
    }

    /// Creates a file with `content`.
    pub async fn create_file(&self, name: &str, content: &str) -> ProviderResult<RemoteFile> {
        let metadata = serde_json::json!({
            "name": name,
            "mimeType": "application/json",
        });
        let response = self
            .http_client
            .post(format!("{}/files", self.api_base))
            .bearer_auth(self.token.require()?)
            .query(&[("fields", FILE_FIELDS)])
            .json(&metadata)
            .send()
            .await
            .map_err(|e| request_error(PROVIDER, e))?;
        let response = check_status(PROVIDER, response).await?;
        let created: DriveFile = read_json(PROVIDER, response).await?;

        debug!("created drive file {} ({})", created.name, created.id);
        self.update_file(&created.id, content).await
    }

    /// Replaces the content of file `id`.
    pub async fn update_file(&self, id: &str, content: &str) -> ProviderResult<RemoteFile> {
        let response = self
            .http_client
            .patch(format!(
                "{}/files/{}",
                self.upload_base,
                urlencoding::encode(id)
            ))
            .bearer_auth(self.token.require()?)
            .query(&[("uploadType", "media"), ("fields", FILE_FIELDS)])
            .header(CONTENT_TYPE, "application/json")
            .body(content.to_string())
            .send()
            .await
            .map_err(|e| request_error(PROVIDER, e))?;
        let response = check_status(PROVIDER, response).await?;
        let updated: DriveFile = read_json(PROVIDER, response).await?;
        Ok(updated.into_remote())
    }

    /// Downloads the content of file `id`.
    pub async fn download_file(&self, id: &str) -> ProviderResult<Option<String>> {
        let response = self
            .http_client
            .get(self.file_url(id))
            .bearer_auth(self.token.require()?)
            .query(&[("alt", "media")])
            .send()
            .await
            .map_err(|e| request_error(PROVIDER, e))?;

        match check_status(PROVIDER, response).await {
            Ok(response) => response
                .text()
                .await
                .map(Some)
                .map_err(|e| request_error(PROVIDER, e)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Fetches metadata of file `id` without its content.
    pub async fn file_metadata(&self, id: &str) -> ProviderResult<Option<RemoteFile>> {
        let response = self
            .http_client
            .get(self.file_url(id))
            .bearer_auth(self.token.require()?)
            .query(&[("fields", FILE_FIELDS)])
            .send()
            .await
            .map_err(|e| request_error(PROVIDER, e))?;

        match check_status(PROVIDER, response).await {
            Ok(response) => {
                let file: DriveFile = read_json(PROVIDER, response).await?;
                Ok(Some(file.into_remote()))
            }
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn file_url(&self, id: &str) -> String {
        format!("{}/files/{}", self.api_base, urlencoding::encode(id))
    }
}

impl TokenSink for DriveClient {
    fn install_token(&self, token: &str) {
        self.token.set(token);
    }

    fn clear_token(&self) {
        self.token.clear();
    }
}

impl StorageBackend for DriveClient {
    fn name(&self) -> &str {
        PROVIDER
    }

    fn requires_session(&self) -> bool {
        true
    }

    fn find_file<'a>(&'a self, name: &'a str) -> BoxFuture<'a, ProviderResult<Option<RemoteFile>>> {
        Box::pin(DriveClient::find_file(self, name))
    }

    fn create_file<'a>(
        &'a self,
        name: &'a str,
        content: &'a str,
    ) -> BoxFuture<'a, ProviderResult<RemoteFile>> {
        Box::pin(DriveClient::create_file(self, name, content))
    }

    fn update_file<'a>(
        &'a self,
        id: &'a str,
        content: &'a str,
    ) -> BoxFuture<'a, ProviderResult<RemoteFile>> {
        Box::pin(DriveClient::update_file(self, id, content))
    }

    fn download_file<'a>(&'a self, id: &'a str) -> BoxFuture<'a, ProviderResult<Option<String>>> {
        Box::pin(DriveClient::download_file(self, id))
    }

    fn file_metadata<'a>(
        &'a self,
        id: &'a str,
    ) -> BoxFuture<'a, ProviderResult<Option<RemoteFile>>> {
        Box::pin(DriveClient::file_metadata(self, id))
    }
}

/// Escapes a literal for the Drive `q` query language.
fn escape_query(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

#[derive(Debug, Deserialize)]
struct FileListResponse {
    #[serde(default)]
    files: Vec<DriveFile>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DriveFile {
    id: String,
    #[serde(default)]
    name: String,
    modified_time: Option<String>,
}

impl DriveFile {
    fn into_remote(self) -> RemoteFile {
        let modified_at = self.modified_time.as_deref().and_then(|t| {
            DateTime::parse_from_rfc3339(t)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| warn!("bad modifiedTime {:?}: {}", t, e))
                .ok()
        });
        RemoteFile {
            id: self.id,
            name: self.name,
            modified_at,
        }
    }
}
