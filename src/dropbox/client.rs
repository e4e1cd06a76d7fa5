//! Dropbox API Client
//!
//! Lists, downloads and tags the markdown documents under one Dropbox folder.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::errors::DropboxError;
use super::types::{
    AddPropertiesArg, DownloadArg, EntryMetadata, ListFolderArg, ListFolderContinueArg,
    ListFolderResult, PropertyGroup, PropertyGroupUpdate, RemoteEntry, RemoteProperties,
    TemplateFilter, UpdatePropertiesArg,
};

/// Default RPC endpoint host
pub const DEFAULT_API_URL: &str = "https://api.dropboxapi.com";

/// Default content (download) endpoint host
pub const DEFAULT_CONTENT_URL: &str = "https://content.dropboxapi.com";

/// Folder watched when none is configured
pub const DEFAULT_BASE_PATH: &str = "/blog";

/// Extension identifying documents inside the folder
const DOCUMENT_EXTENSION: &str = ".md";

/// HTTP client timeout
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Delay before each retry of a retryable failure
const RETRY_BACKOFF: [Duration; 3] = [
    Duration::from_millis(500),
    Duration::from_millis(1000),
    Duration::from_millis(2000),
];

/// Operations the sync loop and document source need from the content store
///
/// Cancellation is cooperative: dropping a returned future aborts the
/// underlying request.
#[async_trait]
pub trait RemoteContent: Send + Sync {
    /// Full listing of the watched folder, following continuation cursors
    async fn list_collection(&self) -> Result<Vec<RemoteEntry>, DropboxError>;

    /// Raw bytes and metadata of the document with the given id
    async fn get_content(&self, id: &str) -> Result<(Vec<u8>, RemoteEntry), DropboxError>;

    /// Create or update the property set attached to a document
    async fn set_properties(
        &self,
        entry: &RemoteEntry,
        props: &RemoteProperties,
    ) -> Result<(), DropboxError>;

    /// Stable external id of an entry (inverse of the path built by `get_content`)
    fn derive_id(&self, entry: &RemoteEntry) -> String;
}

/// Connection settings for a DropboxClient
#[derive(Debug, Clone)]
pub struct DropboxSettings {
    /// OAuth bearer token
    pub token: String,
    /// Folder holding the documents, e.g. "/blog"
    pub base_path: String,
    /// File properties template used to store title/published/hash
    pub template_id: String,
    pub api_url: String,
    pub content_url: String,
}

/// Build the HTTP client shared by every Dropbox request
pub fn build_http_client() -> reqwest::Result<Client> {
    Client::builder().timeout(REQUEST_TIMEOUT).build()
}

/// Dropbox API client bound to one folder and one property template
#[derive(Clone)]
pub struct DropboxClient {
    /// HTTP client for making requests
    http_client: Client,
    token: String,
    /// Normalised (lower-case, no trailing slash) base folder
    base_path: String,
    template_id: String,
    api_url: String,
    content_url: String,
    /// Delays between retries; the number of entries is the retry budget
    backoff: Vec<Duration>,
}

impl DropboxClient {
    /// Create a client using an already-configured HTTP client
    pub fn new(http_client: Client, settings: DropboxSettings) -> Self {
        let trimmed = settings.base_path.trim().trim_end_matches('/');
        let base_path = if trimmed.is_empty() {
            DEFAULT_BASE_PATH.to_string()
        } else if trimmed.starts_with('/') {
            trimmed.to_lowercase()
        } else {
            format!("/{}", trimmed.to_lowercase())
        };

        Self {
            http_client,
            token: settings.token,
            base_path,
            template_id: settings.template_id,
            api_url: settings.api_url.trim_end_matches('/').to_string(),
            content_url: settings.content_url.trim_end_matches('/').to_string(),
            backoff: RETRY_BACKOFF.to_vec(),
        }
    }

    /// Replace the retry schedule (an empty schedule disables retries)
    #[cfg(test)]
    pub fn with_backoff(mut self, backoff: Vec<Duration>) -> Self {
        self.backoff = backoff;
        self
    }

    /// Get the watched folder
    pub fn base_path(&self) -> &str {
        &self.base_path
    }

    /// Full path of a document id
    fn document_path(&self, id: &str) -> String {
        format!("{}/{}{}", self.base_path, id, DOCUMENT_EXTENSION)
    }

    /// Execute an operation, retrying transient failures with backoff
    async fn with_retry<F, Fut, T>(&self, operation: &str, f: F) -> Result<T, DropboxError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, DropboxError>>,
    {
        let mut attempt = 0;
        loop {
            match f().await {
                Ok(result) => return Ok(result),
                Err(e) if e.is_retryable() && attempt < self.backoff.len() => {
                    let delay = self.backoff[attempt];
                    attempt += 1;
                    warn!(
                        operation = operation,
                        attempt = attempt,
                        max = self.backoff.len(),
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Retrying Dropbox operation"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// POST a JSON argument to an RPC endpoint and decode the JSON reply
    async fn rpc<A, R>(&self, endpoint: &str, arg: &A) -> Result<R, DropboxError>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let url = format!("{}/2/{}", self.api_url, endpoint);
        let response = self
            .http_client
            .post(&url)
            .bearer_auth(&self.token)
            .json(arg)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(DropboxError::from_status(status, &body));
        }

        // Void routes may answer with an empty body.
        let body = response.bytes().await?;
        let body: &[u8] = if body.is_empty() { b"null" } else { &body };
        serde_json::from_slice(body)
            .map_err(|e| DropboxError::Decode(format!("{}: {}", endpoint, e)))
    }

    /// List the first page of the watched folder
    async fn list_folder(&self) -> Result<ListFolderResult, DropboxError> {
        let arg = ListFolderArg {
            path: self.base_path.clone(),
            include_property_groups: TemplateFilter {
                tag: "filter_some",
                filter_some: vec![self.template_id.clone()],
            },
            include_non_downloadable_files: false,
            include_deleted: false,
        };
        self.with_retry("list_folder", || self.rpc("files/list_folder", &arg))
            .await
    }

    /// Fetch the page following `cursor`
    async fn list_folder_continue(&self, cursor: &str) -> Result<ListFolderResult, DropboxError> {
        let arg = ListFolderContinueArg {
            cursor: cursor.to_string(),
        };
        self.with_retry("list_folder_continue", || {
            self.rpc("files/list_folder/continue", &arg)
        })
        .await
    }

    /// Download a file's bytes together with its metadata
    async fn download(&self, path: &str) -> Result<(Vec<u8>, EntryMetadata), DropboxError> {
        let url = format!("{}/2/files/download", self.content_url);
        let arg = header_json(&DownloadArg {
            path: path.to_string(),
        })?;

        debug!(path = path, "Downloading document from Dropbox");

        let response = self
            .http_client
            .post(&url)
            .bearer_auth(&self.token)
            .header("Dropbox-API-Arg", arg)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(DropboxError::from_status(status, &body));
        }

        let metadata: EntryMetadata = {
            let raw = response
                .headers()
                .get("Dropbox-API-Result")
                .ok_or_else(|| DropboxError::Decode("missing Dropbox-API-Result header".into()))?;
            serde_json::from_slice(raw.as_bytes())
                .map_err(|e| DropboxError::Decode(format!("Dropbox-API-Result: {}", e)))?
        };

        let bytes = response.bytes().await?;
        debug!(path = path, size = bytes.len(), "Downloaded document");
        Ok((bytes.to_vec(), metadata))
    }

    /// Convert listing metadata into a RemoteEntry, skipping non-documents
    fn to_remote_entry(&self, meta: EntryMetadata) -> Option<RemoteEntry> {
        if !meta.is_file() {
            return None;
        }
        let path = meta
            .path_lower
            .clone()
            .unwrap_or_else(|| format!("{}/{}", self.base_path, meta.name.to_lowercase()));
        if !path.ends_with(DOCUMENT_EXTENSION) {
            return None;
        }

        let properties = meta
            .property_groups
            .as_deref()
            .and_then(|groups| RemoteProperties::from_groups(groups, &self.template_id));

        Some(RemoteEntry {
            path,
            content_hash: meta.content_hash.unwrap_or_default(),
            modified: meta
                .client_modified
                .or(meta.server_modified)
                .unwrap_or_default(),
            properties,
        })
    }
}

#[async_trait]
impl RemoteContent for DropboxClient {
    async fn list_collection(&self) -> Result<Vec<RemoteEntry>, DropboxError> {
        let mut page = self.list_folder().await?;
        let mut all_entries = Vec::with_capacity(page.entries.len());

        loop {
            all_entries.extend(
                page.entries
                    .drain(..)
                    .filter_map(|meta| self.to_remote_entry(meta)),
            );
            if !page.has_more {
                break;
            }
            debug!(cursor = %page.cursor, "Following listing cursor");
            page = self.list_folder_continue(&page.cursor).await?;
        }

        debug!(count = all_entries.len(), path = %self.base_path, "Listed documents");
        Ok(all_entries)
    }

    async fn get_content(&self, id: &str) -> Result<(Vec<u8>, RemoteEntry), DropboxError> {
        let path = self.document_path(id);
        let (content, metadata) = self.with_retry("download", || self.download(&path)).await?;
        let entry = self
            .to_remote_entry(metadata)
            .ok_or_else(|| DropboxError::Decode(format!("{} is not a document", path)))?;
        Ok((content, entry))
    }

    async fn set_properties(
        &self,
        entry: &RemoteEntry,
        props: &RemoteProperties,
    ) -> Result<(), DropboxError> {
        let fields = props.to_fields();

        // Responses carry no useful body, so decode into a throwaway value.
        if entry.properties.is_some() {
            let arg = UpdatePropertiesArg {
                path: entry.path.clone(),
                update_property_groups: vec![PropertyGroupUpdate {
                    template_id: self.template_id.clone(),
                    add_or_update_fields: fields,
                }],
            };
            self.with_retry("properties_update", || {
                self.rpc::<_, serde_json::Value>("file_properties/properties/update", &arg)
            })
            .await?;
        } else {
            let arg = AddPropertiesArg {
                path: entry.path.clone(),
                property_groups: vec![PropertyGroup {
                    template_id: self.template_id.clone(),
                    fields,
                }],
            };
            self.with_retry("properties_add", || {
                self.rpc::<_, serde_json::Value>("file_properties/properties/add", &arg)
            })
            .await?;
        }

        info!(path = %entry.path, hash = %props.hash, "Updated document properties");
        Ok(())
    }

    fn derive_id(&self, entry: &RemoteEntry) -> String {
        let path = entry.path.to_lowercase();
        let prefix = format!("{}/", self.base_path);
        let id = path.strip_prefix(&prefix).unwrap_or(&path);
        id.strip_suffix(DOCUMENT_EXTENSION).unwrap_or(id).to_string()
    }
}

/// Serialize a header argument, escaping non-ASCII as HTTP headers require
fn header_json<T: Serialize>(value: &T) -> Result<String, DropboxError> {
    let json = serde_json::to_string(value).map_err(|e| DropboxError::Decode(e.to_string()))?;
    let mut escaped = String::with_capacity(json.len());
    for c in json.chars() {
        if c.is_ascii() {
            escaped.push(c);
        } else {
            let mut units = [0u16; 2];
            for unit in c.encode_utf16(&mut units) {
                escaped.push_str(&format!("\\u{:04x}", unit));
            }
        }
    }
    Ok(escaped)
}
