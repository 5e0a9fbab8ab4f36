//! Shared types for the storage provider
//!
//! Configuration bundles, the normalized `Entry` representation returned by
//! metadata calls, download results, and the provider error taxonomy.

use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Default identity endpoint (Rackspace Cloud Identity v2.0)
pub const DEFAULT_AUTH_URL: &str = "https://identity.api.rackspacecloud.com/v2.0/tokens";

/// Default lifetime of generated download URLs, in seconds
pub const DEFAULT_TEMP_URL_SECS: u64 = 100;

/// Swift's maximum listing page size
pub const DEFAULT_PAGE_SIZE: usize = 10_000;

/// Content type Swift uses for directory marker objects
pub const DIRECTORY_CONTENT_TYPE: &str = "application/directory";

/// Caller identity handed over by the hosting application.
///
/// Opaque to the provider apart from log context.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthContext {
    pub name: String,
    pub email: Option<String>,
}

/// Generic provider configuration
///
/// Loadable from JSON. Provider-specific fields are stored in `extra`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Display name for this connection
    #[serde(default)]
    pub name: String,
    /// Account username
    pub username: Option<String>,
    /// API key used for the identity exchange
    pub password: Option<String>,
    /// Extra options: region, container, auth_url, temp_url_secs, page_size
    #[serde(default)]
    pub extra: HashMap<String, String>,
}

/// Account credentials, immutable for the lifetime of a provider
#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    /// API key (SecretString for memory zeroization)
    pub api_key: secrecy::SecretString,
    /// Service catalog region, e.g. "iad"
    pub region: String,
}

/// Storage settings, immutable for the lifetime of a provider
#[derive(Debug, Clone)]
pub struct Settings {
    pub container: String,
}

/// Cloud Files configuration
#[derive(Debug, Clone)]
pub struct CloudFilesConfig {
    pub credentials: Credentials,
    pub settings: Settings,
    /// Identity endpoint
    pub auth_url: String,
    /// Lifetime of temp URLs handed out by `download`
    pub temp_url_secs: u64,
    /// Listing page size (`limit` query parameter)
    pub page_size: usize,
    /// Throttling retry policy
    pub retry: super::HttpRetryConfig,
}

impl CloudFilesConfig {
    pub fn new(credentials: Credentials, settings: Settings) -> Self {
        Self {
            credentials,
            settings,
            auth_url: DEFAULT_AUTH_URL.to_string(),
            temp_url_secs: DEFAULT_TEMP_URL_SECS,
            page_size: DEFAULT_PAGE_SIZE,
            retry: super::HttpRetryConfig::default(),
        }
    }

    pub fn from_provider_config(config: &ProviderConfig) -> Result<Self, ProviderError> {
        let username = config.username.clone()
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| ProviderError::InvalidConfig("Username required for Cloud Files".to_string()))?;
        let api_key = config.password.clone()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| ProviderError::InvalidConfig("API key required for Cloud Files".to_string()))?;
        let region = config.extra.get("region")
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty())
            .ok_or_else(|| ProviderError::InvalidConfig("Region required for Cloud Files".to_string()))?;
        let container = config.extra.get("container")
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .ok_or_else(|| ProviderError::InvalidConfig("Container name required for Cloud Files".to_string()))?;
        if container.contains('/') {
            return Err(ProviderError::InvalidConfig("Container name must not contain '/'".to_string()));
        }

        let mut cfg = Self::new(
            Credentials {
                username: username.trim().to_string(),
                api_key: api_key.into(),
                region,
            },
            Settings { container },
        );

        if let Some(auth_url) = config.extra.get("auth_url") {
            if !auth_url.starts_with("http://") && !auth_url.starts_with("https://") {
                return Err(ProviderError::InvalidConfig(format!("Invalid auth_url: {}", auth_url)));
            }
            cfg.auth_url = auth_url.clone();
        }
        if let Some(secs) = config.extra.get("temp_url_secs") {
            cfg.temp_url_secs = secs.parse()
                .map_err(|_| ProviderError::InvalidConfig(format!("Invalid temp_url_secs: {}", secs)))?;
        }
        if let Some(size) = config.extra.get("page_size") {
            cfg.page_size = size.parse().ok()
                .filter(|s: &usize| *s > 0)
                .ok_or_else(|| ProviderError::InvalidConfig(format!("Invalid page_size: {}", size)))?;
        }

        Ok(cfg)
    }
}

/// Whether an entry is a file or a folder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Folder,
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryKind::File => write!(f, "file"),
            EntryKind::Folder => write!(f, "folder"),
        }
    }
}

/// Normalized storage entry
///
/// `kind == Folder` iff `path` ends with `/`. Build entries through
/// `Entry::file` / `Entry::folder`, which derive both from one key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    /// Final path segment
    pub name: String,
    /// Full logical path, trailing `/` for folders
    pub path: String,
    pub kind: EntryKind,
    pub content_type: Option<String>,
    /// Size in bytes (None for folders)
    pub size: Option<u64>,
    /// Last modification time as reported by the backend
    pub modified: Option<String>,
    pub etag: Option<String>,
}

impl Entry {
    /// Create a file entry. A trailing separator on `path` is stripped.
    pub fn file(path: &str) -> Self {
        let path = path.trim_start_matches('/').trim_end_matches('/').to_string();
        Self {
            name: last_segment(&path).to_string(),
            path,
            kind: EntryKind::File,
            content_type: None,
            size: None,
            modified: None,
            etag: None,
        }
    }

    /// Create a folder entry. A trailing separator is added to `path`.
    pub fn folder(path: &str) -> Self {
        let bare = path.trim_start_matches('/').trim_end_matches('/');
        Self {
            name: last_segment(bare).to_string(),
            path: format!("{}/", bare),
            kind: EntryKind::Folder,
            content_type: None,
            size: None,
            modified: None,
            etag: None,
        }
    }

    pub fn is_folder(&self) -> bool {
        self.kind == EntryKind::Folder
    }
}

fn last_segment(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Result of a metadata call: one object, or the children of a folder
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Metadata {
    File(Entry),
    Folder(Vec<Entry>),
}

impl Metadata {
    pub fn is_folder(&self) -> bool {
        matches!(self, Metadata::Folder(_))
    }

    /// The single entry of an object lookup
    pub fn into_entry(self) -> Option<Entry> {
        match self {
            Metadata::File(entry) => Some(entry),
            Metadata::Folder(_) => None,
        }
    }

    /// The children of a folder lookup
    pub fn into_entries(self) -> Option<Vec<Entry>> {
        match self {
            Metadata::File(_) => None,
            Metadata::Folder(entries) => Some(entries),
        }
    }
}

/// Result of a download call
pub enum Download {
    /// Signed URL the client can fetch directly (`accept_url`)
    Url(String),
    /// Open response body
    Stream(ObjectStream),
}

impl fmt::Debug for Download {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Download::Url(url) => f.debug_tuple("Url").field(url).finish(),
            Download::Stream(stream) => f.debug_struct("Stream")
                .field("size", &stream.size)
                .field("content_type", &stream.content_type)
                .finish(),
        }
    }
}

/// Streaming object body
pub struct ObjectStream {
    /// Content-Length, when the backend sent one
    pub size: Option<u64>,
    pub content_type: Option<String>,
    response: reqwest::Response,
}

impl ObjectStream {
    pub(crate) fn new(response: reqwest::Response) -> Self {
        let size = response.content_length();
        let content_type = response.headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());
        Self { size, content_type, response }
    }

    /// Body as a stream of chunks
    pub fn into_stream(self) -> impl Stream<Item = Result<bytes::Bytes, ProviderError>> {
        self.response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| ProviderError::Network(e.to_string())))
    }

    /// Read the whole body into memory
    pub async fn bytes(self) -> Result<bytes::Bytes, ProviderError> {
        self.response.bytes().await
            .map_err(|e| ProviderError::Network(e.to_string()))
    }
}

/// Provider error type
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Region not found in service catalog: {0}")]
    RegionNotFound(String),

    #[error("Path not found: {0}")]
    NotFound(String),

    #[error("Download of {path} failed (HTTP {status})")]
    Download { path: String, status: u16 },

    #[error("Upload of {path} failed: {reason}")]
    Upload { path: String, reason: String },

    #[error("Delete of {path} failed (HTTP {status})")]
    Delete { path: String, status: u16 },

    #[error("Metadata lookup for {path} failed: {reason}")]
    Metadata { path: String, reason: String },

    #[error("Path already exists: {0}")]
    AlreadyExists(String),

    #[error("Provider error (HTTP {status}): {body}")]
    Provider { status: u16, body: String },

    #[error("Operation not supported: {0}")]
    NotSupported(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Network error: {0}")]
    Network(String),
}

impl ProviderError {
    /// Upstream HTTP status carried by this error, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            ProviderError::Download { status, .. }
            | ProviderError::Delete { status, .. }
            | ProviderError::Provider { status, .. } => Some(*status),
            ProviderError::NotFound(_) => Some(404),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ProviderError::NotFound(_))
            || matches!(self, ProviderError::Download { status: 404, .. })
    }
}
