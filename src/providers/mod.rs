//! Storage Providers Module
//!
//! The hosting application talks to remote storage through the
//! `StorageProvider` trait. This crate ships one implementation, Cloud Files
//! (OpenStack Swift), split into the pieces below.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │           StorageProvider Trait             │
//! │  metadata, download, upload, delete, ...    │
//! └─────────────────────────────────────────────┘
//!                      │
//!          ┌───────────▼───────────┐
//!          │  CloudFilesProvider   │  transfer ops, status mapping
//!          └──┬────────┬────────┬──┘
//!             ▼        ▼        ▼
//!          session  swift_url  listing
//!        (token/key)  (URLs)  (normalizer)
//! ```

pub mod types;
pub mod http_retry;
pub mod session;
pub mod swift_url;
pub mod listing;
pub mod cloudfiles;

pub use types::*;
pub use http_retry::{send_with_retry, HttpRetryConfig};
pub use session::{system_clock, Clock, Session, SessionManager};
pub use cloudfiles::CloudFilesProvider;

use async_trait::async_trait;

/// Longest upstream body excerpt kept in error messages
const MAX_ERROR_BODY_CHARS: usize = 512;

/// Collapse an upstream error body into a single bounded line
pub fn sanitize_api_error(body: &str) -> String {
    let collapsed = body.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() > MAX_ERROR_BODY_CHARS {
        let truncated: String = collapsed.chars().take(MAX_ERROR_BODY_CHARS).collect();
        format!("{}…", truncated)
    } else {
        collapsed
    }
}

/// Unified storage provider trait
///
/// A path ending in `/` names a folder, anything else an object. Providers
/// never reinterpret one as the other.
#[async_trait]
pub trait StorageProvider: Send + Sync {
    /// Display name for this provider instance
    fn display_name(&self) -> String;

    /// One entry for an object path, the children for a folder path
    async fn metadata(&self, path: &str) -> Result<Metadata, ProviderError>;

    /// Open the object for reading, or only hand out a URL when `accept_url` is set
    async fn download(&self, path: &str, accept_url: bool) -> Result<Download, ProviderError>;

    /// Store `data` at `path`; the flag is true when the object did not exist before
    async fn upload(&self, path: &str, data: bytes::Bytes) -> Result<(Entry, bool), ProviderError>;

    /// Create an empty folder
    async fn create_folder(&self, path: &str) -> Result<Entry, ProviderError>;

    /// Delete an object, or a folder with everything below it
    async fn delete(&self, path: &str) -> Result<(), ProviderError>;

    /// Check if path exists
    async fn exists(&self, path: &str) -> Result<bool, ProviderError> {
        match self.metadata(path).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    // Optional capabilities - providers can override these

    /// Check if provider can hand out signed, time-limited URLs
    fn supports_temp_urls(&self) -> bool {
        false
    }

    /// Signed URL granting `method` on one object for `expires_in_secs`
    async fn create_temp_url(
        &self,
        _path: &str,
        _method: &str,
        _expires_in_secs: u64,
    ) -> Result<String, ProviderError> {
        Err(ProviderError::NotSupported("temp_url".to_string()))
    }
}
