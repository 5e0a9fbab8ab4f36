//! Swift URL construction.
//!
//! Everything here is a pure function of the session endpoint and its
//! arguments. Object keys are percent-encoded segment by segment so `/`
//! keeps its meaning as a separator.

use hmac::{Hmac, Mac};
use sha1::Sha1;

use super::ProviderError;

type HmacSha1 = Hmac<Sha1>;

/// A caller path split into the object key and the folder flag.
///
/// The trailing separator is the only thing that makes a path a folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogicalPath {
    /// Key without leading or trailing `/` (empty for the root)
    pub key: String,
    pub is_folder: bool,
}

impl LogicalPath {
    pub fn parse(path: &str) -> Result<Self, ProviderError> {
        let trimmed = path.trim_start_matches('/');
        if trimmed.is_empty() {
            return Ok(Self { key: String::new(), is_folder: true });
        }
        let is_folder = trimmed.ends_with('/');
        let key = trimmed.trim_end_matches('/');
        if key.is_empty() || key.split('/').any(|s| s.is_empty() || s == "." || s == "..") {
            return Err(ProviderError::InvalidPath(path.to_string()));
        }
        Ok(Self { key: key.to_string(), is_folder })
    }

    pub fn is_root(&self) -> bool {
        self.key.is_empty()
    }

    /// Listing prefix: the key with a trailing separator, empty for the root
    pub fn prefix(&self) -> String {
        if self.is_root() {
            String::new()
        } else {
            format!("{}/", self.key)
        }
    }

    /// Path as shown to callers
    pub fn display(&self) -> String {
        if self.is_folder { self.prefix() } else { self.key.clone() }
    }
}

/// Percent-encode each segment of `path`, keeping the separators
pub fn encode_path(path: &str) -> String {
    path.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

pub fn container_url(endpoint: &str, container: &str) -> String {
    format!("{}/{}", endpoint.trim_end_matches('/'), urlencoding::encode(container))
}

/// URL of a single object. An empty key names the container itself, which
/// is a listing and never an object.
pub fn object_url(endpoint: &str, container: &str, key: &str) -> Result<String, ProviderError> {
    let key = key.trim_start_matches('/');
    if key.is_empty() {
        return Err(ProviderError::InvalidPath("object path must not be empty".to_string()));
    }
    Ok(format!("{}/{}", container_url(endpoint, container), encode_path(key)))
}

/// Parameters of a container listing
#[derive(Debug, Clone)]
pub struct ListingQuery<'a> {
    pub prefix: &'a str,
    /// `Some('/')` for immediate children, `None` for the whole subtree
    pub delimiter: Option<char>,
    pub marker: Option<&'a str>,
    pub limit: usize,
}

impl<'a> ListingQuery<'a> {
    /// Immediate children of `prefix`
    pub fn children(prefix: &'a str, limit: usize) -> Self {
        Self { prefix, delimiter: Some('/'), marker: None, limit }
    }

    /// Every object below `prefix`
    pub fn recursive(prefix: &'a str, limit: usize) -> Self {
        Self { prefix, delimiter: None, marker: None, limit }
    }
}

pub fn listing_url(endpoint: &str, container: &str, query: &ListingQuery<'_>) -> String {
    let mut params = url::form_urlencoded::Serializer::new(String::new());
    params.append_pair("format", "json");
    params.append_pair("prefix", query.prefix);
    if let Some(delimiter) = query.delimiter {
        params.append_pair("delimiter", &delimiter.to_string());
    }
    params.append_pair("limit", &query.limit.to_string());
    if let Some(marker) = query.marker {
        params.append_pair("marker", marker);
    }
    format!("{}?{}", container_url(endpoint, container), params.finish())
}

/// Signed temporary URL for one object.
///
/// The signature is HMAC-SHA1 over `"{METHOD}\n{expires}\n{url path}"`, so
/// identical inputs always yield the identical URL.
pub fn temp_url(
    endpoint: &str,
    container: &str,
    key: &str,
    temp_url_key: &[u8],
    method: &str,
    expires_at: i64,
) -> Result<String, ProviderError> {
    let object = object_url(endpoint, container, key)?;
    let parsed = url::Url::parse(&object)
        .map_err(|e| ProviderError::InvalidConfig(format!("Invalid endpoint URL: {}", e)))?;

    let string_to_sign = format!("{}\n{}\n{}", method.to_uppercase(), expires_at, parsed.path());
    let mut mac = HmacSha1::new_from_slice(temp_url_key)
        .map_err(|e| ProviderError::InvalidConfig(format!("HMAC error: {}", e)))?;
    mac.update(string_to_sign.as_bytes());
    let signature = hex::encode(mac.finalize().into_bytes());

    Ok(format!("{}?temp_url_sig={}&temp_url_expires={}", object, signature, expires_at))
}
