//! Swift listing and HEAD normalization.
//!
//! A `?format=json&delimiter=/` listing mixes three record shapes: directory
//! marker objects, synthetic `{"subdir": ...}` records, and regular objects.
//! Records are decoded into `RawRecord` at the boundary and only the typed
//! form is normalized into `Entry` values.

use reqwest::header::{HeaderMap, HeaderName, CONTENT_LENGTH, CONTENT_TYPE, ETAG, LAST_MODIFIED};
use serde::Deserialize;
use std::collections::HashSet;

use super::{Entry, DIRECTORY_CONTENT_TYPE};

/// One record of a JSON container listing
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum RawRecord {
    /// Common prefix generated by the backend, no object behind it
    Subdir { subdir: String },
    /// A stored object (file or directory marker)
    Object(RawObject),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RawObject {
    pub name: String,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub bytes: Option<u64>,
    #[serde(default)]
    pub hash: Option<String>,
    #[serde(default)]
    pub last_modified: Option<String>,
}

impl RawObject {
    /// Directory markers are recognised by content type or a trailing `/` in the key
    pub fn is_directory_marker(&self) -> bool {
        self.name.ends_with('/')
            || self.content_type.as_deref().is_some_and(is_directory_content_type)
    }
}

impl RawRecord {
    /// Key used by pagination (`marker=`)
    pub fn key(&self) -> &str {
        match self {
            RawRecord::Subdir { subdir } => subdir,
            RawRecord::Object(obj) => &obj.name,
        }
    }
}

pub fn parse_listing(body: &[u8]) -> Result<Vec<RawRecord>, serde_json::Error> {
    serde_json::from_slice(body)
}

/// `application/directory`, ignoring parameters and case
pub fn is_directory_content_type(content_type: &str) -> bool {
    content_type
        .split(';')
        .next()
        .map(|t| t.trim().eq_ignore_ascii_case(DIRECTORY_CONTENT_TYPE))
        .unwrap_or(false)
}

/// Turn raw listing records for `prefix` into entries.
///
/// Backend order is kept. A folder reported twice (marker object plus
/// subdir record) yields one entry at the position of its first record.
/// The marker of the listed folder itself is not one of its children.
pub fn normalize(records: Vec<RawRecord>, prefix: &str) -> Vec<Entry> {
    let listed = prefix.trim_end_matches('/');
    let mut seen_folders: HashSet<String> = HashSet::new();
    let mut entries = Vec::with_capacity(records.len());

    for record in records {
        match record {
            RawRecord::Subdir { subdir } => {
                let key = subdir.trim_end_matches('/');
                if key.is_empty() || key == listed || !seen_folders.insert(key.to_string()) {
                    continue;
                }
                entries.push(Entry::folder(key));
            }
            RawRecord::Object(obj) if obj.is_directory_marker() => {
                let key = obj.name.trim_end_matches('/');
                if key.is_empty() || key == listed || !seen_folders.insert(key.to_string()) {
                    continue;
                }
                entries.push(Entry::folder(key));
            }
            RawRecord::Object(obj) => {
                let mut entry = Entry::file(&obj.name);
                entry.content_type = obj.content_type;
                entry.size = obj.bytes;
                entry.modified = obj.last_modified;
                entry.etag = obj.hash;
                entries.push(entry);
            }
        }
    }

    entries
}

/// File entry for `key` built from the headers of an object HEAD
pub fn entry_from_head(key: &str, headers: &HeaderMap) -> Entry {
    let header = |name: HeaderName| headers.get(name).and_then(|v| v.to_str().ok()).map(|s| s.to_string());

    let mut entry = Entry::file(key);
    entry.content_type = header(CONTENT_TYPE);
    entry.size = header(CONTENT_LENGTH).and_then(|s| s.parse().ok());
    entry.modified = header(LAST_MODIFIED);
    entry.etag = header(ETAG).map(|e| e.trim_matches('"').to_string());
    entry
}

/// Content type reported by a HEAD response
pub fn head_content_type(headers: &HeaderMap) -> Option<&str> {
    headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok())
}
