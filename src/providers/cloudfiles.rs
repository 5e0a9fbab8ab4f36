//! Cloud Files Storage Provider
//!
//! Implements StorageProvider for Rackspace Cloud Files (OpenStack Swift).
//! Authentication: API key → identity v2.0 token + service catalog endpoint.
//! Downloads go through HMAC-SHA1 temp URLs signed with the account key.
//!
//! Object: {endpoint}/{container}/{key}
//! Listing: GET {endpoint}/{container}?format=json&prefix=..&delimiter=/
//! Folders: zero-byte `application/directory` markers and/or subdir records

use async_trait::async_trait;
use md5::{Digest, Md5};
use reqwest::header::{HeaderMap, ACCEPT, CONTENT_TYPE, ETAG};
use reqwest::{RequestBuilder, Response, StatusCode};
use secrecy::ExposeSecret;
use tracing::{debug, info, warn};

use super::listing::{self, RawRecord};
use super::session::AUTH_TOKEN_HEADER;
use super::swift_url::{self, ListingQuery, LogicalPath};
use super::{
    sanitize_api_error, send_with_retry, system_clock, AuthContext, Clock, CloudFilesConfig,
    Download, Entry, Metadata, ObjectStream, ProviderError, Session, SessionManager,
    StorageProvider, DIRECTORY_CONTENT_TYPE,
};

/// Cloud Files Storage Provider
pub struct CloudFilesProvider {
    auth: AuthContext,
    config: CloudFilesConfig,
    client: reqwest::Client,
    sessions: SessionManager,
}

impl CloudFilesProvider {
    pub fn new(auth: AuthContext, config: CloudFilesConfig) -> Self {
        Self::with_clock(auth, config, system_clock())
    }

    /// Provider reading "now" from `clock` (token expiry, temp URL expiry)
    pub fn with_clock(auth: AuthContext, config: CloudFilesConfig, clock: Clock) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        let sessions = SessionManager::new(
            client.clone(),
            config.auth_url.clone(),
            config.credentials.clone(),
            config.retry.clone(),
            clock,
        );

        info!(
            "Cloud Files provider for '{}': container='{}', region='{}'",
            auth.name, config.settings.container, config.credentials.region
        );

        Self { auth, config, client, sessions }
    }

    fn container(&self) -> &str {
        &self.config.settings.container
    }

    /// Valid session, authenticating first when needed
    pub async fn ensure_session(&self) -> Result<Session, ProviderError> {
        self.sessions.ensure_session().await
    }

    /// Signed URL granting `method` on the object at `path` for `expires_in_secs`
    pub async fn generate_temp_url(
        &self,
        path: &str,
        method: &str,
        expires_in_secs: u64,
    ) -> Result<String, ProviderError> {
        let logical = LogicalPath::parse(path)?;
        if logical.is_folder {
            return Err(ProviderError::InvalidPath(format!("{} is a folder", path)));
        }

        let session = self.ensure_session().await?;
        let expires_at = self.sessions.now().timestamp()
            + i64::try_from(expires_in_secs).unwrap_or(i64::MAX / 2);

        swift_url::temp_url(
            &session.endpoint,
            self.container(),
            &logical.key,
            session.temp_url_key.expose_secret().as_bytes(),
            method,
            expires_at,
        )
    }

    // ─── Request Plumbing ───────────────────────────────────────────────

    async fn execute(&self, builder: RequestBuilder) -> Result<Response, ProviderError> {
        let request = builder.build()
            .map_err(|e| ProviderError::Network(format!("Failed to build request: {}", e)))?;
        debug!("Cloud Files {} {}", request.method(), request.url().path());

        send_with_retry(&self.client, request, &self.config.retry)
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))
    }

    /// Send a request carrying the session token.
    ///
    /// A 401/403 invalidates the session and the request is rebuilt and sent
    /// once more with a fresh token. The second answer is returned as is.
    async fn send_authorized<F>(&self, build: F) -> Result<Response, ProviderError>
    where
        F: Fn(&Session) -> Result<RequestBuilder, ProviderError>,
    {
        let session = self.ensure_session().await?;
        let resp = self.execute(
            build(&session)?.header(AUTH_TOKEN_HEADER, session.token.expose_secret())
        ).await?;

        if !matches!(resp.status(), StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
            return Ok(resp);
        }

        warn!("Cloud Files rejected the session token (HTTP {}), re-authenticating", resp.status().as_u16());
        self.sessions.invalidate().await;

        let session = self.ensure_session().await?;
        self.execute(
            build(&session)?.header(AUTH_TOKEN_HEADER, session.token.expose_secret())
        ).await
    }

    /// Headers of the object at `key`, None when it does not exist
    async fn head_object(&self, key: &str) -> Result<Option<HeaderMap>, ProviderError> {
        let resp = self.send_authorized(|s| {
            Ok(self.client.head(swift_url::object_url(&s.endpoint, self.container(), key)?))
        }).await?;

        match resp.status() {
            status if status.is_success() => Ok(Some(resp.headers().clone())),
            StatusCode::NOT_FOUND => Ok(None),
            _ => Err(unexpected_status(resp).await),
        }
    }

    async fn delete_object(&self, key: &str) -> Result<StatusCode, ProviderError> {
        let resp = self.send_authorized(|s| {
            Ok(self.client.delete(swift_url::object_url(&s.endpoint, self.container(), key)?))
        }).await?;
        Ok(resp.status())
    }

    /// Every listing record below `prefix`, following `marker` pagination
    async fn list_raw(&self, prefix: &str, delimited: bool) -> Result<Vec<RawRecord>, ProviderError> {
        let limit = self.config.page_size;
        let mut records = Vec::new();
        let mut marker: Option<String> = None;

        loop {
            let mut query = if delimited {
                ListingQuery::children(prefix, limit)
            } else {
                ListingQuery::recursive(prefix, limit)
            };
            query.marker = marker.as_deref();
            let resp = self.send_authorized(|s| {
                Ok(self.client
                    .get(swift_url::listing_url(&s.endpoint, self.container(), &query))
                    .header(ACCEPT, "application/json"))
            }).await?;

            match resp.status() {
                StatusCode::NO_CONTENT => break,
                StatusCode::NOT_FOUND => {
                    return Err(ProviderError::NotFound(format!("container {}", self.container())));
                }
                status if status.is_success() => {}
                _ => return Err(unexpected_status(resp).await),
            }

            let body = resp.bytes().await
                .map_err(|e| ProviderError::Network(e.to_string()))?;
            if body.iter().all(|b| b.is_ascii_whitespace()) {
                break;
            }

            let page = listing::parse_listing(&body).map_err(|e| ProviderError::Metadata {
                path: display_prefix(prefix),
                reason: format!("unreadable listing: {}", e),
            })?;

            let page_len = page.len();
            let next_marker = page.last().map(|r| r.key().to_string());
            records.extend(page);
            debug!("Cloud Files listing '{}': page of {} records ({} total)", prefix, page_len, records.len());

            match next_marker {
                Some(m) if page_len >= limit => marker = Some(m),
                _ => break,
            }
        }

        Ok(records)
    }

    // ─── Metadata ───────────────────────────────────────────────────────

    async fn metadata_file(&self, logical: &LogicalPath) -> Result<Entry, ProviderError> {
        match self.head_object(&logical.key).await? {
            Some(headers) => Ok(listing::entry_from_head(&logical.key, &headers)),
            None => Err(ProviderError::NotFound(logical.display())),
        }
    }

    async fn metadata_folder(&self, logical: &LogicalPath) -> Result<Vec<Entry>, ProviderError> {
        let prefix = logical.prefix();
        let records = self.list_raw(&prefix, true).await?;

        let own_marker = !logical.is_root() && records.iter().any(|r| {
            matches!(r, RawRecord::Object(obj) if obj.name == prefix)
        });
        let entries = listing::normalize(records, &prefix);

        if !entries.is_empty() || logical.is_root() || own_marker {
            return Ok(entries);
        }

        // Nothing listed: either an empty folder kept alive by a marker
        // object, or no folder at all.
        match self.head_object(&logical.key).await? {
            None => Err(ProviderError::NotFound(logical.display())),
            Some(headers) => {
                if listing::head_content_type(&headers).is_some_and(listing::is_directory_content_type) {
                    Ok(Vec::new())
                } else {
                    Err(ProviderError::Metadata {
                        path: logical.display(),
                        reason: "not a folder".to_string(),
                    })
                }
            }
        }
    }

    // ─── Delete ─────────────────────────────────────────────────────────

    async fn delete_file(&self, logical: &LogicalPath) -> Result<(), ProviderError> {
        match self.delete_object(&logical.key).await? {
            status if status.is_success() => {
                info!("Cloud Files deleted {} for '{}'", logical.key, self.auth.name);
                Ok(())
            }
            StatusCode::NOT_FOUND => Err(ProviderError::NotFound(logical.display())),
            status => Err(ProviderError::Delete { path: logical.display(), status: status.as_u16() }),
        }
    }

    async fn delete_folder(&self, logical: &LogicalPath) -> Result<(), ProviderError> {
        if logical.is_root() {
            return Err(ProviderError::InvalidPath("refusing to delete the container root".to_string()));
        }

        let prefix = logical.prefix();
        let objects: Vec<String> = self.list_raw(&prefix, false).await?
            .into_iter()
            .filter_map(|record| match record {
                RawRecord::Object(obj) => Some(obj.name),
                RawRecord::Subdir { .. } => None,
            })
            .collect();

        for key in &objects {
            match self.delete_object(key).await? {
                status if status.is_success() || status == StatusCode::NOT_FOUND => {}
                status => return Err(ProviderError::Delete { path: key.clone(), status: status.as_u16() }),
            }
        }

        // The marker may live at the bare key; a plain object there is not ours.
        let marker = self.head_object(&logical.key).await?
            .filter(|h| listing::head_content_type(h).is_some_and(listing::is_directory_content_type));
        let marker_deleted = match marker {
            Some(_) => match self.delete_object(&logical.key).await? {
                status if status.is_success() => true,
                StatusCode::NOT_FOUND => false,
                status => return Err(ProviderError::Delete { path: logical.display(), status: status.as_u16() }),
            },
            None => false,
        };

        if objects.is_empty() && !marker_deleted {
            return Err(ProviderError::NotFound(logical.display()));
        }

        info!("Cloud Files deleted folder {} ({} objects) for '{}'", prefix, objects.len(), self.auth.name);
        Ok(())
    }
}

/// Map a non-2xx response nobody expected to `ProviderError::Provider`
async fn unexpected_status(resp: Response) -> ProviderError {
    let status = resp.status().as_u16();
    let body = resp.text().await.unwrap_or_default();
    ProviderError::Provider { status, body: sanitize_api_error(&body) }
}

fn display_prefix(prefix: &str) -> String {
    if prefix.is_empty() { "/".to_string() } else { prefix.to_string() }
}

fn strip_etag(value: &str) -> &str {
    value.trim().trim_matches('"')
}

#[async_trait]
impl StorageProvider for CloudFilesProvider {
    fn display_name(&self) -> String {
        format!("Cloud Files ({}/{})", self.config.credentials.region, self.config.settings.container)
    }

    async fn metadata(&self, path: &str) -> Result<Metadata, ProviderError> {
        let logical = LogicalPath::parse(path)?;
        if logical.is_folder {
            self.metadata_folder(&logical).await.map(Metadata::Folder)
        } else {
            self.metadata_file(&logical).await.map(Metadata::File)
        }
    }

    async fn download(&self, path: &str, accept_url: bool) -> Result<Download, ProviderError> {
        let logical = LogicalPath::parse(path)?;
        if logical.is_folder {
            return Err(ProviderError::InvalidPath(format!("cannot download folder {}", path)));
        }

        let url = self.generate_temp_url(path, "GET", self.config.temp_url_secs).await?;
        if accept_url {
            debug!("Cloud Files handing out temp URL for {}", logical.key);
            return Ok(Download::Url(url));
        }

        // The signature authorizes the request, no token is sent. A rejected
        // signature means the account key changed under the cached session.
        let mut resp = self.execute(self.client.get(&url)).await?;
        if matches!(resp.status(), StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
            warn!("Cloud Files rejected the temp URL for {} (HTTP {}), refreshing session", logical.key, resp.status().as_u16());
            self.sessions.invalidate().await;
            let url = self.generate_temp_url(path, "GET", self.config.temp_url_secs).await?;
            resp = self.execute(self.client.get(&url)).await?;
        }

        match resp.status() {
            status if status.is_success() => Ok(Download::Stream(ObjectStream::new(resp))),
            StatusCode::NOT_FOUND => Err(ProviderError::Download { path: logical.display(), status: 404 }),
            _ => Err(unexpected_status(resp).await),
        }
    }

    async fn upload(&self, path: &str, data: bytes::Bytes) -> Result<(Entry, bool), ProviderError> {
        let logical = LogicalPath::parse(path)?;
        if logical.is_folder {
            return Err(ProviderError::InvalidPath(format!("cannot upload to folder path {}", path)));
        }

        let existed = self.head_object(&logical.key).await?.is_some();
        let checksum = hex::encode(Md5::digest(&data));
        let content_type = mime_guess::from_path(&logical.key).first_or_octet_stream().to_string();

        let resp = self.send_authorized(|s| {
            Ok(self.client
                .put(swift_url::object_url(&s.endpoint, self.container(), &logical.key)?)
                .header(ETAG, checksum.as_str())
                .header(CONTENT_TYPE, content_type.as_str())
                .body(data.clone()))
        }).await?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(ProviderError::Upload {
                path: logical.display(),
                reason: format!("HTTP {}: {}", status, sanitize_api_error(&body)),
            });
        }

        if let Some(returned) = resp.headers().get(ETAG).and_then(|v| v.to_str().ok()) {
            if !strip_etag(returned).eq_ignore_ascii_case(&checksum) {
                return Err(ProviderError::Upload {
                    path: logical.display(),
                    reason: format!("checksum mismatch: sent {}, stored {}", checksum, strip_etag(returned)),
                });
            }
        }

        let entry = match self.head_object(&logical.key).await? {
            Some(headers) => listing::entry_from_head(&logical.key, &headers),
            None => {
                return Err(ProviderError::Upload {
                    path: logical.display(),
                    reason: "object missing after upload".to_string(),
                });
            }
        };

        info!(
            "Cloud Files uploaded {} ({} bytes, created={}) for '{}'",
            logical.key, data.len(), !existed, self.auth.name
        );
        Ok((entry, !existed))
    }

    async fn create_folder(&self, path: &str) -> Result<Entry, ProviderError> {
        let logical = LogicalPath::parse(path)?;
        if !logical.is_folder || logical.is_root() {
            return Err(ProviderError::InvalidPath(format!("not a folder path: {}", path)));
        }

        if self.head_object(&logical.key).await?.is_some() {
            return Err(ProviderError::AlreadyExists(logical.display()));
        }

        let resp = self.send_authorized(|s| {
            Ok(self.client
                .put(swift_url::object_url(&s.endpoint, self.container(), &logical.key)?)
                .header(CONTENT_TYPE, DIRECTORY_CONTENT_TYPE)
                .body(Vec::<u8>::new()))
        }).await?;

        if !resp.status().is_success() {
            return Err(unexpected_status(resp).await);
        }

        info!("Cloud Files created folder {} for '{}'", logical.display(), self.auth.name);
        let mut entry = Entry::folder(&logical.key);
        entry.content_type = Some(DIRECTORY_CONTENT_TYPE.to_string());
        Ok(entry)
    }

    async fn delete(&self, path: &str) -> Result<(), ProviderError> {
        let logical = LogicalPath::parse(path)?;
        if logical.is_folder {
            self.delete_folder(&logical).await
        } else {
            self.delete_file(&logical).await
        }
    }

    fn supports_temp_urls(&self) -> bool {
        true
    }

    async fn create_temp_url(
        &self,
        path: &str,
        method: &str,
        expires_in_secs: u64,
    ) -> Result<String, ProviderError> {
        self.generate_temp_url(path, method, expires_in_secs).await
    }
}
