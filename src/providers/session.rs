//! Credential/Token Manager.
//!
//! Authenticates against the identity service, picks the object-store
//! endpoint for the configured region, fetches the account's temp-URL key
//! and caches the result as a `Session`. The manager is the only writer of
//! the session; callers get cloned values.

use chrono::{DateTime, Utc};
use reqwest::header::CONTENT_TYPE;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::{sanitize_api_error, send_with_retry, Credentials, HttpRetryConfig, ProviderError};

/// Sessions are renewed this long before the identity service expires them
pub const REAUTH_MARGIN_SECS: i64 = 3600;

/// Account header carrying the temp-URL signing key
pub const TEMP_URL_KEY_HEADER: &str = "X-Account-Meta-Temp-URL-Key";

/// Header carrying the session token on authenticated requests
pub const AUTH_TOKEN_HEADER: &str = "X-Auth-Token";

/// Source of "now"; swapped out in tests
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

pub fn system_clock() -> Clock {
    Arc::new(Utc::now)
}

/// Authenticated state of one provider instance
#[derive(Clone)]
pub struct Session {
    pub token: SecretString,
    /// Object-store base URL for the credential region
    pub endpoint: String,
    pub temp_url_key: SecretString,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    /// Expired once `now` is within the re-auth margin of `expires_at`
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at - chrono::Duration::seconds(REAUTH_MARGIN_SECS)
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("endpoint", &self.endpoint)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

// ─── Identity Types ─────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct IdentityResponse {
    access: Access,
}

#[derive(Debug, Deserialize)]
struct Access {
    token: TokenInfo,
    #[serde(rename = "serviceCatalog", default)]
    service_catalog: Vec<CatalogService>,
}

#[derive(Debug, Deserialize)]
struct TokenInfo {
    id: String,
    expires: String,
}

#[derive(Debug, Deserialize)]
struct CatalogService {
    #[serde(default)]
    name: String,
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    endpoints: Vec<CatalogEndpoint>,
}

#[derive(Debug, Deserialize)]
struct CatalogEndpoint {
    region: Option<String>,
    #[serde(rename = "publicURL")]
    public_url: String,
}

/// Object-store endpoint for `region` (case-insensitive)
fn select_endpoint(catalog: &[CatalogService], region: &str) -> Result<String, ProviderError> {
    catalog.iter()
        .filter(|service| service.kind == "object-store" || service.name == "cloudFiles")
        .flat_map(|service| service.endpoints.iter())
        .find(|ep| ep.region.as_deref().is_some_and(|r| r.eq_ignore_ascii_case(region)))
        .map(|ep| ep.public_url.trim_end_matches('/').to_string())
        .ok_or_else(|| ProviderError::RegionNotFound(region.to_string()))
}

fn identity_request_body(credentials: &Credentials) -> serde_json::Value {
    serde_json::json!({
        "auth": {
            "RAX-KSKEY:apiKeyCredentials": {
                "username": credentials.username,
                "apiKey": credentials.api_key.expose_secret(),
            }
        }
    })
}

/// True when `slot` is empty or still carries the token `seen` earlier
fn holds_token(slot: &Option<Session>, seen: Option<&str>) -> bool {
    match (slot, seen) {
        (None, _) => true,
        (Some(current), Some(seen)) => current.token.expose_secret() == seen,
        (Some(_), None) => false,
    }
}

// ─── Manager ────────────────────────────────────────────────────────────

pub struct SessionManager {
    client: reqwest::Client,
    auth_url: String,
    credentials: Credentials,
    retry: HttpRetryConfig,
    clock: Clock,
    session: RwLock<Option<Session>>,
}

impl SessionManager {
    pub fn new(
        client: reqwest::Client,
        auth_url: String,
        credentials: Credentials,
        retry: HttpRetryConfig,
        clock: Clock,
    ) -> Self {
        Self {
            client,
            auth_url,
            credentials,
            retry,
            clock,
            session: RwLock::new(None),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    /// The cached session if still valid, otherwise a freshly authenticated one.
    ///
    /// The lock is not held while talking to the identity service; two
    /// callers racing on an expired session may both authenticate.
    pub async fn ensure_session(&self) -> Result<Session, ProviderError> {
        let seen_token = match self.session.read().await.as_ref() {
            Some(session) if !session.is_expired(self.now()) => return Ok(session.clone()),
            Some(session) => {
                debug!("Cloud Files session expired at {}, re-authenticating", session.expires_at);
                Some(session.token.expose_secret().to_string())
            }
            None => None,
        };

        match self.authenticate().await {
            Ok(session) => {
                *self.session.write().await = Some(session.clone());
                Ok(session)
            }
            Err(e) => {
                // A concurrent caller may have stored a fresh session meanwhile
                let mut slot = self.session.write().await;
                if holds_token(&slot, seen_token.as_deref()) {
                    *slot = None;
                }
                Err(e)
            }
        }
    }

    /// Drop the cached session so the next call authenticates again
    pub async fn invalidate(&self) {
        *self.session.write().await = None;
    }

    async fn authenticate(&self) -> Result<Session, ProviderError> {
        info!("Cloud Files auth: user='{}', region='{}'", self.credentials.username, self.credentials.region);

        let request = self.client.post(&self.auth_url)
            .header(CONTENT_TYPE, "application/json")
            .body(identity_request_body(&self.credentials).to_string())
            .build()
            .map_err(|e| ProviderError::Authentication(format!("Failed to build request: {}", e)))?;

        let resp = send_with_retry(&self.client, request, &self.retry)
            .await
            .map_err(|e| ProviderError::Authentication(format!("Identity request failed: {}", e)))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(ProviderError::Authentication(
                format!("Identity service returned HTTP {}: {}", status.as_u16(), sanitize_api_error(&body))
            ));
        }

        let identity: IdentityResponse = resp.json().await
            .map_err(|e| ProviderError::Authentication(format!("Identity response parse failed: {}", e)))?;

        if identity.access.token.id.is_empty() {
            return Err(ProviderError::Authentication("Identity response carried no token".to_string()));
        }

        let endpoint = select_endpoint(&identity.access.service_catalog, &self.credentials.region)?;
        let expires_at = DateTime::parse_from_rfc3339(&identity.access.token.expires)
            .map_err(|e| ProviderError::Authentication(format!("Invalid token expiry: {}", e)))?
            .with_timezone(&Utc);
        let token = identity.access.token.id;

        let temp_url_key = self.fetch_temp_url_key(&endpoint, &token).await?;

        info!("Cloud Files session established: endpoint='{}', expires={}", endpoint, expires_at);
        Ok(Session {
            token: token.into(),
            endpoint,
            temp_url_key: temp_url_key.into(),
            expires_at,
        })
    }

    async fn fetch_temp_url_key(&self, endpoint: &str, token: &str) -> Result<String, ProviderError> {
        let request = self.client.head(endpoint)
            .header(AUTH_TOKEN_HEADER, token)
            .build()
            .map_err(|e| ProviderError::Authentication(format!("Failed to build request: {}", e)))?;

        let resp = send_with_retry(&self.client, request, &self.retry)
            .await
            .map_err(|e| ProviderError::Authentication(format!("Account HEAD failed: {}", e)))?;

        if !resp.status().is_success() {
            return Err(ProviderError::Authentication(
                format!("Account HEAD returned HTTP {}", resp.status().as_u16())
            ));
        }

        match resp.headers().get(TEMP_URL_KEY_HEADER).and_then(|v| v.to_str().ok()) {
            Some(key) if !key.is_empty() => Ok(key.to_string()),
            _ => {
                warn!("Cloud Files account has no temp URL key configured");
                Err(ProviderError::Provider {
                    status: 503,
                    body: "No temp url key is available".to_string(),
                })
            }
        }
    }
}
