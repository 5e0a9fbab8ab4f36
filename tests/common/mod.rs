//! In-process mock of the Swift / identity v2.0 API.
//!
//! Routes mirror the real service:
//!   - `POST   /v2.0/tokens`                         identity exchange
//!   - `HEAD   /v1/{account}`                        account metadata (temp URL key)
//!   - `GET    /v1/{account}/{container}`            JSON listing (prefix, delimiter, marker, limit)
//!   - `HEAD|GET|PUT|DELETE /v1/{account}/{container}/{*key}`  objects
//!
//! Object GETs accept either a valid token or a valid temp URL signature.

#![allow(dead_code)]

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, HeaderMap, HeaderValue, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::{get, head, post},
    Json, Router,
};
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use cloudfiles::providers::{
    AuthContext, Clock, CloudFilesConfig, CloudFilesProvider, Credentials, HttpRetryConfig, Settings,
};
use hmac::{Hmac, Mac};
use md5::{Digest, Md5};
use serde_json::{json, Value};
use sha1::Sha1;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};

pub const USERNAME: &str = "prince";
pub const API_KEY: &str = "revolutionary";
pub const REGION: &str = "iad";
pub const ACCOUNT: &str = "MossoCloudFS_926294";
pub const CONTAINER: &str = "purple rain";
pub const TEMP_URL_KEY: &str = "temporary beret";

#[derive(Debug, Clone)]
pub struct StoredObject {
    pub data: Vec<u8>,
    pub content_type: String,
    pub etag: String,
    pub last_modified: DateTime<Utc>,
}

/// Answer `status` instead of handling the next `remaining` matching requests
#[derive(Debug, Clone)]
pub struct Injection {
    pub method: Method,
    /// Matched against the end of the raw request path
    pub path_suffix: String,
    pub status: u16,
    pub remaining: usize,
}

pub struct SwiftState {
    pub base_url: String,
    pub objects: BTreeMap<String, StoredObject>,
    /// Verbatim (status, body) answers for listings, keyed by prefix
    pub listing_overrides: HashMap<String, (u16, String)>,
    pub injections: Vec<Injection>,
    pub valid_tokens: HashSet<String>,
    pub issued_tokens: usize,
    pub auth_calls: usize,
    pub reject_auth: bool,
    pub token_ttl: Duration,
    pub temp_url_key: Option<String>,
    pub corrupt_etag: bool,
    /// "METHOD /path?query" of every request, in arrival order
    pub requests: Vec<String>,
}

#[derive(Clone)]
pub struct MockSwift {
    state: Arc<Mutex<SwiftState>>,
}

impl MockSwift {
    pub async fn start() -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let mock = MockSwift {
            state: Arc::new(Mutex::new(SwiftState {
                base_url: format!("http://{}", addr),
                objects: BTreeMap::new(),
                listing_overrides: HashMap::new(),
                injections: Vec::new(),
                valid_tokens: HashSet::new(),
                issued_tokens: 0,
                auth_calls: 0,
                reject_auth: false,
                token_ttl: Duration::hours(24),
                temp_url_key: Some(TEMP_URL_KEY.to_string()),
                corrupt_etag: false,
                requests: Vec::new(),
            })),
        };

        let app = Router::new()
            .route("/v2.0/tokens", post(identity))
            .route("/v1/{account}", head(account_head))
            .route("/v1/{account}/{container}", get(list_container))
            .route(
                "/v1/{account}/{container}/{*key}",
                get(get_object)
                    .head(head_object)
                    .put(put_object)
                    .delete(delete_object),
            )
            .with_state(mock.clone());

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        mock
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut SwiftState) -> R) -> R {
        f(&mut self.state.lock().unwrap())
    }

    pub fn base_url(&self) -> String {
        self.with(|s| s.base_url.clone())
    }

    pub fn endpoint(&self) -> String {
        format!("{}/v1/{}", self.base_url(), ACCOUNT)
    }

    pub fn auth_calls(&self) -> usize {
        self.with(|s| s.auth_calls)
    }

    pub fn requests(&self) -> Vec<String> {
        self.with(|s| s.requests.clone())
    }

    /// Requests whose "METHOD path" line starts with `prefix`
    pub fn count_requests(&self, prefix: &str) -> usize {
        self.requests().iter().filter(|r| r.starts_with(prefix)).count()
    }

    pub fn clear_requests(&self) {
        self.with(|s| s.requests.clear());
    }

    pub fn put(&self, key: &str, content_type: &str, data: &[u8]) {
        let object = StoredObject {
            data: data.to_vec(),
            content_type: content_type.to_string(),
            etag: hex::encode(Md5::digest(data)),
            last_modified: Utc::now(),
        };
        self.with(|s| s.objects.insert(key.to_string(), object));
    }

    pub fn put_marker(&self, key: &str) {
        self.put(key, "application/directory", b"");
    }

    pub fn object(&self, key: &str) -> Option<StoredObject> {
        self.with(|s| s.objects.get(key).cloned())
    }

    pub fn keys(&self) -> Vec<String> {
        self.with(|s| s.objects.keys().cloned().collect())
    }

    pub fn override_listing(&self, prefix: &str, status: u16, body: impl Into<String>) {
        self.with(|s| s.listing_overrides.insert(prefix.to_string(), (status, body.into())));
    }

    pub fn inject(&self, method: Method, path_suffix: &str, status: u16, times: usize) {
        self.with(|s| s.injections.push(Injection {
            method,
            path_suffix: path_suffix.to_string(),
            status,
            remaining: times,
        }));
    }

    /// Invalidate every token handed out so far
    pub fn revoke_tokens(&self) {
        self.with(|s| s.valid_tokens.clear());
    }

    /// level1/level2/file2.txt, an empty level1_empty/ and two similarly named files
    pub fn seed_fixture(&self) {
        self.put_marker("level1");
        self.put_marker("level1/level2");
        self.put("level1/level2/file2.txt", "text/plain", &vec![b'x'; 1365]);
        self.put("level1_empty", "application/directory", b"");
        self.put("similar", "application/x-www-form-urlencoded;charset=utf-8", &[b's'; 190]);
        self.put("similar.file", "application/x-www-form-urlencoded;charset=utf-8", &[b's'; 190]);
    }

    fn record(&self, method: &Method, uri: &Uri) {
        self.with(|s| s.requests.push(format!("{} {}", method, uri)));
    }

    fn injected(&self, method: &Method, uri: &Uri) -> Option<Response> {
        self.with(|s| {
            let hit = s.injections.iter_mut().find(|i| {
                i.remaining > 0 && i.method == *method && uri.path().ends_with(&i.path_suffix)
            })?;
            hit.remaining -= 1;
            let status = StatusCode::from_u16(hit.status).unwrap();
            let mut resp = (status, format!("injected {}", hit.status)).into_response();
            if status == StatusCode::SERVICE_UNAVAILABLE || status == StatusCode::TOO_MANY_REQUESTS {
                resp.headers_mut().insert(header::RETRY_AFTER, HeaderValue::from_static("0"));
            }
            Some(resp)
        })
    }

    fn authorized(&self, headers: &HeaderMap) -> bool {
        let token = headers.get("x-auth-token").and_then(|v| v.to_str().ok());
        self.with(|s| token.is_some_and(|t| s.valid_tokens.contains(t)))
    }

    fn valid_signature(&self, uri: &Uri, params: &HashMap<String, String>) -> bool {
        let (Some(sig), Some(expires)) = (params.get("temp_url_sig"), params.get("temp_url_expires")) else {
            return false;
        };
        let Some(key) = self.with(|s| s.temp_url_key.clone()) else {
            return false;
        };
        let Ok(expires_at) = expires.parse::<i64>() else {
            return false;
        };
        if expires_at < Utc::now().timestamp() {
            return false;
        }
        let mut mac = Hmac::<Sha1>::new_from_slice(key.as_bytes()).unwrap();
        mac.update(format!("GET\n{}\n{}", expires_at, uri.path()).as_bytes());
        hex::encode(mac.finalize().into_bytes()) == *sig
    }
}

// ─── Handlers ───────────────────────────────────────────────────────────

async fn identity(State(mock): State<MockSwift>, method: Method, uri: Uri, body: Bytes) -> Response {
    mock.record(&method, &uri);
    if let Some(resp) = mock.injected(&method, &uri) {
        return resp;
    }

    let request: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    let creds = &request["auth"]["RAX-KSKEY:apiKeyCredentials"];

    let issued = mock.with(|s| {
        s.auth_calls += 1;
        if s.reject_auth || creds["username"] != USERNAME || creds["apiKey"] != API_KEY {
            return None;
        }
        s.issued_tokens += 1;
        let token = format!("token-{}", s.issued_tokens);
        s.valid_tokens.insert(token.clone());
        Some((token, Utc::now() + s.token_ttl, s.base_url.clone()))
    });

    let Some((token, expires, base_url)) = issued else {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"unauthorized": {"code": 401, "message": "Username or api key is invalid."}})),
        )
            .into_response();
    };

    Json(json!({
        "access": {
            "token": {
                "id": token,
                "expires": expires.to_rfc3339_opts(SecondsFormat::Millis, true),
                "RAX-AUTH:authenticatedBy": ["APIKEY"]
            },
            "serviceCatalog": [
                {
                    "name": "cloudFilesCDN",
                    "type": "rax:object-cdn",
                    "endpoints": [{ "region": "IAD", "publicURL": "http://cdn.invalid/v1/x" }]
                },
                {
                    "name": "cloudFiles",
                    "type": "object-store",
                    "endpoints": [
                        { "region": "DFW", "publicURL": format!("{}/v1/DFW_{}", base_url, ACCOUNT) },
                        { "region": "IAD", "publicURL": format!("{}/v1/{}", base_url, ACCOUNT) }
                    ]
                }
            ],
            "user": { "name": USERNAME }
        }
    }))
    .into_response()
}

async fn account_head(
    State(mock): State<MockSwift>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    mock.record(&method, &uri);
    if let Some(resp) = mock.injected(&method, &uri) {
        return resp;
    }
    if !mock.authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }

    let mut resp = StatusCode::NO_CONTENT.into_response();
    if let Some(key) = mock.with(|s| s.temp_url_key.clone()) {
        resp.headers_mut().insert(
            "X-Account-Meta-Temp-URL-Key",
            HeaderValue::from_str(&key).unwrap(),
        );
    }
    resp
}

fn object_record(name: &str, object: &StoredObject) -> Value {
    json!({
        "name": name,
        "content_type": object.content_type,
        "bytes": object.data.len(),
        "hash": object.etag,
        "last_modified": object.last_modified.format("%Y-%m-%dT%H:%M:%S%.6f").to_string(),
    })
}

/// Swift listing semantics over the sorted object map
fn compute_listing(
    objects: &BTreeMap<String, StoredObject>,
    prefix: &str,
    delimiter: Option<&str>,
    marker: Option<&str>,
    limit: usize,
) -> Vec<Value> {
    let mut records: Vec<(String, Value)> = Vec::new();
    let mut last_subdir: Option<String> = None;

    for (name, object) in objects.range(prefix.to_string()..) {
        if !name.starts_with(prefix) {
            break;
        }
        if let Some(delimiter) = delimiter {
            let rest = &name[prefix.len()..];
            if let Some(idx) = rest.find(delimiter) {
                let subdir = format!("{}{}", prefix, &rest[..idx + delimiter.len()]);
                if last_subdir.as_deref() != Some(subdir.as_str()) {
                    records.push((subdir.clone(), json!({ "subdir": subdir })));
                    last_subdir = Some(subdir);
                }
                continue;
            }
        }
        records.push((name.clone(), object_record(name, object)));
    }

    records
        .into_iter()
        .filter(|(key, _)| marker.map_or(true, |m| key.as_str() > m))
        .take(limit)
        .map(|(_, record)| record)
        .collect()
}

async fn list_container(
    State(mock): State<MockSwift>,
    Path((_account, container)): Path<(String, String)>,
    Query(params): Query<HashMap<String, String>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    mock.record(&method, &uri);
    if let Some(resp) = mock.injected(&method, &uri) {
        return resp;
    }
    if !mock.authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    if container != CONTAINER {
        return StatusCode::NOT_FOUND.into_response();
    }

    let prefix = params.get("prefix").cloned().unwrap_or_default();
    if let Some((status, body)) = mock.with(|s| s.listing_overrides.get(&prefix).cloned()) {
        return (StatusCode::from_u16(status).unwrap(), body).into_response();
    }

    let limit = params.get("limit").and_then(|l| l.parse().ok()).unwrap_or(10_000);
    let records = mock.with(|s| {
        compute_listing(
            &s.objects,
            &prefix,
            params.get("delimiter").map(String::as_str),
            params.get("marker").map(String::as_str),
            limit,
        )
    });

    if records.is_empty() {
        return StatusCode::NO_CONTENT.into_response();
    }
    Json(records).into_response()
}

fn object_headers(object: &StoredObject) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_str(&object.content_type).unwrap());
    headers.insert(header::ETAG, HeaderValue::from_str(&object.etag).unwrap());
    headers.insert(
        header::LAST_MODIFIED,
        HeaderValue::from_str(&object.last_modified.format("%a, %d %b %Y %H:%M:%S GMT").to_string()).unwrap(),
    );
    headers
}

async fn head_object(
    State(mock): State<MockSwift>,
    Path((_account, _container, key)): Path<(String, String, String)>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    mock.record(&method, &uri);
    if let Some(resp) = mock.injected(&method, &uri) {
        return resp;
    }
    if !mock.authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    match mock.object(&key) {
        Some(object) => (StatusCode::OK, object_headers(&object)).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn get_object(
    State(mock): State<MockSwift>,
    Path((_account, _container, key)): Path<(String, String, String)>,
    Query(params): Query<HashMap<String, String>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    mock.record(&method, &uri);
    if let Some(resp) = mock.injected(&method, &uri) {
        return resp;
    }
    if !mock.authorized(&headers) && !mock.valid_signature(&uri, &params) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    match mock.object(&key) {
        Some(object) => (StatusCode::OK, object_headers(&object), object.data).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn put_object(
    State(mock): State<MockSwift>,
    Path((_account, _container, key)): Path<(String, String, String)>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    mock.record(&method, &uri);
    if let Some(resp) = mock.injected(&method, &uri) {
        return resp;
    }
    if !mock.authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }

    let etag = hex::encode(Md5::digest(&body));
    if let Some(expected) = headers.get(header::ETAG).and_then(|v| v.to_str().ok()) {
        if !expected.eq_ignore_ascii_case(&etag) {
            return StatusCode::UNPROCESSABLE_ENTITY.into_response();
        }
    }

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/octet-stream")
        .to_string();
    let corrupt = mock.with(|s| {
        s.objects.insert(key, StoredObject {
            data: body.to_vec(),
            content_type,
            etag: etag.clone(),
            last_modified: Utc::now(),
        });
        s.corrupt_etag
    });

    let returned = if corrupt { "0123456789abcdef0123456789abcdef".to_string() } else { etag };
    let mut resp = StatusCode::CREATED.into_response();
    resp.headers_mut().insert(header::ETAG, HeaderValue::from_str(&returned).unwrap());
    resp
}

async fn delete_object(
    State(mock): State<MockSwift>,
    Path((_account, _container, key)): Path<(String, String, String)>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    mock.record(&method, &uri);
    if let Some(resp) = mock.injected(&method, &uri) {
        return resp;
    }
    if !mock.authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    match mock.with(|s| s.objects.remove(&key)) {
        Some(_) => StatusCode::NO_CONTENT.into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

// ─── Provider Helpers ───────────────────────────────────────────────────

pub fn config(mock: &MockSwift) -> CloudFilesConfig {
    let mut config = CloudFilesConfig::new(
        Credentials {
            username: USERNAME.to_string(),
            api_key: API_KEY.to_string().into(),
            region: REGION.to_string(),
        },
        Settings { container: CONTAINER.to_string() },
    );
    config.auth_url = format!("{}/v2.0/tokens", mock.base_url());
    config.retry = HttpRetryConfig {
        max_retries: 2,
        base_delay_ms: 1,
        max_delay_ms: 5,
        backoff_multiplier: 2.0,
    };
    config
}

pub fn provider(mock: &MockSwift) -> CloudFilesProvider {
    CloudFilesProvider::new(auth_context(), config(mock))
}

pub fn auth_context() -> AuthContext {
    AuthContext { name: "tester".to_string(), email: Some("tester@example.com".to_string()) }
}

/// Manually advanced clock shared with a provider
#[derive(Clone)]
pub struct TestClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl TestClock {
    pub fn new() -> Self {
        Self { now: Arc::new(Mutex::new(Utc::now())) }
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock().unwrap() += by;
    }

    pub fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }

    pub fn clock(&self) -> Clock {
        let now = self.now.clone();
        Arc::new(move || *now.lock().unwrap())
    }
}
