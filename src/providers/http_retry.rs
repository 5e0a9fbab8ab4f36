//! Throttling-aware HTTP send.
//!
//! `send_with_retry()` replaces `client.execute(request)` for every call the
//! provider makes. Swift answers overload with 429, 498 (ratelimit
//! middleware) or 503; those are retried with exponential backoff and jitter,
//! honouring `Retry-After` when present. Every other status is handed back
//! untouched so the caller can map it.

use reqwest::{Client, Request, Response};
use std::time::Duration;

/// Configuration for HTTP retry behavior
#[derive(Debug, Clone)]
pub struct HttpRetryConfig {
    /// Maximum number of retry attempts (default: 3)
    pub max_retries: u32,
    /// Base delay in milliseconds for exponential backoff (default: 1000)
    pub base_delay_ms: u64,
    /// Maximum delay cap in milliseconds (default: 30000)
    pub max_delay_ms: u64,
    /// Backoff multiplier (default: 2.0)
    pub backoff_multiplier: f64,
}

impl Default for HttpRetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
            backoff_multiplier: 2.0,
        }
    }
}

impl HttpRetryConfig {
    /// No retries at all
    pub fn disabled() -> Self {
        Self { max_retries: 0, ..Self::default() }
    }
}

/// Swift throttling answers: 429, 498 (ratelimit middleware), 503
fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 498 | 503)
}

/// Parse Retry-After header value (seconds form only)
fn parse_retry_after(response: &Response) -> Option<Duration> {
    let value = response.headers().get("retry-after")?.to_str().ok()?;
    // HTTP-date values are not parsed; Swift proxies send seconds
    let secs = value.trim().parse::<u64>().ok()?;
    Some(Duration::from_secs(secs.min(300))) // Cap at 5 minutes
}

/// Delay for a given retry attempt, with 10-30% jitter
fn calculate_delay(attempt: u32, config: &HttpRetryConfig) -> Duration {
    let base = config.base_delay_ms as f64 * config.backoff_multiplier.powi(attempt as i32);
    let capped = base.min(config.max_delay_ms as f64);
    // 10-30% jitter so throttled clients do not retry in lockstep
    let jitter = capped * (0.1 + rand::random::<f64>() * 0.2);
    Duration::from_millis((capped + jitter) as u64)
}

/// Send an HTTP request, retrying throttled responses.
///
/// The request is rebuilt from its method, URL, headers and byte body for
/// each retry; streaming bodies are not supported here.
pub async fn send_with_retry(
    client: &Client,
    request: Request,
    config: &HttpRetryConfig,
) -> Result<Response, reqwest::Error> {
    // Keep the request parts, `execute` consumes the request
    let method = request.method().clone();
    let url = request.url().clone();
    let headers = request.headers().clone();
    let body_bytes = request.body()
        .and_then(|b| b.as_bytes())
        .map(|b| b.to_vec());

    let mut last_response = client.execute(request).await?;

    for attempt in 0..config.max_retries {
        if !is_retryable_status(last_response.status().as_u16()) {
            return Ok(last_response);
        }

        // Prefer Retry-After, fall back to exponential backoff
        let delay = parse_retry_after(&last_response)
            .unwrap_or_else(|| calculate_delay(attempt, config));

        tracing::debug!(
            "HTTP {} {} throttled ({}). Retry {}/{} after {:?}",
            method, url.path(), last_response.status(), attempt + 1, config.max_retries, delay
        );

        tokio::time::sleep(delay).await;

        // Rebuild request for retry
        let mut retry_req = client.request(method.clone(), url.clone()).headers(headers.clone());
        if let Some(ref body) = body_bytes {
            retry_req = retry_req.body(body.clone());
        }

        last_response = retry_req.send().await?;
    }

    Ok(last_response)
}
