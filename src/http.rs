//! HTTP fetch primitives for the plugin store.
//!
//! Redirects are followed up to a cap (an endless chain surfaces as a network
//! error). Status codes are classified the same way for every request:
//! 404 → `NotFound`, 403 with an exhausted quota or 429 → `RateLimited`,
//! other 403 → `Forbidden`, any other non-2xx → `Network`.

use crate::error::PluginError;
use futures_util::StreamExt;
use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use serde_json::Value;
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::debug;

const USER_AGENT: &str = "Noxa-Client";

#[derive(Debug, Clone)]
pub struct Fetcher {
    client: reqwest::Client,
}

impl Fetcher {
    pub fn new(timeout: Duration, max_redirects: usize) -> Result<Self, PluginError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::limited(max_redirects))
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| PluginError::Network(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self { client })
    }

    async fn get(&self, url: &str, accept: &str) -> Result<reqwest::Response, PluginError> {
        let parsed =
            url::Url::parse(url).map_err(|e| PluginError::Network(format!("Invalid URL {url}: {e}")))?;
        match parsed.scheme() {
            "http" | "https" => {}
            scheme => {
                return Err(PluginError::Network(format!(
                    "Scheme \"{scheme}\" is not allowed; use http or https"
                )));
            }
        }

        debug!(%url, "GET");
        let response = self
            .client
            .get(parsed)
            .header(reqwest::header::ACCEPT, accept)
            .send()
            .await
            .map_err(|e| transport_error(url, e))?;

        check_status(response.status(), response.headers(), url)?;
        Ok(response)
    }

    /// Fetch and parse a JSON document.
    pub async fn get_json(&self, url: &str) -> Result<Value, PluginError> {
        let response = self.get(url, "application/json").await?;
        response
            .json::<Value>()
            .await
            .map_err(|e| PluginError::Network(format!("Invalid JSON response from {url}: {e}")))
    }

    /// Fetch a body as text regardless of its content type.
    pub async fn get_text(&self, url: &str) -> Result<String, PluginError> {
        let response = self.get(url, "*/*").await?;
        response
            .text()
            .await
            .map_err(|e| transport_error(url, e))
    }

    /// Stream a body into `dest`. A failed transfer removes the partial file.
    pub async fn download_to(&self, url: &str, dest: &Path) -> Result<u64, PluginError> {
        let response = self.get(url, "*/*").await?;
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| PluginError::io(format!("Failed to create {}", parent.display()), e))?;
        }

        let result = stream_body(response, dest, url).await;
        if result.is_err() {
            let _ = tokio::fs::remove_file(dest).await;
        }
        result
    }
}

async fn stream_body(response: reqwest::Response, dest: &Path, url: &str) -> Result<u64, PluginError> {
    let mut file = tokio::fs::File::create(dest)
        .await
        .map_err(|e| PluginError::io(format!("Failed to create {}", dest.display()), e))?;
    let mut stream = response.bytes_stream();
    let mut written = 0u64;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| transport_error(url, e))?;
        file.write_all(&chunk)
            .await
            .map_err(|e| PluginError::io(format!("Failed to write {}", dest.display()), e))?;
        written += chunk.len() as u64;
    }
    file.flush()
        .await
        .map_err(|e| PluginError::io(format!("Failed to flush {}", dest.display()), e))?;
    Ok(written)
}

fn transport_error(url: &str, err: reqwest::Error) -> PluginError {
    if err.is_redirect() {
        PluginError::Network(format!("Too many redirects fetching {url}"))
    } else if err.is_timeout() {
        PluginError::Network(format!("Request to {url} timed out"))
    } else {
        PluginError::Network(format!("Request to {url} failed: {err}"))
    }
}

fn header_as_u64(headers: &HeaderMap, name: &str) -> Option<u64> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
}

/// Human-readable local time for a unix reset epoch.
fn describe_reset(reset_at: Option<u64>, retry_after: Option<u64>) -> String {
    if let Some(secs) = retry_after {
        return format!("in {secs}s");
    }
    reset_at
        .and_then(|epoch| chrono::DateTime::from_timestamp(i64::try_from(epoch).ok()?, 0))
        .map(|utc| format!("at {}", utc.with_timezone(&chrono::Local).format("%H:%M:%S")))
        .unwrap_or_else(|| "later".to_string())
}

/// Map an HTTP status (plus rate-limit headers) to the error taxonomy.
pub(crate) fn check_status(status: StatusCode, headers: &HeaderMap, url: &str) -> Result<(), PluginError> {
    if status.is_success() {
        return Ok(());
    }

    let remaining = header_as_u64(headers, "x-ratelimit-remaining");
    let reset_at = header_as_u64(headers, "x-ratelimit-reset");
    let retry_after = header_as_u64(headers, "retry-after");

    match status {
        StatusCode::NOT_FOUND => Err(PluginError::NotFound(format!(
            "{url} not found. Check that the resource exists and is public."
        ))),
        StatusCode::FORBIDDEN if remaining == Some(0) => Err(PluginError::RateLimited {
            message: format!("please try again {}", describe_reset(reset_at, retry_after)),
            reset_at,
            retry_after,
        }),
        StatusCode::TOO_MANY_REQUESTS => Err(PluginError::RateLimited {
            message: format!("too many requests, try again {}", describe_reset(reset_at, retry_after)),
            reset_at,
            retry_after,
        }),
        StatusCode::FORBIDDEN => Err(PluginError::Forbidden(format!(
            "{url} refused access. The resource may be private or not exist."
        ))),
        other => Err(PluginError::Network(format!("{url} returned status {other}"))),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
