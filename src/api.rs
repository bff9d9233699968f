//! Authenticated HTTP transport to the ebook-rs server.
//!
//! Two clients share one base URL: a metadata client for JSON calls and a
//! transfer client for book, placeholder and archive payloads. Each carries
//! its own stall timeout and wall-clock timeout, so a silent peer can never
//! hold the engine longer than the configured total.

use crate::config::{TimeoutConfig, TimeoutPair};
use crate::error::{Result, SyncError};
use reqwest::{Client, Method, Response, header};
use serde::de::DeserializeOwned;
use std::borrow::Cow;
use std::io::Write;

/// Paths that must not carry the bearer token.
const AUTH_PATHS: [&str; 2] = ["/api/auth/login", "/api/auth/register"];

/// Decoded response of a JSON call.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    /// HTTP status code (always 2xx here).
    pub status: u16,
    /// Parsed JSON body; `None` when the body was empty or not JSON.
    pub body: Option<serde_json::Value>,
}

impl ApiResponse {
    /// Decode the body strictly. Used by single-item endpoints.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        let body = self
            .body
            .clone()
            .ok_or_else(|| SyncError::Decode("empty or malformed response body".to_string()))?;
        serde_json::from_value(body).map_err(|e| SyncError::Decode(e.to_string()))
    }

    /// Decode the body, treating any failure as an empty payload.
    /// Used by list endpoints.
    pub fn decode_or_default<T: DeserializeOwned + Default>(&self) -> T {
        match self.decode() {
            Ok(value) => value,
            Err(e) => {
                tracing::debug!(error = %e, "Lenient decode fell back to empty payload");
                T::default()
            }
        }
    }
}

/// HTTP client for the sync API.
#[derive(Clone)]
pub struct ApiClient {
    base_url: String,
    token: Option<String>,
    metadata: Client,
    transfer: Client,
}

impl ApiClient {
    /// Create a client for the given server.
    pub fn new(base_url: &str, timeouts: &TimeoutConfig) -> Result<Self> {
        let base_url = base_url.trim().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(SyncError::Config("No server configured".to_string()));
        }
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(SyncError::Config(format!(
                "Server URL must start with http:// or https://: {}",
                base_url
            )));
        }

        Ok(Self {
            base_url,
            token: None,
            metadata: build_client(&timeouts.metadata)?,
            transfer: build_client(&timeouts.transfer)?,
        })
    }

    /// Server base URL without trailing slash.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Set or clear the bearer token.
    pub fn set_token(&mut self, token: Option<String>) {
        self.token = token;
    }

    /// Whether a bearer token is attached.
    pub fn has_token(&self) -> bool {
        self.token.is_some()
    }

    /// Percent-encode an identifier for use as a path segment.
    pub fn segment(id: &str) -> Cow<'_, str> {
        urlencoding::encode(id)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn request(&self, client: &Client, method: Method, path: &str) -> reqwest::RequestBuilder {
        let builder = client.request(method, self.url(path));
        match &self.token {
            Some(token) if !AUTH_PATHS.contains(&path) => builder.bearer_auth(token),
            _ => builder,
        }
    }

    /// Perform a JSON call with the metadata timeouts.
    pub async fn call(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<ApiResponse> {
        let mut builder = self.request(&self.metadata, method.clone(), path);
        if let Some(body) = body {
            builder = builder.json(body);
        }

        tracing::debug!(%method, path, "API call");

        let response = builder.send().await.map_err(network_error)?;
        let response = check_status(response).await?;
        let status = response.status().as_u16();
        let bytes = response.bytes().await.map_err(network_error)?;

        let body = if bytes.is_empty() {
            None
        } else {
            serde_json::from_slice(&bytes).ok()
        };

        Ok(ApiResponse { status, body })
    }

    /// Stream a payload into `out` with the transfer timeouts.
    /// Returns the number of bytes written.
    pub async fn download_to(&self, path: &str, out: &mut impl Write) -> Result<u64> {
        tracing::debug!(path, "Downloading payload");

        let response = self
            .request(&self.transfer, Method::GET, path)
            .send()
            .await
            .map_err(network_error)?;
        let mut response = check_status(response).await?;

        let mut written = 0u64;
        while let Some(chunk) = response.chunk().await.map_err(network_error)? {
            out.write_all(&chunk)?;
            written += chunk.len() as u64;
        }
        out.flush()?;

        Ok(written)
    }

    /// Upload raw bytes with the transfer timeouts.
    pub async fn upload(&self, path: &str, data: Vec<u8>, content_type: &str) -> Result<()> {
        tracing::debug!(path, bytes = data.len(), "Uploading payload");

        let response = self
            .request(&self.transfer, Method::PUT, path)
            .header(header::CONTENT_TYPE, content_type)
            .body(data)
            .send()
            .await
            .map_err(network_error)?;
        check_status(response).await?;
        Ok(())
    }
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.base_url)
            .field("authenticated", &self.token.is_some())
            .finish_non_exhaustive()
    }
}

fn build_client(timeouts: &TimeoutPair) -> Result<Client> {
    Client::builder()
        .connect_timeout(timeouts.block())
        .read_timeout(timeouts.block())
        .timeout(timeouts.total())
        .user_agent(concat!("cloudreader-sync/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| SyncError::Config(format!("Failed to build HTTP client: {}", e)))
}

/// Transport failures never reached the server or lost the response.
fn network_error(e: reqwest::Error) -> SyncError {
    SyncError::Network(e.to_string())
}

/// Turn a non-2xx response into an `Http` error.
async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = error_message(status.as_u16(), &body);
    tracing::debug!(status = status.as_u16(), %message, "Server returned an error");

    Err(SyncError::Http {
        status: status.as_u16(),
        message,
    })
}

/// Message from a JSON `error` field, or `HTTP <status>`.
pub(crate) fn error_message(status: u16, body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(str::to_string))
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| format!("HTTP {}", status))
}
