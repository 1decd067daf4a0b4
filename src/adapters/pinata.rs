//! Pinata pinning service adapter.
//!
//! Writes go through `pinFileToIPFS` as a multipart upload; reads go through
//! an IPFS HTTP gateway. HTTP status codes are classified into transient and
//! permanent failures so callers can decide whether to retry.

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::ContentStore;
use crate::domain::ContentId;
use crate::error::{Error, Result};

/// Default Pinata API endpoint
pub const DEFAULT_API_URL: &str = "https://api.pinata.cloud";

/// Default public gateway used for reads
pub const DEFAULT_GATEWAY_URL: &str = "https://gateway.pinata.cloud";

/// Pinata credentials: a JWT or an API key pair
#[derive(Clone, PartialEq, Eq)]
pub enum PinataCredentials {
    Jwt(String),
    KeyPair { api_key: String, secret: String },
}

impl std::fmt::Debug for PinataCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PinataCredentials::Jwt(_) => f.write_str("Jwt(<redacted>)"),
            PinataCredentials::KeyPair { api_key, .. } => f
                .debug_struct("KeyPair")
                .field("api_key", api_key)
                .field("secret", &"<redacted>")
                .finish(),
        }
    }
}

/// Response from `pinFileToIPFS`
#[derive(Debug, Deserialize)]
struct PinResponse {
    #[serde(rename = "IpfsHash")]
    ipfs_hash: String,
}

/// Content store backed by Pinata
pub struct PinataStore {
    client: reqwest::Client,
    credentials: PinataCredentials,
    api_url: String,
    gateway_url: String,
}

impl PinataStore {
    /// Create a store using the default API and gateway endpoints
    pub fn new(credentials: PinataCredentials) -> Self {
        Self::with_endpoints(credentials, DEFAULT_API_URL, DEFAULT_GATEWAY_URL)
    }

    pub fn with_endpoints(
        credentials: PinataCredentials,
        api_url: impl Into<String>,
        gateway_url: impl Into<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            credentials,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            gateway_url: gateway_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.credentials {
            PinataCredentials::Jwt(token) => request.bearer_auth(token),
            PinataCredentials::KeyPair { api_key, secret } => request
                .header("pinata_api_key", api_key)
                .header("pinata_secret_api_key", secret),
        }
    }
}

#[async_trait]
impl ContentStore for PinataStore {
    fn name(&self) -> &str {
        "pinata"
    }

    async fn put(&self, bytes: Vec<u8>, name_hint: &str) -> Result<ContentId> {
        let url = format!("{}/pinning/pinFileToIPFS", self.api_url);
        let (file_name, mime) = sniff_file_type(&bytes);
        let size = bytes.len();

        let file_part = Part::bytes(bytes)
            .file_name(file_name)
            .mime_str(mime)
            .map_err(|e| Error::Internal(format!("invalid mime type {}: {}", mime, e)))?;

        let form = Form::new()
            .part("file", file_part)
            .text("pinataMetadata", json!({ "name": name_hint }).to_string())
            .text("pinataOptions", json!({ "cidVersion": 0 }).to_string());

        debug!(name = name_hint, size, "Pinning blob");

        let response = self
            .authorize(self.client.post(&url))
            .multipart(form)
            .send()
            .await
            .map_err(|e| Error::UpstreamStore {
                message: format!("pin request failed: {}", e),
                transient: true,
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::UpstreamStore {
                message: format!("pin rejected with HTTP {}: {}", status, body.trim()),
                transient: is_transient_status(status),
            });
        }

        let pinned: PinResponse = response.json().await.map_err(|e| Error::UpstreamStore {
            message: format!("unreadable pin response: {}", e),
            transient: false,
        })?;

        ContentId::new(pinned.ipfs_hash).map_err(|e| Error::UpstreamStore {
            message: format!("pin response carried an invalid identifier: {}", e),
            transient: false,
        })
    }

    async fn get(&self, cid: &ContentId) -> Result<Vec<u8>> {
        let url = format!("{}/ipfs/{}", self.gateway_url, cid);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::UpstreamFetch {
                cid: cid.to_string(),
                message: format!("gateway request failed: {}", e),
                not_found: false,
            })?;

        let status = response.status();
        if !status.is_success() {
            // any client error besides throttling and timeouts is permanent
            return Err(Error::UpstreamFetch {
                cid: cid.to_string(),
                message: format!("gateway returned HTTP {}", status),
                not_found: !is_transient_status(status),
            });
        }

        let bytes = response.bytes().await.map_err(|e| Error::UpstreamFetch {
            cid: cid.to_string(),
            message: format!("gateway body interrupted: {}", e),
            not_found: false,
        })?;

        Ok(bytes.to_vec())
    }
}

fn is_transient_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
}

/// File name and MIME type for the multipart part
fn sniff_file_type(bytes: &[u8]) -> (&'static str, &'static str) {
    if bytes.starts_with(b"RIFF") && bytes.get(8..12) == Some(b"WAVE".as_slice()) {
        ("audio.wav", "audio/wav")
    } else if bytes.first() == Some(&b'{') {
        ("metadata.json", "application/json")
    } else {
        ("blob.bin", "application/octet-stream")
    }
}
