//! Content identifiers for blobs in the content-addressed store.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// CIDv1 prefix: version 1, raw codec (0x55), sha2-256 multihash (0x12, 32 bytes)
const CID_V1_RAW_SHA256_PREFIX: [u8; 4] = [0x01, 0x55, 0x12, 0x20];

/// Multibase prefix for lowercase base16
const MULTIBASE_BASE16: char = 'f';

/// Identifier of a content-addressed blob (e.g. `Qm...` or `bafy...`)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentId(String);

impl ContentId {
    /// Parse an identifier received from a client, the ledger or the store
    pub fn new(value: impl Into<String>) -> Result<Self> {
        let value = value.into();
        let trimmed = value.trim();

        if trimmed.is_empty() {
            return Err(Error::validation("content identifier is empty"));
        }

        if !trimmed.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(Error::validation(format!(
                "content identifier '{}' contains invalid characters",
                trimmed
            )));
        }

        Ok(Self(trimmed.to_string()))
    }

    /// Compute the identifier of a blob (CIDv1, raw codec, sha2-256, base16)
    pub fn for_bytes(bytes: &[u8]) -> Self {
        let digest = Sha256::digest(bytes);

        let mut cid = Vec::with_capacity(CID_V1_RAW_SHA256_PREFIX.len() + digest.len());
        cid.extend_from_slice(&CID_V1_RAW_SHA256_PREFIX);
        cid.extend_from_slice(&digest);

        Self(format!("{}{}", MULTIBASE_BASE16, hex::encode(cid)))
    }

    /// Get the raw string value
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `ipfs://` URI for this identifier
    pub fn ipfs_uri(&self) -> String {
        format!("ipfs://{}", self.0)
    }
}

impl std::fmt::Display for ContentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for ContentId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl TryFrom<String> for ContentId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<ContentId> for String {
    fn from(id: ContentId) -> Self {
        id.0
    }
}
