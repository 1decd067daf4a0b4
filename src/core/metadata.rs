//! NFT metadata for finalized beats.
//!
//! The document follows the common ERC-721 metadata layout. Serialization is
//! canonical: field order is fixed by the struct and attributes are emitted in
//! ledger slot order, so the same inputs always produce the same bytes.

use serde::{Deserialize, Serialize};

use crate::domain::{ContentId, Contributor, REQUIRED_SEGMENTS};
use crate::error::{Error, Result};

pub const DESCRIPTION: &str = "A collaborative on-chain musical composition created on BeatChain.";

/// Pin name for the final audio of a beat
pub fn audio_name_hint(beat_id: u64) -> String {
    format!("BeatChain Beat #{} Audio", beat_id)
}

/// Pin name for the metadata document of a beat
pub fn metadata_name_hint(beat_id: u64) -> String {
    format!("BeatChain Metadata #{}", beat_id)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    pub trait_type: String,
    pub value: String,
}

/// Metadata document published for a completed beat
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BeatMetadata {
    pub name: String,
    pub description: String,
    pub image: String,
    pub animation_url: String,
    pub attributes: Vec<Attribute>,
}

impl BeatMetadata {
    /// Build the document for a beat and its assembled audio
    pub fn new(beat_id: u64, audio: &ContentId, contributors: &[Contributor]) -> Result<Self> {
        if beat_id == 0 {
            return Err(Error::validation("beat id must be positive"));
        }

        if contributors.len() != REQUIRED_SEGMENTS {
            return Err(Error::validation(format!(
                "expected {} contributors, got {}",
                REQUIRED_SEGMENTS,
                contributors.len()
            )));
        }

        let attributes = contributors
            .iter()
            .enumerate()
            .map(|(slot, contributor)| Attribute {
                trait_type: format!("Contributor {}", slot + 1),
                value: contributor.to_string(),
            })
            .collect();

        Ok(Self {
            name: format!("BeatChain Beat #{}", beat_id),
            description: DESCRIPTION.to_string(),
            image: audio.ipfs_uri(),
            animation_url: audio.ipfs_uri(),
            attributes,
        })
    }

    /// Canonical JSON encoding
    pub fn to_canonical_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self)
            .map_err(|e| Error::Internal(format!("failed to serialize metadata: {}", e)))
    }
}
