//! Segment admission.
//!
//! Validates a contributor's segment against the current ledger record,
//! uploads it, and produces a proposed ledger append. The ledger stays the
//! authority: an [`AppendRequest`] is only a proposal, and a concurrent
//! contributor may still win the slot.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use super::assembler::{probe, SegmentFormat};
use super::retry::{retry, with_timeout, RetryPolicy};
use crate::adapters::{ContentStore, LedgerReader, LedgerWriter, TxReceipt};
use crate::domain::{Beat, ContentId, Contributor, REQUIRED_SEGMENTS};
use crate::error::{Error, LedgerStateError, Result};

/// Admission rules
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdmissionPolicy {
    /// Let one contributor fill more than one slot of a beat
    #[serde(default)]
    pub allow_self_collaboration: bool,

    /// Upper bound on a single segment in bytes
    #[serde(default = "default_max_segment_bytes")]
    pub max_segment_bytes: usize,

    /// Required sample rate and channel layout, if any
    #[serde(default)]
    pub expected_format: Option<SegmentFormat>,
}

fn default_max_segment_bytes() -> usize {
    5 * 1024 * 1024
}

impl Default for AdmissionPolicy {
    fn default() -> Self {
        Self {
            allow_self_collaboration: false,
            max_segment_bytes: default_max_segment_bytes(),
            expected_format: None,
        }
    }
}

/// A proposed ledger append for an uploaded segment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppendRequest {
    pub beat_id: u64,
    pub slot: usize,
    pub contributor: Contributor,
    pub cid: ContentId,
}

/// Admits segments into beats
pub struct SegmentAdmission {
    store: Arc<dyn ContentStore>,
    ledger: Arc<dyn LedgerReader>,
    policy: AdmissionPolicy,
    retry: RetryPolicy,
}

impl SegmentAdmission {
    pub fn new(
        store: Arc<dyn ContentStore>,
        ledger: Arc<dyn LedgerReader>,
        policy: AdmissionPolicy,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            ledger,
            policy,
            retry,
        }
    }

    pub fn policy(&self) -> &AdmissionPolicy {
        &self.policy
    }

    /// Ledger preconditions for appending `contributor` to `beat`.
    ///
    /// Returns the slot the segment would occupy.
    pub fn check(
        beat: &Beat,
        contributor: &Contributor,
        policy: &AdmissionPolicy,
    ) -> Result<usize> {
        let slot = beat
            .next_slot()
            .ok_or(LedgerStateError::AlreadyCompleted(beat.id()))?;

        if !policy.allow_self_collaboration && beat.has_contributor(contributor) {
            return Err(LedgerStateError::DuplicateContributor {
                beat_id: beat.id(),
                contributor: contributor.to_string(),
            }
            .into());
        }

        Ok(slot)
    }

    /// Validate and upload a segment for an existing beat.
    ///
    /// Without a configured `expected_format`, the beat's opening segment
    /// fixes the format for the remaining slots.
    #[instrument(
        skip(self, contributor, audio),
        fields(contributor = %contributor, bytes = audio.len())
    )]
    pub async fn admit(
        &self,
        beat_id: u64,
        contributor: &Contributor,
        audio: Vec<u8>,
    ) -> Result<AppendRequest> {
        let ledger = self.ledger.as_ref();
        let beat = retry(&self.retry, "read beat", move || ledger.get_beat_details(beat_id)).await?;

        let slot = Self::check(&beat, contributor, &self.policy)?;
        let format = self.validate_audio(&audio)?;
        if self.policy.expected_format.is_none() {
            let opening = self.opening_format(&beat).await?;
            if format != opening {
                return Err(Error::validation(format!(
                    "segment is {}, beat {} uses {}",
                    format, beat_id, opening
                )));
            }
        }

        let cid = self.upload(audio, &segment_name_hint(beat_id, slot)).await?;
        info!(beat_id, slot, %cid, "Segment admitted");

        Ok(AppendRequest {
            beat_id,
            slot,
            contributor: contributor.clone(),
            cid,
        })
    }

    /// Validate and upload the opening segment of a new beat
    #[instrument(
        skip(self, contributor, audio),
        fields(contributor = %contributor, bytes = audio.len())
    )]
    pub async fn admit_initial(
        &self,
        contributor: &Contributor,
        audio: Vec<u8>,
    ) -> Result<ContentId> {
        self.validate_audio(&audio)?;

        let cid = self.upload(audio, "BeatChain Segment - opening").await?;
        info!(%cid, "Opening segment admitted");
        Ok(cid)
    }

    /// Submit an append to the ledger exactly once
    pub async fn submit(
        &self,
        writer: &dyn LedgerWriter,
        request: &AppendRequest,
    ) -> Result<TxReceipt> {
        let outcome = with_timeout(
            self.retry.attempt_timeout(),
            "addSegment",
            writer.add_segment(&request.contributor, request.beat_id, &request.cid),
        )
        .await;

        match &outcome {
            Ok(receipt) => {
                info!(beat_id = request.beat_id, tx = %receipt.tx_hash, "Segment appended")
            }
            Err(error) => {
                warn!(beat_id = request.beat_id, %error, "Ledger rejected segment append")
            }
        }
        outcome
    }

    /// Submit a new beat with its opening segment exactly once
    pub async fn submit_initial(
        &self,
        writer: &dyn LedgerWriter,
        contributor: &Contributor,
        cid: &ContentId,
    ) -> Result<TxReceipt> {
        with_timeout(
            self.retry.attempt_timeout(),
            "startBeat",
            writer.start_beat(contributor, cid),
        )
        .await
    }

    fn validate_audio(&self, audio: &[u8]) -> Result<SegmentFormat> {
        if audio.is_empty() {
            return Err(Error::validation("segment audio is empty"));
        }

        if audio.len() > self.policy.max_segment_bytes {
            return Err(Error::validation(format!(
                "segment is {} bytes, limit is {}",
                audio.len(),
                self.policy.max_segment_bytes
            )));
        }

        let format = probe(audio).map_err(|e| Error::validation(e.to_string()))?;
        if let Some(expected) = self.policy.expected_format {
            if format != expected {
                return Err(Error::validation(format!(
                    "segment is {}, beats on this server use {}",
                    format, expected
                )));
            }
        }

        Ok(format)
    }

    /// Format of the segment in slot 0
    async fn opening_format(&self, beat: &Beat) -> Result<SegmentFormat> {
        let opening = beat
            .segments()
            .first()
            .ok_or_else(|| Error::Internal(format!("beat {} has no segments", beat.id())))?;

        let store = self.store.as_ref();
        let cid = &opening.cid;
        let bytes = retry(&self.retry, "fetch opening segment", move || store.get(cid)).await?;
        probe(&bytes)
    }

    async fn upload(&self, audio: Vec<u8>, name_hint: &str) -> Result<ContentId> {
        let store = self.store.as_ref();
        let audio = &audio;
        let cid = retry(&self.retry, "store segment", move || {
            store.put(audio.clone(), name_hint)
        })
        .await?;
        Ok(cid)
    }
}

fn segment_name_hint(beat_id: u64, slot: usize) -> String {
    format!(
        "BeatChain Segment - beat #{} slot {}/{}",
        beat_id,
        slot + 1,
        REQUIRED_SEGMENTS
    )
}

/// Pin name for a segment uploaded outside any beat context
pub fn upload_name_hint(at: chrono::DateTime<chrono::Utc>) -> String {
    format!(
        "BeatChain Segment - {}",
        at.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
    )
}
