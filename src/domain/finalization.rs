//! Finalization run state and results.
//!
//! A run is logical and lives only for the duration of one orchestrator call.
//! It moves strictly forward through the stages below; any non-terminal stage
//! may jump to `Failed`. There is no resume: a failed run is retried from
//! `Validating` by starting a new one.

use std::time::Instant;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::beat::{Beat, Contributor, REQUIRED_SEGMENTS};
use super::content_id::ContentId;
use crate::error::{Error, ErrorKind, LedgerStateError, Result};

/// Output of a successful finalization, ready for the ledger's `mint`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizationResult {
    pub beat_id: u64,
    #[serde(rename = "finalAudioCID")]
    pub final_audio_cid: ContentId,
    #[serde(rename = "metadataCID")]
    pub metadata_cid: ContentId,
}

/// Stage of a finalization run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "stage")]
pub enum FinalizationStage {
    Validating,
    Assembling,
    PublishingAudio,
    BuildingMetadata,
    PublishingMetadata,
    Done,
    Failed { kind: ErrorKind },
}

impl FinalizationStage {
    /// The stage that follows on success (terminal stages have none)
    pub fn next(self) -> Option<Self> {
        match self {
            Self::Validating => Some(Self::Assembling),
            Self::Assembling => Some(Self::PublishingAudio),
            Self::PublishingAudio => Some(Self::BuildingMetadata),
            Self::BuildingMetadata => Some(Self::PublishingMetadata),
            Self::PublishingMetadata => Some(Self::Done),
            Self::Done | Self::Failed { .. } => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        self.next().is_none()
    }
}

impl std::fmt::Display for FinalizationStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validating => write!(f, "validating"),
            Self::Assembling => write!(f, "assembling"),
            Self::PublishingAudio => write!(f, "publishing_audio"),
            Self::BuildingMetadata => write!(f, "building_metadata"),
            Self::PublishingMetadata => write!(f, "publishing_metadata"),
            Self::Done => write!(f, "done"),
            Self::Failed { kind } => write!(f, "failed({})", kind),
        }
    }
}

/// Tracks one finalization call
#[derive(Debug, Clone)]
pub struct FinalizationRun {
    /// Correlation id for logs
    pub id: Uuid,

    pub beat_id: u64,

    stage: FinalizationStage,

    /// Every stage entered, in order
    history: Vec<FinalizationStage>,

    started_at: Instant,
}

impl FinalizationRun {
    pub fn new(beat_id: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            beat_id,
            stage: FinalizationStage::Validating,
            history: vec![FinalizationStage::Validating],
            started_at: Instant::now(),
        }
    }

    pub fn stage(&self) -> FinalizationStage {
        self.stage
    }

    pub fn history(&self) -> &[FinalizationStage] {
        &self.history
    }

    /// Move to the successor stage. No-op once terminal.
    pub fn advance(&mut self) -> FinalizationStage {
        if let Some(next) = self.stage.next() {
            self.enter(next);
        }
        self.stage
    }

    /// Terminate with a failure. No-op once terminal.
    pub fn fail(&mut self, kind: ErrorKind) -> FinalizationStage {
        if !self.stage.is_terminal() {
            self.enter(FinalizationStage::Failed { kind });
        }
        self.stage
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.started_at.elapsed().as_millis() as u64
    }

    fn enter(&mut self, stage: FinalizationStage) {
        self.stage = stage;
        self.history.push(stage);
    }
}

/// What a client claims about a beat when asking for finalization
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalizeClaim {
    pub beat_id: u64,
    pub segment_cids: Vec<ContentId>,
    pub contributors: Vec<Contributor>,
}

impl FinalizeClaim {
    /// Build a claim, enforcing the shape of a completed beat
    pub fn new(
        beat_id: u64,
        segment_cids: Vec<ContentId>,
        contributors: Vec<Contributor>,
    ) -> Result<Self> {
        if beat_id == 0 {
            return Err(Error::validation("beatId must be a positive integer"));
        }
        if segment_cids.len() != REQUIRED_SEGMENTS {
            return Err(Error::validation(format!(
                "expected {} segment identifiers, got {}",
                REQUIRED_SEGMENTS,
                segment_cids.len()
            )));
        }
        if contributors.len() != REQUIRED_SEGMENTS {
            return Err(Error::validation(format!(
                "expected {} contributors, got {}",
                REQUIRED_SEGMENTS,
                contributors.len()
            )));
        }

        Ok(Self {
            beat_id,
            segment_cids,
            contributors,
        })
    }

    /// Check the claim against the authoritative ledger record
    pub fn verify(&self, beat: &Beat) -> Result<()> {
        let mismatch = |detail: String| -> Error {
            LedgerStateError::RecordMismatch {
                beat_id: beat.id(),
                detail,
            }
            .into()
        };

        if self.beat_id != beat.id() {
            return Err(mismatch(format!(
                "claimed beat {} but ledger returned {}",
                self.beat_id,
                beat.id()
            )));
        }

        for (slot, segment) in beat.segments().iter().enumerate() {
            match self.segment_cids.get(slot) {
                Some(cid) if *cid == segment.cid => {}
                Some(cid) => {
                    return Err(mismatch(format!(
                        "segment {} is {} on the ledger, not {}",
                        slot, segment.cid, cid
                    )));
                }
                None => return Err(mismatch(format!("segment {} missing from request", slot))),
            }

            match self.contributors.get(slot) {
                Some(c) if c.same_as(&segment.contributor) => {}
                Some(c) => {
                    return Err(mismatch(format!(
                        "contributor {} is {} on the ledger, not {}",
                        slot, segment.contributor, c
                    )));
                }
                None => {
                    return Err(mismatch(format!("contributor {} missing from request", slot)));
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::beat::Segment;

    fn completed_beat() -> Beat {
        let seg = |c: &str, cid: &str| {
            Segment::new(Contributor::new(c).unwrap(), ContentId::new(cid).unwrap())
        };
        let mut beat = Beat::started(42, seg("0x1", "cidA"));
        beat.append(seg("0x2", "cidB")).unwrap();
        beat.append(seg("0x3", "cidC")).unwrap();
        beat
    }

    fn claim(cids: &[&str], contributors: &[&str]) -> Result<FinalizeClaim> {
        FinalizeClaim::new(
            42,
            cids.iter().map(|c| ContentId::new(*c).unwrap()).collect(),
            contributors.iter().map(|c| Contributor::new(*c).unwrap()).collect(),
        )
    }

    #[test]
    fn test_stage_sequence() {
        let mut run = FinalizationRun::new(42);
        assert_eq!(run.stage(), FinalizationStage::Validating);

        for _ in 0..5 {
            run.advance();
        }
        assert_eq!(run.stage(), FinalizationStage::Done);
        assert_eq!(
            run.history(),
            &[
                FinalizationStage::Validating,
                FinalizationStage::Assembling,
                FinalizationStage::PublishingAudio,
                FinalizationStage::BuildingMetadata,
                FinalizationStage::PublishingMetadata,
                FinalizationStage::Done,
            ]
        );

        // terminal
        assert_eq!(run.advance(), FinalizationStage::Done);
        assert_eq!(run.fail(ErrorKind::Timeout), FinalizationStage::Done);
    }

    #[test]
    fn test_failure_is_terminal() {
        let mut run = FinalizationRun::new(42);
        run.advance();
        run.fail(ErrorKind::AssemblyFetch);

        assert_eq!(
            run.stage(),
            FinalizationStage::Failed {
                kind: ErrorKind::AssemblyFetch
            }
        );
        assert_eq!(
            run.advance(),
            FinalizationStage::Failed {
                kind: ErrorKind::AssemblyFetch
            }
        );
        assert_eq!(run.history().len(), 3);
    }

    #[test]
    fn test_claim_shape() {
        assert!(claim(&["cidA", "cidB"], &["0x1", "0x2", "0x3"]).is_err());
        assert!(claim(&["cidA", "cidB", "cidC"], &["0x1"]).is_err());
        assert!(claim(&["cidA", "cidB", "cidC"], &["0x1", "0x2", "0x3"]).is_ok());
    }

    #[test]
    fn test_claim_verification() {
        let beat = completed_beat();

        let matching = claim(&["cidA", "cidB", "cidC"], &["0x1", "0x2", "0x3"]).unwrap();
        assert!(matching.verify(&beat).is_ok());

        let reordered = claim(&["cidB", "cidA", "cidC"], &["0x1", "0x2", "0x3"]).unwrap();
        assert!(matches!(
            reordered.verify(&beat),
            Err(Error::LedgerState(LedgerStateError::RecordMismatch { .. }))
        ));

        let wrong_contributor = claim(&["cidA", "cidB", "cidC"], &["0x1", "0x9", "0x3"]).unwrap();
        assert!(wrong_contributor.verify(&beat).is_err());
    }

    #[test]
    fn test_result_wire_names() {
        let result = FinalizationResult {
            beat_id: 42,
            final_audio_cid: ContentId::new("QmAudio").unwrap(),
            metadata_cid: ContentId::new("QmMeta").unwrap(),
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["beatId"], 42);
        assert_eq!(json["finalAudioCID"], "QmAudio");
        assert_eq!(json["metadataCID"], "QmMeta");
    }
}
