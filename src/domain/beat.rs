//! Beat records: the unit of collaboration.
//!
//! A beat collects exactly [`REQUIRED_SEGMENTS`] segments, each pairing a
//! contributor with the content identifier of the audio they submitted.
//! Segments are append-only; once the last slot is filled the beat is
//! completed and may be minted exactly once.

use serde::{Deserialize, Serialize};

use super::content_id::ContentId;
use crate::error::{Error, LedgerStateError, Result};

/// Number of segments a beat needs to be completed
pub const REQUIRED_SEGMENTS: usize = 3;

/// Sentinel the ledger uses for an unfilled contributor slot
pub const ZERO_ADDRESS: &str = "0x0000000000000000000000000000000000000000";

/// Positional record as returned by the ledger's `getBeatDetails`:
/// `(id, status, contributors, segmentCIDs, segmentCount, isMinted)`.
///
/// Only lives at the adapter boundary; map it with [`Beat::from_record`].
pub type BeatRecord = (u64, u8, Vec<String>, Vec<String>, u64, bool);

/// Lifecycle status of a beat
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BeatStatus {
    /// Accepting segments
    InProgress,

    /// All segments present
    Completed,
}

impl BeatStatus {
    /// Decode the ledger's enum ordinal
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::InProgress),
            1 => Some(Self::Completed),
            _ => None,
        }
    }

    /// The ledger's enum ordinal
    pub fn code(self) -> u8 {
        match self {
            Self::InProgress => 0,
            Self::Completed => 1,
        }
    }
}

impl std::fmt::Display for BeatStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BeatStatus::InProgress => write!(f, "InProgress"),
            BeatStatus::Completed => write!(f, "Completed"),
        }
    }
}

/// Identity of a participant (usually a wallet address)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Contributor(String);

impl Contributor {
    pub fn new(value: impl Into<String>) -> Result<Self> {
        let value = value.into();
        let trimmed = value.trim();

        if Self::is_empty_slot(trimmed) {
            return Err(Error::validation("contributor identity is empty"));
        }

        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Identity comparison (hex addresses are case-insensitive)
    pub fn same_as(&self, other: &Contributor) -> bool {
        self.0.eq_ignore_ascii_case(&other.0)
    }

    /// Whether a raw ledger value denotes an unfilled slot
    pub(crate) fn is_empty_slot(raw: &str) -> bool {
        let raw = raw.trim();
        raw.is_empty() || raw.eq_ignore_ascii_case(ZERO_ADDRESS)
    }
}

impl std::fmt::Display for Contributor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for Contributor {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<Contributor> for String {
    fn from(c: Contributor) -> Self {
        c.0
    }
}

/// One contributor's admitted segment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    pub contributor: Contributor,
    pub cid: ContentId,
}

impl Segment {
    pub fn new(contributor: Contributor, cid: ContentId) -> Self {
        Self { contributor, cid }
    }
}

/// A beat as recorded by the ledger
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Beat {
    id: u64,
    segments: Vec<Segment>,
    is_minted: bool,
}

impl Beat {
    /// A freshly started beat with its opening segment
    pub fn started(id: u64, first: Segment) -> Self {
        Self {
            id,
            segments: vec![first],
            is_minted: false,
        }
    }

    /// Map a positional ledger record into a validated beat.
    ///
    /// A record with id 0 is how the ledger reports a missing beat.
    pub fn from_record(requested_id: u64, record: BeatRecord) -> Result<Self> {
        let (id, status_code, contributors, segment_cids, segment_count, is_minted) = record;

        if id == 0 {
            return Err(LedgerStateError::BeatNotFound(requested_id).into());
        }

        let corrupt = |detail: String| -> Error {
            LedgerStateError::Corrupt {
                beat_id: id,
                detail,
            }
            .into()
        };

        if id != requested_id {
            return Err(corrupt(format!("requested beat {} but got {}", requested_id, id)));
        }

        if contributors.len() > REQUIRED_SEGMENTS || segment_cids.len() > REQUIRED_SEGMENTS {
            return Err(corrupt(format!(
                "{} contributor slots and {} segment slots exceed capacity {}",
                contributors.len(),
                segment_cids.len(),
                REQUIRED_SEGMENTS
            )));
        }

        let mut segments = Vec::with_capacity(REQUIRED_SEGMENTS);
        let mut seen_empty = false;

        for slot in 0..REQUIRED_SEGMENTS {
            let contributor = contributors.get(slot).map(String::as_str).unwrap_or("");
            let cid = segment_cids.get(slot).map(String::as_str).unwrap_or("");

            let has_contributor = !Contributor::is_empty_slot(contributor);
            let has_cid = !cid.trim().is_empty();

            match (has_contributor, has_cid) {
                (false, false) => seen_empty = true,
                (true, true) if seen_empty => {
                    return Err(corrupt(format!("slot {} is filled after an empty slot", slot)));
                }
                (true, true) => {
                    let contributor =
                        Contributor::new(contributor).map_err(|e| corrupt(e.to_string()))?;
                    let cid = ContentId::new(cid).map_err(|e| corrupt(e.to_string()))?;
                    segments.push(Segment::new(contributor, cid));
                }
                _ => {
                    return Err(corrupt(format!(
                        "slot {} has a contributor without a segment or vice versa",
                        slot
                    )));
                }
            }
        }

        if segment_count != segments.len() as u64 {
            return Err(corrupt(format!(
                "segmentCount {} but {} filled slots",
                segment_count,
                segments.len()
            )));
        }

        let beat = Self {
            id,
            segments,
            is_minted,
        };

        let reported = BeatStatus::from_code(status_code)
            .ok_or_else(|| corrupt(format!("unknown status code {}", status_code)))?;
        if reported != beat.status() {
            return Err(corrupt(format!(
                "status {} with {} segments",
                reported,
                beat.segment_count()
            )));
        }

        if beat.is_minted && !beat.is_completed() {
            return Err(corrupt("minted before completion".to_string()));
        }

        Ok(beat)
    }

    /// Positional record, padded with empty slots
    pub fn to_record(&self) -> BeatRecord {
        let mut contributors = Vec::with_capacity(REQUIRED_SEGMENTS);
        let mut segment_cids = Vec::with_capacity(REQUIRED_SEGMENTS);

        for slot in 0..REQUIRED_SEGMENTS {
            match self.segments.get(slot) {
                Some(segment) => {
                    contributors.push(segment.contributor.to_string());
                    segment_cids.push(segment.cid.to_string());
                }
                None => {
                    contributors.push(ZERO_ADDRESS.to_string());
                    segment_cids.push(String::new());
                }
            }
        }

        (
            self.id,
            self.status().code(),
            contributors,
            segment_cids,
            self.segments.len() as u64,
            self.is_minted,
        )
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Derived from the number of filled slots
    pub fn status(&self) -> BeatStatus {
        if self.segments.len() >= REQUIRED_SEGMENTS {
            BeatStatus::Completed
        } else {
            BeatStatus::InProgress
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status() == BeatStatus::Completed
    }

    pub fn is_minted(&self) -> bool {
        self.is_minted
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// Segments in submission order
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Segment identifiers in submission order
    pub fn segment_cids(&self) -> Vec<ContentId> {
        self.segments.iter().map(|s| s.cid.clone()).collect()
    }

    /// Contributors in submission order
    pub fn contributors(&self) -> Vec<Contributor> {
        self.segments.iter().map(|s| s.contributor.clone()).collect()
    }

    pub fn has_contributor(&self, contributor: &Contributor) -> bool {
        self.segments
            .iter()
            .any(|s| s.contributor.same_as(contributor))
    }

    /// Index of the next free slot, if any
    pub fn next_slot(&self) -> Option<usize> {
        if self.is_completed() {
            None
        } else {
            Some(self.segments.len())
        }
    }

    /// Append a segment (ledger-side `addSegment` semantics)
    pub fn append(&mut self, segment: Segment) -> Result<usize, LedgerStateError> {
        let slot = self
            .next_slot()
            .ok_or(LedgerStateError::AlreadyCompleted(self.id))?;
        self.segments.push(segment);
        Ok(slot)
    }

    /// Set the minted flag (ledger-side `mint` semantics)
    pub fn mark_minted(&mut self) -> Result<(), LedgerStateError> {
        if !self.is_completed() {
            return Err(LedgerStateError::NotCompleted {
                beat_id: self.id,
                segment_count: self.segment_count(),
            });
        }
        if self.is_minted {
            return Err(LedgerStateError::AlreadyMinted(self.id));
        }
        self.is_minted = true;
        Ok(())
    }
}
