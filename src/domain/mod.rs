//! Domain types for beatchain.
//!
//! This module contains the core data structures:
//! - Beat: Ledger record of a collaboration and its segments
//! - ContentId: Address of a blob in the content store
//! - Finalization: Run stages, claims and results

pub mod beat;
pub mod content_id;
pub mod finalization;

// Re-export commonly used types
pub use beat::{Beat, BeatRecord, BeatStatus, Contributor, Segment, REQUIRED_SEGMENTS, ZERO_ADDRESS};
pub use content_id::ContentId;
pub use finalization::{FinalizationResult, FinalizationRun, FinalizationStage, FinalizeClaim};
