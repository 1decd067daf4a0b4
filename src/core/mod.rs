//! Core finalization logic.
//!
//! This module contains:
//! - Retry: Uniform retry/timeout policy for external calls
//! - Admission: Segment validation and upload
//! - Assembler: Segment fetch, decode and concatenation
//! - Metadata: NFT metadata documents
//! - Orchestrator: Finalization workflow

pub mod admission;
pub mod assembler;
pub mod metadata;
pub mod orchestrator;
pub mod retry;

// Re-export commonly used types
pub use admission::{upload_name_hint, AdmissionPolicy, AppendRequest, SegmentAdmission};
pub use assembler::{probe, AudioAssembler, SegmentFormat};
pub use metadata::{metadata_name_hint, Attribute, BeatMetadata};
pub use orchestrator::{submit_mint, FinalizationOrchestrator};
pub use retry::{retry, with_timeout, RetryFailure, RetryPolicy};
