//! beatchain - collaborative beat finalization
//!
//! Three contributors each record a segment of a beat; the segments are
//! pinned to IPFS and their identifiers recorded on the BeatChain contract.
//! Once a beat has all three segments it is finalized: the segments are
//! fetched and concatenated into one WAV file, NFT metadata is built around
//! it, and both are published so the beat can be minted.
//!
//! # Architecture
//!
//! The ledger is the single authority on beat state:
//! - Segment admission only proposes appends; the ledger decides
//! - Finalization is deterministic, so repeated runs converge on the same
//!   identifiers and the ledger's `mint` is the only serialization point
//! - Transient store and ledger failures are retried under one policy
//!
//! # Modules
//!
//! - `adapters`: External system integrations (Pinata, Ethereum JSON-RPC)
//! - `core`: Admission, assembly, metadata and the finalization orchestrator
//! - `domain`: Data structures (Beat, ContentId, FinalizationRun)
//! - `server`: HTTP surface
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Serve the HTTP API
//! beatchain serve --bind 0.0.0.0:3000
//!
//! # Finalize and mint a completed beat
//! beatchain finalize 42 --mint --from 0x...
//!
//! # Inspect a beat
//! beatchain beat 42
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod error;
pub mod server;

// Re-export main types at crate root for convenience
pub use crate::core::{FinalizationOrchestrator, RetryPolicy, SegmentAdmission};
pub use config::Settings;
pub use domain::{Beat, BeatStatus, ContentId, Contributor, FinalizationResult};
pub use error::{Error, ErrorKind, LedgerStateError, Result};
