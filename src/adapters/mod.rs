//! Adapter interfaces for external systems.
//!
//! Adapters provide a uniform interface over the two external authorities the
//! pipeline talks to:
//! - a content-addressed store (Pinata/IPFS in production)
//! - the beat ledger (the BeatChain contract over Ethereum JSON-RPC)
//!
//! Clients are constructed once at start-up and shared as `Arc<dyn ...>`;
//! every implementation is safe for concurrent use.

pub mod abi;
pub mod ethereum;
pub mod memory;
pub mod pinata;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::{Beat, ContentId, Contributor};
use crate::error::Result;

// Re-export the implementations
pub use ethereum::EthereumLedger;
pub use memory::{InMemoryLedger, InMemoryStore};
pub use pinata::{PinataCredentials, PinataStore};

/// Content-addressed blob storage
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Human-readable store name
    fn name(&self) -> &str;

    /// Store (and pin) a blob, returning its identifier.
    ///
    /// `name_hint` is descriptive metadata only and never affects the identifier.
    async fn put(&self, bytes: Vec<u8>, name_hint: &str) -> Result<ContentId>;

    /// Fetch a blob by identifier
    async fn get(&self, cid: &ContentId) -> Result<Vec<u8>>;
}

/// Read side of the beat ledger
#[async_trait]
pub trait LedgerReader: Send + Sync {
    /// Full record of a beat
    async fn get_beat_details(&self, beat_id: u64) -> Result<Beat>;

    /// Number of beats created so far
    async fn get_total_beats(&self) -> Result<u64>;
}

/// State-changing ledger operations.
///
/// Every call is a single transaction submission; callers must not retry
/// without confirmation from the user.
#[async_trait]
pub trait LedgerWriter: Send + Sync {
    /// Create a beat with its opening segment
    async fn start_beat(&self, from: &Contributor, initial: &ContentId) -> Result<TxReceipt>;

    /// Append the next segment to a beat
    async fn add_segment(
        &self,
        from: &Contributor,
        beat_id: u64,
        cid: &ContentId,
    ) -> Result<TxReceipt>;

    /// Mint a completed beat with its metadata
    async fn mint(
        &self,
        from: &Contributor,
        beat_id: u64,
        metadata_cid: &ContentId,
    ) -> Result<TxReceipt>;
}

/// Acknowledgement of a submitted ledger transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxReceipt {
    pub tx_hash: String,
}

impl TxReceipt {
    pub fn new(tx_hash: impl Into<String>) -> Self {
        Self {
            tx_hash: tx_hash.into(),
        }
    }
}
