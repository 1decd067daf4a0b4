//! In-process store and ledger.
//!
//! Both are internally synchronized and enforce the same contracts as the
//! network-backed adapters, which makes them usable as test doubles and for
//! local experiments without Pinata or a chain.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError, RwLock};

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use super::{ContentStore, LedgerReader, LedgerWriter, TxReceipt};
use crate::domain::{Beat, ContentId, Contributor, Segment};
use crate::error::{Error, LedgerStateError, Result};

/// Content-addressed blob store held in memory
#[derive(Debug, Default)]
pub struct InMemoryStore {
    blobs: RwLock<HashMap<ContentId, Vec<u8>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a blob under an explicit identifier
    pub fn insert(&self, cid: ContentId, bytes: Vec<u8>) {
        self.blobs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(cid, bytes);
    }

    pub fn contains(&self, cid: &ContentId) -> bool {
        self.blobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(cid)
    }

    pub fn len(&self) -> usize {
        self.blobs.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ContentStore for InMemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn put(&self, bytes: Vec<u8>, _name_hint: &str) -> Result<ContentId> {
        let cid = ContentId::for_bytes(&bytes);
        self.insert(cid.clone(), bytes);
        Ok(cid)
    }

    async fn get(&self, cid: &ContentId) -> Result<Vec<u8>> {
        self.blobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(cid)
            .cloned()
            .ok_or_else(|| Error::UpstreamFetch {
                cid: cid.to_string(),
                message: "not found".to_string(),
                not_found: true,
            })
    }
}

#[derive(Debug, Default)]
struct LedgerState {
    beats: BTreeMap<u64, Beat>,
    transactions: u64,
}

/// Ledger held in memory; writes are serialized by a mutex
#[derive(Debug, Default)]
pub struct InMemoryLedger {
    state: Mutex<LedgerState>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a beat record
    pub fn insert_beat(&self, beat: Beat) {
        self.lock().beats.insert(beat.id(), beat);
    }

    /// Snapshot of a beat, if it exists
    pub fn beat(&self, beat_id: u64) -> Option<Beat> {
        self.lock().beats.get(&beat_id).cloned()
    }

    fn lock(&self) -> MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl LedgerState {
    fn receipt(&mut self, operation: &str, beat_id: u64, cid: &ContentId) -> TxReceipt {
        self.transactions += 1;
        let digest = Sha256::digest(
            format!("{}:{}:{}:{}", operation, beat_id, cid, self.transactions).as_bytes(),
        );
        TxReceipt::new(format!("0x{}", hex::encode(digest)))
    }

    fn beat_mut(&mut self, beat_id: u64) -> Result<&mut Beat, LedgerStateError> {
        self.beats
            .get_mut(&beat_id)
            .ok_or(LedgerStateError::BeatNotFound(beat_id))
    }
}

#[async_trait]
impl LedgerReader for InMemoryLedger {
    async fn get_beat_details(&self, beat_id: u64) -> Result<Beat> {
        self.beat(beat_id)
            .ok_or_else(|| LedgerStateError::BeatNotFound(beat_id).into())
    }

    async fn get_total_beats(&self) -> Result<u64> {
        Ok(self.lock().beats.len() as u64)
    }
}

#[async_trait]
impl LedgerWriter for InMemoryLedger {
    async fn start_beat(&self, from: &Contributor, initial: &ContentId) -> Result<TxReceipt> {
        let mut state = self.lock();
        let beat_id = state.beats.keys().next_back().map_or(1, |last| last + 1);

        state.beats.insert(
            beat_id,
            Beat::started(beat_id, Segment::new(from.clone(), initial.clone())),
        );
        Ok(state.receipt("startBeat", beat_id, initial))
    }

    async fn add_segment(
        &self,
        from: &Contributor,
        beat_id: u64,
        cid: &ContentId,
    ) -> Result<TxReceipt> {
        let mut state = self.lock();
        state
            .beat_mut(beat_id)?
            .append(Segment::new(from.clone(), cid.clone()))?;
        Ok(state.receipt("addSegment", beat_id, cid))
    }

    async fn mint(
        &self,
        _from: &Contributor,
        beat_id: u64,
        metadata_cid: &ContentId,
    ) -> Result<TxReceipt> {
        let mut state = self.lock();
        state.beat_mut(beat_id)?.mark_minted()?;
        Ok(state.receipt("mint", beat_id, metadata_cid))
    }
}
