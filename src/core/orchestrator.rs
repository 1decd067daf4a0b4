//! Finalization orchestrator.
//!
//! Drives one beat from "completed on the ledger" to "ready to mint":
//! read and validate the ledger record, assemble the audio, publish it, build
//! and publish the metadata. Each call is an independent [`FinalizationRun`];
//! concurrent calls for the same beat share nothing and converge on the same
//! identifiers because every published artifact is deterministic.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, instrument};

use super::assembler::{AudioAssembler, SegmentFormat};
use super::metadata::{audio_name_hint, metadata_name_hint, BeatMetadata};
use super::retry::{retry, with_timeout, RetryPolicy};
use crate::adapters::{ContentStore, LedgerReader, LedgerWriter, TxReceipt};
use crate::domain::{
    Beat, ContentId, Contributor, FinalizationResult, FinalizationRun, FinalizeClaim,
};
use crate::error::{Error, LedgerStateError, Result};

/// Main finalization engine
pub struct FinalizationOrchestrator {
    store: Arc<dyn ContentStore>,
    ledger: Arc<dyn LedgerReader>,
    assembler: AudioAssembler,
    retry: RetryPolicy,
}

impl FinalizationOrchestrator {
    pub fn new(
        store: Arc<dyn ContentStore>,
        ledger: Arc<dyn LedgerReader>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            assembler: AudioAssembler::new(store.clone(), retry.clone()),
            store,
            ledger,
            retry,
        }
    }

    /// Require all segments to use this format during assembly
    pub fn with_expected_format(mut self, format: Option<SegmentFormat>) -> Self {
        self.assembler = self.assembler.with_expected_format(format);
        self
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Finalize a beat using only the ledger record
    pub async fn finalize(&self, beat_id: u64) -> Result<FinalizationResult> {
        self.run(beat_id, None).await
    }

    /// Finalize a beat, first checking the caller's view of it against the ledger
    pub async fn finalize_claimed(&self, claim: &FinalizeClaim) -> Result<FinalizationResult> {
        self.run(claim.beat_id, Some(claim)).await
    }

    /// Ledger preconditions for finalization
    pub fn ensure_finalizable(beat: &Beat) -> Result<()> {
        if !beat.is_completed() {
            return Err(LedgerStateError::NotCompleted {
                beat_id: beat.id(),
                segment_count: beat.segment_count(),
            }
            .into());
        }

        if beat.is_minted() {
            return Err(LedgerStateError::AlreadyMinted(beat.id()).into());
        }

        Ok(())
    }

    #[instrument(skip(self, claim))]
    async fn run(&self, beat_id: u64, claim: Option<&FinalizeClaim>) -> Result<FinalizationResult> {
        let mut run = FinalizationRun::new(beat_id);
        info!(run_id = %run.id, "Starting finalization");

        match self.execute(&mut run, claim).await {
            Ok(result) => {
                info!(
                    run_id = %run.id,
                    elapsed_ms = run.elapsed_ms(),
                    final_audio_cid = %result.final_audio_cid,
                    metadata_cid = %result.metadata_cid,
                    "Finalization complete"
                );
                Ok(result)
            }
            Err(e) => {
                let stage = run.stage();
                run.fail(e.kind());
                error!(
                    run_id = %run.id,
                    %stage,
                    elapsed_ms = run.elapsed_ms(),
                    error = %e,
                    "Finalization failed"
                );
                Err(e)
            }
        }
    }

    async fn execute(
        &self,
        run: &mut FinalizationRun,
        claim: Option<&FinalizeClaim>,
    ) -> Result<FinalizationResult> {
        let beat_id = run.beat_id;
        if beat_id == 0 {
            return Err(Error::validation("beat id must be a positive integer"));
        }

        // Validating
        let ledger = self.ledger.as_ref();
        let beat = retry(&self.retry, "read beat", move || ledger.get_beat_details(beat_id)).await?;
        Self::ensure_finalizable(&beat)?;
        if let Some(claim) = claim {
            claim.verify(&beat)?;
        }

        advance(run);
        let audio = self.assembler.assemble(&beat.segment_cids()).await?;

        advance(run);
        let final_audio_cid = self
            .publish(audio, &audio_name_hint(beat_id), "publish audio")
            .await?;

        advance(run);
        let metadata = BeatMetadata::new(beat_id, &final_audio_cid, &beat.contributors())?;
        let document = metadata.to_canonical_bytes()?;

        advance(run);
        let metadata_cid = self
            .publish(document, &metadata_name_hint(beat_id), "publish metadata")
            .await?;

        advance(run);
        Ok(FinalizationResult {
            beat_id,
            final_audio_cid,
            metadata_cid,
        })
    }

    /// Retried store write; identifiers are content-derived so repeats are harmless
    async fn publish(&self, bytes: Vec<u8>, name_hint: &str, operation: &str) -> Result<ContentId> {
        let store = self.store.as_ref();
        let bytes = &bytes;
        let cid = retry(&self.retry, operation, move || store.put(bytes.clone(), name_hint)).await?;
        Ok(cid)
    }
}

fn advance(run: &mut FinalizationRun) {
    let stage = run.advance();
    info!(run_id = %run.id, %stage, "Stage entered");
}

/// Submit the mint transaction for a finalized beat exactly once
pub async fn submit_mint(
    writer: &dyn LedgerWriter,
    from: &Contributor,
    result: &FinalizationResult,
    limit: Duration,
) -> Result<TxReceipt> {
    let receipt = with_timeout(
        limit,
        "mint",
        writer.mint(from, result.beat_id, &result.metadata_cid),
    )
    .await?;

    info!(beat_id = result.beat_id, tx = %receipt.tx_hash, "Mint submitted");
    Ok(receipt)
}
