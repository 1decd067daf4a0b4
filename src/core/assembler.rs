//! Audio assembly.
//!
//! Fetches the segments of a beat, checks that they share one sample rate and
//! channel layout, and concatenates them in ledger order into a single 16-bit
//! PCM WAV file. Given the same segment bytes the output is byte-identical.

use std::io::Cursor;
use std::sync::Arc;

use futures::future::try_join_all;
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use super::retry::{retry, RetryPolicy};
use crate::adapters::ContentStore;
use crate::domain::{ContentId, REQUIRED_SEGMENTS};
use crate::error::{Error, Result};

/// Bit depth of assembled audio
pub const OUTPUT_BITS_PER_SAMPLE: u16 = 16;

/// Sample rate and channel layout shared by all segments of a beat
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

impl SegmentFormat {
    fn of(spec: &WavSpec) -> Self {
        Self {
            sample_rate: spec.sample_rate,
            channels: spec.channels,
        }
    }

    fn output_spec(self) -> WavSpec {
        WavSpec {
            channels: self.channels,
            sample_rate: self.sample_rate,
            bits_per_sample: OUTPUT_BITS_PER_SAMPLE,
            sample_format: SampleFormat::Int,
        }
    }
}

impl std::fmt::Display for SegmentFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} Hz, {} ch", self.sample_rate, self.channels)
    }
}

/// Read the format of a WAV blob without decoding samples
pub fn probe(bytes: &[u8]) -> Result<SegmentFormat> {
    let reader = WavReader::new(Cursor::new(bytes))
        .map_err(|e| Error::AssemblyFormat(format!("not a readable WAV file: {}", e)))?;
    Ok(SegmentFormat::of(&reader.spec()))
}

/// Builds the final audio of a completed beat
pub struct AudioAssembler {
    store: Arc<dyn ContentStore>,
    retry: RetryPolicy,
    expected_format: Option<SegmentFormat>,
}

impl AudioAssembler {
    pub fn new(store: Arc<dyn ContentStore>, retry: RetryPolicy) -> Self {
        Self {
            store,
            retry,
            expected_format: None,
        }
    }

    /// Require every segment to have exactly this format
    pub fn with_expected_format(mut self, format: Option<SegmentFormat>) -> Self {
        self.expected_format = format;
        self
    }

    /// Fetch, validate and concatenate segments in the given order
    #[instrument(skip(self, cids), fields(segments = cids.len()))]
    pub async fn assemble(&self, cids: &[ContentId]) -> Result<Vec<u8>> {
        if cids.len() != REQUIRED_SEGMENTS {
            return Err(Error::validation(format!(
                "expected {} segment identifiers, got {}",
                REQUIRED_SEGMENTS,
                cids.len()
            )));
        }

        let blobs = self.fetch_all(cids).await?;

        let mut format = self.expected_format;
        let mut samples: Vec<i16> = Vec::new();

        for (cid, bytes) in cids.iter().zip(&blobs) {
            let (segment_format, decoded) = decode(cid, bytes)?;

            match format {
                Some(expected) if expected != segment_format => {
                    return Err(Error::AssemblyFormat(format!(
                        "segment {} is {}, expected {}",
                        cid, segment_format, expected
                    )));
                }
                Some(_) => {}
                None => format = Some(segment_format),
            }

            debug!(%cid, samples = decoded.len(), "Decoded segment");
            samples.extend(decoded);
        }

        let format = format.ok_or_else(|| Error::Internal("no segments decoded".to_string()))?;
        encode(format, &samples)
    }

    /// Fetch all segments concurrently, preserving input order
    async fn fetch_all(&self, cids: &[ContentId]) -> Result<Vec<Vec<u8>>> {
        let store = self.store.as_ref();
        let policy = &self.retry;

        let fetches = cids.iter().map(move |cid| async move {
            retry(policy, "fetch segment", move || store.get(cid))
                .await
                .map_err(|failure| Error::AssemblyFetch {
                    cid: cid.to_string(),
                    attempts: failure.attempts,
                    message: failure.error.to_string(),
                    transient: failure.error.is_transient(),
                })
        });

        try_join_all(fetches).await
    }
}

/// Decode a segment to interleaved 16-bit samples
fn decode(cid: &ContentId, bytes: &[u8]) -> Result<(SegmentFormat, Vec<i16>)> {
    let unreadable = |e: hound::Error| {
        Error::AssemblyFormat(format!("segment {} is not a readable WAV file: {}", cid, e))
    };

    let mut reader = WavReader::new(Cursor::new(bytes)).map_err(unreadable)?;
    let spec = reader.spec();

    let samples: std::result::Result<Vec<i16>, hound::Error> =
        match (spec.sample_format, spec.bits_per_sample) {
            (SampleFormat::Int, 8) => reader
                .samples::<i32>()
                .map(|s| s.map(|v| (v << 8) as i16))
                .collect(),
            (SampleFormat::Int, 16) => reader.samples::<i16>().collect(),
            (SampleFormat::Int, bits @ 17..=32) => reader
                .samples::<i32>()
                .map(|s| s.map(|v| (v >> (bits - 16)) as i16))
                .collect(),
            (SampleFormat::Float, 32) => reader
                .samples::<f32>()
                .map(|s| s.map(|v| (v.clamp(-1.0, 1.0) * i16::MAX as f32).round() as i16))
                .collect(),
            (sample_format, bits) => {
                return Err(Error::AssemblyFormat(format!(
                    "segment {} uses unsupported encoding {:?}/{} bits",
                    cid, sample_format, bits
                )));
            }
        };

    Ok((SegmentFormat::of(&spec), samples.map_err(unreadable)?))
}

/// Encode samples as a 16-bit PCM WAV file
fn encode(format: SegmentFormat, samples: &[i16]) -> Result<Vec<u8>> {
    let failed = |e: hound::Error| Error::Internal(format!("failed to encode WAV: {}", e));

    let mut out = Vec::new();
    {
        let mut writer =
            WavWriter::new(Cursor::new(&mut out), format.output_spec()).map_err(failed)?;
        for sample in samples {
            writer.write_sample(*sample).map_err(failed)?;
        }
        writer.finalize().map_err(failed)?;
    }
    Ok(out)
}
