//! BeatChain contract adapter over Ethereum JSON-RPC.
//!
//! Reads go through `eth_call`; writes are submitted with
//! `eth_sendTransaction` from an account unlocked on the node. Transport
//! failures are [`Error::LedgerTransport`] and retried by callers, reverts are
//! ledger-state rejections and never retried.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use super::abi::{self, Token};
use super::{LedgerReader, LedgerWriter, TxReceipt};
use crate::domain::{Beat, ContentId, Contributor};
use crate::error::{Error, LedgerStateError, Result};

const GET_BEAT_DETAILS: &str = "getBeatDetails(uint256)";
const GET_TOTAL_BEATS: &str = "getTotalBeats()";
const START_BEAT: &str = "startBeat(string)";
const ADD_SEGMENT: &str = "addSegment(uint256,string)";
const MINT: &str = "mint(uint256,string)";

/// JSON-RPC response envelope
#[derive(Debug, Deserialize)]
struct RpcResponse {
    result: Option<Value>,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

impl RpcError {
    /// Execution reverted inside the contract
    fn is_revert(&self) -> bool {
        self.code == 3 || self.message.to_ascii_lowercase().contains("revert")
    }
}

/// Ledger client for a deployed BeatChain contract
pub struct EthereumLedger {
    client: reqwest::Client,
    rpc_url: String,
    contract: String,
    next_id: AtomicU64,
}

impl EthereumLedger {
    /// Create a client for `contract` reachable through `rpc_url`
    pub fn new(rpc_url: impl Into<String>, contract: impl Into<String>) -> Result<Self> {
        let contract = contract.into();
        validate_address(&contract)?;

        Ok(Self {
            client: reqwest::Client::new(),
            rpc_url: rpc_url.into(),
            contract: contract.to_ascii_lowercase(),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn contract(&self) -> &str {
        &self.contract
    }

    /// Issue a JSON-RPC call and return the raw outcome
    async fn rpc(
        &self,
        method: &str,
        params: Value,
    ) -> Result<std::result::Result<Value, RpcError>> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        debug!(method, id, "JSON-RPC request");

        let response = self
            .client
            .post(&self.rpc_url)
            .json(&json!({
                "jsonrpc": "2.0",
                "id": id,
                "method": method,
                "params": params,
            }))
            .send()
            .await
            .map_err(|e| Error::LedgerTransport(format!("{} request failed: {}", method, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::LedgerTransport(format!(
                "{} returned HTTP {}",
                method, status
            )));
        }

        let envelope: RpcResponse = response.json().await.map_err(|e| {
            Error::LedgerTransport(format!("{} returned an unreadable body: {}", method, e))
        })?;

        match (envelope.error, envelope.result) {
            (Some(error), _) => Ok(Err(error)),
            (None, Some(result)) => Ok(Ok(result)),
            (None, None) => Err(LedgerStateError::Malformed(format!(
                "{} response has neither result nor error",
                method
            ))
            .into()),
        }
    }

    /// `eth_call` against the contract, returning decoded return data
    async fn call(
        &self,
        signature: &str,
        args: &[Token],
    ) -> Result<std::result::Result<Vec<u8>, RpcError>> {
        let data = format!("0x{}", hex::encode(abi::encode_call(signature, args)));
        let outcome = self
            .rpc(
                "eth_call",
                json!([{ "to": self.contract, "data": data }, "latest"]),
            )
            .await?;

        match outcome {
            Ok(value) => Ok(Ok(decode_hex_value(signature, &value)?)),
            Err(error) => Ok(Err(error)),
        }
    }

    /// Submit a state-changing transaction
    async fn send(&self, from: &Contributor, signature: &str, args: &[Token]) -> Result<TxReceipt> {
        validate_address(from.as_str())?;

        let data = format!("0x{}", hex::encode(abi::encode_call(signature, args)));
        let outcome = self
            .rpc(
                "eth_sendTransaction",
                json!([{ "from": from.as_str(), "to": self.contract, "data": data }]),
            )
            .await?;

        match outcome {
            Ok(Value::String(tx_hash)) => Ok(TxReceipt::new(tx_hash)),
            Ok(other) => Err(LedgerStateError::Malformed(format!(
                "{} returned a non-string transaction hash: {}",
                signature, other
            ))
            .into()),
            Err(error) if error.is_revert() => Err(LedgerStateError::Rejected {
                operation: operation_name(signature).to_string(),
                reason: error.message,
            }
            .into()),
            Err(error) => Err(Error::LedgerTransport(format!(
                "{} failed ({}): {}",
                operation_name(signature),
                error.code,
                error.message
            ))),
        }
    }
}

#[async_trait]
impl LedgerReader for EthereumLedger {
    async fn get_beat_details(&self, beat_id: u64) -> Result<Beat> {
        match self.call(GET_BEAT_DETAILS, &[Token::Uint(beat_id)]).await? {
            Ok(data) => Beat::from_record(beat_id, abi::decode_beat_record(&data)?),
            Err(error) if error.is_revert() => Err(LedgerStateError::BeatNotFound(beat_id).into()),
            Err(error) => Err(Error::LedgerTransport(format!(
                "getBeatDetails failed ({}): {}",
                error.code, error.message
            ))),
        }
    }

    async fn get_total_beats(&self) -> Result<u64> {
        match self.call(GET_TOTAL_BEATS, &[]).await? {
            Ok(data) => Ok(abi::decode_uint(&data, 0)?),
            Err(error) => Err(Error::LedgerTransport(format!(
                "getTotalBeats failed ({}): {}",
                error.code, error.message
            ))),
        }
    }
}

#[async_trait]
impl LedgerWriter for EthereumLedger {
    async fn start_beat(&self, from: &Contributor, initial: &ContentId) -> Result<TxReceipt> {
        self.send(from, START_BEAT, &[Token::String(initial.to_string())])
            .await
    }

    async fn add_segment(
        &self,
        from: &Contributor,
        beat_id: u64,
        cid: &ContentId,
    ) -> Result<TxReceipt> {
        self.send(
            from,
            ADD_SEGMENT,
            &[Token::Uint(beat_id), Token::String(cid.to_string())],
        )
        .await
    }

    async fn mint(
        &self,
        from: &Contributor,
        beat_id: u64,
        metadata_cid: &ContentId,
    ) -> Result<TxReceipt> {
        self.send(
            from,
            MINT,
            &[Token::Uint(beat_id), Token::String(metadata_cid.to_string())],
        )
        .await
    }
}

/// Function name without its argument list
fn operation_name(signature: &str) -> &str {
    signature.split('(').next().unwrap_or(signature)
}

/// Accept only `0x` followed by 40 hex digits
fn validate_address(address: &str) -> Result<()> {
    let digits = address
        .strip_prefix("0x")
        .or_else(|| address.strip_prefix("0X"))
        .ok_or_else(|| Error::validation(format!("address {} must start with 0x", address)))?;

    if digits.len() != 40 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(Error::validation(format!(
            "address {} must be 20 hex-encoded bytes",
            address
        )));
    }
    Ok(())
}

fn decode_hex_value(signature: &str, value: &Value) -> Result<Vec<u8>> {
    let text = value.as_str().ok_or_else(|| {
        LedgerStateError::Malformed(format!("{} returned a non-string result", signature))
    })?;

    hex::decode(text.trim_start_matches("0x")).map_err(|e| {
        LedgerStateError::Malformed(format!("{} returned invalid hex: {}", signature, e)).into()
    })
}
