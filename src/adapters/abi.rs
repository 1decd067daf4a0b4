//! Minimal Solidity ABI codec for the BeatChain contract.
//!
//! Covers exactly what the ledger adapter needs: calldata with `uint256` and
//! `string` arguments, and decoding of `uint256` results and the
//! `getBeatDetails` struct:
//!
//! ```text
//! (uint256 id, uint8 status, address[3] contributors, string[3] segmentCIDs,
//!  uint256 segmentCount, bool isMinted)
//! ```
//!
//! Decoding is bounds-checked; anything unexpected is
//! [`LedgerStateError::Malformed`].

use sha3::{Digest, Keccak256};

use crate::domain::{BeatRecord, REQUIRED_SEGMENTS};
use crate::error::LedgerStateError;

const WORD: usize = 32;

type AbiResult<T> = Result<T, LedgerStateError>;

/// Function selector: first four bytes of Keccak-256 of the signature
pub fn selector(signature: &str) -> [u8; 4] {
    let hash = Keccak256::digest(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

/// Call argument
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Uint(u64),
    String(String),
}

/// Encode calldata for `signature` with `args`
pub fn encode_call(signature: &str, args: &[Token]) -> Vec<u8> {
    let head_len = args.len() * WORD;
    let mut head = Vec::with_capacity(head_len);
    let mut tail = Vec::new();

    for arg in args {
        match arg {
            Token::Uint(value) => head.extend_from_slice(&uint_word(*value)),
            Token::String(value) => {
                head.extend_from_slice(&uint_word((head_len + tail.len()) as u64));
                tail.extend_from_slice(&uint_word(value.len() as u64));
                tail.extend_from_slice(value.as_bytes());
                tail.resize(tail.len() + padding(value.len()), 0);
            }
        }
    }

    let mut calldata = Vec::with_capacity(4 + head.len() + tail.len());
    calldata.extend_from_slice(&selector(signature));
    calldata.extend(head);
    calldata.extend(tail);
    calldata
}

/// Decode a `uint256` that must fit in 64 bits
pub fn decode_uint(data: &[u8], offset: usize) -> AbiResult<u64> {
    let word = word(data, offset)?;
    if word[..24].iter().any(|b| *b != 0) {
        return Err(malformed(format!("integer at {} overflows 64 bits", offset)));
    }

    let mut tail = [0u8; 8];
    tail.copy_from_slice(&word[24..]);
    Ok(u64::from_be_bytes(tail))
}

/// Decode the `getBeatDetails` return value into a positional record
pub fn decode_beat_record(data: &[u8]) -> AbiResult<BeatRecord> {
    // the struct is dynamic, so the return data starts with its offset
    let base = decode_offset(data, 0)?;

    let id = decode_uint(data, base)?;
    let status = decode_uint(data, at(base, WORD)?)?;
    let status = u8::try_from(status)
        .map_err(|_| malformed(format!("status {} does not fit uint8", status)))?;

    let mut contributors = Vec::with_capacity(REQUIRED_SEGMENTS);
    for slot in 0..REQUIRED_SEGMENTS {
        contributors.push(decode_address(data, at(base, (2 + slot) * WORD)?)?);
    }

    let cids_base = at(base, decode_offset(data, at(base, 5 * WORD)?)?)?;
    let mut segment_cids = Vec::with_capacity(REQUIRED_SEGMENTS);
    for slot in 0..REQUIRED_SEGMENTS {
        let relative = decode_offset(data, at(cids_base, slot * WORD)?)?;
        segment_cids.push(decode_string(data, at(cids_base, relative)?)?);
    }

    let segment_count = decode_uint(data, at(base, 6 * WORD)?)?;
    let is_minted = decode_bool(data, at(base, 7 * WORD)?)?;

    Ok((id, status, contributors, segment_cids, segment_count, is_minted))
}

fn uint_word(value: u64) -> [u8; WORD] {
    let mut word = [0u8; WORD];
    word[24..].copy_from_slice(&value.to_be_bytes());
    word
}

fn padding(len: usize) -> usize {
    (WORD - len % WORD) % WORD
}

fn malformed(detail: String) -> LedgerStateError {
    LedgerStateError::Malformed(detail)
}

fn at(base: usize, delta: usize) -> AbiResult<usize> {
    base.checked_add(delta)
        .ok_or_else(|| malformed("offset overflow".to_string()))
}

fn word(data: &[u8], offset: usize) -> AbiResult<&[u8]> {
    let end = at(offset, WORD)?;
    data.get(offset..end).ok_or_else(|| {
        malformed(format!(
            "word at {} is out of bounds ({} bytes)",
            offset,
            data.len()
        ))
    })
}

fn decode_offset(data: &[u8], offset: usize) -> AbiResult<usize> {
    let value = decode_uint(data, offset)?;
    usize::try_from(value).map_err(|_| malformed(format!("offset {} is too large", value)))
}

fn decode_bool(data: &[u8], offset: usize) -> AbiResult<bool> {
    match decode_uint(data, offset)? {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(malformed(format!("invalid bool {}", other))),
    }
}

fn decode_address(data: &[u8], offset: usize) -> AbiResult<String> {
    let word = word(data, offset)?;
    if word[..12].iter().any(|b| *b != 0) {
        return Err(malformed(format!("invalid address at {}", offset)));
    }
    Ok(format!("0x{}", hex::encode(&word[12..])))
}

fn decode_string(data: &[u8], offset: usize) -> AbiResult<String> {
    let len = decode_offset(data, offset)?;
    let start = at(offset, WORD)?;
    let end = at(start, len)?;

    let bytes = data
        .get(start..end)
        .ok_or_else(|| malformed(format!("string at {} is out of bounds", offset)))?;

    String::from_utf8(bytes.to_vec())
        .map_err(|_| malformed(format!("string at {} is not UTF-8", offset)))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Encode a record the way the contract returns it
    fn encode_record(record: &BeatRecord) -> Vec<u8> {
        let (id, status, contributors, cids, count, minted) = record;

        let mut out = Vec::new();
        out.extend_from_slice(&uint_word(WORD as u64));

        out.extend_from_slice(&uint_word(*id));
        out.extend_from_slice(&uint_word(*status as u64));
        for address in contributors {
            let mut word = [0u8; WORD];
            word[12..].copy_from_slice(&hex::decode(address.trim_start_matches("0x")).unwrap());
            out.extend_from_slice(&word);
        }
        out.extend_from_slice(&uint_word((8 * WORD) as u64));
        out.extend_from_slice(&uint_word(*count));
        out.extend_from_slice(&uint_word(*minted as u64));

        let mut offsets = Vec::new();
        let mut bodies = Vec::new();
        for cid in cids {
            offsets.extend_from_slice(&uint_word((3 * WORD + bodies.len()) as u64));
            bodies.extend_from_slice(&uint_word(cid.len() as u64));
            bodies.extend_from_slice(cid.as_bytes());
            bodies.resize(bodies.len() + padding(cid.len()), 0);
        }
        out.extend(offsets);
        out.extend(bodies);
        out
    }

    #[test]
    fn test_selector_matches_known_vector() {
        assert_eq!(selector("transfer(address,uint256)"), [0xa9, 0x05, 0x9c, 0xbb]);
    }

    #[test]
    fn test_encode_uint_and_string() {
        let calldata = encode_call(
            "addSegment(uint256,string)",
            &[Token::Uint(7), Token::String("cidB".to_string())],
        );

        assert_eq!(&calldata[..4], &selector("addSegment(uint256,string)"));
        // selector + two head words + length word + one padded data word
        assert_eq!(calldata.len(), 4 + 4 * WORD);
        assert_eq!(decode_uint(&calldata[4..], 0).unwrap(), 7);
        assert_eq!(decode_uint(&calldata[4..], WORD).unwrap(), 64);
        assert_eq!(decode_uint(&calldata[4..], 2 * WORD).unwrap(), 4);
        assert_eq!(&calldata[4 + 3 * WORD..4 + 3 * WORD + 4], b"cidB");
    }

    #[test]
    fn test_decode_beat_record() {
        let alice = format!("0x{}", "11".repeat(20));
        let bob = format!("0x{}", "22".repeat(20));
        let record: BeatRecord = (
            4,
            0,
            vec![alice.clone(), bob.clone(), format!("0x{}", "00".repeat(20))],
            vec![
                "QmSegmentOneWithALongerIdentifierThan32Bytes".to_string(),
                "QmTwo".to_string(),
                String::new(),
            ],
            2,
            false,
        );

        let decoded = decode_beat_record(&encode_record(&record)).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn test_truncated_data_is_malformed() {
        let encoded = encode_record(&(
            1,
            0,
            vec![
                format!("0x{}", "11".repeat(20)),
                format!("0x{}", "00".repeat(20)),
                format!("0x{}", "00".repeat(20)),
            ],
            vec!["QmOne".to_string(), String::new(), String::new()],
            1,
            false,
        ));

        let result = decode_beat_record(&encoded[..encoded.len() - 40]);
        assert!(matches!(result, Err(LedgerStateError::Malformed(_))));
        assert!(decode_beat_record(&[]).is_err());
    }

    #[test]
    fn test_oversized_uint_is_rejected() {
        let mut word = [0u8; WORD];
        word[0] = 1;
        assert!(decode_uint(&word, 0).is_err());
    }
}
