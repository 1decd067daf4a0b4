//! Error taxonomy for the finalization pipeline.
//!
//! Every library operation returns [`Result`]. Variants are split by how the
//! caller should react:
//! - transient failures (store/ledger transport, timeouts) are retried locally
//!   under a [`RetryPolicy`](crate::core::RetryPolicy) and surface only once the
//!   budget is spent
//! - everything else (validation, format, ledger state, configuration) is
//!   surfaced immediately

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result alias used throughout the library
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Pipeline errors
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// Malformed or incomplete input
    #[error("Invalid input: {0}")]
    Validation(String),

    /// Content store write failed
    #[error("Content store write failed: {message}")]
    UpstreamStore { message: String, transient: bool },

    /// Content store read failed (includes unknown identifiers)
    #[error("Content store fetch failed for {cid}: {message}")]
    UpstreamFetch {
        cid: String,
        message: String,
        not_found: bool,
    },

    /// A segment fetch exhausted its retry budget during assembly
    #[error("Failed to fetch segment {cid} after {attempts} attempts: {message}")]
    AssemblyFetch {
        cid: String,
        attempts: u32,
        message: String,
        /// Whether the last failure was transient (false: the segment is gone)
        transient: bool,
    },

    /// Segments cannot be decoded or do not share a format
    #[error("Incompatible segment format: {0}")]
    AssemblyFormat(String),

    /// The ledger reports a state that forbids the operation
    #[error(transparent)]
    LedgerState(#[from] LedgerStateError),

    /// The ledger could not be reached
    #[error("Ledger unavailable: {0}")]
    LedgerTransport(String),

    /// Missing or invalid process configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// An external call exceeded its time budget
    #[error("{operation} timed out after {limit:?}")]
    Timeout { operation: String, limit: Duration },

    /// A background task died unexpectedly
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Ledger-side conditions that make an operation impossible
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerStateError {
    #[error("Beat {0} not found")]
    BeatNotFound(u64),

    #[error("Beat {beat_id} is not completed ({segment_count}/3 segments)")]
    NotCompleted { beat_id: u64, segment_count: usize },

    #[error("Beat {0} is already completed")]
    AlreadyCompleted(u64),

    #[error("Beat {0} has already been minted")]
    AlreadyMinted(u64),

    #[error("Contributor {contributor} already holds a slot on beat {beat_id}")]
    DuplicateContributor { beat_id: u64, contributor: String },

    #[error("Request does not match the ledger record for beat {beat_id}: {detail}")]
    RecordMismatch { beat_id: u64, detail: String },

    #[error("Ledger record for beat {beat_id} violates beat invariants: {detail}")]
    Corrupt { beat_id: u64, detail: String },

    #[error("Malformed ledger response: {0}")]
    Malformed(String),

    #[error("Ledger rejected {operation}: {reason}")]
    Rejected { operation: String, reason: String },
}

/// Coarse classification of an [`Error`], carried by failed finalization runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    UpstreamStore,
    UpstreamFetch,
    AssemblyFetch,
    AssemblyFormat,
    LedgerState,
    LedgerTransport,
    Configuration,
    Timeout,
    Internal,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::Validation => "validation",
            ErrorKind::UpstreamStore => "upstream_store",
            ErrorKind::UpstreamFetch => "upstream_fetch",
            ErrorKind::AssemblyFetch => "assembly_fetch",
            ErrorKind::AssemblyFormat => "assembly_format",
            ErrorKind::LedgerState => "ledger_state",
            ErrorKind::LedgerTransport => "ledger_transport",
            ErrorKind::Configuration => "configuration",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Internal => "internal",
        };
        f.write_str(name)
    }
}

impl Error {
    /// Shorthand for a validation failure
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Classification of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Validation(_) => ErrorKind::Validation,
            Error::UpstreamStore { .. } => ErrorKind::UpstreamStore,
            Error::UpstreamFetch { .. } => ErrorKind::UpstreamFetch,
            Error::AssemblyFetch { .. } => ErrorKind::AssemblyFetch,
            Error::AssemblyFormat(_) => ErrorKind::AssemblyFormat,
            Error::LedgerState(_) => ErrorKind::LedgerState,
            Error::LedgerTransport(_) => ErrorKind::LedgerTransport,
            Error::Configuration(_) => ErrorKind::Configuration,
            Error::Timeout { .. } => ErrorKind::Timeout,
            Error::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Whether an immediate local retry may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            Error::UpstreamStore { transient, .. } => *transient,
            Error::UpstreamFetch { not_found, .. } => !*not_found,
            Error::LedgerTransport(_) | Error::Timeout { .. } => true,
            _ => false,
        }
    }

    /// Whether the caller may succeed by trying again later.
    ///
    /// False means the request itself (or the beat) cannot be finalized as is.
    pub fn is_retryable_later(&self) -> bool {
        match self {
            Error::AssemblyFetch { transient, .. } => *transient,
            Error::Internal(_) => true,
            other => other.is_transient(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        let timeout = Error::Timeout {
            operation: "fetch segment".to_string(),
            limit: Duration::from_secs(1),
        };
        assert!(timeout.is_transient());

        let missing = Error::UpstreamFetch {
            cid: "cidA".to_string(),
            message: "404".to_string(),
            not_found: true,
        };
        assert!(!missing.is_transient());

        let auth = Error::UpstreamStore {
            message: "401".to_string(),
            transient: false,
        };
        assert!(!auth.is_transient());
        assert!(!Error::validation("bad").is_transient());
    }

    #[test]
    fn test_retryable_later() {
        let exhausted = Error::AssemblyFetch {
            cid: "cidB".to_string(),
            attempts: 3,
            message: "connection reset".to_string(),
            transient: true,
        };
        assert!(!exhausted.is_transient());
        assert!(exhausted.is_retryable_later());

        let gone = Error::AssemblyFetch {
            cid: "cidB".to_string(),
            attempts: 1,
            message: "not found".to_string(),
            transient: false,
        };
        assert!(!gone.is_retryable_later());

        let minted = Error::from(LedgerStateError::AlreadyMinted(7));
        assert!(!minted.is_retryable_later());
        assert_eq!(minted.kind(), ErrorKind::LedgerState);
    }

    #[test]
    fn test_assembly_fetch_names_identifier() {
        let err = Error::AssemblyFetch {
            cid: "cidB".to_string(),
            attempts: 3,
            message: "timed out".to_string(),
            transient: true,
        };
        assert!(err.to_string().contains("cidB"));
    }
}
