//! Error types for the market-data engine
//!
//! Error taxonomy using thiserror. Only `TickError` ever reaches a caller:
//! lookup failures are absorbed at the fetch executor boundary and an
//! unknown sector is reported as `None`, not as an error.

use thiserror::Error;

/// Structurally invalid tick rejected at the ingestion boundary.
///
/// No state is mutated when one of these is returned.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TickError {
    #[error("Invalid tick: price must be strictly positive, got {0}")]
    NonPositivePrice(String),

    #[error("Invalid tick: volume must not be negative, got {0}")]
    NegativeVolume(i64),

    #[error("Invalid tick: instrument code is empty")]
    EmptyInstrument,

    #[error("Invalid tick: unparsable price {0:?}")]
    Unparsable(String),
}

/// Code that is empty after trimming.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodeError {
    #[error("{0} code must not be empty")]
    Empty(&'static str),
}

/// Failure of a single price lookup against the upstream provider.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LookupError {
    #[error("Lookup timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Malformed response: {0}")]
    Malformed(String),

    #[error("No data for instrument")]
    NoData,

    #[error("Fetch executor has been shut down")]
    ExecutorShutdown,
}

impl LookupError {
    /// Short label for structured logs and metrics.
    pub fn kind_label(&self) -> &'static str {
        match self {
            LookupError::Timeout { .. } => "timeout",
            LookupError::Transport(_) => "transport",
            LookupError::Malformed(_) => "malformed",
            LookupError::NoData => "no_data",
            LookupError::ExecutorShutdown => "shutdown",
        }
    }
}
