//! Error types for the reanal analysis engine.
//!
//! Every failure the walker, the translator or the stores can produce is a
//! variant of [`ReanalError`]. Walk-level failures are never fatal: the CFG
//! builder folds them into a [`WalkStatus`] for the caller.

use thiserror::Error;

use crate::analysis::cfg::WalkStatus;
use crate::core::disassembler::DisassemblerError;

/// Main error type for reanal operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReanalError {
    /// Memory at the address is not mapped or not readable
    #[error("Invalid address {0:#x}")]
    InvalidAddress(u64),

    /// Another function roots here, or this function already covers it
    #[error("Address {0:#x} already analyzed")]
    AlreadyAnalyzed(u64),

    /// Depth budget ran out before the path could be walked
    #[error("Recursion budget exhausted at {0:#x}")]
    RecursionExhausted(u64),

    /// The decoder rejected the bytes, or the walk ran into padding
    #[error("Decode failure at {addr:#x}: {reason}")]
    DecodeFailure { addr: u64, reason: String },

    /// Function grew beyond the configured size cap
    #[error("Function at {addr:#x} exceeds size limit ({size}/{limit})")]
    SizeLimitExceeded { addr: u64, size: u64, limit: u64 },

    /// Semantic expression could not be translated
    #[error("Malformed semantic expression `{expr}`: {reason}")]
    MalformedSemanticExpr { expr: String, reason: String },

    /// Cancellation flag was raised mid-walk
    #[error("Analysis interrupted at {0:#x}")]
    Interrupted(u64),

    /// No decoder plugin matches the requested architecture
    #[error("Unsupported architecture: {0}")]
    UnsupportedArchitecture(String),

    /// Invalid input data
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Result type alias for reanal operations
pub type Result<T> = std::result::Result<T, ReanalError>;

impl ReanalError {
    /// Status a CFG path reports when it stops on this error.
    pub fn status(&self) -> WalkStatus {
        match self {
            ReanalError::AlreadyAnalyzed(_) => WalkStatus::Dup,
            _ => WalkStatus::Error,
        }
    }

    /// Shorthand for a translator failure on `expr`.
    pub fn malformed(expr: &str, reason: impl Into<String>) -> Self {
        ReanalError::MalformedSemanticExpr {
            expr: expr.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn decode(addr: u64, err: DisassemblerError) -> Self {
        ReanalError::DecodeFailure {
            addr,
            reason: err.to_string(),
        }
    }
}
