//! Decoder capability traits and error types.
//!
//! The analysis core never decodes instructions itself. It talks to a
//! [`Decoder`] chosen once at configuration time through a [`DecoderPlugin`],
//! and consumes the [`Op`] descriptors it returns.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::core::op::Op;

/// Errors that can occur during decoding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DisassemblerError {
    /// Invalid instruction bytes
    InvalidInstruction(),
    /// Insufficient bytes for complete instruction
    InsufficientBytes(),
    /// No descriptor known for this address
    UnknownAddress(u64),
    /// Unsupported bit width for the selected backend
    UnsupportedBits(u8),
    /// Internal decoder error with message
    InternalError(String),
}

impl fmt::Display for DisassemblerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisassemblerError::InvalidInstruction() => write!(f, "InvalidInstruction"),
            DisassemblerError::InsufficientBytes() => write!(f, "InsufficientBytes"),
            DisassemblerError::UnknownAddress(a) => write!(f, "UnknownAddress: {:#x}", a),
            DisassemblerError::UnsupportedBits(b) => write!(f, "UnsupportedBits: {}", b),
            DisassemblerError::InternalError(msg) => write!(f, "InternalError: {}", msg),
        }
    }
}

impl std::error::Error for DisassemblerError {}

/// Result type for decode operations
pub type DisassemblerResult<T> = Result<T, DisassemblerError>;

/// Architecture families known to the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Architecture {
    /// x86 (16/32-bit)
    X86,
    /// x86-64 (64-bit)
    X86_64,
    /// ARM (32-bit)
    ARM,
    /// ARM64/AArch64 (64-bit)
    ARM64,
    /// MIPS
    MIPS,
    /// Anything a custom decoder reports
    Unknown,
}

impl Architecture {
    /// Map an architecture name and bit width onto a family.
    pub fn from_name(name: &str, bits: u8) -> Self {
        match (name, bits) {
            ("x86", 64) => Architecture::X86_64,
            ("x86", _) => Architecture::X86,
            ("arm", 64) => Architecture::ARM64,
            ("arm", _) => Architecture::ARM,
            ("mips", _) => Architecture::MIPS,
            _ => Architecture::Unknown,
        }
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Architecture::X86 => write!(f, "x86"),
            Architecture::X86_64 => write!(f, "x86_64"),
            Architecture::ARM => write!(f, "arm"),
            Architecture::ARM64 => write!(f, "arm64"),
            Architecture::MIPS => write!(f, "mips"),
            Architecture::Unknown => write!(f, "unknown"),
        }
    }
}

/// Static instruction-size facts about an architecture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchInfo {
    pub min_op_size: usize,
    pub max_op_size: usize,
    /// Required instruction alignment in bytes
    pub align: usize,
}

impl Default for ArchInfo {
    fn default() -> Self {
        Self {
            min_op_size: 1,
            max_op_size: 16,
            align: 1,
        }
    }
}

/// Core decoder trait: bytes in, op descriptor out.
pub trait Decoder {
    /// Decode one instruction at `addr`. `bytes.len()` is the maximum length
    /// the decoder may consume.
    fn decode(&self, addr: u64, bytes: &[u8]) -> DisassemblerResult<Op>;

    /// Instruction size facts
    fn arch_info(&self) -> ArchInfo;

    fn architecture(&self) -> Architecture;

    /// Whether an indirect jump at `addr` keeps the function going.
    ///
    /// Some targets use indirect jumps inside PLT-style stubs that are not
    /// the end of a function. `section` is the name of the section holding
    /// `addr`, when the memory probe knows it.
    fn ujmp_continues(&self, _addr: u64, _section: Option<&str>) -> bool {
        false
    }

    /// Get a human-readable name for this decoder
    fn name(&self) -> &str {
        "generic"
    }
}

/// Factory for decoders of one architecture family.
pub trait DecoderPlugin {
    /// Architecture name used by `set_architecture`, e.g. `"x86"`
    fn name(&self) -> &str;

    fn supports_bits(&self, bits: u8) -> bool;

    /// Build a decoder for the given bit width and byte order.
    fn instantiate(&self, bits: u8, big_endian: bool) -> DisassemblerResult<Box<dyn Decoder>>;
}
