//! Configuration for the analysis engine.
//!
//! Provides the target triple, traversal limits and the walker switches,
//! all with defaults and serde support so hosts can keep them in JSON.

use serde::{Deserialize, Serialize};

use crate::core::address_range::AddressRange;
use crate::error::ReanalError;

/// Default recursion-depth budget of a walk.
pub const DEFAULT_DEPTH: u32 = 512;
/// Functions larger than this are rejected.
pub const MAX_FUNCTION_SIZE: u64 = 256 * 1024;
/// Bytes read per block.
pub const MAX_BLOCK_SIZE: usize = 16 * 1024;

/// What the walker does at an unconditional direct jump.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum JumpPolicy {
    /// End the block and walk the target as a new block
    #[default]
    Split,
    /// Walk the target and keep decoding after the jump
    ContinueAfter,
    /// End the block without following the target
    EndOfBlock,
}

/// Walker switches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisOptions {
    /// Jump handling mode
    pub jump_policy: JumpPolicy,
    /// Follow jumps landing below the function entry
    pub jmpabove: bool,
    /// Jumps into another section end the block
    pub cross_section_eob: bool,
    /// Record code xrefs for direct jumps
    pub jmpref: bool,
    /// Record code xrefs for conditional jumps
    pub cjmpref: bool,
    /// Resolve jump tables behind indirect jumps
    pub jmptbl: bool,
    /// Rewrite `push addr; ret` into a jump
    pub pushret: bool,
    /// Re-entering a covered block ends the path instead of failing it
    pub recont: bool,
    /// Skip leading nop/trap/zero padding at the function entry
    pub nopskip: bool,
    /// Extract frame variables from semantic expressions
    pub frame_vars_from_semantics: bool,
    /// Gap tolerated between blocks when computing function size
    pub bbs_alignment: u64,
    pub max_function_size: u64,
    pub max_block_size: usize,
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self {
            jump_policy: JumpPolicy::Split,
            jmpabove: true,
            cross_section_eob: true,
            jmpref: true,
            cjmpref: true,
            jmptbl: true,
            pushret: false,
            recont: false,
            nopskip: true,
            frame_vars_from_semantics: false,
            bbs_alignment: 16,
            max_function_size: MAX_FUNCTION_SIZE,
            max_block_size: MAX_BLOCK_SIZE,
        }
    }
}

/// Engine configuration: triple, limits and walker options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Decoder plugin name
    pub arch: String,
    pub bits: u8,
    pub os: String,
    pub cpu: Option<String>,
    pub big_endian: bool,
    /// Recursion-depth budget per walk
    pub depth: u32,
    /// Address range all traversal stays inside
    pub limit: Option<AddressRange>,
    /// Cooperative pause between walked paths, in microseconds
    pub sleep_us: u64,
    pub options: AnalysisOptions,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            arch: "x86".to_string(),
            bits: 32,
            os: "linux".to_string(),
            cpu: None,
            big_endian: false,
            depth: DEFAULT_DEPTH,
            limit: None,
            sleep_us: 0,
            options: AnalysisOptions::default(),
        }
    }
}

impl EngineConfig {
    /// Serialize to JSON string
    pub fn to_json_string(&self) -> Result<String, ReanalError> {
        serde_json::to_string_pretty(self).map_err(|e| ReanalError::Serialization(e.to_string()))
    }

    /// Deserialize from JSON string; missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, ReanalError> {
        serde_json::from_str(json).map_err(|e| ReanalError::Serialization(e.to_string()))
    }
}

/// Bit widths the engine accepts
pub fn valid_bits(bits: u8) -> bool {
    matches!(bits, 8 | 16 | 32 | 64)
}
