//! Function type and its block-level operations.
//!
//! A function owns its basic blocks. Its size is the contiguous coverage
//! computed when a walk finishes; in between, the walker grows it through
//! [`Function::fit_block`] so the size cap can be enforced early.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::analysis::cfg::WalkStatus;
use crate::core::basic_block::{BasicBlock, BlockKind};
use crate::core::disassembler::Architecture;
use crate::core::reference::Xref;
use crate::core::variable::{Variable, VariableKind};
use crate::error::ReanalError;

/// Kind of function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum FunctionKind {
    /// Function discovered in the analyzed code
    #[default]
    Normal,
    /// Imported function stub
    Import,
    /// Program entry / analysis root
    Root,
    /// Inline location reached through a code reference
    Location,
}

impl FunctionKind {
    pub fn value(&self) -> &str {
        match self {
            FunctionKind::Normal => "fcn",
            FunctionKind::Import => "imp",
            FunctionKind::Root => "root",
            FunctionKind::Location => "loc",
        }
    }
}

/// Calling convention tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum CallingConvention {
    #[default]
    Unknown,
    Cdecl,
    Stdcall,
    Fastcall,
    /// System V AMD64
    SysV64,
    /// Microsoft x64
    Ms64,
    Aapcs,
    Aapcs64,
}

impl CallingConvention {
    /// Default convention for a target triple.
    pub fn default_for(arch: Architecture, os: &str) -> Self {
        match arch {
            Architecture::X86 if os == "windows" => CallingConvention::Stdcall,
            Architecture::X86 => CallingConvention::Cdecl,
            Architecture::X86_64 if os == "windows" => CallingConvention::Ms64,
            Architecture::X86_64 => CallingConvention::SysV64,
            Architecture::ARM => CallingConvention::Aapcs,
            Architecture::ARM64 => CallingConvention::Aapcs64,
            Architecture::MIPS | Architecture::Unknown => CallingConvention::Unknown,
        }
    }
}

/// A function recovered by the walker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Function {
    pub name: String,
    /// Entry address
    pub addr: u64,
    size: u64,
    pub kind: FunctionKind,
    pub calling_convention: CallingConvention,
    pub bits: u8,
    /// Net stack-pointer delta observed along the walk
    pub stack: i64,
    /// Number of instructions accounted by the walker
    pub ninstr: u32,
    pub blocks: Vec<BasicBlock>,
    /// References originating in this function
    pub refs: Vec<Xref>,
    pub vars: Vec<Variable>,
}

impl Function {
    /// Create an empty function rooted at `addr`.
    pub fn new(addr: u64, name: impl Into<String>, kind: FunctionKind) -> Self {
        Self {
            name: name.into(),
            addr,
            size: 0,
            kind,
            calling_convention: CallingConvention::Unknown,
            bits: 0,
            stack: 0,
            ninstr: 0,
            blocks: Vec::new(),
            refs: Vec::new(),
            vars: Vec::new(),
        }
    }

    /// Default name for a function of `kind` at `addr`, e.g. `fcn.00401000`.
    pub fn default_name(kind: FunctionKind, addr: u64) -> String {
        format!("{}.{:08x}", kind.value(), addr)
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Exclusive end of the function span
    pub fn end(&self) -> u64 {
        self.addr.saturating_add(self.size)
    }

    pub(crate) fn set_size(&mut self, size: u64) {
        self.size = size;
    }

    /// True when `addr` lies inside the span or inside one of the blocks.
    pub fn contains(&self, addr: u64) -> bool {
        (addr >= self.addr && addr < self.end()) || self.block_containing(addr).is_some()
    }

    /// Index of the block covering `addr`
    pub fn block_containing(&self, addr: u64) -> Option<usize> {
        self.blocks.iter().position(|bb| bb.contains(addr))
    }

    /// Block starting exactly at `addr`
    pub fn block_at(&self, addr: u64) -> Option<&BasicBlock> {
        self.blocks.iter().find(|bb| bb.addr == addr)
    }

    /// First block starting strictly inside `(start, end)`
    pub(crate) fn block_start_within(&self, start: u64, end: u64) -> Option<u64> {
        self.blocks
            .iter()
            .map(|bb| bb.addr)
            .filter(|&a| a > start && a < end)
            .min()
    }

    /// Append an empty block at `addr` and return its index.
    pub(crate) fn append_block(&mut self, addr: u64) -> usize {
        let mut bb = BasicBlock::new(addr);
        if addr == self.addr {
            bb.kind = BlockKind::HEAD;
        }
        self.blocks.push(bb);
        self.blocks.len() - 1
    }

    /// Split the block covering `addr` so that a block starts there.
    ///
    /// Returns `Dup` when a block already starts at `addr`, `End` after a
    /// split and `New` when no block covers the address.
    pub fn split_block(&mut self, addr: u64) -> WalkStatus {
        let Some(idx) = self.block_containing(addr) else {
            return WalkStatus::New;
        };
        if self.blocks[idx].addr == addr {
            return WalkStatus::Dup;
        }
        let tail = self.blocks[idx].split_off(addr);
        self.blocks.insert(idx + 1, tail);
        WalkStatus::End
    }

    /// Grow the function span to cover the block at `idx`.
    ///
    /// A function that outgrows `limit` is truncated to zero size and the
    /// walk must stop.
    pub(crate) fn fit_block(&mut self, idx: usize, limit: u64) -> Result<(), ReanalError> {
        let end = self.blocks[idx].end();
        if end >= self.addr {
            let span = end - self.addr;
            if span > self.size {
                self.size = span;
            }
        }
        if self.size > limit {
            let size = self.size;
            self.size = 0;
            return Err(ReanalError::SizeLimitExceeded {
                addr: self.addr,
                size,
                limit,
            });
        }
        Ok(())
    }

    /// End of contiguous coverage from the entry.
    ///
    /// Blocks must be sorted. A gap shorter than `alignment` before an
    /// aligned block is tolerated; any other gap stops the scan.
    pub fn contiguous_end(&self, alignment: u64) -> u64 {
        let mut end = self.addr;
        for bb in &self.blocks {
            if bb.addr <= end {
                end = end.max(bb.end());
            } else if alignment > 0 && bb.addr - end < alignment && bb.addr % alignment == 0 {
                end = bb.end();
            } else {
                break;
            }
        }
        end
    }

    /// Shrink the function to `new_size` bytes.
    ///
    /// Blocks starting past the new end are dropped, the rest are truncated
    /// and lose exits pointing past it.
    pub fn resize(&mut self, new_size: u64) -> bool {
        if new_size == 0 {
            return false;
        }
        let eof = self.addr.saturating_add(new_size);
        self.blocks.retain(|bb| bb.addr < eof);
        for bb in &mut self.blocks {
            bb.truncate_to(eof);
        }
        self.ninstr = self.blocks.iter().map(|bb| bb.ninstr() as u32).sum();
        self.size = new_size;
        true
    }

    /// Sort blocks by address.
    pub(crate) fn sort_blocks(&mut self) {
        self.blocks.sort_by_key(|bb| bb.addr);
    }

    /// Record a stack-slot access at a frame-relative `delta`.
    pub fn record_stack_access(&mut self, delta: i64, write: bool, at: u64) {
        self.record_var(VariableKind::for_delta(delta), delta, write, at);
    }

    pub(crate) fn record_var(&mut self, kind: VariableKind, delta: i64, write: bool, at: u64) {
        let size = u32::from(self.bits / 8).max(1);
        let idx = match self
            .vars
            .iter()
            .position(|v| v.delta == delta && v.kind == kind)
        {
            Some(idx) => idx,
            None => {
                self.vars.push(Variable::new(kind, delta, size));
                self.vars.len() - 1
            }
        };
        self.vars[idx].record(at, write);
    }

    pub fn var_by_name(&self, name: &str) -> Option<&Variable> {
        self.vars.iter().find(|v| v.name == name)
    }

    /// Control-flow edges between block starts (jump edges first)
    pub fn edges(&self) -> Vec<(u64, u64)> {
        self.blocks
            .iter()
            .flat_map(|bb| bb.successors().into_iter().map(move |s| (bb.addr, s)))
            .filter(|(_, to)| self.block_at(*to).is_some())
            .collect()
    }

    /// Calculate cyclomatic complexity
    pub fn cyclomatic_complexity(&self) -> u32 {
        // M = E - N + 2P, with P = 1 for a single function
        let edges = self.edges().len() as u32;
        let nodes = self.blocks.len() as u32;

        if nodes == 0 {
            return 0;
        }

        edges.saturating_add(2).saturating_sub(nodes)
    }

    /// Serialize to JSON string
    pub fn to_json_string(&self) -> Result<String, ReanalError> {
        serde_json::to_string(self).map_err(|e| ReanalError::Serialization(e.to_string()))
    }

    /// Deserialize from JSON string
    pub fn from_json_str(json_str: &str) -> Result<Self, ReanalError> {
        serde_json::from_str(json_str).map_err(|e| ReanalError::Serialization(e.to_string()))
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}@{:#x} ({} bytes, {} blocks)",
            self.name,
            self.addr,
            self.size,
            self.blocks.len()
        )
    }
}
