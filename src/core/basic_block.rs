//! BasicBlock type for straight-line code regions.
//!
//! A block is owned by exactly one function. Besides its span it records
//! the offset of every instruction it holds, which the walker needs for
//! delay-slot bookkeeping and for splitting blocks at arbitrary addresses.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt;

bitflags! {
    /// Position of a block inside its function
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct BlockKind: u8 {
        /// Entry block
        const HEAD = 0x01;
        const BODY = 0x02;
        /// Ends in a return
        const LAST = 0x04;
    }
}

/// BasicBlock represents a straight-line code region
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasicBlock {
    /// Starting address of the basic block
    pub addr: u64,
    /// Size in bytes
    pub size: u64,
    /// Branch target leaving the block
    pub jump: Option<u64>,
    /// Fallthrough target of a conditional exit
    pub fail: Option<u64>,
    /// Exit is a conditional branch
    pub conditional: bool,
    /// Offsets of the instructions, relative to `addr`
    pub op_offsets: Vec<u64>,
    /// Set once the block was observed executing
    pub traced: bool,
    pub kind: BlockKind,
}

impl BasicBlock {
    /// Create an empty block starting at `addr`.
    pub fn new(addr: u64) -> Self {
        Self {
            addr,
            size: 0,
            jump: None,
            fail: None,
            conditional: false,
            op_offsets: Vec::new(),
            traced: false,
            kind: BlockKind::BODY,
        }
    }

    /// Exclusive end address
    pub fn end(&self) -> u64 {
        self.addr.saturating_add(self.size)
    }

    pub fn contains(&self, addr: u64) -> bool {
        addr >= self.addr && addr < self.end()
    }

    /// Number of instructions in the block
    pub fn ninstr(&self) -> usize {
        self.op_offsets.len()
    }

    /// Account one more instruction of `len` bytes located at `at`.
    pub fn push_op(&mut self, at: u64, len: u64) {
        self.op_offsets.push(at.saturating_sub(self.addr));
        self.size += len;
    }

    /// Undo the last `push_op`.
    pub fn pop_op(&mut self, len: u64) {
        self.op_offsets.pop();
        self.size = self.size.saturating_sub(len);
    }

    /// Address of each instruction in the block
    pub fn op_addresses(&self) -> impl Iterator<Item = u64> + '_ {
        self.op_offsets.iter().map(move |off| self.addr + off)
    }

    /// Successor addresses (jump first, then fail)
    pub fn successors(&self) -> Vec<u64> {
        self.jump.into_iter().chain(self.fail).collect()
    }

    /// Cut the block at `at`, keeping `[addr, at)` here and returning `[at, end)`.
    ///
    /// The tail inherits the exits; the head falls into the tail.
    pub(crate) fn split_off(&mut self, at: u64) -> BasicBlock {
        let cut = at - self.addr;
        let mut tail = BasicBlock::new(at);
        tail.size = self.size - cut;
        tail.jump = self.jump;
        tail.fail = self.fail;
        tail.conditional = self.conditional;
        tail.traced = self.traced;
        tail.kind = (self.kind - BlockKind::HEAD) | BlockKind::BODY;
        tail.op_offsets = self
            .op_offsets
            .iter()
            .filter(|&&off| off >= cut)
            .map(|off| off - cut)
            .collect();

        self.op_offsets.retain(|&off| off < cut);
        self.size = cut;
        self.jump = Some(at);
        self.fail = None;
        self.conditional = false;
        self.kind.remove(BlockKind::LAST);
        tail
    }

    /// Shrink the block so it ends no later than `eof`.
    pub(crate) fn truncate_to(&mut self, eof: u64) {
        if self.end() > eof {
            self.size = eof.saturating_sub(self.addr);
            let size = self.size;
            self.op_offsets.retain(|&off| off < size);
        }
        if self.jump.is_some_and(|j| j >= eof) {
            self.jump = None;
        }
        if self.fail.is_some_and(|f| f >= eof) {
            self.fail = None;
        }
    }
}

impl fmt::Display for BasicBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "BasicBlock({:#x}-{:#x}, {} instructions)",
            self.addr,
            self.end(),
            self.ninstr()
        )
    }
}
