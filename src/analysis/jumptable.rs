//! Jump-table resolution for indirect jumps.
//!
//! A table is a run of architecture-word entries starting at a base
//! pointer. Entries are accepted until one falls outside the traversal
//! limit, outside mapped memory, or outside a plausibility window around
//! the jump itself. Reads never go past [`MAX_JMPTBL_SIZE`] bytes.

use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, trace};

use crate::analysis::memory::MemoryProbe;
use crate::core::address_range::AddressRange;
use crate::core::disassembler::Decoder;

/// Maximum number of table bytes read
pub const MAX_JMPTBL_SIZE: usize = 1000;
/// Entries farther than this from the jump are rejected
pub const MAX_JMPTBL_JMP: u64 = 10000;

/// Reads and validates jump-table entries.
pub struct JumpTableReader<'a> {
    memory: &'a dyn MemoryProbe,
    word_size: usize,
    big_endian: bool,
    limit: Option<AddressRange>,
    cancel: Option<&'a AtomicBool>,
}

impl<'a> JumpTableReader<'a> {
    pub fn new(
        memory: &'a dyn MemoryProbe,
        word_size: usize,
        big_endian: bool,
        limit: Option<AddressRange>,
    ) -> Self {
        Self {
            memory,
            word_size: word_size.clamp(1, 8),
            big_endian,
            limit,
            cancel: None,
        }
    }

    /// Stop reading entries once `flag` is raised.
    pub fn with_cancel(mut self, flag: &'a AtomicBool) -> Self {
        self.cancel = Some(flag);
        self
    }

    fn cancelled(&self) -> bool {
        self.cancel.is_some_and(|c| c.load(Ordering::Relaxed))
    }

    fn plausible(&self, jump_addr: u64, target: u64) -> bool {
        let lo = jump_addr.saturating_sub(MAX_JMPTBL_JMP);
        let hi = jump_addr.saturating_add(MAX_JMPTBL_JMP);
        target >= lo && target <= hi
    }

    /// Targets of the table at `table` used by the jump at `jump_addr`.
    pub fn targets(&self, jump_addr: u64, table: u64) -> Vec<u64> {
        let mut buf = vec![0u8; MAX_JMPTBL_SIZE];
        let avail = self.memory.read_at(table, &mut buf);
        let mut out = Vec::new();
        let mut off = 0usize;
        while off + self.word_size <= avail {
            if self.cancelled() {
                debug!(jump_addr, table, "jump table read cancelled");
                break;
            }
            let raw = &buf[off..off + self.word_size];
            let target = raw.iter().enumerate().fold(0u64, |acc, (i, &b)| {
                if self.big_endian {
                    (acc << 8) | u64::from(b)
                } else {
                    acc | (u64::from(b) << (8 * i))
                }
            });
            if self.limit.is_some_and(|l| !l.contains(target)) {
                break;
            }
            if !self.memory.is_valid(target) || !self.plausible(jump_addr, target) {
                break;
            }
            trace!(table, entry = off / self.word_size, target, "jump table entry");
            out.push(target);
            off += self.word_size;
        }
        debug!(jump_addr, table, entries = out.len(), "resolved jump table");
        out
    }
}

/// Scan `bytes` (a block starting at `base`) up to `end` for the last
/// instruction writing `reg`, and return the address it loads.
pub fn find_last_write(
    decoder: &dyn Decoder,
    bytes: &[u8],
    base: u64,
    end: usize,
    reg: &str,
) -> Option<u64> {
    let mut found = None;
    let mut off = 0usize;
    let end = end.min(bytes.len());
    while off < end {
        let Ok(op) = decoder.decode(base + off as u64, &bytes[off..end]) else {
            break;
        };
        if op.size == 0 {
            break;
        }
        if op.dst.as_ref().and_then(|d| d.register.as_deref()) == Some(reg) {
            found = op
                .src
                .first()
                .and_then(|s| s.displacement.or(s.immediate))
                .map(|v| v as u64);
        }
        off += op.size;
    }
    found
}
