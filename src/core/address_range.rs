//! Half-open address ranges.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ReanalError;

/// A half-open contiguous range `[from, to)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AddressRange {
    /// First address (inclusive)
    pub from: u64,
    /// End address (exclusive)
    pub to: u64,
}

impl AddressRange {
    /// Create a range, rejecting reversed bounds.
    pub fn new(from: u64, to: u64) -> Result<Self, ReanalError> {
        if to < from {
            return Err(ReanalError::InvalidInput(format!(
                "range end {:#x} before start {:#x}",
                to, from
            )));
        }
        Ok(Self { from, to })
    }

    pub fn size(&self) -> u64 {
        self.to - self.from
    }

    pub fn is_empty(&self) -> bool {
        self.from == self.to
    }

    pub fn contains(&self, addr: u64) -> bool {
        addr >= self.from && addr < self.to
    }

    /// True when `[start, start + len)` lies entirely inside the range.
    pub fn contains_span(&self, start: u64, len: u64) -> bool {
        start >= self.from && start.saturating_add(len) <= self.to
    }
}

impl fmt::Display for AddressRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:#x}, {:#x})", self.from, self.to)
    }
}
