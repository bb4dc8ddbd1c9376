//! Stack variables synthesized during the walk.
//!
//! Variables are keyed by their signed offset from the frame or stack
//! pointer. Positive offsets are arguments, negative offsets locals.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Storage class of a frame variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VariableKind {
    /// Above the frame pointer
    Argument,
    /// Below the frame pointer
    Local,
    /// Addressed through the stack pointer
    StackArgument,
}

impl VariableKind {
    /// Pick the storage class for a frame-relative offset.
    pub fn for_delta(delta: i64) -> Self {
        if delta > 0 {
            VariableKind::Argument
        } else {
            VariableKind::Local
        }
    }
}

/// One instruction touching a variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableAccess {
    pub addr: u64,
    pub write: bool,
}

/// A frame variable of a function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variable {
    pub name: String,
    pub kind: VariableKind,
    /// Signed offset from the frame base
    pub delta: i64,
    /// Size in bytes
    pub size: u32,
    pub accesses: Vec<VariableAccess>,
}

impl Variable {
    pub fn new(kind: VariableKind, delta: i64, size: u32) -> Self {
        Self {
            name: Self::default_name(kind, delta),
            kind,
            delta,
            size,
            accesses: Vec::new(),
        }
    }

    /// `arg_<hex>h` for arguments, `local_<hex>h` for locals.
    pub fn default_name(kind: VariableKind, delta: i64) -> String {
        match kind {
            VariableKind::Argument | VariableKind::StackArgument => {
                format!("arg_{:x}h", delta.unsigned_abs())
            }
            VariableKind::Local => format!("local_{:x}h", delta.unsigned_abs()),
        }
    }

    pub fn record(&mut self, addr: u64, write: bool) {
        if !self.accesses.iter().any(|a| a.addr == addr && a.write == write) {
            self.accesses.push(VariableAccess { addr, write });
        }
    }
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.delta < 0 { "-" } else { "+" };
        write!(
            f,
            "{} {}{:#x} ({} bytes, {} accesses)",
            self.name,
            sign,
            self.delta.unsigned_abs(),
            self.size,
            self.accesses.len()
        )
    }
}
