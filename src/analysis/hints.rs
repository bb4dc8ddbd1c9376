//! Per-address overrides of decoder output.
//!
//! A hint replaces selected fields of the op decoded at its address before
//! the walker dispatches on it, which lets analysts correct a decoder
//! without touching it.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::core::op::Op;

/// Overrides for one address
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hint {
    pub size: Option<usize>,
    pub jump: Option<u64>,
    pub fail: Option<u64>,
    pub ptr: Option<u64>,
    pub semantics: Option<String>,
}

impl Hint {
    pub fn is_empty(&self) -> bool {
        *self == Hint::default()
    }

    /// Apply the set fields to `op`.
    pub fn apply(&self, op: &mut Op) {
        if let Some(size) = self.size {
            op.size = size;
        }
        if let Some(jump) = self.jump {
            op.jump = Some(jump);
        }
        if let Some(fail) = self.fail {
            op.fail = Some(fail);
        }
        if let Some(ptr) = self.ptr {
            op.ptr = Some(ptr);
        }
        if let Some(expr) = &self.semantics {
            op.semantics = expr.clone();
        }
    }
}

/// Address-keyed hint table
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HintStore {
    hints: BTreeMap<u64, Hint>,
}

impl HintStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mutable hint at `addr`, created empty if missing.
    pub fn entry(&mut self, addr: u64) -> &mut Hint {
        self.hints.entry(addr).or_default()
    }

    pub fn get(&self, addr: u64) -> Option<&Hint> {
        self.hints.get(&addr)
    }

    pub fn set_size(&mut self, addr: u64, size: usize) {
        self.entry(addr).size = Some(size);
    }

    pub fn set_jump(&mut self, addr: u64, target: u64) {
        self.entry(addr).jump = Some(target);
    }

    pub fn set_fail(&mut self, addr: u64, target: u64) {
        self.entry(addr).fail = Some(target);
    }

    pub fn set_ptr(&mut self, addr: u64, ptr: u64) {
        self.entry(addr).ptr = Some(ptr);
    }

    pub fn set_semantics(&mut self, addr: u64, expr: impl Into<String>) {
        self.entry(addr).semantics = Some(expr.into());
    }

    pub fn delete(&mut self, addr: u64) -> bool {
        self.hints.remove(&addr).is_some()
    }

    /// Apply the hint at `op.address`, if any.
    pub fn apply(&self, op: &mut Op) {
        if let Some(h) = self.hints.get(&op.address) {
            h.apply(op);
        }
    }

    pub fn len(&self) -> usize {
        self.hints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hints.is_empty()
    }

    pub fn clear(&mut self) {
        self.hints.clear();
    }
}
