//! Symbol lookup capability.
//!
//! The walker asks whether an address carries a symbol (so it does not strip
//! leading instructions from a named entry point) and the no-return list
//! resolves names to addresses through the same trait.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Symbol lookup consumed by the analysis core.
pub trait SymbolLookup {
    /// Name of the symbol defined exactly at `addr`
    fn symbol_at(&self, addr: u64) -> Option<String>;

    /// Address of the symbol called `name`
    fn address_of(&self, name: &str) -> Option<u64>;

    fn has_symbol_at(&self, addr: u64) -> bool {
        self.symbol_at(addr).is_some()
    }
}

/// In-memory symbol table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SymbolTable {
    by_addr: BTreeMap<u64, String>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Define `name` at `addr`, replacing any previous name there.
    pub fn insert(&mut self, addr: u64, name: impl Into<String>) {
        self.by_addr.insert(addr, name.into());
    }

    pub fn remove(&mut self, addr: u64) -> Option<String> {
        self.by_addr.remove(&addr)
    }

    pub fn len(&self) -> usize {
        self.by_addr.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_addr.is_empty()
    }
}

impl SymbolLookup for SymbolTable {
    fn symbol_at(&self, addr: u64) -> Option<String> {
        self.by_addr.get(&addr).cloned()
    }

    fn address_of(&self, name: &str) -> Option<u64> {
        self.by_addr
            .iter()
            .find(|(_, n)| n.as_str() == name)
            .map(|(a, _)| *a)
    }
}

impl<S: Into<String>> FromIterator<(u64, S)> for SymbolTable {
    fn from_iter<T: IntoIterator<Item = (u64, S)>>(iter: T) -> Self {
        Self {
            by_addr: iter.into_iter().map(|(a, n)| (a, n.into())).collect(),
        }
    }
}
