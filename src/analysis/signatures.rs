//! Calling-convention signature data per target triple.
//!
//! The engine does not read signature files. A host registers a
//! [`SignatureSource`]; the engine asks it for the database matching
//! `(os, arch, bits)` whenever the triple changes.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

/// Symbol name to prototype string
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureDb {
    entries: BTreeMap<String, String>,
}

impl SignatureDb {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, symbol: impl Into<String>, prototype: impl Into<String>) {
        self.entries.insert(symbol.into(), prototype.into());
    }

    pub fn get(&self, symbol: &str) -> Option<&str> {
        self.entries.get(symbol).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Supplier of signature databases.
pub trait SignatureSource {
    fn load(&self, os: &str, arch: &str, bits: u8) -> Option<SignatureDb>;
}

/// Signature databases held in memory, keyed by triple.
#[derive(Debug, Clone, Default)]
pub struct StaticSignatures {
    dbs: HashMap<(String, String, u8), SignatureDb>,
}

impl StaticSignatures {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, os: &str, arch: &str, bits: u8, db: SignatureDb) {
        self.dbs.insert((os.to_string(), arch.to_string(), bits), db);
    }
}

impl SignatureSource for StaticSignatures {
    fn load(&self, os: &str, arch: &str, bits: u8) -> Option<SignatureDb> {
        self.dbs
            .get(&(os.to_string(), arch.to_string(), bits))
            .cloned()
    }
}
