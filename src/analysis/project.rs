//! Project snapshot handed to an external save/load collaborator.
//!
//! The engine never touches the disk. It exports the stores that outlive
//! a single walk as a [`ProjectSnapshot`], which round-trips through JSON
//! or a compact bincode form; writing the bytes somewhere is the caller's
//! business.

use serde::{Deserialize, Serialize};

use crate::analysis::hints::HintStore;
use crate::analysis::meta::MetaStore;
use crate::analysis::noreturn::NoReturnList;
use crate::analysis::xrefs::XrefStore;
use crate::error::{ReanalError, Result};

/// Current snapshot layout version
pub const SNAPSHOT_VERSION: u32 = 1;

/// Persistable analysis state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectSnapshot {
    pub version: u32,
    pub xrefs: XrefStore,
    /// Annotations together with their namespace table
    pub meta: MetaStore,
    pub noreturn: NoReturnList,
    pub hints: HintStore,
}

impl Default for ProjectSnapshot {
    fn default() -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            xrefs: XrefStore::new(),
            meta: MetaStore::new(),
            noreturn: NoReturnList::new(),
            hints: HintStore::new(),
        }
    }
}

impl ProjectSnapshot {
    /// Serialize to JSON string
    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| ReanalError::Serialization(e.to_string()))
    }

    /// Deserialize from JSON string
    pub fn from_json_str(json: &str) -> Result<Self> {
        let snap: Self =
            serde_json::from_str(json).map_err(|e| ReanalError::Serialization(e.to_string()))?;
        snap.check_version()
    }

    /// Serialize to bincode bytes
    pub fn to_bincode(&self) -> Result<Vec<u8>> {
        bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| ReanalError::Serialization(e.to_string()))
    }

    /// Deserialize from bincode bytes
    pub fn from_bincode(data: &[u8]) -> Result<Self> {
        let (snap, _): (Self, usize) =
            bincode::serde::decode_from_slice(data, bincode::config::standard())
                .map_err(|e| ReanalError::Serialization(e.to_string()))?;
        snap.check_version()
    }

    fn check_version(self) -> Result<Self> {
        if self.version != SNAPSHOT_VERSION {
            return Err(ReanalError::Serialization(format!(
                "unsupported snapshot version {}",
                self.version
            )));
        }
        Ok(self)
    }
}
