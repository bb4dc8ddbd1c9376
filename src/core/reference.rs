//! Cross-reference edge types.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ReanalError;

/// Kind of a reference edge.
///
/// The declaration order is the iteration order of store queries.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub enum XrefKind {
    /// Never persisted
    #[default]
    Unknown,
    /// Jump or branch
    Code,
    Call,
    Data,
    /// Reference to a string literal
    String,
}

impl XrefKind {
    /// All persistable kinds, in query order
    pub const STORED: [XrefKind; 4] = [
        XrefKind::Code,
        XrefKind::Call,
        XrefKind::Data,
        XrefKind::String,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            XrefKind::Unknown => "unknown",
            XrefKind::Code => "code",
            XrefKind::Call => "call",
            XrefKind::Data => "data",
            XrefKind::String => "string",
        }
    }
}

impl fmt::Display for XrefKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for XrefKind {
    type Err = ReanalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unknown" => Ok(XrefKind::Unknown),
            "code" | "jmp" => Ok(XrefKind::Code),
            "call" => Ok(XrefKind::Call),
            "data" => Ok(XrefKind::Data),
            "string" | "str" => Ok(XrefKind::String),
            other => Err(ReanalError::InvalidInput(format!(
                "unknown xref kind `{}`",
                other
            ))),
        }
    }
}

/// A directed, kind-tagged reference between two addresses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Xref {
    pub from: u64,
    pub to: u64,
    pub kind: XrefKind,
}

impl Xref {
    pub fn new(from: u64, to: u64, kind: XrefKind) -> Self {
        Self { from, to, kind }
    }
}

impl fmt::Display for Xref {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x} -> {:#x} ({})", self.from, self.to, self.kind)
    }
}
