//! Functions that never return.
//!
//! Entries are either addresses or names. A name matches when a function
//! with that name is rooted at the queried address, or the symbol lookup
//! resolves it there.

use std::collections::BTreeMap;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::core::function::Function;
use crate::core::register::parse_number;
use crate::core::symbol::SymbolLookup;
use crate::error::ReanalError;

/// One no-return declaration
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NoReturn {
    Address(u64),
    Name(String),
}

/// Turn a `*` glob into an anchored regex.
fn glob_regex(pattern: &str) -> Result<Regex, ReanalError> {
    let body = pattern
        .split('*')
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(".*");
    Regex::new(&format!("^{}$", body)).map_err(|e| ReanalError::InvalidInput(e.to_string()))
}

/// Ordered list of no-return declarations
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoReturnList {
    entries: Vec<NoReturn>,
}

impl NoReturnList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare `expr` no-return: an address literal or a name.
    pub fn add(&mut self, expr: &str) -> bool {
        let entry = match parse_number(expr) {
            Some(addr) => NoReturn::Address(addr),
            None if expr.is_empty() => return false,
            None => NoReturn::Name(expr.to_string()),
        };
        if self.entries.contains(&entry) {
            return false;
        }
        self.entries.push(entry);
        true
    }

    /// Remove entries matching `expr`: `*` clears everything, an address
    /// literal removes that address, anything else is a name glob.
    pub fn drop_matching(&mut self, expr: &str) -> Result<usize, ReanalError> {
        let before = self.entries.len();
        if expr == "*" {
            self.entries.clear();
        } else if let Some(addr) = parse_number(expr) {
            self.entries.retain(|e| *e != NoReturn::Address(addr));
        } else {
            let re = glob_regex(expr)?;
            self.entries
                .retain(|e| !matches!(e, NoReturn::Name(n) if re.is_match(n)));
        }
        Ok(before - self.entries.len())
    }

    /// True when the code at `addr` is declared no-return.
    pub fn is_noreturn_at(
        &self,
        addr: u64,
        functions: &BTreeMap<u64, Function>,
        symbols: &dyn SymbolLookup,
    ) -> bool {
        let fcn_name = functions.get(&addr).map(|f| f.name.as_str());
        self.entries.iter().any(|e| match e {
            NoReturn::Address(a) => *a == addr,
            NoReturn::Name(n) => {
                fcn_name == Some(n.as_str()) || symbols.address_of(n) == Some(addr)
            }
        })
    }

    pub fn entries(&self) -> &[NoReturn] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
