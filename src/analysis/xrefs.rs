//! Cross-reference store.
//!
//! Every edge lives in two indices: forward, keyed by `(from, kind)`, and
//! reverse, keyed by `(to, kind)`. Both are updated together on insert and
//! delete, so a query from either side always sees the same edge set.
//! `XrefKind::Unknown` edges are rejected.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::core::reference::{Xref, XrefKind};

type Index = BTreeMap<(u64, XrefKind), BTreeSet<u64>>;

/// Bidirectional, kind-tagged edge index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct XrefStore {
    forward: Index,
    reverse: Index,
}

fn remove_half(index: &mut Index, key: (u64, XrefKind), other: u64) -> bool {
    let Some(set) = index.get_mut(&key) else {
        return false;
    };
    let removed = set.remove(&other);
    if set.is_empty() {
        index.remove(&key);
    }
    removed
}

fn range_of(index: &Index, addr: u64) -> impl Iterator<Item = (&(u64, XrefKind), &BTreeSet<u64>)> {
    index.range((addr, XrefKind::Unknown)..=(addr, XrefKind::String))
}

impl XrefStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an edge. Returns false for `Unknown` kinds.
    pub fn set(&mut self, from: u64, to: u64, kind: XrefKind) -> bool {
        if kind == XrefKind::Unknown {
            return false;
        }
        trace!(from, to, kind = %kind, "add xref");
        self.forward.entry((from, kind)).or_default().insert(to);
        self.reverse.entry((to, kind)).or_default().insert(from);
        true
    }

    /// All edges pointing at `to`, ordered by kind then source.
    pub fn get(&self, to: u64) -> Vec<Xref> {
        range_of(&self.reverse, to)
            .flat_map(|(&(to, kind), froms)| froms.iter().map(move |&from| Xref::new(from, to, kind)))
            .collect()
    }

    /// All edges leaving `from`, ordered by kind then target.
    pub fn get_from(&self, from: u64) -> Vec<Xref> {
        range_of(&self.forward, from)
            .flat_map(|(&(from, kind), tos)| tos.iter().map(move |&to| Xref::new(from, to, kind)))
            .collect()
    }

    /// Edges of one kind pointing at `to`.
    pub fn get_kind(&self, to: u64, kind: XrefKind) -> Vec<Xref> {
        self.reverse
            .get(&(to, kind))
            .map(|froms| froms.iter().map(|&f| Xref::new(f, to, kind)).collect())
            .unwrap_or_default()
    }

    pub fn contains(&self, from: u64, to: u64, kind: XrefKind) -> bool {
        self.forward
            .get(&(from, kind))
            .is_some_and(|tos| tos.contains(&to))
    }

    /// Remove one edge from both indices.
    pub fn delete(&mut self, from: u64, to: u64, kind: XrefKind) -> bool {
        if !self.contains(from, to, kind) {
            return false;
        }
        remove_half(&mut self.forward, (from, kind), to);
        remove_half(&mut self.reverse, (to, kind), from);
        true
    }

    /// Number of stored edges
    pub fn count(&self) -> usize {
        self.forward.values().map(BTreeSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }

    /// Every edge, ordered by source
    pub fn list(&self) -> Vec<Xref> {
        self.forward
            .iter()
            .flat_map(|(&(from, kind), tos)| tos.iter().map(move |&to| Xref::new(from, to, kind)))
            .collect()
    }

    pub fn clear(&mut self) {
        self.forward.clear();
        self.reverse.clear();
    }
}

impl Serialize for XrefStore {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.list().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for XrefStore {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let edges = Vec::<Xref>::deserialize(deserializer)?;
        let mut store = XrefStore::new();
        for x in edges {
            store.set(x.from, x.to, x.kind);
        }
        Ok(store)
    }
}

impl Extend<Xref> for XrefStore {
    fn extend<T: IntoIterator<Item = Xref>>(&mut self, iter: T) {
        for x in iter {
            self.set(x.from, x.to, x.kind);
        }
    }
}
