//! Address-range metadata store.
//!
//! Annotations cover half-open ranges `[from, to)` and are tagged with the
//! namespace that was active when they were added. A page index
//! (`addr >> 12`) answers "what covers this address" without scanning every
//! item. Ranges spanning more pages than [`MAX_BUCKET_PAGES`] go to a side
//! list that every lookup checks.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ReanalError;

/// Bits of the page index
pub const BUCKET_SHIFT: u32 = 12;
/// Ranges touching more pages than this skip the page index
pub const MAX_BUCKET_PAGES: u64 = 4096;

/// Kind of an annotation
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum MetaKind {
    Hidden,
    Code,
    Data,
    String,
    Format,
    Magic,
    Comment,
}

impl MetaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetaKind::Hidden => "hidden",
            MetaKind::Code => "code",
            MetaKind::Data => "data",
            MetaKind::String => "string",
            MetaKind::Format => "format",
            MetaKind::Magic => "magic",
            MetaKind::Comment => "comment",
        }
    }
}

impl fmt::Display for MetaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetaKind {
    type Err = ReanalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "hidden" => MetaKind::Hidden,
            "code" => MetaKind::Code,
            "data" => MetaKind::Data,
            "string" => MetaKind::String,
            "format" => MetaKind::Format,
            "magic" => MetaKind::Magic,
            "comment" => MetaKind::Comment,
            other => {
                return Err(ReanalError::InvalidInput(format!(
                    "unknown meta kind `{}`",
                    other
                )))
            }
        })
    }
}

/// Identifier of a metadata namespace
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct NamespaceId(pub u32);

/// Registry of named namespaces plus the active one.
///
/// No active namespace means wildcard: queries see every item and new
/// items are unscoped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Namespaces {
    names: Vec<Option<String>>,
    active: Option<NamespaceId>,
}

impl Namespaces {
    /// Id of `name`, creating it if needed.
    pub fn get_or_create(&mut self, name: &str) -> NamespaceId {
        if let Some(id) = self.find(name) {
            return id;
        }
        self.names.push(Some(name.to_string()));
        NamespaceId((self.names.len() - 1) as u32)
    }

    pub fn find(&self, name: &str) -> Option<NamespaceId> {
        self.names
            .iter()
            .position(|n| n.as_deref() == Some(name))
            .map(|i| NamespaceId(i as u32))
    }

    pub fn name(&self, id: NamespaceId) -> Option<&str> {
        self.names.get(id.0 as usize).and_then(|n| n.as_deref())
    }

    pub fn active(&self) -> Option<NamespaceId> {
        self.active
    }

    /// Names of live namespaces, in creation order
    pub fn list(&self) -> Vec<(NamespaceId, &str)> {
        self.names
            .iter()
            .enumerate()
            .filter_map(|(i, n)| n.as_deref().map(|n| (NamespaceId(i as u32), n)))
            .collect()
    }

    fn visible(&self, ns: Option<NamespaceId>) -> bool {
        self.active.is_none() || self.active == ns
    }
}

/// One annotation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaItem {
    pub from: u64,
    pub to: u64,
    pub kind: MetaKind,
    pub namespace: Option<NamespaceId>,
    pub payload: String,
}

impl MetaItem {
    pub fn size(&self) -> u64 {
        self.to.saturating_sub(self.from)
    }

    pub fn contains(&self, addr: u64) -> bool {
        addr >= self.from && addr < self.to
    }
}

type Key = (u64, MetaKind, Option<NamespaceId>);

#[derive(Serialize, Deserialize)]
struct MetaSnapshot {
    namespaces: Namespaces,
    items: Vec<MetaItem>,
}

/// Namespaced range annotations with a page index.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "MetaSnapshot", into = "MetaSnapshot")]
pub struct MetaStore {
    items: BTreeMap<Key, MetaItem>,
    buckets: BTreeMap<u64, BTreeSet<Key>>,
    wide: BTreeSet<Key>,
    namespaces: Namespaces,
}

impl TryFrom<MetaSnapshot> for MetaStore {
    type Error = ReanalError;

    /// Rebuild the indices from a loaded item list, applying the same range
    /// rules as [`MetaStore::add`].
    fn try_from(snap: MetaSnapshot) -> Result<Self, Self::Error> {
        let mut store = MetaStore {
            namespaces: snap.namespaces,
            ..MetaStore::default()
        };
        for mut item in snap.items {
            item.to = checked_end(item.from, item.to)?;
            store.insert(item);
        }
        Ok(store)
    }
}

impl From<MetaStore> for MetaSnapshot {
    fn from(store: MetaStore) -> Self {
        MetaSnapshot {
            namespaces: store.namespaces,
            items: store.items.into_values().collect(),
        }
    }
}

/// End of a `[from, to)` range: reversed ranges are rejected and empty
/// ones widened to one byte.
fn checked_end(from: u64, to: u64) -> Result<u64, ReanalError> {
    if to < from {
        return Err(ReanalError::InvalidInput(format!(
            "meta range end {:#x} before start {:#x}",
            to, from
        )));
    }
    Ok(if to == from { from.saturating_add(1) } else { to })
}

fn pages(from: u64, to: u64) -> (u64, u64) {
    (from >> BUCKET_SHIFT, (to - 1) >> BUCKET_SHIFT)
}

impl MetaStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or overwrite the annotation of `kind` starting at `from`.
    ///
    /// A zero-length range is widened to one byte. The item is tagged with
    /// the active namespace.
    pub fn add(
        &mut self,
        kind: MetaKind,
        from: u64,
        to: u64,
        payload: impl Into<String>,
    ) -> Result<(), ReanalError> {
        let to = checked_end(from, to)?;
        self.insert(MetaItem {
            from,
            to,
            kind,
            namespace: self.namespaces.active,
            payload: payload.into(),
        });
        Ok(())
    }

    fn insert(&mut self, item: MetaItem) {
        let key = (item.from, item.kind, item.namespace);
        if self.items.contains_key(&key) {
            self.unindex(key);
        }
        let (first, last) = pages(item.from, item.to);
        if last - first >= MAX_BUCKET_PAGES {
            self.wide.insert(key);
        } else {
            for page in first..=last {
                self.buckets.entry(page).or_default().insert(key);
            }
        }
        self.items.insert(key, item);
    }

    fn unindex(&mut self, key: Key) -> Option<MetaItem> {
        let item = self.items.remove(&key)?;
        if !self.wide.remove(&key) {
            let (first, last) = pages(item.from, item.to);
            for page in first..=last {
                if let Some(set) = self.buckets.get_mut(&page) {
                    set.remove(&key);
                    if set.is_empty() {
                        self.buckets.remove(&page);
                    }
                }
            }
        }
        Some(item)
    }

    /// Most specific visible annotation covering `addr`.
    ///
    /// `kind = None` matches any kind. The smallest range wins; ties go to
    /// the range starting last.
    pub fn find(&self, addr: u64, kind: Option<MetaKind>) -> Option<&MetaItem> {
        let page = addr >> BUCKET_SHIFT;
        self.buckets
            .get(&page)
            .into_iter()
            .flatten()
            .chain(self.wide.iter())
            .filter_map(|key| self.items.get(key))
            .filter(|item| item.contains(addr))
            .filter(|item| kind.map_or(true, |k| k == item.kind))
            .filter(|item| self.namespaces.visible(item.namespace))
            .min_by(|a, b| {
                a.size()
                    .cmp(&b.size())
                    .then_with(|| b.from.cmp(&a.from))
                    .then_with(|| a.kind.cmp(&b.kind))
            })
    }

    /// Visible annotation of `kind` starting exactly at `from`.
    pub fn get_at(&self, from: u64, kind: MetaKind) -> Option<&MetaItem> {
        self.items
            .range((from, kind, None)..=(from, kind, Some(NamespaceId(u32::MAX))))
            .map(|(_, item)| item)
            .find(|item| self.namespaces.visible(item.namespace))
    }

    /// Delete visible items of `kind` (any kind when `None`) starting in
    /// `[from, from + size)`. Returns how many were removed.
    pub fn delete(&mut self, kind: Option<MetaKind>, from: u64, size: u64) -> usize {
        let end = from.saturating_add(size);
        let doomed: Vec<Key> = self
            .items
            .range((from, MetaKind::Hidden, None)..)
            .take_while(|(k, _)| k.0 < end)
            .filter(|(_, item)| kind.map_or(true, |k| k == item.kind))
            .filter(|(_, item)| self.namespaces.visible(item.namespace))
            .map(|(k, _)| *k)
            .collect();
        for key in &doomed {
            self.unindex(*key);
        }
        doomed.len()
    }

    /// Delete every visible item starting in `[from, to)`.
    pub fn cleanup(&mut self, from: u64, to: u64) -> usize {
        self.delete(None, from, to.saturating_sub(from))
    }

    /// Visible items of `kind`, ordered by address
    pub fn enumerate(&self, kind: Option<MetaKind>) -> Vec<&MetaItem> {
        self.items
            .values()
            .filter(|item| kind.map_or(true, |k| k == item.kind))
            .filter(|item| self.namespaces.visible(item.namespace))
            .collect()
    }

    pub fn set_comment(&mut self, addr: u64, text: impl Into<String>) -> Result<(), ReanalError> {
        self.add(MetaKind::Comment, addr, addr, text)
    }

    pub fn comment_at(&self, addr: u64) -> Option<&str> {
        self.get_at(addr, MetaKind::Comment).map(|i| i.payload.as_str())
    }

    /// Activate namespace `name`, creating it if needed.
    pub fn set_namespace(&mut self, name: &str) -> NamespaceId {
        let id = self.namespaces.get_or_create(name);
        self.namespaces.active = Some(id);
        id
    }

    /// Switch to an existing namespace by id.
    pub fn use_namespace(&mut self, id: NamespaceId) -> Result<(), ReanalError> {
        if self.namespaces.name(id).is_none() {
            return Err(ReanalError::InvalidInput(format!(
                "no metadata namespace {}",
                id.0
            )));
        }
        self.namespaces.active = Some(id);
        Ok(())
    }

    /// Back to wildcard mode.
    pub fn unset_namespace(&mut self) {
        self.namespaces.active = None;
    }

    pub fn namespaces(&self) -> &Namespaces {
        &self.namespaces
    }

    /// Drop namespace `name`; its items become unscoped.
    pub fn remove_namespace(&mut self, name: &str) -> bool {
        let Some(id) = self.namespaces.find(name) else {
            return false;
        };
        let keys: Vec<Key> = self
            .items
            .keys()
            .filter(|k| k.2 == Some(id))
            .copied()
            .collect();
        for key in keys {
            if let Some(mut item) = self.unindex(key) {
                item.namespace = None;
                self.insert(item);
            }
        }
        self.namespaces.names[id.0 as usize] = None;
        if self.namespaces.active == Some(id) {
            self.namespaces.active = None;
        }
        debug!(namespace = name, "removed metadata namespace");
        true
    }

    /// Number of items tagged with `id`
    pub fn namespace_count(&self, id: NamespaceId) -> usize {
        self.items.values().filter(|i| i.namespace == Some(id)).count()
    }

    /// Delete every item tagged with `id`, leaving other namespaces alone.
    pub fn purge_namespace(&mut self, id: NamespaceId) -> usize {
        let keys: Vec<Key> = self
            .items
            .keys()
            .filter(|k| k.2 == Some(id))
            .copied()
            .collect();
        for key in &keys {
            self.unindex(*key);
        }
        keys.len()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.buckets.clear();
        self.wide.clear();
    }
}
