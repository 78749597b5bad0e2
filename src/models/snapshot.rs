//! Snapshot and change-set containers.
//!
//! A [`Snapshot`] holds at most one entry per URI and always iterates in
//! ascending URI order, which the merge diff in `pipeline::diff` relies on.
//! A [`ChangeSet`] is an ordered log that may repeat a URI.

use std::collections::BTreeMap;
use std::collections::btree_map;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::models::Resource;

/// Link metadata for a related document (`xhtml:link` on the wire).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capability {
    /// Space separated `rel` values
    #[serde(default)]
    pub rel: Vec<String>,
    /// Space separated `type` values
    #[serde(default)]
    pub types: Vec<String>,
}

impl Capability {
    /// Capability with a single space-separated `rel` attribute.
    pub fn rel(rel: &str) -> Self {
        Self {
            rel: rel.split_whitespace().map(str::to_string).collect(),
            types: Vec::new(),
        }
    }
}

/// Capability map: href -> link metadata, written in href order.
pub type Capabilities = BTreeMap<String, Capability>;

/// Common surface of snapshot and change-set for the catalog codec.
pub trait ResourceContainer {
    /// Entries in write order.
    fn resources(&self) -> Box<dyn Iterator<Item = &Resource> + '_>;

    /// Number of entries.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn capabilities(&self) -> &Capabilities;

    fn capabilities_mut(&mut self) -> &mut Capabilities;

    /// Whether entries carry change tags on the wire.
    fn is_change_set(&self) -> bool;

    /// Add an entry read from a document. `source` names the document for
    /// log context.
    fn add_parsed(&mut self, resource: Resource, source: &str);
}

/// Set of resources keyed by URI.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    resources: BTreeMap<String, Resource>,
    #[serde(default)]
    pub capabilities: Capabilities,
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a resource, failing if its URI is already present.
    pub fn add(&mut self, resource: Resource) -> Result<()> {
        match self.resources.entry(resource.uri.clone()) {
            btree_map::Entry::Occupied(_) => Err(AppError::DuplicateResource(resource.uri)),
            btree_map::Entry::Vacant(slot) => {
                slot.insert(resource);
                Ok(())
            }
        }
    }

    /// Insert or overwrite a resource, returning the previous entry.
    pub fn replace(&mut self, resource: Resource) -> Option<Resource> {
        self.resources.insert(resource.uri.clone(), resource)
    }

    pub fn remove(&mut self, uri: &str) -> Option<Resource> {
        self.resources.remove(uri)
    }

    pub fn get(&self, uri: &str) -> Option<&Resource> {
        self.resources.get(uri)
    }

    pub fn get_mut(&mut self, uri: &str) -> Option<&mut Resource> {
        self.resources.get_mut(uri)
    }

    pub fn contains(&self, uri: &str) -> bool {
        self.resources.contains_key(uri)
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Entries in ascending URI order.
    pub fn iter(&self) -> btree_map::Values<'_, String, Resource> {
        self.resources.values()
    }

    /// URIs in ascending order.
    pub fn uris(&self) -> impl Iterator<Item = &str> {
        self.resources.keys().map(String::as_str)
    }
}

impl FromIterator<Resource> for Snapshot {
    /// Later duplicates replace earlier ones.
    fn from_iter<I: IntoIterator<Item = Resource>>(iter: I) -> Self {
        let mut snapshot = Snapshot::new();
        for resource in iter {
            snapshot.replace(resource);
        }
        snapshot
    }
}

impl<'a> IntoIterator for &'a Snapshot {
    type Item = &'a Resource;
    type IntoIter = btree_map::Values<'a, String, Resource>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl IntoIterator for Snapshot {
    type Item = Resource;
    type IntoIter = btree_map::IntoValues<String, Resource>;

    fn into_iter(self) -> Self::IntoIter {
        self.resources.into_values()
    }
}

impl ResourceContainer for Snapshot {
    fn resources(&self) -> Box<dyn Iterator<Item = &Resource> + '_> {
        Box::new(self.iter())
    }

    fn len(&self) -> usize {
        self.resources.len()
    }

    fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    fn capabilities_mut(&mut self) -> &mut Capabilities {
        &mut self.capabilities
    }

    fn is_change_set(&self) -> bool {
        false
    }

    fn add_parsed(&mut self, resource: Resource, source: &str) {
        if let Some(existing) = self.get(&resource.uri) {
            log::warn!(
                "Duplicate entry {} in {} ({} =? {}), keeping first",
                resource.uri,
                source,
                resource.lastmod().unwrap_or_default(),
                existing.lastmod().unwrap_or_default()
            );
            return;
        }
        self.replace(resource);
    }
}

/// Ordered list of change entries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSet {
    entries: Vec<Resource>,
    #[serde(default)]
    pub capabilities: Capabilities,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry; repeated URIs are kept.
    pub fn add(&mut self, resource: Resource) {
        self.entries.push(resource);
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Resource> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All entries describing `uri`, in order.
    pub fn entries_for<'a>(&'a self, uri: &'a str) -> impl Iterator<Item = &'a Resource> + 'a {
        self.entries.iter().filter(move |r| r.uri == uri)
    }
}

impl ResourceContainer for ChangeSet {
    fn resources(&self) -> Box<dyn Iterator<Item = &Resource> + '_> {
        Box::new(self.entries.iter())
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    fn capabilities_mut(&mut self) -> &mut Capabilities {
        &mut self.capabilities
    }

    fn is_change_set(&self) -> bool {
        true
    }

    fn add_parsed(&mut self, resource: Resource, _source: &str) {
        self.entries.push(resource);
    }
}
