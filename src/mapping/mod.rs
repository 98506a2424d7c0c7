//! Path Mapping
//!
//! Translates external logical project paths to the internal paths where a
//! backend actually stores them. The table is injective: every internal
//! path is reachable from exactly one external name.

pub mod adapter;
pub mod discovery;
pub mod format;
pub mod store;

use std::collections::BTreeMap;

pub use adapter::MappedRepository;
pub use store::{MappingChange, MappingSettings, PathMappingStore};

/// Immutable snapshot of the external → internal table
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathMapping {
    external_to_internal: BTreeMap<String, String>,
}

impl PathMapping {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.external_to_internal.len()
    }

    pub fn is_empty(&self) -> bool {
        self.external_to_internal.is_empty()
    }

    pub fn get(&self, external: &str) -> Option<&str> {
        self.external_to_internal.get(external).map(String::as_str)
    }

    pub fn contains_external(&self, external: &str) -> bool {
        self.external_to_internal.contains_key(external)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.external_to_internal
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// First free name among `name`, `name.1`, `name.2`, ...
    pub fn unique_external(&self, name: &str) -> String {
        if !self.contains_external(name) {
            return name.to_string();
        }
        let mut i = 1;
        loop {
            let candidate = format!("{}.{}", name, i);
            if !self.contains_external(&candidate) {
                return candidate;
            }
            i += 1;
        }
    }

    /// Insert under a collision-free variant of `external`, returning the key used
    pub fn insert_unique(&mut self, external: &str, internal: &str) -> String {
        let key = self.unique_external(external);
        self.insert(key.clone(), internal.to_string());
        key
    }

    /// Insert or replace an entry. Any other key pointing at the same internal
    /// path is dropped so the table stays injective.
    pub fn insert(&mut self, external: String, internal: String) {
        self.external_to_internal
            .retain(|k, v| k == &external || v != &internal);
        self.external_to_internal.insert(external, internal);
    }

    pub fn remove(&mut self, external: &str) -> Option<String> {
        self.external_to_internal.remove(external)
    }

    /// Longest-prefix translation external → internal
    pub fn to_internal(&self, external_path: &str) -> Option<String> {
        longest_match(
            self.external_to_internal
                .iter()
                .map(|(k, v)| (k.as_str(), v.as_str())),
            external_path,
        )
    }

    /// Longest-prefix translation internal → external
    pub fn to_external(&self, internal_path: &str) -> Option<String> {
        longest_match(
            self.external_to_internal
                .iter()
                .map(|(k, v)| (v.as_str(), k.as_str())),
            internal_path,
        )
    }
}

impl FromIterator<(String, String)> for PathMapping {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        let mut mapping = PathMapping::new();
        for (external, internal) in iter {
            mapping.insert(external, internal);
        }
        mapping
    }
}

/// `base` matches `path` when equal or when `path` lies under `base/`
fn matches_base(path: &str, base: &str) -> bool {
    path == base
        || (path.len() > base.len()
            && path.starts_with(base)
            && path.as_bytes()[base.len()] == b'/')
}

fn longest_match<'a>(
    pairs: impl Iterator<Item = (&'a str, &'a str)>,
    path: &str,
) -> Option<String> {
    pairs
        .filter(|(from, _)| matches_base(path, from))
        .max_by_key(|(from, _)| from.len())
        .map(|(from, to)| format!("{}{}", to, &path[from.len()..]))
}
