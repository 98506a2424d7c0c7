//! Project auto-discovery
//!
//! Used when a backend has no mapping resource yet: every project descriptor
//! found in the backend contributes one mapping entry, named after the
//! `/project/name` element of the descriptor.

use super::PathMapping;
use crate::error::RepositoryError;
use crate::repository::Repository;
use crate::types::folder_prefix;
use std::io::Read;
use tracing::{debug, warn};

/// Default descriptor file name
pub const DEFAULT_DESCRIPTOR: &str = "rules.xml";

/// Extract `/project/name` from a descriptor document
pub fn project_name(xml: &str) -> Option<String> {
    let document = match roxmltree::Document::parse(xml) {
        Ok(document) => document,
        Err(e) => {
            debug!("Failed to parse project descriptor: {}", e);
            return None;
        }
    };
    let root = document.root_element();
    if root.tag_name().name() != "project" {
        return None;
    }
    root.children()
        .find(|node| node.is_element() && node.tag_name().name() == "name")
        .map(|node| {
            node.descendants()
                .filter(|n| n.is_text())
                .filter_map(|n| n.text())
                .collect::<String>()
                .trim()
                .to_string()
        })
        .filter(|name| !name.is_empty())
}

/// Scan the whole backend for descriptors and build a mapping.
///
/// Duplicate project names get numeric suffixes in listing order.
pub fn discover(
    repository: &dyn Repository,
    base_folder: &str,
    descriptor: &str,
) -> Result<PathMapping, RepositoryError> {
    let base = folder_prefix(base_folder);
    let mut mapping = PathMapping::new();

    for record in repository.list("")? {
        if record.deleted || record.name() != descriptor {
            continue;
        }
        let Some(item) = repository.read(&record.path)? else {
            continue;
        };
        let mut content = item.content;
        let mut xml = String::new();
        if let Err(e) = content.read_to_string(&mut xml) {
            warn!("Failed to read descriptor {}: {}", record.path, e);
            continue;
        }
        drop(content);

        let Some(name) = project_name(&xml) else {
            warn!("Descriptor {} has no project name, skipping", record.path);
            continue;
        };

        let folder = record
            .path
            .strip_suffix(descriptor)
            .map(|p| p.trim_end_matches('/'))
            .unwrap_or_default();
        let requested = format!("{}{}", base, name);
        let external = mapping.insert_unique(&requested, folder);
        if external != requested {
            debug!(
                "Project name {} already mapped, using {} for {}",
                requested, external, folder
            );
        }
    }

    Ok(mapping)
}
