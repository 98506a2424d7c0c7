//! Metadata rewriting between source and target namespaces

use crate::identity::UserMapper;
use crate::types::{FileItem, FileRecord};
use tracing::warn;

pub const DEFAULT_COMMENT_TEMPLATE: &str = "{0}";

/// Rewrites records read from the source into records for the target
#[derive(Debug, Clone)]
pub struct MetadataRewriter {
    source_base: String,
    target_base: String,
    users: UserMapper,
    comment_template: String,
}

impl Default for MetadataRewriter {
    fn default() -> Self {
        Self::new("", "", UserMapper::default(), DEFAULT_COMMENT_TEMPLATE)
    }
}

impl MetadataRewriter {
    pub fn new(
        source_base: impl Into<String>,
        target_base: impl Into<String>,
        users: UserMapper,
        comment_template: impl Into<String>,
    ) -> Self {
        Self {
            source_base: source_base.into(),
            target_base: target_base.into(),
            users,
            comment_template: comment_template.into(),
        }
    }

    pub fn source_base(&self) -> &str {
        &self.source_base
    }

    pub fn target_base(&self) -> &str {
        &self.target_base
    }

    /// Replace the source base prefix with the target one
    pub fn translate_path(&self, path: &str) -> String {
        match path.strip_prefix(self.source_base.as_str()) {
            Some(rest) => format!("{}{}", self.target_base, rest),
            None => {
                warn!(
                    "Path {} is outside source base {}, keeping it",
                    path, self.source_base
                );
                path.to_string()
            }
        }
    }

    /// Target record for a source version: translated paths, mapped author,
    /// templated comment and no version.
    pub fn rewrite(&self, record: &FileRecord) -> FileRecord {
        FileRecord {
            path: self.translate_path(&record.path),
            version: None,
            author: record.author.as_ref().map(|author| self.users.map(author)),
            comment: record.comment.as_deref().map(|comment| self.comment(comment, record)),
            internal_path: record
                .internal_path
                .as_deref()
                .map(|internal| self.translate_path(internal)),
            ..record.clone()
        }
    }

    /// Changeset entry for the target. Only the path and author change.
    pub fn rewrite_entry(&self, item: FileItem) -> FileItem {
        let record = FileRecord {
            path: self.translate_path(&item.record.path),
            version: None,
            author: item.record.author.as_ref().map(|author| self.users.map(author)),
            ..item.record
        };
        FileItem::new(record, item.content)
    }

    fn comment(&self, comment: &str, record: &FileRecord) -> String {
        let modified_at = record
            .modified_at
            .map(|at| at.to_rfc3339())
            .unwrap_or_default();
        self.comment_template
            .replace("{0}", comment)
            .replace("{1}", &modified_at)
    }
}
