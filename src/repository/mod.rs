//! Repository contract
//!
//! Every storage backend implements [`Repository`]. Folder-capable and
//! branch-capable backends additionally expose [`FolderRepository`] and
//! [`BranchRepository`] through the `as_folders` / `as_branches` queries,
//! which stay consistent with the flags returned by `supports()`.

pub mod sled_store;

use crate::error::RepositoryError;
use crate::types::{Capabilities, ChangesetKind, FileItem, FileRecord, UserInfo};
use std::io::Read;
use std::sync::Arc;

pub use sled_store::{Layout, SledRepository};

/// Callback invoked when a backend observes a change in its storage
pub type ChangeListener = Arc<dyn Fn() + Send + Sync>;

/// Fallible stream of file entries forming one changeset
pub type FileChanges<'a> = dyn Iterator<Item = Result<FileItem, RepositoryError>> + 'a;

/// Versioned file storage
pub trait Repository: Send + Sync {
    fn supports(&self) -> Capabilities;

    /// Latest record of every file under `prefix`, including deleted markers
    fn list(&self, prefix: &str) -> Result<Vec<FileRecord>, RepositoryError>;

    /// Latest record of a file or folder, `None` when it never existed
    fn check(&self, path: &str) -> Result<Option<FileRecord>, RepositoryError>;

    /// Latest content of a file, `None` when it is absent or deleted
    fn read(&self, path: &str) -> Result<Option<FileItem>, RepositoryError>;

    fn save(
        &self,
        record: &FileRecord,
        content: &mut dyn Read,
    ) -> Result<FileRecord, RepositoryError>;

    /// Mark the head of a path deleted. Returns false when nothing was deleted.
    fn delete(&self, record: &FileRecord) -> Result<bool, RepositoryError>;

    fn list_history(&self, path: &str) -> Result<Vec<FileRecord>, RepositoryError>;

    /// Record of a path as of `version`.
    ///
    /// For a file this is its newest revision at or before `version`, so any
    /// version taken from the same store resolves. For a folder `version`
    /// must name one of its own commits.
    fn check_history(
        &self,
        path: &str,
        version: &str,
    ) -> Result<Option<FileRecord>, RepositoryError>;

    /// Content of a file as of `version`, with the same at-or-before rule
    fn read_history(&self, path: &str, version: &str)
        -> Result<Option<FileItem>, RepositoryError>;

    /// Erase one version, or the whole history when `record.version` is `None`
    fn delete_history(&self, record: &FileRecord) -> Result<bool, RepositoryError>;

    fn set_listener(&self, listener: Option<ChangeListener>);

    fn as_folders(&self) -> Option<&dyn FolderRepository> {
        None
    }

    fn as_branches(&self) -> Option<&dyn BranchRepository> {
        None
    }
}

/// Hierarchical repository with multi-file changesets
pub trait FolderRepository: Repository {
    /// Direct child folders of `prefix`
    fn list_folders(&self, prefix: &str) -> Result<Vec<FileRecord>, RepositoryError>;

    /// Files of a folder as of `version` (latest when `None`)
    fn list_files(
        &self,
        path: &str,
        version: Option<&str>,
    ) -> Result<Vec<FileRecord>, RepositoryError>;

    /// Apply one changeset rooted at `folder` and return the new folder record
    fn save_folder(
        &self,
        folder: &FileRecord,
        files: &mut FileChanges<'_>,
        kind: ChangesetKind,
    ) -> Result<FileRecord, RepositoryError>;
}

/// Repository with per-project branches
pub trait BranchRepository: Repository {
    fn create_branch(&self, project: &str, branch: &str) -> Result<(), RepositoryError>;
    fn delete_branch(&self, project: &str, branch: &str) -> Result<(), RepositoryError>;
    fn list_branches(&self, project: &str) -> Result<Vec<String>, RepositoryError>;
    fn merge(&self, branch: &str, author: &UserInfo) -> Result<(), RepositoryError>;
    fn pull(&self, author: &UserInfo) -> Result<(), RepositoryError>;
}

/// Iterate an in-memory list of items as a changeset
pub fn changes_from(items: Vec<FileItem>) -> impl Iterator<Item = Result<FileItem, RepositoryError>> {
    items.into_iter().map(Ok)
}
