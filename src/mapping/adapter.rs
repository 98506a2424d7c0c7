//! MappedRepository: folder-repository view over arbitrary internal paths
//!
//! Every path crossing this adapter is translated through the
//! [`PathMappingStore`]. Records carrying an `internal_path` that differs
//! from the published table register a new mapping as part of the save.
//!
//! A delegate without folder changesets stores a project file by file plus a
//! manifest at the project path itself: the sorted file names relative to the
//! project, one per line, written last. Its revision log is the project's
//! history and each manifest version names a complete state of the folder.

use super::store::{
    resolve_to_external, resolve_to_internal, MappingChange, MappingSettings, PathMappingStore,
};
use super::PathMapping;
use crate::error::RepositoryError;
use crate::repository::{
    BranchRepository, ChangeListener, FileChanges, FolderRepository, Repository,
};
use crate::types::{
    folder_prefix, trim_folder, Capabilities, ChangesetKind, FileItem, FileRecord, UserInfo,
};
use std::collections::{BTreeMap, BTreeSet};
use std::io::Read;
use std::sync::Arc;
use tracing::{debug, error, warn};

pub struct MappedRepository {
    delegate: Arc<dyn Repository>,
    store: Arc<PathMappingStore>,
}

impl MappedRepository {
    /// Wrap `delegate` and load its mapping (resource or auto-discovery)
    pub fn initialize(
        delegate: Arc<dyn Repository>,
        settings: MappingSettings,
    ) -> Result<Self, RepositoryError> {
        let store = Arc::new(PathMappingStore::new(settings));
        store.load(delegate.as_ref())?;
        Ok(Self { delegate, store })
    }

    pub fn store(&self) -> &PathMappingStore {
        &self.store
    }

    pub fn delegate(&self) -> &Arc<dyn Repository> {
        &self.delegate
    }

    fn config_record(&self, source: &FileRecord) -> FileRecord {
        FileRecord {
            author: source.author.clone(),
            comment: source.comment.clone(),
            ..FileRecord::new(&self.store.settings().config_file)
        }
    }

    /// Pending internal path that is not yet part of the published table
    fn pending_mapping<'r>(&self, mapping: &PathMapping, record: &'r FileRecord) -> Option<&'r str> {
        record
            .internal_path
            .as_deref()
            .filter(|internal| mapping.get(&record.path) != Some(*internal))
    }

    fn write_tree(
        &self,
        mapping: &PathMapping,
        folder: &FileRecord,
        files: &mut FileChanges<'_>,
        kind: ChangesetKind,
        mapping_resource: Option<FileItem>,
    ) -> Result<FileRecord, RepositoryError> {
        let internal_folder = to_internal_record(mapping, folder);
        let translated = files.map(|item| item.map(|item| to_internal_item(mapping, item)));

        let saved = match self.delegate.as_folders() {
            Some(folders) => {
                let mut changes = translated.chain(mapping_resource.into_iter().map(Ok));
                folders.save_folder(&internal_folder, &mut changes, kind)
            }
            None => {
                if let Some(resource) = mapping_resource {
                    let (record, bytes) = resource.into_bytes()?;
                    self.delegate.save(&record, &mut bytes.as_slice())?;
                }
                self.write_file_by_file(&internal_folder, translated, kind)
            }
        };

        saved
            .map(|record| to_external_record(mapping, record))
            .map_err(|e| e.map_conflict_paths(|p| resolve_to_external(mapping, p)))
    }

    /// Tree save over a delegate without changesets. Not atomic; the manifest
    /// written last is what makes the new state visible as a folder version.
    fn write_file_by_file(
        &self,
        folder: &FileRecord,
        files: impl Iterator<Item = Result<FileItem, RepositoryError>>,
        kind: ChangesetKind,
    ) -> Result<FileRecord, RepositoryError> {
        if let Some(expected) = folder.version.as_deref() {
            let head = self.delegate.check(&folder.path)?.and_then(|r| r.version);
            if head.as_deref() != Some(expected) {
                return Err(RepositoryError::Conflict {
                    paths: vec![folder.path.clone()],
                });
            }
        }

        let prefix = folder_prefix(&folder.path);
        let mut manifest = match kind {
            ChangesetKind::Full => BTreeSet::new(),
            ChangesetKind::Diff => self.manifest_names(&folder.path)?,
        };
        let mut written = BTreeSet::new();
        let mut total = 0;

        for item in files {
            let item = item?;
            let record = FileRecord {
                version: None,
                modified_at: folder.modified_at,
                author: folder.author.clone(),
                comment: folder.comment.clone(),
                ..item.record
            };
            written.insert(record.path.clone());
            let name = record.path.strip_prefix(prefix.as_str()).map(str::to_string);
            if record.deleted {
                if let Some(name) = &name {
                    manifest.remove(name);
                }
                self.delegate.delete(&record)?;
                continue;
            }
            let mut content = item.content;
            let saved = self.delegate.save(&record, &mut content)?;
            total += saved.size;
            match name {
                Some(name) => {
                    manifest.insert(name);
                }
                None => warn!("File {} is outside folder {}", saved.path, folder.path),
            }
        }

        if kind == ChangesetKind::Full {
            for existing in self.delegate.list(&prefix)? {
                if !existing.deleted && !written.contains(&existing.path) {
                    self.delegate.delete(&FileRecord {
                        author: folder.author.clone(),
                        comment: folder.comment.clone(),
                        ..existing
                    })?;
                }
            }
        }

        let mut listing = String::new();
        for name in &manifest {
            listing.push_str(name);
            listing.push('\n');
        }
        let manifest_record = FileRecord {
            version: None,
            internal_path: None,
            ..folder.clone()
        };
        let saved = self
            .delegate
            .save(&manifest_record, &mut listing.as_bytes())?;
        debug!(
            "Saved {} files of {} as version {:?}",
            manifest.len(),
            folder.path,
            saved.version
        );

        Ok(FileRecord {
            version: saved.version,
            modified_at: saved.modified_at,
            size: total,
            internal_path: None,
            ..folder.clone()
        })
    }

    /// File names of the latest manifest, or of the current listing when the
    /// folder was written before manifests existed
    fn manifest_names(&self, folder: &str) -> Result<BTreeSet<String>, RepositoryError> {
        if let Some(item) = self.delegate.read(folder)? {
            let (_, bytes) = item.into_bytes()?;
            return Ok(parse_manifest(&bytes));
        }
        let prefix = folder_prefix(folder);
        Ok(self
            .delegate
            .list(&prefix)?
            .into_iter()
            .filter(|record| !record.deleted)
            .filter_map(|record| record.path.strip_prefix(prefix.as_str()).map(str::to_string))
            .collect())
    }

    /// Files recorded by the manifest as of `version`, `None` without a manifest
    fn manifest_files(
        &self,
        folder: &str,
        version: Option<&str>,
    ) -> Result<Option<Vec<FileRecord>>, RepositoryError> {
        let manifest = match version {
            Some(version) => self.delegate.read_history(folder, version)?,
            None => self.delegate.read(folder)?,
        };
        let Some(manifest) = manifest else {
            return Ok(None);
        };
        let (_, bytes) = manifest.into_bytes()?;

        let prefix = folder_prefix(folder);
        let mut files = Vec::new();
        for name in parse_manifest(&bytes) {
            let path = format!("{}{}", prefix, name);
            let record = match version {
                Some(version) => self.delegate.check_history(&path, version)?,
                None => self.delegate.check(&path)?,
            };
            match record {
                Some(record) if !record.deleted => files.push(record),
                _ => warn!("Manifest of {} lists missing file {}", folder, path),
            }
        }
        Ok(Some(files))
    }

    /// Folder record of a mapped project in the delegate.
    ///
    /// A flat delegate without a manifest for the folder reports its newest
    /// live file instead.
    fn folder_head(&self, internal: &str) -> Result<Option<FileRecord>, RepositoryError> {
        if let Some(head) = self.delegate.check(internal)? {
            return Ok(Some(head));
        }
        if self.delegate.as_folders().is_some() {
            return Ok(None);
        }
        Ok(self
            .delegate
            .list(&folder_prefix(internal))?
            .into_iter()
            .filter(|record| !record.deleted)
            .max_by(|a, b| {
                a.modified_at
                    .cmp(&b.modified_at)
                    .then_with(|| a.version.cmp(&b.version))
            })
            .map(|newest| FileRecord {
                path: internal.to_string(),
                ..newest
            }))
    }
}

fn parse_manifest(bytes: &[u8]) -> BTreeSet<String> {
    String::from_utf8_lossy(bytes)
        .lines()
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

fn to_internal_record(mapping: &PathMapping, record: &FileRecord) -> FileRecord {
    FileRecord {
        path: resolve_to_internal(mapping, &record.path),
        internal_path: None,
        ..record.clone()
    }
}

fn to_internal_item(mapping: &PathMapping, item: FileItem) -> FileItem {
    let record = to_internal_record(mapping, &item.record);
    FileItem::new(record, item.content)
}

fn to_external_record(mapping: &PathMapping, record: FileRecord) -> FileRecord {
    FileRecord {
        path: resolve_to_external(mapping, &record.path),
        ..record
    }
}

fn to_external_records(mapping: &PathMapping, records: Vec<FileRecord>) -> Vec<FileRecord> {
    records
        .into_iter()
        .map(|record| to_external_record(mapping, record))
        .collect()
}

fn to_external_item(mapping: &PathMapping, item: FileItem) -> FileItem {
    FileItem::new(to_external_record(mapping, item.record), item.content)
}

impl Repository for MappedRepository {
    fn supports(&self) -> Capabilities {
        let delegate = self.delegate.supports();
        Capabilities {
            versioned: delegate.versioned,
            folders: true,
            mapped_folders: true,
            unique_file_id: delegate.unique_file_id,
            branches: delegate.branches,
        }
    }

    fn list(&self, prefix: &str) -> Result<Vec<FileRecord>, RepositoryError> {
        let mapping = self.store.snapshot();
        // Nested projects make scans overlap, so files are keyed by internal path
        let mut scans = BTreeSet::new();
        for (external, internal_path) in mapping.iter() {
            if external.starts_with(prefix) {
                scans.insert(folder_prefix(internal_path));
            } else if prefix.starts_with(&folder_prefix(external)) {
                scans.insert(resolve_to_internal(&mapping, prefix));
            }
        }

        let mut found = BTreeMap::new();
        for scan in scans {
            for record in self.delegate.list(&scan)? {
                found.insert(record.path.clone(), record);
            }
        }
        Ok(to_external_records(&mapping, found.into_values().collect()))
    }

    fn check(&self, path: &str) -> Result<Option<FileRecord>, RepositoryError> {
        let mapping = self.store.snapshot();
        let record = match mapping.get(trim_folder(path)) {
            Some(internal) => self.folder_head(internal)?,
            None => self.delegate.check(&resolve_to_internal(&mapping, path))?,
        };
        Ok(record.map(|record| to_external_record(&mapping, record)))
    }

    fn read(&self, path: &str) -> Result<Option<FileItem>, RepositoryError> {
        let mapping = self.store.snapshot();
        Ok(self
            .delegate
            .read(&resolve_to_internal(&mapping, path))?
            .map(|item| to_external_item(&mapping, item)))
    }

    fn save(
        &self,
        record: &FileRecord,
        content: &mut dyn Read,
    ) -> Result<FileRecord, RepositoryError> {
        let current = self.store.snapshot();
        if let Some(internal) = self.pending_mapping(&current, record) {
            self.store.mutate(
                self.delegate.as_ref(),
                MappingChange::Put {
                    external: record.path.clone(),
                    internal: internal.to_string(),
                },
                record.author.clone(),
                record.comment.clone(),
            )?;
        }

        let mapping = self.store.snapshot();
        self.delegate
            .save(&to_internal_record(&mapping, record), content)
            .map(|saved| to_external_record(&mapping, saved))
            .map_err(|e| e.map_conflict_paths(|p| resolve_to_external(&mapping, p)))
    }

    fn delete(&self, record: &FileRecord) -> Result<bool, RepositoryError> {
        let mapping = self.store.snapshot();
        self.delegate.delete(&to_internal_record(&mapping, record))
    }

    fn list_history(&self, path: &str) -> Result<Vec<FileRecord>, RepositoryError> {
        let mapping = self.store.snapshot();
        let internal = resolve_to_internal(&mapping, path);
        let mut history = self.delegate.list_history(&internal)?;
        if history.is_empty() && mapping.contains_external(trim_folder(path)) {
            // A project saved before manifests existed has only its current state
            history.extend(self.folder_head(&internal)?);
        }
        Ok(to_external_records(&mapping, history))
    }

    fn check_history(
        &self,
        path: &str,
        version: &str,
    ) -> Result<Option<FileRecord>, RepositoryError> {
        let mapping = self.store.snapshot();
        Ok(self
            .delegate
            .check_history(&resolve_to_internal(&mapping, path), version)?
            .map(|record| to_external_record(&mapping, record)))
    }

    fn read_history(
        &self,
        path: &str,
        version: &str,
    ) -> Result<Option<FileItem>, RepositoryError> {
        let mapping = self.store.snapshot();
        Ok(self
            .delegate
            .read_history(&resolve_to_internal(&mapping, path), version)?
            .map(|item| to_external_item(&mapping, item)))
    }

    fn delete_history(&self, record: &FileRecord) -> Result<bool, RepositoryError> {
        // Translate with the table as it was before the project is unmapped
        let mapping = self.store.snapshot();
        let internal = to_internal_record(&mapping, record);

        if record.version.is_none() && mapping.contains_external(&record.path) {
            self.store.mutate(
                self.delegate.as_ref(),
                MappingChange::Remove {
                    external: record.path.clone(),
                },
                record.author.clone(),
                record.comment.clone(),
            )?;
        }
        self.delegate.delete_history(&internal)
    }

    fn set_listener(&self, listener: Option<ChangeListener>) {
        let store = Arc::clone(&self.store);
        let delegate = Arc::downgrade(&self.delegate);
        let wrapper: ChangeListener = Arc::new(move || {
            if let Some(delegate) = delegate.upgrade() {
                store.request_reload(delegate.as_ref());
            }
            if let Some(callback) = &listener {
                callback();
            }
        });
        self.delegate.set_listener(Some(wrapper));
    }

    fn as_folders(&self) -> Option<&dyn FolderRepository> {
        Some(self)
    }

    fn as_branches(&self) -> Option<&dyn BranchRepository> {
        if self.delegate.as_branches().is_some() {
            Some(self)
        } else {
            None
        }
    }
}

impl FolderRepository for MappedRepository {
    fn list_folders(&self, prefix: &str) -> Result<Vec<FileRecord>, RepositoryError> {
        let prefix = folder_prefix(prefix);
        let mapping = self.store.snapshot();
        let mut folders = Vec::new();
        for (external, internal) in mapping.iter() {
            let is_direct_child = external
                .strip_prefix(prefix.as_str())
                .is_some_and(|rest| !rest.is_empty() && !rest.contains('/'));
            if !is_direct_child {
                continue;
            }
            match self.folder_head(internal)? {
                Some(record) => folders.push(record),
                None => error!("Project {} is not found", internal),
            }
        }
        Ok(to_external_records(&mapping, folders))
    }

    fn list_files(
        &self,
        path: &str,
        version: Option<&str>,
    ) -> Result<Vec<FileRecord>, RepositoryError> {
        let mapping = self.store.snapshot();
        let internal = resolve_to_internal(&mapping, path);
        let files = match self.delegate.as_folders() {
            Some(folders) => folders.list_files(&internal, version)?,
            None => match self.manifest_files(&internal, version)? {
                Some(files) => files,
                None => {
                    if version.is_some() {
                        debug!(
                            "No manifest for {}, listing its latest files",
                            internal
                        );
                    }
                    self.delegate
                        .list(&folder_prefix(&internal))?
                        .into_iter()
                        .filter(|record| !record.deleted)
                        .collect()
                }
            },
        };
        Ok(to_external_records(&mapping, files))
    }

    fn save_folder(
        &self,
        folder: &FileRecord,
        files: &mut FileChanges<'_>,
        kind: ChangesetKind,
    ) -> Result<FileRecord, RepositoryError> {
        let current = self.store.snapshot();
        let Some(internal) = self.pending_mapping(&current, folder) else {
            return self.write_tree(&current, folder, files, kind, None);
        };

        let mutation = self.store.begin_mutation(self.delegate.as_ref());
        let prepared = mutation.prepare(&MappingChange::Put {
            external: folder.path.clone(),
            internal: internal.to_string(),
        });
        let resource = FileItem::from_bytes(self.config_record(folder), prepared.resource.clone());

        match self.write_tree(&prepared.mapping, folder, files, kind, Some(resource)) {
            Ok(saved) => {
                mutation.publish(prepared);
                Ok(saved)
            }
            Err(e) => {
                error!(
                    "Failed to save {} with updated mapping, reloading: {}",
                    folder.path, e
                );
                mutation.discard();
                Err(e)
            }
        }
    }
}

impl BranchRepository for MappedRepository {
    fn create_branch(&self, project: &str, branch: &str) -> Result<(), RepositoryError> {
        let internal = self.store.resolve_to_internal(project);
        branches(self)?.create_branch(&internal, branch)
    }

    fn delete_branch(&self, project: &str, branch: &str) -> Result<(), RepositoryError> {
        let internal = self.store.resolve_to_internal(project);
        branches(self)?.delete_branch(&internal, branch)
    }

    fn list_branches(&self, project: &str) -> Result<Vec<String>, RepositoryError> {
        let internal = self.store.resolve_to_internal(project);
        branches(self)?.list_branches(&internal)
    }

    fn merge(&self, branch: &str, author: &UserInfo) -> Result<(), RepositoryError> {
        branches(self)?.merge(branch, author)
    }

    fn pull(&self, author: &UserInfo) -> Result<(), RepositoryError> {
        branches(self)?.pull(author)
    }
}

fn branches(repo: &MappedRepository) -> Result<&dyn BranchRepository, RepositoryError> {
    repo.delegate
        .as_branches()
        .ok_or_else(|| RepositoryError::Unsupported("branches".to_string()))
}
