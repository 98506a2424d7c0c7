//! Shared fixtures: a recording backend and small content helpers

use parking_lot::Mutex;
use repomigrate::error::RepositoryError;
use repomigrate::repository::{
    changes_from, ChangeListener, FileChanges, FolderRepository, Layout, Repository,
    SledRepository,
};
use repomigrate::types::{Capabilities, ChangesetKind, FileItem, FileRecord};
use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};

/// One captured write
#[derive(Debug, Clone)]
pub struct SaveCall {
    pub record: FileRecord,
    /// Path and content of every entry; a single entry for flat saves
    pub entries: Vec<(String, Vec<u8>)>,
    pub changeset: Option<ChangesetKind>,
}

impl SaveCall {
    pub fn entry_text(&self) -> Vec<(String, String)> {
        self.entries
            .iter()
            .map(|(path, bytes)| (path.clone(), String::from_utf8_lossy(bytes).into_owned()))
            .collect()
    }
}

/// Sled-backed repository that records every save and can be told to fail them
pub struct RecordingRepository {
    inner: SledRepository,
    calls: Mutex<Vec<SaveCall>>,
    failing: AtomicBool,
}

impl RecordingRepository {
    pub fn new(layout: Layout) -> Self {
        Self {
            inner: SledRepository::temporary(layout).unwrap(),
            calls: Mutex::new(Vec::new()),
            failing: AtomicBool::new(false),
        }
    }

    pub fn calls(&self) -> Vec<SaveCall> {
        self.calls.lock().clone()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check_failing(&self, path: &str) -> Result<(), RepositoryError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(RepositoryError::Storage(format!(
                "simulated write failure for {}",
                path
            )));
        }
        Ok(())
    }
}

impl Repository for RecordingRepository {
    fn supports(&self) -> Capabilities {
        self.inner.supports()
    }

    fn list(&self, prefix: &str) -> Result<Vec<FileRecord>, RepositoryError> {
        self.inner.list(prefix)
    }

    fn check(&self, path: &str) -> Result<Option<FileRecord>, RepositoryError> {
        self.inner.check(path)
    }

    fn read(&self, path: &str) -> Result<Option<FileItem>, RepositoryError> {
        self.inner.read(path)
    }

    fn save(
        &self,
        record: &FileRecord,
        content: &mut dyn Read,
    ) -> Result<FileRecord, RepositoryError> {
        let mut bytes = Vec::new();
        content.read_to_end(&mut bytes)?;
        self.calls.lock().push(SaveCall {
            record: record.clone(),
            entries: vec![(record.path.clone(), bytes.clone())],
            changeset: None,
        });
        self.check_failing(&record.path)?;
        self.inner.save(record, &mut bytes.as_slice())
    }

    fn delete(&self, record: &FileRecord) -> Result<bool, RepositoryError> {
        self.inner.delete(record)
    }

    fn list_history(&self, path: &str) -> Result<Vec<FileRecord>, RepositoryError> {
        self.inner.list_history(path)
    }

    fn check_history(
        &self,
        path: &str,
        version: &str,
    ) -> Result<Option<FileRecord>, RepositoryError> {
        self.inner.check_history(path, version)
    }

    fn read_history(
        &self,
        path: &str,
        version: &str,
    ) -> Result<Option<FileItem>, RepositoryError> {
        self.inner.read_history(path, version)
    }

    fn delete_history(&self, record: &FileRecord) -> Result<bool, RepositoryError> {
        self.inner.delete_history(record)
    }

    fn set_listener(&self, listener: Option<ChangeListener>) {
        self.inner.set_listener(listener)
    }

    fn as_folders(&self) -> Option<&dyn FolderRepository> {
        if self.inner.as_folders().is_some() {
            Some(self)
        } else {
            None
        }
    }
}

impl FolderRepository for RecordingRepository {
    fn list_folders(&self, prefix: &str) -> Result<Vec<FileRecord>, RepositoryError> {
        folders(&self.inner)?.list_folders(prefix)
    }

    fn list_files(
        &self,
        path: &str,
        version: Option<&str>,
    ) -> Result<Vec<FileRecord>, RepositoryError> {
        folders(&self.inner)?.list_files(path, version)
    }

    fn save_folder(
        &self,
        folder: &FileRecord,
        files: &mut FileChanges<'_>,
        kind: ChangesetKind,
    ) -> Result<FileRecord, RepositoryError> {
        let mut entries = Vec::new();
        for item in files {
            entries.push(item?.into_bytes()?);
        }
        self.calls.lock().push(SaveCall {
            record: folder.clone(),
            entries: entries
                .iter()
                .map(|(record, bytes)| (record.path.clone(), bytes.clone()))
                .collect(),
            changeset: Some(kind),
        });
        self.check_failing(&folder.path)?;

        let items = entries
            .into_iter()
            .map(|(record, bytes)| FileItem::from_bytes(record, bytes))
            .collect();
        folders(&self.inner)?.save_folder(folder, &mut changes_from(items), kind)
    }
}

fn folders(repo: &SledRepository) -> Result<&dyn FolderRepository, RepositoryError> {
    repo.as_folders()
        .ok_or_else(|| RepositoryError::Unsupported("folders".to_string()))
}

pub fn item(path: &str, content: &str) -> FileItem {
    FileItem::from_bytes(FileRecord::new(path), content.as_bytes().to_vec())
}

pub fn descriptor(name: &str) -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<project>\n  <name>{}</name>\n</project>\n",
        name
    )
}

pub fn read_text(repo: &dyn Repository, path: &str) -> Option<String> {
    repo.read(path).unwrap().map(|item| {
        let (_, bytes) = item.into_bytes().unwrap();
        String::from_utf8(bytes).unwrap()
    })
}
