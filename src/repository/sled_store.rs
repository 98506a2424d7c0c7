//! Sled-backed versioned repository
//!
//! Content is stored once per blake3 hash. Every save appends a revision to
//! the per-path log and, for folder changesets, a commit to the per-folder
//! log. Both logs are keyed by `(path, sequence)` so prefix scans return
//! history in commit order and "state at version N" is a reverse range scan.

use crate::error::RepositoryError;
use crate::repository::{ChangeListener, FileChanges, FolderRepository, Repository};
use crate::types::{
    folder_prefix, trim_folder, Capabilities, ChangesetKind, FileItem, FileRecord, UserInfo,
};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::io::{Cursor, Read};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::RecvTimeoutError;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, warn};

const REVISION: u8 = b'r';
const COMMIT: u8 = b'c';
const BLOB: u8 = b'b';
const FOLDER: u8 = b'f';
const SEPARATOR: u8 = 0;

const WATCH_POLL: Duration = Duration::from_millis(100);
const WATCH_COALESCE: Duration = Duration::from_millis(10);
const WATCH_MAX_BURST: usize = 1024;

/// Whether the store exposes folder changesets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Layout {
    Flat,
    #[default]
    Folder,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredRevision {
    seq: u64,
    modified_at: Option<DateTime<Utc>>,
    author: Option<UserInfo>,
    comment: Option<String>,
    size: u64,
    deleted: bool,
    content: Option<[u8; 32]>,
}

impl StoredRevision {
    fn to_record(&self, path: &str) -> FileRecord {
        FileRecord {
            path: path.to_string(),
            version: Some(version_string(self.seq)),
            modified_at: self.modified_at,
            author: self.author.clone(),
            comment: self.comment.clone(),
            size: self.size,
            deleted: self.deleted,
            internal_path: None,
        }
    }

    fn tombstone(seq: u64, record: &FileRecord) -> Self {
        Self {
            seq,
            modified_at: record.modified_at.or_else(|| Some(Utc::now())),
            author: record.author.clone(),
            comment: record.comment.clone(),
            size: 0,
            deleted: true,
            content: None,
        }
    }
}

/// Render a store sequence number as a version string
pub fn version_string(seq: u64) -> String {
    format!("{:016x}", seq)
}

fn parse_version(version: &str) -> Result<u64, RepositoryError> {
    u64::from_str_radix(version, 16)
        .map_err(|_| RepositoryError::NotFound(format!("version {}", version)))
}

fn log_prefix(kind: u8, path: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(path.len() + 10);
    key.push(kind);
    key.extend_from_slice(path.as_bytes());
    key.push(SEPARATOR);
    key
}

fn log_key(kind: u8, path: &str, seq: u64) -> Vec<u8> {
    let mut key = log_prefix(kind, path);
    key.extend_from_slice(&seq.to_be_bytes());
    key
}

fn scan_key(kind: u8, prefix: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(prefix.len() + 1);
    key.push(kind);
    key.extend_from_slice(prefix.as_bytes());
    key
}

fn blob_key(hash: &[u8; 32]) -> Vec<u8> {
    let mut key = Vec::with_capacity(33);
    key.push(BLOB);
    key.extend_from_slice(hash);
    key
}

/// Split a log key into its path and sequence number
fn split_log_key(key: &[u8]) -> Option<(&str, u64)> {
    if key.len() < 10 || key[key.len() - 9] != SEPARATOR {
        return None;
    }
    let path = std::str::from_utf8(&key[1..key.len() - 9]).ok()?;
    let mut seq = [0u8; 8];
    seq.copy_from_slice(&key[key.len() - 8..]);
    Some((path, u64::from_be_bytes(seq)))
}

fn decode(bytes: &[u8]) -> Result<StoredRevision, RepositoryError> {
    Ok(bincode::deserialize(bytes)?)
}

struct ChangeFeed {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

/// Versioned repository persisted in a sled database
pub struct SledRepository {
    db: sled::Db,
    tree: sled::Tree,
    layout: Layout,
    write_lock: Mutex<()>,
    listener: Arc<RwLock<Option<ChangeListener>>>,
    feed: Mutex<Option<ChangeFeed>>,
}

impl SledRepository {
    /// Open (or create) a store on disk
    pub fn open(path: &Path, layout: Layout) -> Result<Self, RepositoryError> {
        let db = sled::open(path)?;
        Self::from_db(db, layout)
    }

    /// In-memory store discarded on drop
    pub fn temporary(layout: Layout) -> Result<Self, RepositoryError> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db, layout)
    }

    fn from_db(db: sled::Db, layout: Layout) -> Result<Self, RepositoryError> {
        let tree = db.open_tree("repository")?;
        Ok(Self {
            db,
            tree,
            layout,
            write_lock: Mutex::new(()),
            listener: Arc::new(RwLock::new(None)),
            feed: Mutex::new(None),
        })
    }

    pub fn layout(&self) -> Layout {
        self.layout
    }

    fn next_seq(&self) -> Result<u64, RepositoryError> {
        Ok(self.db.generate_id()? + 1)
    }

    fn is_folder(&self, path: &str) -> Result<bool, RepositoryError> {
        Ok(self.tree.contains_key(scan_key(FOLDER, path))?)
    }

    fn log_kind(&self, path: &str) -> Result<u8, RepositoryError> {
        Ok(if self.is_folder(path)? { COMMIT } else { REVISION })
    }

    fn revisions(&self, kind: u8, path: &str) -> Result<Vec<StoredRevision>, RepositoryError> {
        let mut revisions = Vec::new();
        for entry in self.tree.scan_prefix(log_prefix(kind, path)) {
            let (_, value) = entry?;
            revisions.push(decode(&value)?);
        }
        Ok(revisions)
    }

    fn head(&self, kind: u8, path: &str) -> Result<Option<StoredRevision>, RepositoryError> {
        match self.tree.scan_prefix(log_prefix(kind, path)).next_back() {
            Some(entry) => {
                let (_, value) = entry?;
                Ok(Some(decode(&value)?))
            }
            None => Ok(None),
        }
    }

    /// Newest revision with a sequence number at or below `seq`
    fn at_or_before(
        &self,
        kind: u8,
        path: &str,
        seq: u64,
    ) -> Result<Option<StoredRevision>, RepositoryError> {
        let start = log_prefix(kind, path);
        let end = log_key(kind, path, seq);
        match self.tree.range(start..=end).next_back() {
            Some(entry) => {
                let (_, value) = entry?;
                Ok(Some(decode(&value)?))
            }
            None => Ok(None),
        }
    }

    fn blob(&self, hash: &[u8; 32]) -> Result<Vec<u8>, RepositoryError> {
        self.tree
            .get(blob_key(hash))?
            .map(|value| value.to_vec())
            .ok_or_else(|| {
                RepositoryError::Storage(format!(
                    "Missing content blob {}",
                    blake3::Hash::from(*hash).to_hex()
                ))
            })
    }

    fn item_for(
        &self,
        path: &str,
        revision: &StoredRevision,
    ) -> Result<Option<FileItem>, RepositoryError> {
        match (revision.deleted, revision.content.as_ref()) {
            (false, Some(hash)) => {
                let bytes = self.blob(hash)?;
                Ok(Some(FileItem::new(
                    revision.to_record(path),
                    Box::new(Cursor::new(bytes)),
                )))
            }
            _ => Ok(None),
        }
    }

    /// Compare-and-set check against the current head
    fn ensure_head(
        &self,
        kind: u8,
        path: &str,
        expected: Option<&str>,
    ) -> Result<(), RepositoryError> {
        let Some(expected) = expected else {
            return Ok(());
        };
        let head = self.head(kind, path)?.map(|r| version_string(r.seq));
        if head.as_deref() != Some(expected) {
            return Err(RepositoryError::Conflict {
                paths: vec![path.to_string()],
            });
        }
        Ok(())
    }

    /// Latest revision of every file under `prefix` at or before `seq`
    fn state_at(
        &self,
        prefix: &str,
        seq: u64,
    ) -> Result<BTreeMap<String, StoredRevision>, RepositoryError> {
        let mut latest = BTreeMap::new();
        for entry in self.tree.scan_prefix(scan_key(REVISION, prefix)) {
            let (key, value) = entry?;
            let Some((path, rev_seq)) = split_log_key(&key) else {
                continue;
            };
            if rev_seq <= seq {
                latest.insert(path.to_string(), decode(&value)?);
            }
        }
        Ok(latest)
    }

    fn start_change_feed(&self) {
        let mut feed = self.feed.lock();
        if feed.is_some() {
            return;
        }

        let mut subscriber = self.tree.watch_prefix(Vec::<u8>::new());
        let stop = Arc::new(AtomicBool::new(false));
        let listener = Arc::clone(&self.listener);
        let thread_stop = Arc::clone(&stop);
        let spawned = std::thread::Builder::new()
            .name("sled-change-feed".to_string())
            .spawn(move || {
                while !thread_stop.load(Ordering::Acquire) {
                    match subscriber.next_timeout(WATCH_POLL) {
                        Ok(_) => {
                            // Coalesce a burst of writes (one batch emits one event per key)
                            let mut drained = 0;
                            while drained < WATCH_MAX_BURST
                                && subscriber.next_timeout(WATCH_COALESCE).is_ok()
                            {
                                drained += 1;
                            }
                            let current = listener.read().clone();
                            if let Some(callback) = current {
                                callback();
                            }
                        }
                        Err(RecvTimeoutError::Timeout) => continue,
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
            });

        match spawned {
            Ok(handle) => {
                *feed = Some(ChangeFeed {
                    stop,
                    handle: Some(handle),
                });
            }
            Err(e) => warn!("Failed to start change feed: {}", e),
        }
    }
}

impl Drop for SledRepository {
    fn drop(&mut self) {
        if let Some(mut feed) = self.feed.lock().take() {
            feed.stop.store(true, Ordering::Release);
            if let Some(handle) = feed.handle.take() {
                if handle.thread().id() != std::thread::current().id() {
                    let _ = handle.join();
                }
            }
        }
    }
}

impl Repository for SledRepository {
    fn supports(&self) -> Capabilities {
        match self.layout {
            Layout::Flat => Capabilities::flat(),
            Layout::Folder => Capabilities::folder(),
        }
    }

    fn list(&self, prefix: &str) -> Result<Vec<FileRecord>, RepositoryError> {
        Ok(self
            .state_at(prefix, u64::MAX)?
            .iter()
            .map(|(path, rev)| rev.to_record(path))
            .collect())
    }

    fn check(&self, path: &str) -> Result<Option<FileRecord>, RepositoryError> {
        let path = trim_folder(path);
        let kind = self.log_kind(path)?;
        Ok(self.head(kind, path)?.map(|rev| rev.to_record(path)))
    }

    fn read(&self, path: &str) -> Result<Option<FileItem>, RepositoryError> {
        match self.head(REVISION, path)? {
            Some(rev) => self.item_for(path, &rev),
            None => Ok(None),
        }
    }

    fn save(
        &self,
        record: &FileRecord,
        content: &mut dyn Read,
    ) -> Result<FileRecord, RepositoryError> {
        let path = record.path.as_str();
        let mut bytes = Vec::new();
        content.read_to_end(&mut bytes)?;

        let _guard = self.write_lock.lock();
        self.ensure_head(REVISION, path, record.version.as_deref())?;

        let seq = self.next_seq()?;
        let hash = *blake3::hash(&bytes).as_bytes();
        let revision = StoredRevision {
            seq,
            modified_at: record.modified_at.or_else(|| Some(Utc::now())),
            author: record.author.clone(),
            comment: record.comment.clone(),
            size: bytes.len() as u64,
            deleted: false,
            content: Some(hash),
        };

        let mut batch = sled::Batch::default();
        batch.insert(blob_key(&hash), bytes);
        batch.insert(log_key(REVISION, path, seq), bincode::serialize(&revision)?);
        self.tree.apply_batch(batch)?;
        self.tree.flush()?;

        debug!(path, version = %version_string(seq), "Saved file revision");
        Ok(revision.to_record(path))
    }

    fn delete(&self, record: &FileRecord) -> Result<bool, RepositoryError> {
        let path = trim_folder(&record.path);
        let _guard = self.write_lock.lock();
        let kind = self.log_kind(path)?;
        match self.head(kind, path)? {
            Some(head) if !head.deleted => {
                let seq = self.next_seq()?;
                let tombstone = StoredRevision::tombstone(seq, record);
                self.tree
                    .insert(log_key(kind, path, seq), bincode::serialize(&tombstone)?)?;
                self.tree.flush()?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn list_history(&self, path: &str) -> Result<Vec<FileRecord>, RepositoryError> {
        let path = trim_folder(path);
        let kind = self.log_kind(path)?;
        Ok(self
            .revisions(kind, path)?
            .iter()
            .map(|rev| rev.to_record(path))
            .collect())
    }

    fn check_history(
        &self,
        path: &str,
        version: &str,
    ) -> Result<Option<FileRecord>, RepositoryError> {
        let path = trim_folder(path);
        let seq = parse_version(version)?;
        if self.is_folder(path)? {
            return match self.tree.get(log_key(COMMIT, path, seq))? {
                Some(value) => Ok(Some(decode(&value)?.to_record(path))),
                None => Ok(None),
            };
        }
        Ok(self
            .at_or_before(REVISION, path, seq)?
            .map(|rev| rev.to_record(path)))
    }

    fn read_history(
        &self,
        path: &str,
        version: &str,
    ) -> Result<Option<FileItem>, RepositoryError> {
        let seq = parse_version(version)?;
        match self.at_or_before(REVISION, path, seq)? {
            Some(rev) => self.item_for(path, &rev),
            None => Ok(None),
        }
    }

    fn delete_history(&self, record: &FileRecord) -> Result<bool, RepositoryError> {
        let path = trim_folder(&record.path);
        let _guard = self.write_lock.lock();

        let removed = match record.version.as_deref() {
            Some(version) => {
                let seq = parse_version(version)?;
                let kind = self.log_kind(path)?;
                self.tree.remove(log_key(kind, path, seq))?.is_some()
            }
            None => {
                let mut batch = sled::Batch::default();
                let mut any = false;
                for kind in [REVISION, COMMIT] {
                    for entry in self.tree.scan_prefix(log_prefix(kind, path)) {
                        let (key, _) = entry?;
                        batch.remove(key);
                        any = true;
                    }
                }
                batch.remove(scan_key(FOLDER, path));
                self.tree.apply_batch(batch)?;
                any
            }
        };
        self.tree.flush()?;
        Ok(removed)
    }

    fn set_listener(&self, listener: Option<ChangeListener>) {
        let enable = listener.is_some();
        *self.listener.write() = listener;
        if enable {
            self.start_change_feed();
        }
    }

    fn as_folders(&self) -> Option<&dyn FolderRepository> {
        match self.layout {
            Layout::Folder => Some(self),
            Layout::Flat => None,
        }
    }
}

impl FolderRepository for SledRepository {
    fn list_folders(&self, prefix: &str) -> Result<Vec<FileRecord>, RepositoryError> {
        let prefix = folder_prefix(prefix);
        let mut folders = Vec::new();
        for entry in self.tree.scan_prefix(scan_key(FOLDER, &prefix)) {
            let (key, _) = entry?;
            let Ok(folder) = std::str::from_utf8(&key[1..]) else {
                continue;
            };
            if folder[prefix.len()..].contains('/') {
                continue;
            }
            if let Some(head) = self.head(COMMIT, folder)? {
                folders.push(head.to_record(folder));
            }
        }
        Ok(folders)
    }

    fn list_files(
        &self,
        path: &str,
        version: Option<&str>,
    ) -> Result<Vec<FileRecord>, RepositoryError> {
        let seq = match version {
            Some(v) => parse_version(v)?,
            None => u64::MAX,
        };
        let prefix = folder_prefix(trim_folder(path));
        Ok(self
            .state_at(&prefix, seq)?
            .iter()
            .filter(|(_, rev)| !rev.deleted)
            .map(|(path, rev)| rev.to_record(path))
            .collect())
    }

    fn save_folder(
        &self,
        folder: &FileRecord,
        files: &mut FileChanges<'_>,
        kind: ChangesetKind,
    ) -> Result<FileRecord, RepositoryError> {
        let folder_path = trim_folder(&folder.path).to_string();
        if folder_path.is_empty() {
            return Err(RepositoryError::Storage(
                "Folder changeset requires a folder path".to_string(),
            ));
        }

        let mut entries = Vec::new();
        for item in files {
            entries.push(item?.into_bytes()?);
        }

        let _guard = self.write_lock.lock();
        self.ensure_head(COMMIT, &folder_path, folder.version.as_deref())?;

        let seq = self.next_seq()?;
        let modified_at = folder.modified_at.or_else(|| Some(Utc::now()));
        let mut batch = sled::Batch::default();
        let mut touched = BTreeSet::new();
        let mut total = 0u64;

        for (record, bytes) in entries {
            let revision = if record.deleted {
                StoredRevision::tombstone(seq, folder)
            } else {
                let hash = *blake3::hash(&bytes).as_bytes();
                total += bytes.len() as u64;
                let revision = StoredRevision {
                    seq,
                    modified_at,
                    author: folder.author.clone(),
                    comment: folder.comment.clone(),
                    size: bytes.len() as u64,
                    deleted: false,
                    content: Some(hash),
                };
                batch.insert(blob_key(&hash), bytes);
                revision
            };
            batch.insert(
                log_key(REVISION, &record.path, seq),
                bincode::serialize(&revision)?,
            );
            touched.insert(record.path);
        }

        if kind == ChangesetKind::Full {
            for existing in self.list_files(&folder_path, None)? {
                if !touched.contains(&existing.path) {
                    let tombstone = StoredRevision::tombstone(seq, folder);
                    batch.insert(
                        log_key(REVISION, &existing.path, seq),
                        bincode::serialize(&tombstone)?,
                    );
                }
            }
        }

        let commit = StoredRevision {
            seq,
            modified_at,
            author: folder.author.clone(),
            comment: folder.comment.clone(),
            size: total,
            deleted: false,
            content: None,
        };
        batch.insert(scan_key(FOLDER, &folder_path), Vec::<u8>::new());
        batch.insert(log_key(COMMIT, &folder_path, seq), bincode::serialize(&commit)?);
        self.tree.apply_batch(batch)?;
        self.tree.flush()?;

        debug!(
            folder = %folder_path,
            version = %version_string(seq),
            files = touched.len(),
            "Saved folder changeset"
        );
        Ok(commit.to_record(&folder_path))
    }
}
