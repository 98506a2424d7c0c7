//! Core types shared by every repository backend and the migration engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{Cursor, Read};

/// Author of a revision
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct UserInfo {
    pub username: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
}

impl UserInfo {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            email: None,
            display_name: None,
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = Some(display_name.into());
        self
    }
}

/// FileRecord: one version of one path (a file or a project folder)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct FileRecord {
    pub path: String,
    /// Opaque backend version. On save, `Some` means "expected head version".
    pub version: Option<String>,
    pub modified_at: Option<DateTime<Utc>>,
    pub author: Option<UserInfo>,
    pub comment: Option<String>,
    pub size: u64,
    pub deleted: bool,
    /// Pending mapping metadata: the internal folder this external project
    /// should be stored under. Only meaningful to a mapped repository.
    #[serde(default)]
    pub internal_path: Option<String>,
}

impl FileRecord {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    /// Copy of this record with the version cleared, so a target assigns its own.
    pub fn without_version(&self) -> Self {
        Self {
            version: None,
            ..self.clone()
        }
    }

    /// Last path segment
    pub fn name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }
}

/// A record together with its content stream.
///
/// The stream is owned; dropping the item releases it.
pub struct FileItem {
    pub record: FileRecord,
    pub content: Box<dyn Read + Send>,
}

impl FileItem {
    pub fn new(record: FileRecord, content: Box<dyn Read + Send>) -> Self {
        Self { record, content }
    }

    /// Item backed by an in-memory buffer. The record's size is set from the buffer.
    pub fn from_bytes(mut record: FileRecord, bytes: Vec<u8>) -> Self {
        record.size = bytes.len() as u64;
        Self {
            record,
            content: Box::new(Cursor::new(bytes)),
        }
    }

    /// Drain the content stream into memory
    pub fn into_bytes(mut self) -> std::io::Result<(FileRecord, Vec<u8>)> {
        let mut buf = Vec::with_capacity(self.record.size as usize);
        self.content.read_to_end(&mut buf)?;
        Ok((self.record, buf))
    }
}

impl fmt::Debug for FileItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileItem")
            .field("record", &self.record)
            .finish_non_exhaustive()
    }
}

/// How a folder changeset relates to the folder's previous state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangesetKind {
    /// The changeset is the complete new file set; missing files are removed
    Full,
    /// Only the listed entries change
    Diff,
}

/// Capability flags reported by every backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Capabilities {
    pub versioned: bool,
    /// Native hierarchical, multi-file changesets
    pub folders: bool,
    /// Projects live at arbitrary internal paths behind a mapping table
    pub mapped_folders: bool,
    pub unique_file_id: bool,
    pub branches: bool,
}

impl Capabilities {
    pub fn flat() -> Self {
        Self {
            versioned: true,
            ..Default::default()
        }
    }

    pub fn folder() -> Self {
        Self {
            versioned: true,
            folders: true,
            ..Default::default()
        }
    }
}

/// Append `/` to a non-empty folder path that lacks one
pub fn folder_prefix(path: &str) -> String {
    if path.is_empty() || path.ends_with('/') {
        path.to_string()
    } else {
        format!("{}/", path)
    }
}

/// Strip trailing `/` characters
pub fn trim_folder(path: &str) -> &str {
    path.trim_end_matches('/')
}
