//! ArchiveCodec: one archive blob <-> a set of files rooted at a prefix
//!
//! Entry names inside the archive are relative to the root prefix. Entries
//! keep the order of the input sequence.

use crate::error::{ArchiveError, RepositoryError};
use crate::types::{folder_prefix, FileItem, FileRecord};
use std::io::{self, Cursor, Read, Seek};
use tracing::debug;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// Pack `entries` into a finalized zip archive.
///
/// Every entry path must lie under `root`; the prefix is stripped to form
/// the entry name.
pub fn pack<I>(entries: I, root: &str) -> Result<Vec<u8>, ArchiveError>
where
    I: IntoIterator<Item = Result<FileItem, RepositoryError>>,
{
    let root = folder_prefix(root);
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let mut count = 0usize;

    for entry in entries {
        let item = entry.map_err(into_archive_error)?;
        let name = item
            .record
            .path
            .strip_prefix(root.as_str())
            .filter(|name| !name.is_empty())
            .ok_or_else(|| ArchiveError::EntryOutsideRoot {
                path: item.record.path.clone(),
                root: root.clone(),
            })?
            .to_string();

        writer.start_file(name, options)?;
        let mut content = item.content;
        io::copy(&mut content, &mut writer)?;
        count += 1;
    }

    // The central directory is only written by finish(); read the length after it
    let bytes = writer.finish()?.into_inner();
    debug!(entries = count, size = bytes.len(), root = %root, "Packed archive");
    Ok(bytes)
}

/// Lazily unpack an archive, prefixing every entry name with `root`
pub fn unpack<R: Read + Seek>(reader: R, root: &str) -> Result<ArchiveEntries<R>, ArchiveError> {
    Ok(ArchiveEntries {
        archive: ZipArchive::new(reader)?,
        root: folder_prefix(root),
        next: 0,
    })
}

/// Unpack an in-memory archive
pub fn unpack_bytes(bytes: Vec<u8>, root: &str) -> Result<ArchiveEntries<Cursor<Vec<u8>>>, ArchiveError> {
    unpack(Cursor::new(bytes), root)
}

fn into_archive_error(err: RepositoryError) -> ArchiveError {
    match err {
        RepositoryError::Archive(inner) => inner,
        RepositoryError::Io(io) => ArchiveError::Io(io),
        other => ArchiveError::Io(io::Error::new(io::ErrorKind::Other, other.to_string())),
    }
}

/// Entries of an archive, read one at a time. Directory entries are skipped.
pub struct ArchiveEntries<R> {
    archive: ZipArchive<R>,
    root: String,
    next: usize,
}

impl<R: Read + Seek> ArchiveEntries<R> {
    pub fn len(&self) -> usize {
        self.archive.len()
    }

    pub fn is_empty(&self) -> bool {
        self.archive.len() == 0
    }

    fn read_entry(&mut self, index: usize) -> Result<Option<FileItem>, ArchiveError> {
        let mut file = self.archive.by_index(index)?;
        if file.is_dir() {
            return Ok(None);
        }
        let path = format!("{}{}", self.root, file.name());
        let mut bytes = Vec::with_capacity(file.size() as usize);
        file.read_to_end(&mut bytes)?;
        Ok(Some(FileItem::from_bytes(FileRecord::new(path), bytes)))
    }
}

impl<R: Read + Seek> Iterator for ArchiveEntries<R> {
    type Item = Result<FileItem, RepositoryError>;

    fn next(&mut self) -> Option<Self::Item> {
        while self.next < self.archive.len() {
            let index = self.next;
            self.next += 1;
            match self.read_entry(index) {
                Ok(Some(item)) => return Some(Ok(item)),
                Ok(None) => continue,
                Err(e) => return Some(Err(e.into())),
            }
        }
        None
    }
}
