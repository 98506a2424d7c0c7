//! HistoryVersionSet: replay order of one project's versions
//!
//! Versions are ordered by modification time, then by version string
//! compared case-insensitively. Missing values sort first. Records equal
//! under this order collapse to the first one seen.

use crate::types::FileRecord;
use std::cmp::Ordering;

/// Ordering used for replay
pub fn compare_records(a: &FileRecord, b: &FileRecord) -> Ordering {
    a.modified_at
        .cmp(&b.modified_at)
        .then_with(|| compare_versions(a.version.as_deref(), b.version.as_deref()))
}

fn compare_versions(a: Option<&str>, b: Option<&str>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a), Some(b)) => a
            .chars()
            .flat_map(char::to_lowercase)
            .cmp(b.chars().flat_map(char::to_lowercase)),
    }
}

/// Sorted, de-duplicated version history
#[derive(Debug, Clone, Default)]
pub struct HistoryVersionSet {
    records: Vec<FileRecord>,
}

impl HistoryVersionSet {
    pub fn from_records(records: impl IntoIterator<Item = FileRecord>) -> Self {
        let mut records: Vec<FileRecord> = records.into_iter().collect();
        // Stable: the first of equal records stays in front and survives dedup
        records.sort_by(compare_records);
        records.dedup_by(|later, earlier| compare_records(earlier, later) == Ordering::Equal);
        Self { records }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, FileRecord> {
        self.records.iter()
    }
}

impl IntoIterator for HistoryVersionSet {
    type Item = FileRecord;
    type IntoIter = std::vec::IntoIter<FileRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.into_iter()
    }
}

impl<'a> IntoIterator for &'a HistoryVersionSet {
    type Item = &'a FileRecord;
    type IntoIter = std::slice::Iter<'a, FileRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}
