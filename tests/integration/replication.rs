//! History replication across layouts

use super::support::{item, RecordingRepository};
use chrono::{DateTime, TimeZone, Utc};
use repomigrate::archive;
use repomigrate::mapping::{MappedRepository, MappingSettings};
use repomigrate::migrate::{FailurePolicy, HistoryReplicator, MetadataRewriter, TransferStrategy};
use repomigrate::repository::{changes_from, FolderRepository, Layout, Repository, SledRepository};
use repomigrate::types::{ChangesetKind, FileRecord, UserInfo};
use std::sync::Arc;

const BASE: &str = "DESIGN/rules/";

fn at(minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, minute, 0).unwrap()
}

fn revision(path: &str, minute: u32, comment: &str) -> FileRecord {
    FileRecord {
        modified_at: Some(at(minute)),
        author: Some(UserInfo::new("jdoe")),
        comment: Some(comment.to_string()),
        ..FileRecord::new(path)
    }
}

fn project_blob(root: &str, files: &[(&str, &str)]) -> Vec<u8> {
    let items = files
        .iter()
        .map(|(name, content)| item(&format!("{}/{}", root, name), content))
        .collect();
    archive::pack(changes_from(items), root).unwrap()
}

fn rewriter() -> MetadataRewriter {
    MetadataRewriter::new(BASE, BASE, Default::default(), "{0}")
}

#[test]
fn flat_archives_replay_as_folder_changesets() {
    let source = SledRepository::temporary(Layout::Flat).unwrap();
    let root = "DESIGN/rules/Alpha";
    let first = project_blob(root, &[("rules.xml", "<project/>"), ("a.xlsx", "one")]);
    let second = project_blob(root, &[("rules.xml", "<project/>"), ("a.xlsx", "two"), ("b.xlsx", "new")]);
    source
        .save(&revision(root, 1, "initial"), &mut first.as_slice())
        .unwrap();
    source
        .save(&revision(root, 2, "update"), &mut second.as_slice())
        .unwrap();

    let target = RecordingRepository::new(Layout::Folder);
    let replicator = HistoryReplicator::new(&source, &target, rewriter(), FailurePolicy::Skip);
    assert_eq!(replicator.strategy(), TransferStrategy::FlatToFolder);
    let report = replicator.run().unwrap();
    assert_eq!(report.migrated_count(), 2);

    let calls = target.calls();
    assert_eq!(calls.len(), 2);
    assert!(calls
        .iter()
        .all(|call| call.changeset == Some(ChangesetKind::Full) && call.record.version.is_none()));
    assert_eq!(calls[0].record.comment.as_deref(), Some("initial"));
    assert_eq!(
        calls[0].entry_text(),
        vec![
            ("DESIGN/rules/Alpha/rules.xml".to_string(), "<project/>".to_string()),
            ("DESIGN/rules/Alpha/a.xlsx".to_string(), "one".to_string()),
        ]
    );
    assert_eq!(
        calls[1].entry_text(),
        vec![
            ("DESIGN/rules/Alpha/rules.xml".to_string(), "<project/>".to_string()),
            ("DESIGN/rules/Alpha/a.xlsx".to_string(), "two".to_string()),
            ("DESIGN/rules/Alpha/b.xlsx".to_string(), "new".to_string()),
        ]
    );
    assert_eq!(target.list_history(root).unwrap().len(), 2);
}

#[test]
fn deleted_projects_and_versions_are_not_replayed() {
    let source = SledRepository::temporary(Layout::Flat).unwrap();
    let live = "DESIGN/rules/Live";
    let gone = "DESIGN/rules/Gone";

    source
        .save(&revision(live, 1, "v1"), &mut "one".as_bytes())
        .unwrap();
    source.delete(&revision(live, 2, "removed")).unwrap();
    source
        .save(&revision(live, 3, "v3"), &mut "three".as_bytes())
        .unwrap();

    source
        .save(&revision(gone, 1, "only"), &mut "x".as_bytes())
        .unwrap();
    source.delete(&revision(gone, 2, "bye")).unwrap();

    let target = RecordingRepository::new(Layout::Flat);
    let report = HistoryReplicator::new(&source, &target, rewriter(), FailurePolicy::Skip)
        .run()
        .unwrap();

    assert_eq!(report.skipped_projects, vec![gone.to_string()]);
    assert_eq!(report.projects.len(), 1);
    assert_eq!(report.projects[0].revisions, 3);
    assert_eq!(report.projects[0].skipped.len(), 1);

    let comments: Vec<Option<String>> = target
        .calls()
        .into_iter()
        .map(|call| call.record.comment)
        .collect();
    assert_eq!(comments, vec![Some("v1".to_string()), Some("v3".to_string())]);
}

#[test]
fn versions_replay_in_modification_order() {
    let source = SledRepository::temporary(Layout::Flat).unwrap();
    let path = "DESIGN/rules/Late";
    // Stored out of order: the newer timestamp was written first
    source
        .save(&revision(path, 20, "newer"), &mut "b".as_bytes())
        .unwrap();
    source
        .save(&revision(path, 10, "older"), &mut "a".as_bytes())
        .unwrap();

    let target = RecordingRepository::new(Layout::Flat);
    HistoryReplicator::new(&source, &target, rewriter(), FailurePolicy::Skip)
        .run()
        .unwrap();

    let replayed: Vec<(Option<String>, Option<DateTime<Utc>>)> = target
        .calls()
        .into_iter()
        .map(|call| (call.record.comment, call.record.modified_at))
        .collect();
    assert_eq!(
        replayed,
        vec![
            (Some("older".to_string()), Some(at(10))),
            (Some("newer".to_string()), Some(at(20))),
        ]
    );
}

#[test]
fn folder_versions_pack_into_flat_archives() {
    let source = SledRepository::temporary(Layout::Folder).unwrap();
    let folders = source.as_folders().unwrap();
    folders
        .save_folder(
            &revision("DESIGN/rules/Beta", 1, "files"),
            &mut changes_from(vec![
                item("DESIGN/rules/Beta/rules.xml", "<project/>"),
                item("DESIGN/rules/Beta/nested/table.xlsx", "cells"),
            ]),
            ChangesetKind::Full,
        )
        .unwrap();

    let target = RecordingRepository::new(Layout::Flat);
    let rewriter = MetadataRewriter::new(BASE, "projects/", Default::default(), "{0} [{1}]");
    let replicator = HistoryReplicator::new(&source, &target, rewriter, FailurePolicy::Skip);
    assert_eq!(replicator.strategy(), TransferStrategy::FolderToFlat);
    replicator.run().unwrap();

    let calls = target.calls();
    assert_eq!(calls.len(), 1);
    let call = &calls[0];
    assert_eq!(call.record.path, "projects/Beta");
    assert_eq!(call.changeset, None);
    assert_eq!(
        call.record.comment.as_deref(),
        Some("files [2024-03-01T12:01:00+00:00]")
    );

    let (_, blob) = &call.entries[0];
    assert_eq!(call.record.size, blob.len() as u64);

    let mut unpacked: Vec<(String, String)> = archive::unpack_bytes(blob.clone(), "projects/Beta")
        .unwrap()
        .map(|entry| {
            let (record, bytes) = entry.unwrap().into_bytes().unwrap();
            (record.path, String::from_utf8(bytes).unwrap())
        })
        .collect();
    unpacked.sort();
    assert_eq!(
        unpacked,
        vec![
            ("projects/Beta/nested/table.xlsx".to_string(), "cells".to_string()),
            ("projects/Beta/rules.xml".to_string(), "<project/>".to_string()),
        ]
    );
}

#[test]
fn failed_target_writes_are_reported_per_version() {
    let source = SledRepository::temporary(Layout::Flat).unwrap();
    let path = "DESIGN/rules/Broken";
    source
        .save(&revision(path, 1, "v1"), &mut "one".as_bytes())
        .unwrap();
    source
        .save(&revision(path, 2, "v2"), &mut "two".as_bytes())
        .unwrap();

    let target = RecordingRepository::new(Layout::Flat);
    target.set_failing(true);
    let report = HistoryReplicator::new(&source, &target, rewriter(), FailurePolicy::Skip)
        .run()
        .unwrap();

    assert_eq!(report.failed_count(), 2);
    assert_eq!(report.migrated_count(), 0);
    assert!(report.has_failures());
    assert!(report.projects[0].failed[0]
        .error
        .contains("simulated write failure"));
}

#[test]
fn mapped_flat_source_replays_each_folder_version() {
    let backend: Arc<dyn Repository> = Arc::new(SledRepository::temporary(Layout::Flat).unwrap());
    let source = MappedRepository::initialize(
        backend,
        MappingSettings {
            base_folder: "DESIGN/rules".to_string(),
            ..MappingSettings::default()
        },
    )
    .unwrap();
    let project = "DESIGN/rules/Mapped";
    source
        .save_folder(
            &FileRecord {
                internal_path: Some("store/mapped".to_string()),
                ..revision(project, 1, "first")
            },
            &mut changes_from(vec![
                item("DESIGN/rules/Mapped/rules.xml", "<project/>"),
                item("DESIGN/rules/Mapped/a.txt", "one"),
            ]),
            ChangesetKind::Full,
        )
        .unwrap();
    source
        .save_folder(
            &revision(project, 2, "second"),
            &mut changes_from(vec![
                item("DESIGN/rules/Mapped/rules.xml", "<project/>"),
                item("DESIGN/rules/Mapped/a.txt", "two"),
                item("DESIGN/rules/Mapped/b.txt", "new"),
            ]),
            ChangesetKind::Full,
        )
        .unwrap();

    let target = RecordingRepository::new(Layout::Folder);
    let replicator = HistoryReplicator::new(&source, &target, rewriter(), FailurePolicy::Skip);
    assert_eq!(replicator.strategy(), TransferStrategy::FolderToFolder);
    let report = replicator.run().unwrap();
    assert_eq!(report.projects.len(), 1);
    assert_eq!(report.migrated_count(), 2);

    let calls = target.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].record.path, project);
    assert_eq!(calls[0].record.comment.as_deref(), Some("first"));
    assert_eq!(
        calls[0].entry_text(),
        vec![
            ("DESIGN/rules/Mapped/a.txt".to_string(), "one".to_string()),
            ("DESIGN/rules/Mapped/rules.xml".to_string(), "<project/>".to_string()),
        ]
    );
    assert_eq!(calls[1].record.comment.as_deref(), Some("second"));
    assert_eq!(
        calls[1].entry_text(),
        vec![
            ("DESIGN/rules/Mapped/a.txt".to_string(), "two".to_string()),
            ("DESIGN/rules/Mapped/b.txt".to_string(), "new".to_string()),
            ("DESIGN/rules/Mapped/rules.xml".to_string(), "<project/>".to_string()),
        ]
    );
}
