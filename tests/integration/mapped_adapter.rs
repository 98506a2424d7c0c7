//! MappedRepository over flat and folder backends

use super::support::{descriptor, item, read_text, RecordingRepository};
use repomigrate::error::RepositoryError;
use repomigrate::mapping::{MappedRepository, MappingSettings};
use repomigrate::repository::{changes_from, FolderRepository, Layout, Repository, SledRepository};
use repomigrate::types::{ChangesetKind, FileRecord, UserInfo};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::time::{Duration, Instant};

fn settings() -> MappingSettings {
    MappingSettings {
        base_folder: "DESIGN/rules".to_string(),
        ..MappingSettings::default()
    }
}

fn new_project(external: &str, internal: &str) -> FileRecord {
    FileRecord {
        internal_path: Some(internal.to_string()),
        author: Some(UserInfo::new("admin")),
        comment: Some("create".to_string()),
        ..FileRecord::new(external)
    }
}

fn seed_project(repo: &SledRepository, folder: &str, name: &str) {
    repo.as_folders()
        .unwrap()
        .save_folder(
            &FileRecord::new(folder),
            &mut changes_from(vec![
                item(&format!("{}/rules.xml", folder), &descriptor(name)),
                item(&format!("{}/main.xlsx", folder), "cells"),
            ]),
            ChangesetKind::Full,
        )
        .unwrap();
}

fn mapped_over(delegate: Arc<dyn Repository>) -> MappedRepository {
    MappedRepository::initialize(delegate, settings()).unwrap()
}

#[test]
fn projects_are_discovered_without_a_mapping_resource() {
    let delegate = Arc::new(SledRepository::temporary(Layout::Folder).unwrap());
    seed_project(&delegate, "storage/a", "Alpha");
    seed_project(&delegate, "storage/deep/b", "Beta");

    let repo = mapped_over(delegate);
    let mapping = repo.store().snapshot();
    assert_eq!(mapping.get("DESIGN/rules/Alpha"), Some("storage/a"));
    assert_eq!(mapping.get("DESIGN/rules/Beta"), Some("storage/deep/b"));

    let folders: Vec<String> = repo
        .list_folders("DESIGN/rules")
        .unwrap()
        .into_iter()
        .map(|record| record.path)
        .collect();
    assert_eq!(folders, vec!["DESIGN/rules/Alpha", "DESIGN/rules/Beta"]);
    assert_eq!(
        read_text(&repo, "DESIGN/rules/Beta/main.xlsx").as_deref(),
        Some("cells")
    );
}

#[test]
fn duplicate_project_names_get_numeric_suffixes() {
    let delegate = Arc::new(SledRepository::temporary(Layout::Folder).unwrap());
    seed_project(&delegate, "one", "Proj");
    seed_project(&delegate, "two", "Proj");

    let repo = mapped_over(delegate);
    let mapping = repo.store().snapshot();
    assert_eq!(mapping.len(), 2);
    assert_eq!(mapping.get("DESIGN/rules/Proj"), Some("one"));
    assert_eq!(mapping.get("DESIGN/rules/Proj.1"), Some("two"));
}

#[test]
fn persisted_mapping_wins_over_discovery() {
    let delegate: Arc<dyn Repository> = Arc::new(SledRepository::temporary(Layout::Folder).unwrap());
    let repo = mapped_over(Arc::clone(&delegate));
    repo.save_folder(
        &new_project("DESIGN/rules/Named", "internal/x"),
        &mut changes_from(vec![item("DESIGN/rules/Named/rules.xml", &descriptor("Other"))]),
        ChangesetKind::Full,
    )
    .unwrap();

    // The descriptor says "Other" but the resource says "Named"
    let reopened = mapped_over(delegate);
    let mapping = reopened.store().snapshot();
    assert_eq!(mapping.len(), 1);
    assert_eq!(mapping.get("DESIGN/rules/Named"), Some("internal/x"));
}

fn failed_registration_keeps_mapping(layout: Layout) {
    let backend = Arc::new(RecordingRepository::new(layout));
    let repo = mapped_over(backend.clone());
    repo.save_folder(
        &new_project("DESIGN/rules/Kept", "kept"),
        &mut changes_from(vec![item("DESIGN/rules/Kept/a.txt", "1")]),
        ChangesetKind::Full,
    )
    .unwrap();
    let before = repo.store().snapshot();

    backend.set_failing(true);
    let result = repo.save_folder(
        &new_project("DESIGN/rules/Lost", "lost"),
        &mut changes_from(vec![item("DESIGN/rules/Lost/a.txt", "1")]),
        ChangesetKind::Full,
    );
    assert!(matches!(result, Err(RepositoryError::Storage(_))));
    assert_eq!(*repo.store().snapshot(), *before);
    assert!(!repo.store().snapshot().contains_external("DESIGN/rules/Lost"));

    // The table still works after the failure
    backend.set_failing(false);
    repo.save_folder(
        &new_project("DESIGN/rules/Later", "later"),
        &mut changes_from(vec![item("DESIGN/rules/Later/a.txt", "2")]),
        ChangesetKind::Full,
    )
    .unwrap();
    assert_eq!(repo.store().snapshot().len(), 2);
}

#[test]
fn failed_write_over_folder_backend_keeps_mapping() {
    failed_registration_keeps_mapping(Layout::Folder);
}

#[test]
fn failed_write_over_flat_backend_keeps_mapping() {
    failed_registration_keeps_mapping(Layout::Flat);
}

#[test]
fn conflicts_report_external_paths() {
    let delegate: Arc<dyn Repository> = Arc::new(SledRepository::temporary(Layout::Folder).unwrap());
    let repo = mapped_over(delegate);
    let first = repo
        .save_folder(
            &new_project("DESIGN/rules/Alpha", "store/alpha"),
            &mut changes_from(vec![item("DESIGN/rules/Alpha/a.txt", "1")]),
            ChangesetKind::Full,
        )
        .unwrap();
    repo.save_folder(
        &FileRecord::new("DESIGN/rules/Alpha"),
        &mut changes_from(vec![item("DESIGN/rules/Alpha/a.txt", "2")]),
        ChangesetKind::Full,
    )
    .unwrap();

    let stale = FileRecord {
        version: first.version.clone(),
        ..FileRecord::new("DESIGN/rules/Alpha")
    };
    let err = repo
        .save_folder(
            &stale,
            &mut changes_from(vec![item("DESIGN/rules/Alpha/a.txt", "3")]),
            ChangesetKind::Full,
        )
        .unwrap_err();
    match err {
        RepositoryError::Conflict { paths } => assert_eq!(paths, vec!["DESIGN/rules/Alpha"]),
        other => panic!("expected conflict, got {:?}", other),
    }
}

#[test]
fn readers_never_observe_partial_tables() {
    let delegate: Arc<dyn Repository> = Arc::new(SledRepository::temporary(Layout::Folder).unwrap());
    let repo = mapped_over(delegate);
    let done = AtomicBool::new(false);
    const PROJECTS: usize = 20;

    std::thread::scope(|scope| {
        for _ in 0..4 {
            scope.spawn(|| {
                let mut seen = 0;
                while !done.load(Ordering::Acquire) {
                    let snapshot = repo.store().snapshot();
                    assert!(snapshot.len() >= seen);
                    seen = snapshot.len();
                    for (external, internal) in snapshot.iter() {
                        assert_eq!(snapshot.to_internal(external).as_deref(), Some(internal));
                        assert_eq!(snapshot.to_external(internal).as_deref(), Some(external));
                    }
                }
            });
        }

        scope.spawn(|| {
            for i in 0..PROJECTS {
                let external = format!("DESIGN/rules/P{}", i);
                repo.save_folder(
                    &new_project(&external, &format!("store/p{}", i)),
                    &mut changes_from(vec![item(&format!("{}/f.txt", external), "x")]),
                    ChangesetKind::Full,
                )
                .unwrap();
            }
            done.store(true, Ordering::Release);
        });
    });

    let mapping = repo.store().snapshot();
    assert_eq!(mapping.len(), PROJECTS);
    assert_eq!(
        repo.store().resolve_to_internal("DESIGN/rules/P7/f.txt"),
        "store/p7/f.txt"
    );
}

#[test]
fn listener_reloads_mapping_written_elsewhere() {
    let delegate: Arc<dyn Repository> = Arc::new(SledRepository::temporary(Layout::Folder).unwrap());
    let writer = mapped_over(Arc::clone(&delegate));
    let viewer = mapped_over(Arc::clone(&delegate));

    let (tx, rx) = mpsc::channel();
    let tx = parking_lot::Mutex::new(tx);
    viewer.set_listener(Some(Arc::new(move || {
        let _ = tx.lock().send(());
    })));

    writer
        .save_folder(
            &new_project("DESIGN/rules/Shared", "shared"),
            &mut changes_from(vec![item("DESIGN/rules/Shared/a.txt", "1")]),
            ChangesetKind::Full,
        )
        .unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    while !viewer.store().snapshot().contains_external("DESIGN/rules/Shared") {
        assert!(Instant::now() < deadline, "viewer never reloaded the mapping");
        let _ = rx.recv_timeout(Duration::from_millis(100));
    }
    assert_eq!(
        read_text(&viewer, "DESIGN/rules/Shared/a.txt").as_deref(),
        Some("1")
    );
}

#[test]
fn flat_backend_projects_expose_folder_history() {
    let delegate: Arc<dyn Repository> = Arc::new(SledRepository::temporary(Layout::Flat).unwrap());
    let repo = mapped_over(delegate);
    let project = "DESIGN/rules/Flat";
    let first = repo
        .save_folder(
            &new_project(project, "flat/p"),
            &mut changes_from(vec![
                item("DESIGN/rules/Flat/rules.xml", &descriptor("Flat")),
                item("DESIGN/rules/Flat/a.txt", "one"),
            ]),
            ChangesetKind::Full,
        )
        .unwrap();
    let second = repo
        .save_folder(
            &FileRecord::new(project),
            &mut changes_from(vec![
                item("DESIGN/rules/Flat/rules.xml", &descriptor("Flat")),
                item("DESIGN/rules/Flat/b.txt", "two"),
            ]),
            ChangesetKind::Full,
        )
        .unwrap();

    let folders = repo.list_folders("DESIGN/rules").unwrap();
    assert_eq!(folders.len(), 1);
    assert_eq!(folders[0].path, project);

    let head = repo.check(project).unwrap().unwrap();
    assert_eq!(head.path, project);
    assert_eq!(head.version, second.version);

    let versions: Vec<Option<String>> = repo
        .list_history(project)
        .unwrap()
        .into_iter()
        .map(|record| record.version)
        .collect();
    assert_eq!(versions, vec![first.version.clone(), second.version.clone()]);

    let files_at = |version: Option<&str>| -> Vec<String> {
        repo.list_files(project, version)
            .unwrap()
            .into_iter()
            .map(|record| record.path)
            .collect()
    };
    assert_eq!(
        files_at(first.version.as_deref()),
        vec!["DESIGN/rules/Flat/a.txt", "DESIGN/rules/Flat/rules.xml"]
    );
    assert_eq!(
        files_at(None),
        vec!["DESIGN/rules/Flat/b.txt", "DESIGN/rules/Flat/rules.xml"]
    );

    let old = repo
        .read_history("DESIGN/rules/Flat/a.txt", first.version.as_deref().unwrap())
        .unwrap()
        .unwrap();
    let (_, bytes) = old.into_bytes().unwrap();
    assert_eq!(bytes, b"one");
}

#[test]
fn bulk_registrations_with_listener_do_not_stall() {
    const ROUNDS: usize = 5;
    const FILES: usize = 3000;

    let (done_tx, done_rx) = mpsc::channel();
    let worker = std::thread::spawn(move || {
        let delegate: Arc<dyn Repository> =
            Arc::new(SledRepository::temporary(Layout::Folder).unwrap());
        let repo = mapped_over(Arc::clone(&delegate));
        repo.set_listener(None);

        for round in 0..ROUNDS {
            // Wake the change feed so it is mid-notification when the bundle lands
            delegate
                .save(&FileRecord::new(&format!("other/{}", round)), &mut "x".as_bytes())
                .unwrap();
            std::thread::sleep(Duration::from_millis(3));

            let external = format!("DESIGN/rules/Bulk{}", round);
            let files = (0..FILES)
                .map(|i| {
                    item(
                        &format!("{}/f{}.txt", external, i),
                        &format!("{}-{}", round, i),
                    )
                })
                .collect();
            repo.save_folder(
                &new_project(&external, &format!("bulk/{}", round)),
                &mut changes_from(files),
                ChangesetKind::Full,
            )
            .unwrap();
        }
        let _ = done_tx.send(repo.store().snapshot().len());
    });

    let registered = done_rx
        .recv_timeout(Duration::from_secs(60))
        .expect("bundled saves stalled behind the change listener");
    assert_eq!(registered, ROUNDS);
    worker.join().unwrap();
}
