//! History replication
//!
//! Walks every version of every project in the source, in replay order, and
//! writes each one to the target. The transfer strategy is chosen once from
//! the folder capability of both sides:
//!
//! | source | target | per version                                   |
//! |--------|--------|-----------------------------------------------|
//! | folder | folder | file set saved as one changeset               |
//! | folder | flat   | file set packed into one archive, flat save   |
//! | flat   | folder | blob unpacked into a file set, one changeset  |
//! | flat   | flat   | blob saved as is                              |
//!
//! Failing to enumerate the source is fatal. A failure while replaying a
//! single version is logged and, under [`FailurePolicy::Skip`], skipped.

pub mod history;
pub mod report;
pub mod rewrite;

pub use history::HistoryVersionSet;
pub use report::{MigrationReport, ProjectReport};
pub use rewrite::MetadataRewriter;

use crate::archive;
use crate::error::{MigrationError, RepositoryError};
use crate::repository::{FolderRepository, Repository};
use crate::types::{Capabilities, ChangesetKind, FileItem, FileRecord};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Instant;
use tracing::{debug, error, info};

/// What to do when one version cannot be replayed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Log, leave a gap in the target history and continue
    #[default]
    Skip,
    /// Stop the run at the first failed version
    Abort,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStrategy {
    FolderToFolder,
    FolderToFlat,
    FlatToFolder,
    FlatToFlat,
}

impl TransferStrategy {
    pub fn select(source: Capabilities, target: Capabilities) -> Self {
        match (source.folders, target.folders) {
            (true, true) => TransferStrategy::FolderToFolder,
            (true, false) => TransferStrategy::FolderToFlat,
            (false, true) => TransferStrategy::FlatToFolder,
            (false, false) => TransferStrategy::FlatToFlat,
        }
    }

    pub fn source_has_folders(self) -> bool {
        matches!(
            self,
            TransferStrategy::FolderToFolder | TransferStrategy::FolderToFlat
        )
    }
}

impl fmt::Display for TransferStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransferStrategy::FolderToFolder => "folder -> folder",
            TransferStrategy::FolderToFlat => "folder -> flat",
            TransferStrategy::FlatToFolder => "flat -> folder",
            TransferStrategy::FlatToFlat => "flat -> flat",
        };
        f.write_str(name)
    }
}

fn version_label(record: &FileRecord) -> &str {
    record.version.as_deref().unwrap_or("-")
}

fn enumeration(what: impl Into<String>) -> impl FnOnce(RepositoryError) -> MigrationError {
    let what = what.into();
    move |source| MigrationError::Enumeration { what, source }
}

pub struct HistoryReplicator<'a> {
    source: &'a dyn Repository,
    target: &'a dyn Repository,
    strategy: TransferStrategy,
    rewriter: MetadataRewriter,
    policy: FailurePolicy,
}

impl<'a> HistoryReplicator<'a> {
    pub fn new(
        source: &'a dyn Repository,
        target: &'a dyn Repository,
        rewriter: MetadataRewriter,
        policy: FailurePolicy,
    ) -> Self {
        let strategy = TransferStrategy::select(source.supports(), target.supports());
        Self {
            source,
            target,
            strategy,
            rewriter,
            policy,
        }
    }

    pub fn strategy(&self) -> TransferStrategy {
        self.strategy
    }

    /// Replay the whole source history onto the target
    pub fn run(&self) -> Result<MigrationReport, MigrationError> {
        self.execute(false)
    }

    /// Enumerate what `run` would replay without reading content or writing
    pub fn plan(&self) -> Result<MigrationReport, MigrationError> {
        self.execute(true)
    }

    fn execute(&self, dry_run: bool) -> Result<MigrationReport, MigrationError> {
        let started = Instant::now();
        let mut report = MigrationReport::new(self.strategy, dry_run);
        info!(strategy = %self.strategy, dry_run, "Starting migration");

        let projects = self.list_projects()?;
        for project in projects {
            if project.deleted {
                info!(
                    "Skipping deleted '{}' project with version '{}'",
                    project.path,
                    version_label(&project)
                );
                report.skipped_projects.push(project.path);
                continue;
            }
            report.projects.push(self.replicate_project(&project, dry_run)?);
        }

        report.set_elapsed(started.elapsed());
        info!("Migration was finished in {}.", report.elapsed_display());
        Ok(report)
    }

    fn source_folders(&self) -> Result<&'a dyn FolderRepository, RepositoryError> {
        self.source
            .as_folders()
            .ok_or_else(|| RepositoryError::Unsupported("source folders".to_string()))
    }

    fn target_folders(&self) -> Result<&'a dyn FolderRepository, RepositoryError> {
        self.target
            .as_folders()
            .ok_or_else(|| RepositoryError::Unsupported("target folders".to_string()))
    }

    fn list_projects(&self) -> Result<Vec<FileRecord>, MigrationError> {
        let base = self.rewriter.source_base();
        if self.strategy.source_has_folders() {
            self.source_folders()
                .and_then(|folders| folders.list_folders(base))
                .map_err(enumeration(format!("project folders under '{}'", base)))
        } else {
            self.source
                .list(base)
                .map_err(enumeration(format!("projects under '{}'", base)))
        }
    }

    fn replicate_project(
        &self,
        project: &FileRecord,
        dry_run: bool,
    ) -> Result<ProjectReport, MigrationError> {
        let history = self
            .source
            .list_history(&project.path)
            .map_err(enumeration(format!("history of '{}'", project.path)))?;
        let versions = HistoryVersionSet::from_records(history);
        info!(
            "Migrating project '{}'. Revisions count {}",
            project.path,
            versions.len()
        );

        let mut report = ProjectReport::new(&project.path, versions.len());
        for record in &versions {
            let version = version_label(record);
            if record.deleted {
                debug!("Skipping deleted version '{}' of '{}'", version, record.path);
                report.record_skipped(version);
                continue;
            }
            if dry_run {
                report.record_migrated(version, None);
                continue;
            }

            match self.replicate_version(record) {
                Ok(saved) => {
                    debug!(
                        "Migration completed from version '{}' to '{}'.",
                        version,
                        version_label(&saved)
                    );
                    report.record_migrated(version, saved.version);
                }
                Err(e) => {
                    error!(
                        "Failed to save '{}' with version '{}': {}",
                        record.path, version, e
                    );
                    if self.policy == FailurePolicy::Abort {
                        return Err(MigrationError::Version {
                            project: project.path.clone(),
                            version: version.to_string(),
                            message: e.to_string(),
                        });
                    }
                    report.record_failed(version, e);
                }
            }
        }
        Ok(report)
    }

    /// Replay one version. Content streams are owned by the items and
    /// released when they drop, on success and on every error path.
    fn replicate_version(&self, record: &FileRecord) -> Result<FileRecord, RepositoryError> {
        match self.strategy {
            TransferStrategy::FolderToFolder | TransferStrategy::FolderToFlat => {
                self.replicate_folder_version(record)
            }
            TransferStrategy::FlatToFolder | TransferStrategy::FlatToFlat => {
                self.replicate_file_version(record)
            }
        }
    }

    fn replicate_folder_version(&self, state: &FileRecord) -> Result<FileRecord, RepositoryError> {
        let files = self
            .source_folders()?
            .list_files(&state.path, state.version.as_deref())?;
        let folder = self.rewriter.rewrite(state);

        let mut entries = files
            .into_iter()
            .filter(|file| !file.deleted)
            .map(|file| self.read_entry(&file, state.version.as_deref()));

        if self.strategy == TransferStrategy::FolderToFolder {
            return self
                .target_folders()?
                .save_folder(&folder, &mut entries, ChangesetKind::Full);
        }

        let blob = archive::pack(entries, &folder.path)?;
        let record = FileRecord {
            size: blob.len() as u64,
            ..folder
        };
        self.target.save(&record, &mut blob.as_slice())
    }

    fn read_entry(&self, file: &FileRecord, version: Option<&str>) -> Result<FileItem, RepositoryError> {
        let item = match version {
            Some(version) => self.source.read_history(&file.path, version)?,
            None => self.source.read(&file.path)?,
        }
        .ok_or_else(|| RepositoryError::NotFound(file.path.clone()))?;
        Ok(self.rewriter.rewrite_entry(item))
    }

    fn replicate_file_version(&self, record: &FileRecord) -> Result<FileRecord, RepositoryError> {
        let item = match record.version.as_deref() {
            Some(version) => self.source.read_history(&record.path, version)?,
            None => self.source.read(&record.path)?,
        }
        .ok_or_else(|| RepositoryError::NotFound(record.path.clone()))?;
        let rewritten = self.rewriter.rewrite(&item.record);

        if self.strategy == TransferStrategy::FlatToFlat {
            let mut content = item.content;
            return self.target.save(&rewritten, &mut content);
        }

        let (_, blob) = item.into_bytes()?;
        let mut entries = archive::unpack_bytes(blob, &rewritten.path)?;
        self.target_folders()?
            .save_folder(&rewritten, &mut entries, ChangesetKind::Full)
    }
}
