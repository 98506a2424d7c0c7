//! Migration report: what was replayed, skipped and lost

use super::TransferStrategy;
use comfy_table::presets::UTF8_BORDERS_ONLY;
use comfy_table::Table;
use serde::Serialize;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct MigratedVersion {
    pub source: String,
    /// Version assigned by the target; absent in a dry run
    pub target: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct FailedVersion {
    pub version: String,
    pub error: String,
}

/// Outcome for one project
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ProjectReport {
    pub project: String,
    pub revisions: usize,
    pub migrated: Vec<MigratedVersion>,
    /// Versions flagged deleted in the source, never replayed
    pub skipped: Vec<String>,
    pub failed: Vec<FailedVersion>,
}

impl ProjectReport {
    pub fn new(project: impl Into<String>, revisions: usize) -> Self {
        Self {
            project: project.into(),
            revisions,
            migrated: Vec::new(),
            skipped: Vec::new(),
            failed: Vec::new(),
        }
    }

    pub fn record_migrated(&mut self, source: &str, target: Option<String>) {
        self.migrated.push(MigratedVersion {
            source: source.to_string(),
            target,
        });
    }

    pub fn record_skipped(&mut self, version: &str) {
        self.skipped.push(version.to_string());
    }

    pub fn record_failed(&mut self, version: &str, error: impl ToString) {
        self.failed.push(FailedVersion {
            version: version.to_string(),
            error: error.to_string(),
        });
    }
}

/// Outcome of a whole run
#[derive(Debug, Clone, Serialize)]
pub struct MigrationReport {
    pub strategy: TransferStrategy,
    pub dry_run: bool,
    pub projects: Vec<ProjectReport>,
    /// Projects whose head is deleted
    pub skipped_projects: Vec<String>,
    pub elapsed_ms: u128,
}

impl MigrationReport {
    pub fn new(strategy: TransferStrategy, dry_run: bool) -> Self {
        Self {
            strategy,
            dry_run,
            projects: Vec::new(),
            skipped_projects: Vec::new(),
            elapsed_ms: 0,
        }
    }

    pub fn set_elapsed(&mut self, elapsed: Duration) {
        self.elapsed_ms = elapsed.as_millis();
    }

    pub fn migrated_count(&self) -> usize {
        self.projects.iter().map(|p| p.migrated.len()).sum()
    }

    pub fn failed_count(&self) -> usize {
        self.projects.iter().map(|p| p.failed.len()).sum()
    }

    pub fn has_failures(&self) -> bool {
        self.failed_count() > 0
    }

    /// "M min, S sec"
    pub fn elapsed_display(&self) -> String {
        let secs = self.elapsed_ms / 1000;
        format!("{} min, {} sec", secs / 60, secs % 60)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Human-readable summary
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let mode = if self.dry_run { "Migration plan" } else { "Migration" };
        out.push_str(&format!("{} ({})\n\n", mode, self.strategy));

        if self.projects.is_empty() {
            out.push_str("No projects found.\n");
        } else {
            let mut table = Table::new();
            table.load_preset(UTF8_BORDERS_ONLY);
            let done = if self.dry_run { "Planned" } else { "Migrated" };
            table.set_header(vec!["Project", "Revisions", done, "Deleted", "Failed"]);
            for project in &self.projects {
                table.add_row(vec![
                    project.project.clone(),
                    project.revisions.to_string(),
                    project.migrated.len().to_string(),
                    project.skipped.len().to_string(),
                    project.failed.len().to_string(),
                ]);
            }
            out.push_str(&format!("{}\n", table));
        }

        if !self.skipped_projects.is_empty() {
            out.push_str(&format!(
                "\nSkipped deleted projects: {}\n",
                self.skipped_projects.join(", ")
            ));
        }

        let failures: Vec<_> = self
            .projects
            .iter()
            .flat_map(|p| p.failed.iter().map(move |f| (p.project.as_str(), f)))
            .collect();
        if !failures.is_empty() {
            out.push_str("\nFailed versions\n\n");
            let mut table = Table::new();
            table.load_preset(UTF8_BORDERS_ONLY);
            table.set_header(vec!["Project", "Version", "Error"]);
            for (project, failure) in failures {
                table.add_row(vec![
                    project.to_string(),
                    failure.version.clone(),
                    failure.error.clone(),
                ]);
            }
            out.push_str(&format!("{}\n", table));
        }

        out.push_str(&format!("\nFinished in {}\n", self.elapsed_display()));
        out
    }
}
