//! CLI Tooling
//!
//! `repomigrate [CONFIG] [COMMAND]`. Every command except `init` loads the
//! configuration once and works from that value.

use crate::config::{ConfigLoader, MigratorConfig, RepositoryConfig, DEFAULT_CONFIG_FILE};
use crate::error::MigrationError;
use crate::logging::LoggingConfig;
use crate::mapping::PathMapping;
use crate::migrate::{HistoryReplicator, MigrationReport};
use clap::{Parser, Subcommand, ValueEnum};
use comfy_table::presets::UTF8_BORDERS_ONLY;
use comfy_table::Table;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::info;

/// repomigrate - replay versioned project history between repositories
#[derive(Parser, Debug)]
#[command(name = "repomigrate")]
#[command(about = "Replay versioned project history between flat and folder repositories")]
pub struct Cli {
    /// Configuration file path
    #[arg(default_value = DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Log level (trace, debug, info, warn, error, off)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Log format (json, text)
    #[arg(long, global = true)]
    pub log_format: Option<String>,

    /// Log output (stdout, stderr, file, file+stderr, both)
    #[arg(long, global = true)]
    pub log_output: Option<String>,

    /// Log file path (if output includes "file")
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,
}

impl Cli {
    /// Command to run; `migrate` when none is given
    pub fn command(&self) -> Commands {
        self.command.clone().unwrap_or(Commands::Migrate {
            format: OutputFormat::Text,
        })
    }

    /// Apply `--log-*` flags on top of the configured logging section
    pub fn apply_logging_overrides(&self, logging: &mut LoggingConfig) {
        if let Some(level) = &self.log_level {
            logging.level = level.clone();
        }
        if let Some(format) = &self.log_format {
            logging.format = format.clone();
        }
        if let Some(output) = &self.log_output {
            logging.output = output.clone();
        }
        if let Some(file) = &self.log_file {
            logging.file = Some(file.clone());
        }
    }
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Replay the source history onto the target (default)
    Migrate {
        /// Report format
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
    /// Show what would be migrated without reading content or writing
    Plan {
        /// Report format
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
    /// Print the resolved project mapping of one side
    Mapping {
        #[arg(long, value_enum, default_value_t = Side::Target)]
        side: Side,
        /// Output format
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
    /// Write a starter configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Source,
    Target,
}

impl Side {
    fn name(self) -> &'static str {
        match self {
            Side::Source => "source",
            Side::Target => "target",
        }
    }
}

#[derive(Debug, Serialize)]
struct MappingEntry<'a> {
    external: &'a str,
    internal: &'a str,
}

/// CLI context holding the loaded configuration
pub struct CliContext {
    config_path: PathBuf,
    config: MigratorConfig,
}

impl CliContext {
    /// Load the configuration the commands will run with
    pub fn load(config_path: PathBuf) -> Result<Self, MigrationError> {
        let config = ConfigLoader::load(&config_path)?;
        Ok(Self {
            config_path,
            config,
        })
    }

    pub fn config(&self) -> &MigratorConfig {
        &self.config
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Write a starter configuration. Runs without loading any configuration.
    pub fn init(path: &Path, force: bool) -> Result<String, MigrationError> {
        if path.exists() && !force {
            return Err(MigrationError::Config(format!(
                "{} already exists (use --force to overwrite)",
                path.display()
            )));
        }
        let text = ConfigLoader::default_toml()?;
        std::fs::write(path, text).map_err(|e| {
            MigrationError::Config(format!("Failed to write {}: {}", path.display(), e))
        })?;
        Ok(format!("Wrote default configuration to {}", path.display()))
    }

    /// Execute a CLI command
    pub fn execute(&self, command: &Commands) -> Result<String, MigrationError> {
        match command {
            Commands::Migrate { format } => {
                let report = self.replicate(false)?;
                render_report(&report, *format)
            }
            Commands::Plan { format } => {
                let report = self.replicate(true)?;
                render_report(&report, *format)
            }
            Commands::Mapping { side, format } => self.handle_mapping(*side, *format),
            Commands::Init { force } => Self::init(&self.config_path, *force),
        }
    }

    fn replicate(&self, dry_run: bool) -> Result<MigrationReport, MigrationError> {
        let source = self.config.source.open("source")?;
        let target = self.config.target.open("target")?;
        let replicator = HistoryReplicator::new(
            source.as_ref(),
            target.as_ref(),
            self.config.rewriter()?,
            self.config.migration.on_version_failure,
        );
        let report = if dry_run {
            replicator.plan()?
        } else {
            replicator.run()?
        };
        info!(
            migrated = report.migrated_count(),
            failed = report.failed_count(),
            "Replication finished"
        );
        Ok(report)
    }

    fn side(&self, side: Side) -> &RepositoryConfig {
        match side {
            Side::Source => &self.config.source,
            Side::Target => &self.config.target,
        }
    }

    fn handle_mapping(&self, side: Side, format: OutputFormat) -> Result<String, MigrationError> {
        let repo = self.side(side).open_mapped(side.name())?;
        let mapping = repo.store().snapshot();
        match format {
            OutputFormat::Json => to_json(&mapping_entries(&mapping)),
            OutputFormat::Text => Ok(format_mapping_text(&mapping)),
        }
    }
}

fn mapping_entries(mapping: &PathMapping) -> Vec<MappingEntry<'_>> {
    mapping
        .iter()
        .map(|(external, internal)| MappingEntry { external, internal })
        .collect()
}

fn format_mapping_text(mapping: &PathMapping) -> String {
    if mapping.is_empty() {
        return "No projects mapped.\n".to_string();
    }
    let mut table = Table::new();
    table.load_preset(UTF8_BORDERS_ONLY);
    table.set_header(vec!["Project", "Stored at"]);
    for (external, internal) in mapping.iter() {
        table.add_row(vec![external, internal]);
    }
    format!("{}\n", table)
}

fn render_report(report: &MigrationReport, format: OutputFormat) -> Result<String, MigrationError> {
    match format {
        OutputFormat::Text => Ok(report.render_text()),
        OutputFormat::Json => report
            .to_json()
            .map_err(|e| MigrationError::Config(format!("Failed to serialize report: {}", e))),
    }
}

fn to_json<T: Serialize>(value: &T) -> Result<String, MigrationError> {
    serde_json::to_string_pretty(value)
        .map_err(|e| MigrationError::Config(format!("Failed to serialize output: {}", e)))
}
