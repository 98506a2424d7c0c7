//! Migrator configuration
//!
//! One value built at startup by [`ConfigLoader`] and passed explicitly to
//! every component that needs it.

pub mod loader;

pub use loader::{ConfigLoader, DEFAULT_CONFIG_FILE};

use crate::error::{MigrationError, RepositoryError};
use crate::identity::{UserMapper, DEFAULT_DISPLAY_NAME_TEMPLATE, DEFAULT_EMAIL_TEMPLATE};
use crate::logging::LoggingConfig;
use crate::mapping::discovery::DEFAULT_DESCRIPTOR;
use crate::mapping::store::DEFAULT_CONFIG_FILE as DEFAULT_MAPPING_FILE;
use crate::mapping::{MappedRepository, MappingSettings};
use crate::migrate::rewrite::DEFAULT_COMMENT_TEMPLATE;
use crate::migrate::{FailurePolicy, MetadataRewriter};
use crate::repository::{Layout, Repository, SledRepository};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MigratorConfig {
    #[serde(default)]
    pub source: RepositoryConfig,
    #[serde(default)]
    pub target: RepositoryConfig,
    #[serde(default)]
    pub users: UsersConfig,
    #[serde(default)]
    pub migration: MigrationConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// One side of the migration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RepositoryConfig {
    /// On-disk store location
    #[serde(default)]
    pub path: Option<PathBuf>,
    /// Use an in-memory store instead of `path`
    #[serde(default)]
    pub temporary: bool,
    #[serde(default)]
    pub layout: Layout,
    /// Prefix under which projects live
    #[serde(default)]
    pub base_path: String,
    /// Wrap the store in a mapped repository
    #[serde(default)]
    pub mapping: Option<MappingConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingConfig {
    #[serde(default = "default_mapping_file")]
    pub config_file: String,
    #[serde(default)]
    pub base_folder: String,
    #[serde(default = "default_descriptor")]
    pub descriptor: String,
}

fn default_mapping_file() -> String {
    DEFAULT_MAPPING_FILE.to_string()
}

fn default_descriptor() -> String {
    DEFAULT_DESCRIPTOR.to_string()
}

impl Default for MappingConfig {
    fn default() -> Self {
        Self {
            config_file: default_mapping_file(),
            base_folder: String::new(),
            descriptor: default_descriptor(),
        }
    }
}

impl From<&MappingConfig> for MappingSettings {
    fn from(config: &MappingConfig) -> Self {
        MappingSettings {
            config_file: config.config_file.clone(),
            base_folder: config.base_folder.clone(),
            descriptor: config.descriptor.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsersConfig {
    #[serde(default = "default_email_template")]
    pub email: String,
    #[serde(default = "default_display_name_template")]
    pub display_name: String,
    /// `.properties` file of `username = email[, Display Name]`
    #[serde(default)]
    pub file: Option<PathBuf>,
}

fn default_email_template() -> String {
    DEFAULT_EMAIL_TEMPLATE.to_string()
}

fn default_display_name_template() -> String {
    DEFAULT_DISPLAY_NAME_TEMPLATE.to_string()
}

impl Default for UsersConfig {
    fn default() -> Self {
        Self {
            email: default_email_template(),
            display_name: default_display_name_template(),
            file: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationConfig {
    /// `{0}` is the original comment, `{1}` the modification time
    #[serde(default = "default_comment_template")]
    pub comment_template: String,
    #[serde(default)]
    pub on_version_failure: FailurePolicy,
}

fn default_comment_template() -> String {
    DEFAULT_COMMENT_TEMPLATE.to_string()
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            comment_template: default_comment_template(),
            on_version_failure: FailurePolicy::default(),
        }
    }
}

impl RepositoryConfig {
    /// Open the backend, wrapped in a mapped repository when configured
    pub fn open(&self, side: &str) -> Result<Arc<dyn Repository>, MigrationError> {
        if self.mapping.is_none() {
            return self.open_store(side);
        }
        let mapped = self.open_mapped(side)?;
        // Pick up mapping changes written by other processes
        mapped.set_listener(None);
        Ok(Arc::new(mapped))
    }

    /// Open the backend and its mapping, regardless of how it is used
    pub fn open_mapped(&self, side: &str) -> Result<MappedRepository, MigrationError> {
        let mapping = self.mapping.as_ref().ok_or_else(|| {
            MigrationError::Config(format!("{} repository has no mapping configured", side))
        })?;
        MappedRepository::initialize(self.open_store(side)?, mapping.into())
            .map_err(|e| connection_error(side, e))
    }

    /// Open the bare store
    pub fn open_store(&self, side: &str) -> Result<Arc<dyn Repository>, MigrationError> {
        let store = if self.temporary {
            SledRepository::temporary(self.layout)
        } else {
            let path = self.path.as_deref().ok_or_else(|| {
                MigrationError::Config(format!("{} repository has no path", side))
            })?;
            SledRepository::open(path, self.layout)
        }
        .map_err(|e| connection_error(side, e))?;
        info!(side, layout = ?self.layout, "Opened repository");
        Ok(Arc::new(store))
    }

    fn resolve_paths(&mut self, base_dir: &Path) {
        if let Some(path) = self.path.take() {
            self.path = Some(resolve_relative(base_dir, path));
        }
    }
}

impl UsersConfig {
    pub fn mapper(&self) -> Result<UserMapper, MigrationError> {
        let mapper = UserMapper::new(&self.email, &self.display_name);
        match &self.file {
            Some(file) => mapper.with_users_file(file).map_err(|e| {
                MigrationError::Config(format!("Failed to read users file {}: {}", file.display(), e))
            }),
            None => Ok(mapper),
        }
    }
}

impl MigratorConfig {
    /// Configuration written by `repomigrate init`
    pub fn example() -> Self {
        Self {
            source: RepositoryConfig {
                path: Some(PathBuf::from("source-store")),
                layout: Layout::Flat,
                base_path: "DESIGN/rules/".to_string(),
                ..RepositoryConfig::default()
            },
            target: RepositoryConfig {
                path: Some(PathBuf::from("target-store")),
                layout: Layout::Folder,
                base_path: "DESIGN/rules/".to_string(),
                ..RepositoryConfig::default()
            },
            ..Self::default()
        }
    }

    pub fn rewriter(&self) -> Result<MetadataRewriter, MigrationError> {
        Ok(MetadataRewriter::new(
            &self.source.base_path,
            &self.target.base_path,
            self.users.mapper()?,
            &self.migration.comment_template,
        ))
    }

    /// Make relative file references absolute against the config file's directory
    pub(crate) fn resolve_paths(&mut self, base_dir: &Path) {
        self.source.resolve_paths(base_dir);
        self.target.resolve_paths(base_dir);
        if let Some(file) = self.users.file.take() {
            self.users.file = Some(resolve_relative(base_dir, file));
        }
        if let Some(file) = self.logging.file.take() {
            self.logging.file = Some(resolve_relative(base_dir, file));
        }
    }
}

fn connection_error(side: &str, err: RepositoryError) -> MigrationError {
    MigrationError::Connection {
        side: side.to_string(),
        message: err.to_string(),
    }
}

fn resolve_relative(base_dir: &Path, path: PathBuf) -> PathBuf {
    if path.is_absolute() {
        path
    } else {
        base_dir.join(path)
    }
}
