//! ConfigLoader: TOML file plus environment overlay

use super::MigratorConfig;
use crate::error::MigrationError;
use config::builder::DefaultState;
use config::{Config, ConfigBuilder, Environment, File, FileFormat};
use std::path::{Path, PathBuf};
use tracing::info;

/// Config file used when none is given on the command line
pub const DEFAULT_CONFIG_FILE: &str = "migrator.toml";

/// Configuration loader facade.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Find `path` in the working directory, then next to the executable.
    pub fn locate(path: &Path) -> Option<PathBuf> {
        if path.exists() {
            return Some(path.to_path_buf());
        }
        if path.is_absolute() {
            return None;
        }
        let beside_exe = std::env::current_exe().ok()?.parent()?.join(path);
        beside_exe.exists().then_some(beside_exe)
    }

    /// Load configuration from a file with the `MIGRATOR__` environment overlay.
    pub fn load(path: &Path) -> Result<MigratorConfig, MigrationError> {
        let located = Self::locate(path).ok_or_else(|| {
            MigrationError::Config(format!("{} configuration file not found", path.display()))
        })?;

        let builder = Config::builder().add_source(File::from(located.as_path()).format(FileFormat::Toml));
        let mut config: MigratorConfig = add_environment(builder).build()?.try_deserialize()?;

        let base_dir = located
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        config.resolve_paths(&base_dir);
        info!("'{}' configuration has been loaded.", located.display());
        Ok(config)
    }

    /// TOML text for a starter configuration
    pub fn default_toml() -> Result<String, MigrationError> {
        toml::to_string_pretty(&MigratorConfig::example())
            .map_err(|e| MigrationError::Config(format!("Failed to serialize config: {}", e)))
    }
}

/// Environment overlay: `MIGRATOR__SECTION__KEY`
fn add_environment(builder: ConfigBuilder<DefaultState>) -> ConfigBuilder<DefaultState> {
    builder.add_source(
        Environment::with_prefix("MIGRATOR")
            .separator("__")
            .try_parsing(true),
    )
}
