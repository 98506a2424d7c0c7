//! Error types

use thiserror::Error;

/// Errors raised by repository backends and the mapped adapter
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Concurrent modification of {}", paths.join(", "))]
    Conflict { paths: Vec<String> },

    #[error("Operation not supported: {0}")]
    Unsupported(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Mapping error: {0}")]
    Mapping(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Archive error: {0}")]
    Archive(#[from] ArchiveError),
}

impl RepositoryError {
    /// Rewrite every path in a conflict report; other variants pass through.
    pub fn map_conflict_paths<F>(self, f: F) -> Self
    where
        F: Fn(&str) -> String,
    {
        match self {
            RepositoryError::Conflict { paths } => RepositoryError::Conflict {
                paths: paths.iter().map(|p| f(p)).collect(),
            },
            other => other,
        }
    }
}

impl From<sled::Error> for RepositoryError {
    fn from(err: sled::Error) -> Self {
        match err {
            sled::Error::Io(io) => RepositoryError::Io(io),
            other => RepositoryError::Storage(other.to_string()),
        }
    }
}

impl From<bincode::Error> for RepositoryError {
    fn from(err: bincode::Error) -> Self {
        RepositoryError::Storage(format!("Failed to decode record: {}", err))
    }
}

/// Errors raised while packing or unpacking an archive
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Entry {path} is outside archive root {root}")]
    EntryOutsideRoot { path: String, root: String },
}

/// Errors raised by the migration engine and the command surface
#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("Unable to connect to {side} repository: {message}")]
    Connection { side: String, message: String },

    #[error("Failed to enumerate {what}: {source}")]
    Enumeration {
        what: String,
        #[source]
        source: RepositoryError,
    },

    #[error("Failed to migrate {project} version {version}: {message}")]
    Version {
        project: String,
        version: String,
        message: String,
    },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<config::ConfigError> for MigrationError {
    fn from(err: config::ConfigError) -> Self {
        MigrationError::Config(err.to_string())
    }
}
