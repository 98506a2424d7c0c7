//! repomigrate: versioned project history migration
//!
//! Moves every version of every project from one repository backend to
//! another. Flat backends that store one blob per project are bridged to
//! folder backends through zip archives, and flat backends can be given a
//! folder view through a persisted path mapping.

pub mod archive;
pub mod config;
pub mod error;
pub mod identity;
pub mod logging;
pub mod mapping;
pub mod migrate;
pub mod repository;
pub mod tooling;
pub mod types;
