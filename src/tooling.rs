//! Tooling & Integration Layer
//!
//! Command-line surface over the migration engine.

pub mod cli;

pub use cli::{Cli, CliContext, Commands};
