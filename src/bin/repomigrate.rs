//! repomigrate CLI Binary
//!
//! Replays project history from the configured source repository onto the
//! configured target. Exits with status 1 on any top-level failure.

use clap::Parser;
use repomigrate::logging::init_logging;
use repomigrate::tooling::cli::{Cli, CliContext, Commands};
use std::process;

fn main() {
    let cli = Cli::parse();
    let command = cli.command();

    if let Commands::Init { force } = command {
        match CliContext::init(&cli.config, force) {
            Ok(output) => println!("{}", output),
            Err(e) => {
                eprintln!("Error: {}", e);
                process::exit(1);
            }
        }
        return;
    }

    let context = match CliContext::load(cli.config.clone()) {
        Ok(ctx) => ctx,
        Err(e) => {
            eprintln!("Error loading configuration: {}", e);
            process::exit(1);
        }
    };

    let mut logging = context.config().logging.clone();
    cli.apply_logging_overrides(&mut logging);
    if let Err(e) = init_logging(Some(&logging)) {
        eprintln!("Error initializing logging: {}", e);
        process::exit(1);
    }

    match context.execute(&command) {
        Ok(output) => {
            println!("{}", output);
        }
        Err(e) => {
            tracing::error!("Error during migration: {}", e);
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    }
}
