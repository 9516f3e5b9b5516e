// SPDX-FileCopyrightText: 2026 Strata Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Strata - run SQL against SQLite through the operation scheduler.
//!
//! This is the binary entry point.

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

mod exec;
mod query;
mod script;
mod session;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use strata_config::StrataConfig;
use strata_core::StrataError;

/// Strata - run SQL against SQLite through the operation scheduler.
#[derive(Parser, Debug)]
#[command(name = "strata", version, about, long_about = None)]
struct Cli {
    /// Database file to use instead of `database.path`.
    #[arg(long, global = true, value_name = "PATH")]
    database: Option<String>,

    /// Configuration file to load instead of the standard locations.
    #[arg(long = "config-file", global = true, value_name = "FILE")]
    config_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Run one or more `;`-separated statements.
    Exec {
        /// SQL to run.
        sql: String,
    },
    /// Run a query and print its rows as JSON lines.
    Query {
        /// SQL to run.
        sql: String,
        /// Print rows as they are produced.
        #[arg(long)]
        stream: bool,
    },
    /// Run a SQL file statement by statement, in order.
    Script {
        /// Path to the script.
        file: PathBuf,
    },
    /// Print the effective configuration as TOML.
    Config,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();

    let loaded = match &cli.config_file {
        Some(path) => strata_config::load_and_validate_path(path),
        None => strata_config::load_and_validate(),
    };
    let mut config = match loaded {
        Ok(config) => config,
        Err(errors) => {
            strata_config::render_errors(&errors);
            std::process::exit(1);
        }
    };
    if let Some(path) = cli.database {
        config.database.path = path;
    }

    init_tracing(&config.logging.level);

    if let Err(e) = run(cli.command, &config).await {
        eprintln!("strata: {e}");
        std::process::exit(1);
    }
}

async fn run(command: Commands, config: &StrataConfig) -> Result<(), StrataError> {
    match command {
        Commands::Exec { sql } => exec::run_exec(config, sql).await,
        Commands::Query { sql, stream } => query::run_query(config, sql, stream).await,
        Commands::Script { file } => script::run_script(config, &file).await,
        Commands::Config => {
            let rendered =
                strata_config::to_toml(config).map_err(|e| StrataError::Config(e.to_string()))?;
            print!("{rendered}");
            Ok(())
        }
    }
}

/// Logs go to stderr; stdout carries command output.
fn init_tracing(log_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("strata={log_level},warn")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .init();
}
