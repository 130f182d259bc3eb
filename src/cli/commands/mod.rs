//! CLI commands implementation.
//!
//! This module contains the CLI parser and dispatches to command-specific modules.

mod import;
mod pipeline;
mod status;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::{load_settings_with_options, LoadOptions};
use crate::stages::StageName;

pub use import::SeedKind;

#[derive(Parser)]
#[command(name = "serpmine")]
#[command(about = "Incremental mining of search result pages from web archives")]
#[command(version)]
pub struct Cli {
    /// Config file path (overrides $SERPMINE_CONFIG and ./serpmine.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Resolve relative paths from current working directory instead of config file location
    #[arg(long, global = true)]
    cwd: bool,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Load archives, providers or parsers from a YAML seed file
    Import {
        /// What the file contains
        #[arg(value_enum)]
        kind: SeedKind,
        /// YAML file with a list of records
        file: PathBuf,
    },

    /// Run pipeline stages over everything that is due
    Run {
        /// Stages to run, in the given order (default: all, in pipeline order)
        #[arg(value_enum)]
        stages: Vec<StageName>,
        /// Limit number of entities per stage (0 = unlimited)
        #[arg(short, long, default_value = "0")]
        limit: usize,
        /// Entities fetched per chunk (default: from config)
        #[arg(long)]
        chunk_size: Option<usize>,
        /// Entities processed concurrently within a chunk
        #[arg(short = 'j', long, default_value = "1")]
        concurrency: usize,
    },

    /// Show due and total counts per stage
    Status,
}

/// Run the CLI.
pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let options = LoadOptions {
        config_path: cli.config,
        use_cwd: cli.cwd,
    };
    let (settings, _config) = load_settings_with_options(options)
        .await
        .map_err(|e| anyhow::anyhow!(e))?;

    match cli.command {
        Commands::Import { kind, file } => import::cmd_import(&settings, kind, &file).await,
        Commands::Run {
            stages,
            limit,
            chunk_size,
            concurrency,
        } => {
            let stages = if stages.is_empty() {
                StageName::ALL.to_vec()
            } else {
                stages
            };
            pipeline::cmd_run(
                &settings,
                &stages,
                limit,
                chunk_size.unwrap_or(settings.chunk_size),
                concurrency,
            )
            .await
        }
        Commands::Status => status::cmd_status(&settings).await,
    }
}
