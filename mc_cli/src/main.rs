use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use color_eyre::Result;
use tracing::info;

use mc_core::{load_assistant_config_from_env, AssistantConfig};
use mc_schema::{Dimension, JobId, QueryKind};

mod commands;

#[derive(Parser, Debug)]
#[command(author, version, about = "Minecraft assistant command runtime and seed tools", long_about = None)]
struct Cli {
    /// Assistant config JSON. Without it MC_ASSISTANT_CONFIG_PATH or the
    /// built-in config is used.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Submit a game command and wait until it finishes.
    SubmitCommand {
        command: String,
        #[arg(long)]
        timeout_ms: Option<u64>,
        #[arg(long)]
        max_attempts: Option<u32>,
        /// How long to wait for a terminal status before giving up.
        #[arg(long, default_value_t = 30_000)]
        wait_ms: u64,
    },
    /// Show one job restored from the history log.
    GetJob { job_id: JobId },
    /// List recent jobs restored from the history log.
    ListJobs {
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Print recent history events, newest first.
    History {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Parse the seed cracker log into seed facts.
    SeedStatus {
        #[arg(long)]
        log: Option<PathBuf>,
    },
    /// Explain what still blocks a locator query.
    Missing {
        #[arg(long, default_value = "structure")]
        kind: QueryKind,
        #[arg(long)]
        log: Option<PathBuf>,
    },
    /// Find the nearest structure once the seed is cracked.
    NearestStructure(QueryArgs),
    /// Find the nearest biome once the seed is cracked.
    NearestBiome(QueryArgs),
}

#[derive(Args, Debug)]
struct QueryArgs {
    /// Structure or biome name, e.g. `village` or `cherry_grove`.
    target: String,
    #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
    x: i64,
    #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
    z: i64,
    #[arg(long, default_value = "overworld")]
    dimension: Dimension,
    #[arg(long)]
    version: Option<String>,
    #[arg(long)]
    log: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    // stdout carries JSON results, so logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = match cli.config {
        Some(path) => {
            let config = AssistantConfig::from_file(&path)?;
            info!(
                target: "mc_assist::config",
                path = %path.display(),
                "assistant_config.loaded=flag"
            );
            Arc::new(config)
        }
        None => load_assistant_config_from_env().0,
    };

    match cli.command {
        Command::SubmitCommand {
            command,
            timeout_ms,
            max_attempts,
            wait_ms,
        } => commands::submit(&config, &command, timeout_ms, max_attempts, wait_ms).await,
        Command::GetJob { job_id } => commands::get_job(&config, job_id),
        Command::ListJobs { limit } => commands::list_jobs(&config, limit),
        Command::History { limit } => commands::history(&config, limit),
        Command::SeedStatus { log } => commands::seed_status(&config, log),
        Command::Missing { kind, log } => commands::missing(&config, kind, log),
        Command::NearestStructure(args) => {
            commands::nearest(&config, QueryKind::Structure, args).await
        }
        Command::NearestBiome(args) => commands::nearest(&config, QueryKind::Biome, args).await,
    }
}
