//! PANDA live - situational intelligence for a single on-chain asset
//!
//! Reads normalized transfers as JSONL, writes threshold, signal and
//! transition events as JSONL. Logs go to stderr.

use anyhow::Result;
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use std::path::PathBuf;
use tracing::error;

use panda_live::cli::commands;
use panda_live::config::{Config, ThresholdMode};

/// PANDA live - real-time transfer intelligence
#[derive(Parser)]
#[command(name = "panda")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "panda.toml")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Stream transfers through the intelligence core
    Run {
        /// JSONL transfer input ("-" or omitted for stdin)
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// JSONL event output ("-" or omitted for stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Advance time only from transfer timestamps (no idle ticks)
        #[arg(long)]
        replay: bool,

        /// Derive thresholds from this pool liquidity estimate
        #[arg(long, env = "PANDA_LIQUIDITY")]
        liquidity: Option<Decimal>,
    },

    /// Show current configuration
    Config,

    /// Show resolved thresholds
    Thresholds {
        /// Derive thresholds from this pool liquidity estimate
        #[arg(long)]
        liquidity: Option<Decimal>,
    },
}

fn apply_liquidity(config: &mut Config, liquidity: Option<Decimal>) {
    if let Some(liquidity) = liquidity {
        config.asset.liquidity_estimate = Some(liquidity);
        config.thresholds.mode = ThresholdMode::Liquidity;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // Initialize tracing; stdout carries the event stream
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive("panda_live=info".parse()?))
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_line_number(true)
        .init();

    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration
    let mut config = match Config::load(&cli.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("Failed to load configuration: {:#}", e);
            std::process::exit(1);
        }
    };

    // Execute command
    let result = match cli.command {
        Commands::Run {
            input,
            output,
            replay,
            liquidity,
        } => {
            apply_liquidity(&mut config, liquidity);
            commands::run(&config, input, output, replay).await
        }
        Commands::Config => commands::show_config(&config),
        Commands::Thresholds { liquidity } => {
            apply_liquidity(&mut config, liquidity);
            commands::show_thresholds(&config)
        }
    };

    if let Err(e) = result {
        error!("Command failed: {:#}", e);
        std::process::exit(1);
    }

    Ok(())
}
