//! CLI command implementations

use anyhow::{Context, Result};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufRead, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::Config;
use crate::detect::threshold::Thresholds;
use crate::engine::IntelligenceEngine;
use crate::stream::clock::ChainClock;
use crate::stream::runner::{run_session, JsonlSink};

fn is_stdio(path: &Option<PathBuf>) -> bool {
    path.as_deref().map_or(true, |p| p == Path::new("-"))
}

/// Stream transfers through the engine and write events as JSONL
pub async fn run(config: &Config, input: Option<PathBuf>, output: Option<PathBuf>, replay: bool) -> Result<()> {
    let mut engine = IntelligenceEngine::new(config);
    let clock = if replay {
        ChainClock::replay()
    } else {
        ChainClock::live()
    };

    let reader: Box<dyn AsyncBufRead + Unpin + Send> = if is_stdio(&input) {
        info!("Reading transfers from stdin");
        Box::new(BufReader::new(tokio::io::stdin()))
    } else {
        let path = input.unwrap_or_default();
        let file = tokio::fs::File::open(&path)
            .await
            .with_context(|| format!("Failed to open input {}", path.display()))?;
        info!("Reading transfers from {}", path.display());
        Box::new(BufReader::new(file))
    };

    let writer: Box<dyn Write + Send> = if is_stdio(&output) {
        Box::new(BufWriter::new(std::io::stdout()))
    } else {
        let path = output.unwrap_or_default();
        let file = std::fs::File::create(&path)
            .with_context(|| format!("Failed to create output {}", path.display()))?;
        Box::new(BufWriter::new(file))
    };
    let mut sink = JsonlSink::new(writer);

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Received shutdown signal");
                cancel.cancel();
            }
        });
    }

    if replay {
        info!("Replay mode: time advances only with transfer timestamps");
    }

    let summary = run_session(config, &mut engine, clock, reader, &mut sink, cancel).await?;

    if summary.dropped > 0 {
        warn!("{} transfers dropped under backpressure", summary.dropped);
    }
    eprintln!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

/// Show the resolved configuration
pub fn show_config(config: &Config) -> Result<()> {
    println!("{}", config.display_summary());
    Ok(())
}

/// Show the thresholds the engine would use
pub fn show_thresholds(config: &Config) -> Result<()> {
    let thresholds = Thresholds::resolve(&config.thresholds, config.asset.liquidity_estimate);

    println!("\n=== THRESHOLDS ===\n");
    println!("Mode:     {:?}", config.thresholds.mode);
    if let Some(liquidity) = thresholds.liquidity {
        println!("Liquidity: {}", liquidity);
    }
    println!("SINGLE:   {}", thresholds.single);
    println!("CUM_5M:   {}", thresholds.cum_5m);
    println!("CUM_15M:  {}", thresholds.cum_15m);
    Ok(())
}
