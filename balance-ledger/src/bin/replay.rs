//! Replays a JSON-lines event file into a RocksDB-backed ledger
//!
//! Configuration comes from the TOML file named by `LEDGER_CONFIG`, or the
//! bundled Olympus token table when unset, then `LEDGER_*` environment
//! overrides.

use anyhow::Context;
use balance_ledger::{spawn_ledger_actor, ChainEvent, Config, Ledger, StaticOracle};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    // Load configuration
    let config = match std::env::var("LEDGER_CONFIG") {
        Ok(path) => Config::from_file(&path).with_context(|| format!("loading config {}", path))?,
        Err(_) => Config::olympus()?,
    }
    .with_env();

    let events_path = config
        .events_path
        .clone()
        .context("no event file configured (set LEDGER_EVENTS_FILE or events_path)")?;

    tracing::info!(
        service = %config.service_name,
        events = ?events_path,
        data_dir = ?config.data_dir,
        "Starting ledger replay"
    );

    let oracle_path = config.oracle_path.clone();
    let mut ledger = Ledger::open(config)?;
    if let Some(path) = oracle_path {
        let oracle = StaticOracle::from_file(&path)
            .with_context(|| format!("loading balance file {}", path.display()))?;
        ledger = ledger.with_oracle(Arc::new(oracle));
    }

    let handle = spawn_ledger_actor(ledger, 1000);

    let file = tokio::fs::File::open(&events_path)
        .await
        .with_context(|| format!("opening {}", events_path.display()))?;
    let mut lines = BufReader::new(file).lines();

    let mut line_number = 0usize;
    let mut applied = 0usize;
    while let Some(line) = lines.next_line().await? {
        line_number += 1;
        if line.trim().is_empty() {
            continue;
        }

        let event: ChainEvent = serde_json::from_str(&line)
            .with_context(|| format!("line {}: malformed event", line_number))?;
        let block = event.block();

        handle
            .submit(event)
            .await
            .with_context(|| format!("line {} (block {}): replay stopped", line_number, block))?;
        applied += 1;
    }

    tracing::info!(events = applied, "Replay finished");
    tracing::debug!(metrics = %handle.metrics().await?, "Final metrics");

    handle.shutdown().await?;
    Ok(())
}
