//! Marketplace node binary
//!
//! Usage: `market-node [config.toml]`. Without a file, configuration comes
//! from `MARKET_*` environment variables.

use anyhow::Context;
use market_core::{AccountId, Config, EventKind, InMemorySettlement, Marketplace};
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    tracing::info!("Starting marketplace node");

    // Load configuration
    let config = match std::env::args().nth(1) {
        Some(path) => Config::from_file(&path)
            .with_context(|| format!("loading config from {}", path))?,
        None => Config::from_env().context("loading config from environment")?,
    };

    let settlement = Arc::new(InMemorySettlement::with_balances(
        config
            .settlement
            .accounts
            .iter()
            .map(|(account, balance)| (AccountId::new(account.as_str()), *balance)),
    ));

    let market = Marketplace::open(config, settlement).context("opening marketplace")?;
    tracing::info!(
        articles = market.number_of_articles().await?,
        "Marketplace opened successfully"
    );

    // Mirror every event into the log as JSON
    let mut feeds = Vec::new();
    for kind in EventKind::ALL {
        let mut subscription = market.subscribe(kind, 0);
        feeds.push(tokio::spawn(async move {
            while let Some(record) = subscription.recv().await {
                match serde_json::to_string(&record) {
                    Ok(json) => tracing::info!(
                        kind = %record.kind(),
                        position = record.position,
                        event = %json,
                        "{}",
                        record.event.describe()
                    ),
                    Err(e) => tracing::warn!(error = %e, "Failed to encode event"),
                }
            }
        }));
    }

    tokio::signal::ctrl_c().await?;

    tracing::info!("Shutting down marketplace node");
    for feed in feeds {
        feed.abort();
    }
    market.shutdown().await?;
    Ok(())
}
