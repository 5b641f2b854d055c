//! run CLI command.
//!
//! Builds the bridge source, HTTP sink, and state store from configuration
//! and runs the collector until SIGTERM/SIGINT or reconnect exhaustion.

use anyhow::{Context, Result};
use candle_relay_collector::{
    BridgeSource, HttpSink, LifecycleController, LifecycleSettings, StateStore,
};
use candle_relay_core::ConfigLoader;
use clap::Args;
use std::sync::Arc;

/// Arguments for the run command.
#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Config file path
    #[arg(short, long, default_value = "config.toml", env = "RELAY_CONFIG")]
    pub config: String,
}

/// Runs the collector in the foreground.
///
/// # Errors
/// Returns an error if the configuration is missing or invalid, or if the
/// collector gives up after exhausting its reconnect attempts.
pub async fn run_collector(args: RunArgs) -> Result<()> {
    let config = ConfigLoader::load(&args.config)?;

    tracing::info!(
        config = %args.config,
        server = %config.server.url,
        bridge = %config.mt5.bridge_url,
        symbols = ?config.mt5.symbols,
        timeframes = ?config.mt5.timeframes,
        "Starting candle relay"
    );

    let source = BridgeSource::new(
        config.server.request_timeout,
        config.mt5.max_requests_per_second,
    )?
    .with_base_url(config.mt5.bridge_url.clone());
    let sink = HttpSink::from_config(&config.server, config.collector.timezone)
        .context("failed to create HTTP sink")?;
    let store = StateStore::new(config.collector.state_file.clone());

    let controller = LifecycleController::new(
        LifecycleSettings::from_config(&config),
        Arc::new(source),
        Arc::new(sink),
        store,
    );

    let summary = controller.run_until_signal().await?;

    tracing::info!(
        cycles = summary.stats.cycles,
        batches_sent = summary.stats.batches_sent,
        pairs_tracked = summary.progress.last_data_time.len(),
        "Candle relay stopped cleanly"
    );
    Ok(())
}
