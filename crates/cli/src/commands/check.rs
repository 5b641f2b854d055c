//! check CLI command.
//!
//! Validates configuration and runs one initialize/probe round trip against
//! the terminal bridge, without touching the remote collector.

use anyhow::{anyhow, Result};
use candle_relay_collector::BridgeSource;
use candle_relay_core::{ConfigLoader, MarketDataSource, TerminalInfo};
use clap::Args;

/// Arguments for the check command.
#[derive(Args, Debug, Clone)]
pub struct CheckArgs {
    /// Config file path
    #[arg(short, long, default_value = "config.toml", env = "RELAY_CONFIG")]
    pub config: String,
}

fn describe(info: &TerminalInfo) -> String {
    let or_unknown = |v: Option<String>| v.unwrap_or_else(|| "unknown".to_string());
    format!(
        "terminal: {} ({}), build {}, last ping {}",
        or_unknown(info.name.clone()),
        or_unknown(info.company.clone()),
        or_unknown(info.build.map(|b| b.to_string())),
        or_unknown(info.ping_last.map(|p| format!("{:.1}ms", p as f64 / 1000.0))),
    )
}

/// Runs the check command.
///
/// # Errors
/// Returns an error if the configuration is invalid or the terminal cannot
/// be initialized or probed.
pub async fn run_check(args: CheckArgs) -> Result<()> {
    let config = ConfigLoader::load(&args.config)?;
    println!("Configuration OK: {}", args.config);
    println!(
        "  {} symbol(s) x {} timeframe(s), every {}s",
        config.mt5.symbols.len(),
        config.mt5.timeframes.len(),
        config.mt5.poll_interval.as_secs()
    );

    let source = BridgeSource::new(
        config.server.request_timeout,
        config.mt5.max_requests_per_second,
    )?
    .with_base_url(config.mt5.bridge_url.clone());

    source
        .initialize()
        .await
        .map_err(|e| anyhow!("terminal bridge at {} did not initialize: {e}", source.base_url()))?;

    let probe = source.probe().await;
    source.shutdown().await;

    let info = probe?;
    println!("Bridge OK: {}", source.base_url());
    println!("  {}", describe(&info));
    Ok(())
}
