use clap::{Parser, Subcommand};

mod commands;

use commands::{CheckArgs, InitConfigArgs, RunArgs, StatusArgs};

#[derive(Parser)]
#[command(name = "candle-relay")]
#[command(about = "Relays MetaTrader 5 candles to a remote collector", long_about = None)]
struct Cli {
    /// Optional log file path (logs to file instead of stderr)
    #[arg(long, global = true)]
    log_file: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll the terminal and forward candles until stopped
    Run(RunArgs),
    /// Write a documented configuration template
    InitConfig(InitConfigArgs),
    /// Validate the configuration and probe the terminal once
    Check(CheckArgs),
    /// Show persisted collector progress
    Status(StatusArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match &cli.log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            tracing_subscriber::fmt()
                .with_env_filter(
                    tracing_subscriber::EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
                )
                .with_ansi(false)
                .with_writer(std::sync::Mutex::new(file))
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(
                    tracing_subscriber::EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
                )
                .init();
        }
    }

    match cli.command {
        Commands::Run(args) => {
            commands::run_collector(args).await?;
        }
        Commands::InitConfig(args) => {
            commands::run_init_config(args)?;
        }
        Commands::Check(args) => {
            commands::run_check(args).await?;
        }
        Commands::Status(args) => {
            commands::run_status(args)?;
        }
    }

    Ok(())
}
