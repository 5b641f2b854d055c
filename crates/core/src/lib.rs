//! Core types, collaborator traits, and configuration for the candle relay.

pub mod config;
pub mod config_loader;
pub mod traits;
pub mod types;

pub use config::{AppConfig, CollectorConfig, ConfigFile, Mt5Config, ServerConfig};
pub use config_loader::{ConfigError, ConfigLoader};
pub use traits::{CandleSink, MarketDataSource, TerminalInfo};
pub use types::{Candle, CandleBatch, RawRate, Symbol, Timeframe};
