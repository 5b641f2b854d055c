//! Typed configuration for the relay.
//!
//! `ConfigFile` mirrors the on-disk layout and is what figment extracts.
//! `AppConfig` is the validated form handed to components at construction.

use crate::config_loader::ConfigError;
use crate::types::{Symbol, Timeframe};
use chrono_tz::Tz;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Placeholder written into generated configs for `server.url`.
pub const PLACEHOLDER_SERVER_URL: &str = "http://your-server-url/api/v1";

/// Placeholder written into generated configs for `server.api_key`.
pub const PLACEHOLDER_API_KEY: &str = "your-api-key";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    pub server: ServerSection,
    pub mt5: Mt5Section,
    pub collector: CollectorSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub url: String,
    pub api_key: String,
    /// Seconds
    pub request_timeout: u64,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            url: PLACEHOLDER_SERVER_URL.to_string(),
            api_key: PLACEHOLDER_API_KEY.to_string(),
            request_timeout: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Mt5Section {
    pub bridge_url: String,
    pub symbols: Vec<String>,
    pub timeframes: Vec<String>,
    pub candle_count: usize,
    /// Seconds
    pub reconnect_delay: u64,
    /// Seconds
    pub health_check_interval: u64,
    /// Seconds
    pub poll_interval: u64,
    pub max_reconnect_attempts: u32,
    pub max_requests_per_second: u32,
}

impl Default for Mt5Section {
    fn default() -> Self {
        Self {
            bridge_url: "http://127.0.0.1:5555".to_string(),
            symbols: vec![
                "EURUSD".to_string(),
                "GBPUSD".to_string(),
                "USDJPY".to_string(),
            ],
            timeframes: Timeframe::ALL.iter().map(|t| t.as_str().to_string()).collect(),
            candle_count: 300,
            reconnect_delay: 60,
            health_check_interval: 30,
            poll_interval: 60,
            max_reconnect_attempts: 5,
            max_requests_per_second: 20,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorSection {
    pub state_file: PathBuf,
    /// IANA zone name used for outgoing candle timestamps
    pub timezone: String,
    /// Seconds
    pub shutdown_timeout: u64,
}

impl Default for CollectorSection {
    fn default() -> Self {
        Self {
            state_file: PathBuf::from("collector_state.json"),
            timezone: "Asia/Shanghai".to_string(),
            shutdown_timeout: 5,
        }
    }
}

/// Validated configuration.
#[derive(Debug)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub mt5: Mt5Config,
    pub collector: CollectorConfig,
}

#[derive(Debug)]
pub struct ServerConfig {
    pub url: String,
    pub api_key: SecretString,
    pub request_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct Mt5Config {
    pub bridge_url: String,
    /// Iteration order of the poll loop (outer)
    pub symbols: Vec<Symbol>,
    /// Iteration order of the poll loop (inner)
    pub timeframes: Vec<Timeframe>,
    pub candle_count: usize,
    pub reconnect_delay: Duration,
    pub health_check_interval: Duration,
    pub poll_interval: Duration,
    pub max_reconnect_attempts: u32,
    pub max_requests_per_second: u32,
}

#[derive(Debug, Clone)]
pub struct CollectorConfig {
    pub state_file: PathBuf,
    pub timezone: Tz,
    pub shutdown_timeout: Duration,
}

impl ConfigFile {
    /// Validates every field and converts to the typed form.
    ///
    /// # Errors
    ///
    /// Returns the first invalid or placeholder field found.
    pub fn validate(self) -> Result<AppConfig, ConfigError> {
        let server = self.server.validate()?;
        let mt5 = self.mt5.validate()?;
        let collector = self.collector.validate()?;
        Ok(AppConfig {
            server,
            mt5,
            collector,
        })
    }
}

impl ServerSection {
    fn validate(self) -> Result<ServerConfig, ConfigError> {
        let url = self.url.trim().trim_end_matches('/').to_string();
        if url == PLACEHOLDER_SERVER_URL {
            return Err(ConfigError::Placeholder {
                field: "server.url",
            });
        }
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(invalid("server.url", format!("'{url}' is not an http(s) URL")));
        }
        if self.api_key == PLACEHOLDER_API_KEY {
            return Err(ConfigError::Placeholder {
                field: "server.api_key",
            });
        }
        if self.api_key.trim().is_empty() {
            return Err(invalid("server.api_key", "must not be empty"));
        }

        Ok(ServerConfig {
            url,
            api_key: SecretString::from(self.api_key),
            request_timeout: positive_secs("server.request_timeout", self.request_timeout)?,
        })
    }
}

impl Mt5Section {
    fn validate(self) -> Result<Mt5Config, ConfigError> {
        let bridge_url = self.bridge_url.trim().trim_end_matches('/').to_string();
        if !(bridge_url.starts_with("http://") || bridge_url.starts_with("https://")) {
            return Err(invalid(
                "mt5.bridge_url",
                format!("'{bridge_url}' is not an http(s) URL"),
            ));
        }

        let mut symbols: Vec<Symbol> = Vec::with_capacity(self.symbols.len());
        for raw in self.symbols {
            let symbol = raw.trim().to_string();
            if symbol.is_empty() {
                return Err(invalid("mt5.symbols", "contains an empty symbol"));
            }
            if !symbols.contains(&symbol) {
                symbols.push(symbol);
            }
        }
        if symbols.is_empty() {
            return Err(invalid("mt5.symbols", "at least one symbol is required"));
        }

        let mut timeframes = Vec::with_capacity(self.timeframes.len());
        for raw in &self.timeframes {
            let timeframe: Timeframe = raw
                .parse()
                .map_err(|e: anyhow::Error| invalid("mt5.timeframes", e.to_string()))?;
            if !timeframes.contains(&timeframe) {
                timeframes.push(timeframe);
            }
        }
        if timeframes.is_empty() {
            return Err(invalid("mt5.timeframes", "at least one timeframe is required"));
        }

        if self.candle_count == 0 {
            return Err(invalid("mt5.candle_count", "must be greater than zero"));
        }
        if self.max_reconnect_attempts == 0 {
            return Err(invalid("mt5.max_reconnect_attempts", "must be greater than zero"));
        }
        if self.max_requests_per_second == 0 {
            return Err(invalid("mt5.max_requests_per_second", "must be greater than zero"));
        }

        Ok(Mt5Config {
            bridge_url,
            symbols,
            timeframes,
            candle_count: self.candle_count,
            // Zero is allowed: reconnect immediately
            reconnect_delay: Duration::from_secs(self.reconnect_delay),
            health_check_interval: positive_secs(
                "mt5.health_check_interval",
                self.health_check_interval,
            )?,
            poll_interval: positive_secs("mt5.poll_interval", self.poll_interval)?,
            max_reconnect_attempts: self.max_reconnect_attempts,
            max_requests_per_second: self.max_requests_per_second,
        })
    }
}

impl CollectorSection {
    fn validate(self) -> Result<CollectorConfig, ConfigError> {
        if self.state_file.as_os_str().is_empty() {
            return Err(invalid("collector.state_file", "must not be empty"));
        }
        let timezone: Tz = self
            .timezone
            .parse()
            .map_err(|e| invalid("collector.timezone", format!("{e}")))?;

        Ok(CollectorConfig {
            state_file: self.state_file,
            timezone,
            shutdown_timeout: positive_secs("collector.shutdown_timeout", self.shutdown_timeout)?,
        })
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

fn positive_secs(field: &'static str, secs: u64) -> Result<Duration, ConfigError> {
    if secs == 0 {
        return Err(invalid(field, "must be greater than zero"));
    }
    Ok(Duration::from_secs(secs))
}
