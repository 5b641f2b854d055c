use crate::config::{AppConfig, ConfigFile};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Environment variable prefix for overrides, e.g. `RELAY_SERVER__API_KEY`.
pub const ENV_PREFIX: &str = "RELAY_";

/// Template written when no configuration exists yet.
pub const CONFIG_TEMPLATE: &str = r#"# candle-relay configuration
#
# Every value may be overridden from the environment with the RELAY_ prefix
# and "__" between section and key, e.g. RELAY_SERVER__API_KEY=...

[server]
# Base URL of the collector API; candles are POSTed to <url>/kline
url = "http://your-server-url/api/v1"
# Bearer credential issued by the collector
api_key = "your-api-key"
# Upper bound for every HTTP call, seconds
request_timeout = 30

[mt5]
# Local HTTP bridge in front of the MetaTrader 5 terminal
bridge_url = "http://127.0.0.1:5555"
# Watch-list, polled in this order
symbols = ["EURUSD", "GBPUSD", "USDJPY"]
# Any of M1, M5, M15, M30, H1, polled in this order for every symbol
timeframes = ["M1", "M5", "M15", "M30", "H1"]
# Candles requested per (symbol, timeframe)
candle_count = 300
# Backoff before each reconnect attempt, seconds
reconnect_delay = 60
# Background liveness probe cadence, seconds
health_check_interval = 30
# Poll cycle cadence measured start to start, seconds
poll_interval = 60
# Consecutive failed reconnects before the collector gives up
max_reconnect_attempts = 5
# Request pacing towards the bridge
max_requests_per_second = 20

[collector]
# Progress snapshot, rewritten atomically after every cycle
state_file = "collector_state.json"
# Zone used for outgoing candle timestamps
timezone = "Asia/Shanghai"
# How long shutdown waits for the health monitor, seconds
shutdown_timeout = 5
"#;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// No config existed; a template was written and must be edited first.
    #[error("no configuration found, wrote a default one to {path}; fill in real credentials and run again")]
    Generated { path: PathBuf },

    #[error("configuration file {path} already exists")]
    AlreadyExists { path: PathBuf },

    #[error("{field} still holds its placeholder value; edit the configuration before running")]
    Placeholder { field: &'static str },

    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("failed to parse configuration: {0}")]
    Parse(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Parse(Box::new(err))
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads and validates the configuration at `path`.
    ///
    /// A missing file is replaced by the documented template and reported as
    /// [`ConfigError::Generated`]; the caller must not proceed with it.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing, cannot be parsed, or fails
    /// validation.
    pub fn load(path: impl AsRef<Path>) -> Result<AppConfig, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            Self::write_template(path, false)?;
            tracing::info!(path = %path.display(), "Created default config file");
            return Err(ConfigError::Generated {
                path: path.to_path_buf(),
            });
        }

        Self::extract(path)?.validate()
    }

    /// Reads the file and environment overrides without validating them.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is malformed or has wrongly typed values.
    pub fn extract(path: impl AsRef<Path>) -> Result<ConfigFile, ConfigError> {
        let file: ConfigFile = Figment::from(Serialized::defaults(ConfigFile::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;

        Ok(file)
    }

    /// Writes the documented template to `path`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::AlreadyExists`] when the file exists and
    /// `overwrite` is false, or an IO error if it cannot be written.
    pub fn write_template(path: impl AsRef<Path>, overwrite: bool) -> Result<(), ConfigError> {
        let path = path.as_ref();
        if path.exists() && !overwrite {
            return Err(ConfigError::AlreadyExists {
                path: path.to_path_buf(),
            });
        }
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, CONFIG_TEMPLATE)?;
        Ok(())
    }
}
