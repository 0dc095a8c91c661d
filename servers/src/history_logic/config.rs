use std::ffi::OsString;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use lib_common::ingestors::{IngestorError, PredictorConfig, ReconnectPolicy};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Config file looked up in the working directory when no path is given.
pub const DEFAULT_CONFIG_FILE: &str = "server_history.conf";

#[derive(Parser, Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
#[clap(about = "Predictor feed history relay", version)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[clap(long, env = "PORT", help = "Port the HTTP API listens on.")]
    pub port: Option<u16>,

    #[clap(long, env = "HISTORY_CONFIG_PATH", help = "Path to the JSON configuration file.")]
    pub config_path: Option<PathBuf>,

    #[clap(long, env = "HISTORY_LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[clap(long, env = "HISTORY_LOG_LEVEL", help = "Logging level or filter directive (trace, debug, info, warn, error).")]
    pub log_level: Option<String>,

    #[clap(long, env = "HISTORY_LOG_TO_FILE", help = "Also write JSON logs to a file in the log directory.")]
    pub log_to_file: Option<bool>,

    #[clap(long, env = "HISTORY_FEED_URL", help = "Upstream predictor WebSocket URL.")]
    pub feed_url: Option<String>,

    #[clap(long, env = "HISTORY_RECONNECT_BASE_DELAY_MS", help = "Delay in milliseconds before the first reconnect attempt.")]
    pub reconnect_base_delay_ms: Option<u64>,

    #[clap(long, env = "HISTORY_RECONNECT_MAX_DELAY_MS", help = "Maximum delay in milliseconds between reconnect attempts.")]
    pub reconnect_max_delay_ms: Option<u64>,

    #[clap(long, env = "HISTORY_CONNECT_TIMEOUT_MS", help = "Milliseconds allowed for one dial, including the WebSocket upgrade.")]
    pub connect_timeout_ms: Option<u64>,

    #[clap(long, env = "HISTORY_UPGRADE_FALLBACK_MS", help = "Milliseconds to wait for the probe echo before confirming the upgrade.")]
    pub upgrade_fallback_ms: Option<u64>,

    #[clap(long, env = "HISTORY_INACTIVITY_TIMEOUT_SECONDS", help = "Seconds without upstream traffic before the session is dropped.")]
    pub inactivity_timeout_seconds: Option<u64>,
}

impl Config {
    // 'other' wins wherever it has a value.
    fn merge(self, other: Config) -> Config {
        Config {
            port: other.port.or(self.port),
            config_path: other.config_path.or(self.config_path),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
            log_to_file: other.log_to_file.or(self.log_to_file),
            feed_url: other.feed_url.or(self.feed_url),
            reconnect_base_delay_ms: other.reconnect_base_delay_ms.or(self.reconnect_base_delay_ms),
            reconnect_max_delay_ms: other.reconnect_max_delay_ms.or(self.reconnect_max_delay_ms),
            connect_timeout_ms: other.connect_timeout_ms.or(self.connect_timeout_ms),
            upgrade_fallback_ms: other.upgrade_fallback_ms.or(self.upgrade_fallback_ms),
            inactivity_timeout_seconds: other.inactivity_timeout_seconds.or(self.inactivity_timeout_seconds),
        }
    }

    fn defaults() -> Config {
        let predictor = PredictorConfig::default();
        Config {
            port: Some(3000),
            config_path: None,
            log_dir: Some(PathBuf::from("./logs")),
            log_level: Some("info".to_string()),
            log_to_file: Some(false),
            feed_url: Some(predictor.feed_url),
            reconnect_base_delay_ms: Some(millis(predictor.reconnect.base)),
            reconnect_max_delay_ms: Some(millis(predictor.reconnect.max)),
            connect_timeout_ms: Some(millis(predictor.connect_timeout)),
            upgrade_fallback_ms: Some(millis(predictor.upgrade_fallback)),
            inactivity_timeout_seconds: Some(predictor.inactivity_timeout.as_secs()),
        }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Cli(#[from] clap::Error),

    #[error("config file {path} not found")]
    MissingFile { path: PathBuf },

    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    ParseFile {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Feed(#[from] IngestorError),

    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

/// HTTP side of the resolved configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub port: u16,
    pub log_dir: PathBuf,
    pub log_level: String,
    pub log_to_file: bool,
}

/// Everything the binary needs, with no optional values left.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub predictor: PredictorConfig,
    /// The config file that was merged in, if any.
    pub config_file: Option<PathBuf>,
}

/// Resolves the configuration from the process arguments and environment.
pub fn load_config() -> Result<AppConfig, ConfigError> {
    load_config_from(std::env::args_os())
}

/// Resolves the configuration: built-in defaults, then the JSON config file,
/// then environment variables and command line arguments.
///
/// The file is `server_history.conf` in the working directory unless
/// `--config-path` (or `HISTORY_CONFIG_PATH`) names another one. A missing
/// default file is fine; a missing explicit file is an error.
pub fn load_config_from<I, T>(args: I) -> Result<AppConfig, ConfigError>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli = Config::try_parse_from(args)?;

    let (config_file_path, explicit) = match cli.config_path.clone() {
        Some(path) => (path, true),
        None => (PathBuf::from(DEFAULT_CONFIG_FILE), false),
    };

    let mut merged = Config::defaults();
    let mut config_file = None;

    if config_file_path.exists() {
        let config_str = fs::read_to_string(&config_file_path).map_err(|source| ConfigError::ReadFile {
            path: config_file_path.clone(),
            source,
        })?;
        let file_config: Config = serde_json::from_str(&config_str).map_err(|source| ConfigError::ParseFile {
            path: config_file_path.clone(),
            source,
        })?;
        merged = merged.merge(file_config);
        config_file = Some(config_file_path);
    } else if explicit {
        return Err(ConfigError::MissingFile { path: config_file_path });
    }

    resolve(merged.merge(cli), config_file)
}

fn resolve(config: Config, config_file: Option<PathBuf>) -> Result<AppConfig, ConfigError> {
    let defaults = Config::defaults();
    let pick = |value: Option<u64>, fallback: Option<u64>| value.or(fallback).unwrap_or_default();

    let feed_url = config.feed_url.or(defaults.feed_url).unwrap_or_default();
    let mut predictor = PredictorConfig::with_feed_url(&feed_url)?;

    let base_ms = pick(config.reconnect_base_delay_ms, defaults.reconnect_base_delay_ms);
    let max_ms = pick(config.reconnect_max_delay_ms, defaults.reconnect_max_delay_ms);
    let connect_ms = pick(config.connect_timeout_ms, defaults.connect_timeout_ms);
    let upgrade_ms = pick(config.upgrade_fallback_ms, defaults.upgrade_fallback_ms);
    let inactivity_s = pick(config.inactivity_timeout_seconds, defaults.inactivity_timeout_seconds);

    if base_ms == 0 {
        return Err(ConfigError::Zero("reconnect_base_delay_ms"));
    }
    if connect_ms == 0 {
        return Err(ConfigError::Zero("connect_timeout_ms"));
    }
    if inactivity_s == 0 {
        return Err(ConfigError::Zero("inactivity_timeout_seconds"));
    }

    predictor.reconnect = ReconnectPolicy {
        base: Duration::from_millis(base_ms),
        max: Duration::from_millis(max_ms),
    };
    predictor.connect_timeout = Duration::from_millis(connect_ms);
    predictor.upgrade_fallback = Duration::from_millis(upgrade_ms);
    predictor.inactivity_timeout = Duration::from_secs(inactivity_s);

    let server = ServerConfig {
        port: config.port.or(defaults.port).unwrap_or(3000),
        log_dir: config.log_dir.or(defaults.log_dir).unwrap_or_else(|| PathBuf::from("./logs")),
        log_level: config.log_level.or(defaults.log_level).unwrap_or_else(|| "info".to_string()),
        log_to_file: config.log_to_file.or(defaults.log_to_file).unwrap_or(false),
    };

    Ok(AppConfig {
        server,
        predictor,
        config_file,
    })
}
