//! Configuration module for resp-bench.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::{Parser, ValueEnum};
use serde::Deserialize;
use std::path::PathBuf;

/// Command-line arguments for the load generator
#[derive(Parser, Debug)]
#[command(name = "resp-bench")]
#[command(author = "resp-bench authors")]
#[command(version = "0.1.0")]
#[command(about = "Measure PING throughput of a RESP server", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Server host
    #[arg(long)]
    pub host: Option<String>,

    /// Server port
    #[arg(long)]
    pub port: Option<u16>,

    /// Total number of commands to send (required)
    #[arg(long, allow_negative_numbers = true)]
    pub total_requests: Option<i64>,

    /// Number of concurrent clients (required)
    #[arg(long, allow_negative_numbers = true)]
    pub clients: Option<i64>,

    /// Worker runtime
    #[arg(long, value_enum)]
    pub runtime: Option<RuntimeType>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,
}

/// How workers are scheduled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeType {
    /// One OS thread per client with blocking sockets
    #[default]
    Threads,
    /// One task per client on a multi-threaded tokio runtime
    Tokio,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub target: TargetConfig,
    #[serde(default)]
    pub load: LoadConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Target server configuration
#[derive(Debug, Deserialize)]
pub struct TargetConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Load shape configuration
#[derive(Debug, Deserialize, Default)]
pub struct LoadConfig {
    #[serde(default)]
    pub total_requests: i64,
    #[serde(default)]
    pub clients: i64,
    #[serde(default)]
    pub runtime: RuntimeType,
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    6379
}

// Keeps stdout down to the report and worker failures.
fn default_log_level() -> String {
    "warn".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub total_requests: usize,
    pub clients: usize,
    pub runtime: RuntimeType,
    pub log_level: String,
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    ///
    /// Returns `Ok(None)` when the request or client count is missing or not
    /// positive; the caller should print usage and stop.
    pub fn load() -> Result<Option<Self>, ConfigError> {
        let cli = CliArgs::parse();

        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        Ok(Self::resolve(cli, toml_config))
    }

    /// Merge CLI args over TOML values and validate the counts.
    pub fn resolve(cli: CliArgs, toml_config: TomlConfig) -> Option<Self> {
        let total_requests =
            positive(cli.total_requests.unwrap_or(toml_config.load.total_requests))?;
        let clients = positive(cli.clients.unwrap_or(toml_config.load.clients))?;

        Some(Config {
            host: cli.host.unwrap_or(toml_config.target.host),
            port: cli.port.unwrap_or(toml_config.target.port),
            total_requests,
            clients,
            runtime: cli.runtime.unwrap_or(toml_config.load.runtime),
            log_level: cli.log_level.unwrap_or(toml_config.logging.level),
        })
    }

    /// `host:port`, with IPv6 literals bracketed.
    pub fn target_addr(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

fn positive(n: i64) -> Option<usize> {
    if n > 0 {
        usize::try_from(n).ok()
    } else {
        None
    }
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    FileRead(PathBuf, std::io::Error),
    TomlParse(PathBuf, toml::de::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::FileRead(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::TomlParse(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
        }
    }
}

impl std::error::Error for ConfigError {}
