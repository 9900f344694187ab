//! Configuration for the framenet demo binary.
//!
//! Supports both command-line arguments and a TOML configuration file.
//! CLI arguments take precedence over config file values.

use crate::handler::{HandlerConfig, DEFAULT_MAX_PAYLOAD};
use clap::{Parser, ValueEnum};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Which side of the demo to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Framed TCP server plus UDP echo on the same port
    Server,
    /// Handler-driven client that pings a running server
    Client,
    /// Server and client in one process
    Demo,
}

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(name = "framenet")]
#[command(version)]
#[command(about = "Framed packet networking demo", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Run mode
    #[arg(long, value_enum)]
    pub mode: Option<Mode>,

    /// Host to connect to in client mode
    #[arg(long)]
    pub host: Option<String>,

    /// Port to listen on or connect to
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Capacity of each handler queue
    #[arg(long)]
    pub queue_capacity: Option<usize>,

    /// Worker idle sleep in microseconds
    #[arg(long)]
    pub idle_sleep_us: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub handler: HandlerSection,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Network-related configuration
#[derive(Debug, Deserialize)]
pub struct NetworkConfig {
    #[serde(default = "default_mode")]
    pub mode: Mode,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            mode: default_mode(),
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Network handler tuning
#[derive(Debug, Deserialize)]
pub struct HandlerSection {
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_idle_sleep_us")]
    pub idle_sleep_us: u64,
    #[serde(default = "default_recv_buffer_size")]
    pub recv_buffer_size: usize,
    #[serde(default = "default_max_payload")]
    pub max_payload: usize,
}

impl Default for HandlerSection {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            idle_sleep_us: default_idle_sleep_us(),
            recv_buffer_size: default_recv_buffer_size(),
            max_payload: default_max_payload(),
        }
    }
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

fn default_mode() -> Mode {
    Mode::Demo
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    1337
}

fn default_queue_capacity() -> usize {
    512
}

fn default_idle_sleep_us() -> u64 {
    100
}

fn default_recv_buffer_size() -> usize {
    u16::MAX as usize
}

fn default_max_payload() -> usize {
    DEFAULT_MAX_PAYLOAD
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub mode: Mode,
    pub host: String,
    pub port: u16,
    pub queue_capacity: usize,
    pub idle_sleep: Duration,
    pub recv_buffer_size: usize,
    pub max_payload: usize,
    pub log_level: String,
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_args(CliArgs::parse())
    }

    /// Merge parsed CLI args over the TOML file they name, if any.
    pub fn from_args(cli: CliArgs) -> Result<Self, ConfigError> {
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        Ok(Self::merge(cli, toml_config))
    }

    fn merge(cli: CliArgs, toml_config: TomlConfig) -> Self {
        Config {
            mode: cli.mode.unwrap_or(toml_config.network.mode),
            host: cli.host.unwrap_or(toml_config.network.host),
            port: cli.port.unwrap_or(toml_config.network.port),
            queue_capacity: cli
                .queue_capacity
                .unwrap_or(toml_config.handler.queue_capacity),
            idle_sleep: Duration::from_micros(
                cli.idle_sleep_us
                    .unwrap_or(toml_config.handler.idle_sleep_us),
            ),
            recv_buffer_size: toml_config.handler.recv_buffer_size,
            max_payload: toml_config.handler.max_payload,
            log_level: if cli.log_level != "info" {
                cli.log_level
            } else {
                toml_config.logging.level
            },
        }
    }

    pub fn handler_config(&self) -> HandlerConfig {
        HandlerConfig {
            queue_capacity: self.queue_capacity,
            idle_sleep: self.idle_sleep,
            recv_buffer_size: self.recv_buffer_size,
            max_payload: self.max_payload,
        }
    }
}

/// Configuration loading errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {err}", path = .0.display(), err = .1)]
    FileRead(PathBuf, #[source] std::io::Error),
    #[error("Failed to parse config file '{path}': {err}", path = .0.display(), err = .1)]
    TomlParse(PathBuf, #[source] toml::de::Error),
}
