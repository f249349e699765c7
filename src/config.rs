//! Configuration module for the frame-relay server.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::Parser;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// One mebibyte, the default for socket buffers and I/O chunks.
pub const MIB: usize = 1024 * 1024;

/// Command-line arguments for the server
#[derive(Parser, Debug, Default)]
#[command(name = "frame-relay")]
#[command(author = "frame-relay authors")]
#[command(version = "0.1.0")]
#[command(about = "A concurrent server for delimiter-framed text requests", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind to (e.g., 0.0.0.0)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Number of worker threads (defaults to max(2, CPU cores))
    #[arg(short = 'w', long)]
    pub workers: Option<usize>,

    /// Request processor to run in each worker (echo, ping)
    #[arg(long)]
    pub processor: Option<ProcessorKind>,

    /// Seconds to wait for a client to send data before closing
    #[arg(long)]
    pub read_timeout: Option<u64>,

    /// Maximum request frame size in bytes (0 = unlimited)
    #[arg(long)]
    pub max_frame_size: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,
}

/// Built-in request processors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ProcessorKind {
    Echo,
    Ping,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Listener and worker pool configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_backlog")]
    pub backlog: u32,
    /// Number of worker threads
    pub workers: Option<usize>,
    /// SO_RCVBUF / SO_SNDBUF hint for the listening socket
    #[serde(default = "default_socket_buffer_size")]
    pub socket_buffer_size: usize,
    /// How long shutdown waits for in-flight connections
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,
    #[serde(default = "default_processor")]
    pub processor: ProcessorKind,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            backlog: default_backlog(),
            workers: None,
            socket_buffer_size: default_socket_buffer_size(),
            shutdown_grace_secs: default_shutdown_grace(),
            processor: default_processor(),
        }
    }
}

/// Per-connection configuration
#[derive(Debug, Deserialize)]
pub struct ConnectionConfig {
    #[serde(default = "default_read_timeout")]
    pub read_timeout_secs: u64,
    /// Bytes per read call and per write chunk
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Largest request accepted before the connection is dropped (0 = unlimited)
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            read_timeout_secs: default_read_timeout(),
            chunk_size: default_chunk_size(),
            max_frame_size: default_max_frame_size(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level
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
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    6666
}

fn default_backlog() -> u32 {
    10
}

fn default_socket_buffer_size() -> usize {
    MIB
}

fn default_shutdown_grace() -> u64 {
    30
}

fn default_processor() -> ProcessorKind {
    ProcessorKind::Echo
}

fn default_read_timeout() -> u64 {
    300 // 5 minutes
}

fn default_chunk_size() -> usize {
    MIB
}

fn default_max_frame_size() -> usize {
    256 * MIB
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Default worker count: one per core, never fewer than two.
pub fn default_workers() -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    cores.max(2)
}

/// Settings each connection handler runs with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionSettings {
    pub read_timeout: Duration,
    pub chunk_size: usize,
    /// `None` means no cap.
    pub max_frame_size: Option<usize>,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        ConnectionConfig::default().into()
    }
}

impl From<ConnectionConfig> for ConnectionSettings {
    fn from(c: ConnectionConfig) -> Self {
        Self {
            read_timeout: Duration::from_secs(c.read_timeout_secs),
            chunk_size: c.chunk_size,
            max_frame_size: (c.max_frame_size > 0).then_some(c.max_frame_size),
        }
    }
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub backlog: u32,
    pub workers: usize,
    pub socket_buffer_size: usize,
    pub shutdown_grace: Duration,
    pub processor: ProcessorKind,
    pub connection: ConnectionSettings,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::merge(CliArgs::default(), TomlConfig::default())
    }
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        let cli = CliArgs::parse();

        // Load TOML config if specified
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        let config = Self::merge(cli, toml_config);
        config.validate()?;
        Ok(config)
    }

    fn merge(cli: CliArgs, toml_config: TomlConfig) -> Self {
        let TomlConfig {
            server,
            connection,
            logging,
        } = toml_config;

        let mut settings = ConnectionSettings::from(connection);
        if let Some(secs) = cli.read_timeout {
            settings.read_timeout = Duration::from_secs(secs);
        }
        if let Some(max) = cli.max_frame_size {
            settings.max_frame_size = (max > 0).then_some(max);
        }

        Config {
            host: cli.host.unwrap_or(server.host),
            port: cli.port.unwrap_or(server.port),
            backlog: server.backlog,
            workers: cli
                .workers
                .or(server.workers)
                .unwrap_or_else(default_workers),
            socket_buffer_size: server.socket_buffer_size,
            shutdown_grace: Duration::from_secs(server.shutdown_grace_secs),
            processor: cli.processor.unwrap_or(server.processor),
            connection: settings,
            log_level: cli.log_level.unwrap_or(logging.level),
        }
    }

    /// Reject values the server cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::Invalid("workers must be at least 1"));
        }
        if self.backlog == 0 {
            return Err(ConfigError::Invalid("backlog must be at least 1"));
        }
        if self.connection.chunk_size == 0 {
            return Err(ConfigError::Invalid("chunk_size must be at least 1"));
        }
        if self.connection.read_timeout.is_zero() {
            return Err(ConfigError::Invalid("read_timeout_secs must be at least 1"));
        }
        Ok(())
    }

    /// The `host:port` string the listener binds.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Configuration loading errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {err}", path = .0.display(), err = .1)]
    FileRead(PathBuf, #[source] std::io::Error),
    #[error("Failed to parse config file '{path}': {err}", path = .0.display(), err = .1)]
    TomlParse(PathBuf, #[source] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}
