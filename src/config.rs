//! Server Configuration
//!
//! Configuration is assembled from three layers, later ones winning:
//!
//! ```text
//!   built-in defaults  <  config file (key value)  <  command line
//! ```
//!
//! The config file is a list of `key value` lines. Blank lines and lines
//! starting with `#` are ignored. Values are read through typed readers
//! that understand size and duration suffixes:
//!
//! ```text
//! # /etc/triekv.conf
//! address          0.0.0.0
//! port             10128
//! max_memory       512M
//! max_idletime     30s
//! expiry_period    15s
//! gc_ratio         1h
//! ```
//!
//! Any key can also be set with `-o key=value` on the command line.

use crate::protocol::Limits;
use crate::storage::StorageConfig;
use clap::Parser;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Errors raised while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("line {line}: expected `key value`")]
    Syntax { line: usize },

    #[error("invalid override `{0}`, expected key=value")]
    Override(String),

    #[error("invalid value `{value}` for `{key}`: expected {expected}")]
    Invalid {
        key: String,
        value: String,
        expected: &'static str,
    },
}

// ============================================================================
// Key/Value Source
// ============================================================================

/// Raw `key value` pairs with typed readers.
#[derive(Debug, Clone, Default)]
pub struct ConfigSource {
    values: HashMap<String, String>,
}

impl ConfigSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a config file from disk.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text)
    }

    /// Parses config file contents.
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let mut values = HashMap::new();

        for (index, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (key, value) = line
                .split_once(char::is_whitespace)
                .ok_or(ConfigError::Syntax { line: index + 1 })?;
            values.insert(key.to_string(), value.trim().to_string());
        }

        Ok(Self { values })
    }

    /// Applies a `key=value` override.
    pub fn set_override(&mut self, pair: &str) -> Result<(), ConfigError> {
        let (key, value) = pair
            .split_once('=')
            .filter(|(key, _)| !key.trim().is_empty())
            .ok_or_else(|| ConfigError::Override(pair.to_string()))?;
        self.set(key.trim(), value.trim());
        Ok(())
    }

    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        self.values.insert(key.to_string(), value.into());
    }

    pub fn read_string(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn read_int(&self, key: &str) -> Result<Option<i64>, ConfigError> {
        self.read_with(key, "an integer", |v| v.parse().ok())
    }

    /// Reads a byte size such as `512`, `64K`, `4MB` or `2G`.
    pub fn read_size(&self, key: &str) -> Result<Option<u64>, ConfigError> {
        self.read_with(key, "a size like 512, 64K, 4MB or 2G", parse_size)
    }

    /// Reads a duration such as `100ms`, `15s`, `5m`, `1h` or `30d`.
    /// A bare number is taken as seconds.
    pub fn read_duration(&self, key: &str) -> Result<Option<Duration>, ConfigError> {
        self.read_with(key, "a duration like 100ms, 15s, 5m, 1h or 30d", parse_duration)
    }

    fn read_with<T>(
        &self,
        key: &str,
        expected: &'static str,
        parse: impl Fn(&str) -> Option<T>,
    ) -> Result<Option<T>, ConfigError> {
        match self.read_string(key) {
            None => Ok(None),
            Some(value) => parse(value).map(Some).ok_or_else(|| ConfigError::Invalid {
                key: key.to_string(),
                value: value.to_string(),
                expected,
            }),
        }
    }
}

/// Splits `"64KB"` into `(64, "kb")`.
fn split_suffix(value: &str) -> Option<(u64, String)> {
    let value = value.trim();
    let digits = value.find(|c: char| !c.is_ascii_digit()).unwrap_or(value.len());
    if digits == 0 {
        return None;
    }
    let number = value[..digits].parse().ok()?;
    Some((number, value[digits..].trim().to_ascii_lowercase()))
}

pub fn parse_size(value: &str) -> Option<u64> {
    let (number, suffix) = split_suffix(value)?;
    let unit: u64 = match suffix.as_str() {
        "" | "b" => 1,
        "k" | "kb" => 1024,
        "m" | "mb" => 1024 * 1024,
        "g" | "gb" => 1024 * 1024 * 1024,
        _ => return None,
    };
    number.checked_mul(unit)
}

pub fn parse_duration(value: &str) -> Option<Duration> {
    let (number, suffix) = split_suffix(value)?;
    let seconds = match suffix.as_str() {
        "ms" => return Some(Duration::from_millis(number)),
        "" | "s" => 1,
        "m" => 60,
        "h" => 3600,
        "d" => 86_400,
        _ => return None,
    };
    number.checked_mul(seconds).map(Duration::from_secs)
}

// ============================================================================
// Command Line
// ============================================================================

/// triekv - an in-memory key-value cache with prefix queries.
#[derive(Debug, Default, Parser)]
#[command(name = "triekv", about, version)]
pub struct Cli {
    /// Path to a `key value` config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind the TCP listener to
    #[arg(short, long)]
    pub address: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Also listen on this unix socket path
    #[arg(short, long)]
    pub unix_socket: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long)]
    pub log_level: Option<String>,

    /// Override any config key, e.g. `-o max_memory=512M`
    #[arg(short = 'o', long = "option", value_name = "KEY=VALUE")]
    pub overrides: Vec<String>,
}

// ============================================================================
// Effective Configuration
// ============================================================================

/// Effective server configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub address: String,
    pub port: u16,
    pub unix_socket: Option<PathBuf>,
    pub max_clients: usize,
    /// Silent clients are disconnected after this long
    pub max_idle_time: Duration,
    pub max_request_size: usize,
    pub max_response_size: usize,
    /// Upper bound for any TTL, in seconds
    pub max_item_ttl: i64,
    pub max_memory: u64,
    pub max_key_size: usize,
    pub max_value_size: usize,
    pub compression_threshold: usize,
    /// Clock refresh and shutdown check
    pub cron_period: Duration,
    pub expiry_period: Duration,
    pub memory_sweep_period: Duration,
    /// Items idle this long may be evicted under memory pressure
    pub gc_ratio: Duration,
    pub stats_period: Duration,
    pub log_level: String,
    pub log_file: Option<PathBuf>,
    pub pid_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        let storage = StorageConfig::default();
        let limits = Limits::default();

        Self {
            address: crate::DEFAULT_ADDRESS.to_string(),
            port: crate::DEFAULT_PORT,
            unix_socket: None,
            max_clients: 1024,
            max_idle_time: Duration::from_secs(1),
            max_request_size: 4 * 1024 * 1024,
            max_response_size: 4 * 1024 * 1024,
            max_item_ttl: storage.max_item_ttl,
            max_memory: storage.max_memory,
            max_key_size: limits.max_key_size,
            max_value_size: limits.max_value_size,
            compression_threshold: storage.compression_threshold,
            cron_period: Duration::from_millis(100),
            expiry_period: Duration::from_secs(15),
            memory_sweep_period: Duration::from_secs(5),
            gc_ratio: Duration::from_secs(storage.gc_ratio as u64),
            stats_period: Duration::from_secs(15),
            log_level: "info".to_string(),
            log_file: None,
            pid_file: None,
        }
    }
}

impl Config {
    /// Builds the configuration from parsed command-line arguments.
    pub fn from_cli(cli: &Cli) -> Result<Self, ConfigError> {
        let mut source = match &cli.config {
            Some(path) => ConfigSource::from_file(path)?,
            None => ConfigSource::new(),
        };
        for pair in &cli.overrides {
            source.set_override(pair)?;
        }
        if let Some(address) = &cli.address {
            source.set("address", address.clone());
        }
        if let Some(port) = cli.port {
            source.set("port", port.to_string());
        }
        if let Some(path) = &cli.unix_socket {
            source.set("unix_socket", path.display().to_string());
        }
        if let Some(level) = &cli.log_level {
            source.set("log_level", level.clone());
        }

        Self::from_source(&source)
    }

    /// Applies a config source over the defaults.
    pub fn from_source(source: &ConfigSource) -> Result<Self, ConfigError> {
        let mut config = Config::default();

        if let Some(address) = source.read_string("address") {
            config.address = address.to_string();
        }
        if let Some(port) = source.read_int("port")? {
            config.port = u16::try_from(port).map_err(|_| invalid("port", port, "a port number"))?;
        }
        config.unix_socket = source.read_string("unix_socket").map(PathBuf::from);
        if let Some(n) = source.read_int("max_clients")? {
            config.max_clients = usize::try_from(n)
                .ok()
                .filter(|&n| n > 0)
                .ok_or_else(|| invalid("max_clients", n, "a positive integer"))?;
        }
        if let Some(d) = source.read_duration("max_idletime")? {
            config.max_idle_time = d;
        }
        if let Some(n) = source.read_size("max_request_size")? {
            config.max_request_size = n as usize;
        }
        if let Some(n) = source.read_size("max_response_size")? {
            config.max_response_size = n as usize;
        }
        if let Some(d) = source.read_duration("max_item_ttl")? {
            config.max_item_ttl = d.as_secs() as i64;
        }
        if let Some(n) = source.read_size("max_memory")? {
            config.max_memory = n;
        }
        if let Some(n) = source.read_size("max_key_size")? {
            config.max_key_size = n as usize;
        }
        if let Some(n) = source.read_size("max_value_size")? {
            config.max_value_size = n as usize;
        }
        if let Some(n) = source.read_size("compression")? {
            config.compression_threshold = n as usize;
        }
        if let Some(d) = source.read_duration("cron_period")? {
            config.cron_period = d;
        }
        if let Some(d) = source.read_duration("expiry_period")? {
            config.expiry_period = d;
        }
        if let Some(d) = source.read_duration("memory_sweep_period")? {
            config.memory_sweep_period = d;
        }
        if let Some(d) = source.read_duration("gc_ratio")? {
            config.gc_ratio = d;
        }
        if let Some(d) = source.read_duration("stats_period")? {
            config.stats_period = d;
        }
        if let Some(level) = source.read_string("log_level") {
            config.log_level = level.to_string();
        }
        config.log_file = source.read_string("log_file").map(PathBuf::from);
        config.pid_file = source.read_string("pid_file").map(PathBuf::from);

        Ok(config)
    }

    /// The TCP bind address as `host:port`.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }

    pub fn storage_config(&self) -> StorageConfig {
        StorageConfig {
            max_memory: self.max_memory,
            max_item_ttl: self.max_item_ttl,
            compression_threshold: self.compression_threshold,
            gc_ratio: self.gc_ratio.as_secs() as i64,
        }
    }

    pub fn limits(&self) -> Limits {
        Limits {
            max_key_size: self.max_key_size,
            max_value_size: self.max_value_size,
        }
    }
}

fn invalid(key: &str, value: i64, expected: &'static str) -> ConfigError {
    ConfigError::Invalid {
        key: key.to_string(),
        value: value.to_string(),
        expected,
    }
}
