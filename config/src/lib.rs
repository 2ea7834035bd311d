// Coordinator configuration
// CLI args and the runtime configuration derived from them.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid --levels entry {0:?}: expected L:D with L > 0")]
    BadLevelSpec(String),

    #[error("--levels must name at least one level")]
    NoLevels,

    #[error("level {0} is repeated in --levels")]
    DuplicateLevel(u32),

    #[error("invalid distributer address {addr}:{port}: {source}")]
    BadDistributerAddr {
        addr: String,
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid data server address {addr}:{port}: {source}")]
    BadDataServerAddr {
        addr: String,
        port: u16,
        #[source]
        source: std::io::Error,
    },
}

/// One `L:D` entry from `--levels`: a level this coordinator owns and the
/// `maxDepth` advertised to workers for it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LevelSpec {
    pub level: u32,
    pub max_depth: u32,
}

fn parse_levels(raw: &str) -> Result<Vec<LevelSpec>, ConfigError> {
    raw.split(',')
        .map(|entry| {
            let (level_str, depth_str) = entry
                .split_once(':')
                .ok_or_else(|| ConfigError::BadLevelSpec(entry.to_string()))?;
            let level: u32 = level_str
                .parse()
                .map_err(|_| ConfigError::BadLevelSpec(entry.to_string()))?;
            let max_depth: u32 = depth_str
                .parse()
                .map_err(|_| ConfigError::BadLevelSpec(entry.to_string()))?;
            if level == 0 {
                return Err(ConfigError::BadLevelSpec(entry.to_string()));
            }
            Ok(LevelSpec { level, max_depth })
        })
        .collect()
}

/// Coordinator configuration, parsed from the command line.
#[derive(Parser, Debug)]
#[command(name = "tilecoord", about = "Distributed Mandelbrot tile computation coordinator", long_about = None)]
pub struct CoordinatorConfig {
    /// Owned levels and their maxDepth, e.g. "2:100,4:200"
    #[arg(short = 'l', long = "levels", value_parser = parse_levels)]
    pub levels: Vec<LevelSpec>,

    /// Enable the per-read socket timeout
    #[arg(short = 't', long = "timeout", default_value_t = true)]
    pub timeout: bool,

    /// Dispatcher (worker-facing) listen address
    #[arg(long = "distributer-addr", default_value = "0.0.0.0")]
    pub distributer_addr: String,

    /// Dispatcher (worker-facing) listen port
    #[arg(long = "distributer-port", default_value_t = 59010)]
    pub distributer_port: u16,

    /// TileServer (client-facing) listen address
    #[arg(long = "data-server-addr", default_value = "0.0.0.0")]
    pub data_server_addr: String,

    /// TileServer (client-facing) listen port
    #[arg(long = "data-server-port", default_value_t = 59011)]
    pub data_server_port: u16,

    /// Log info-level Dispatcher events
    #[arg(long = "distributer-log-info", default_value_t = true)]
    pub distributer_log_info: bool,

    /// Log error-level Dispatcher events
    #[arg(long = "distributer-log-error", default_value_t = true)]
    pub distributer_log_error: bool,

    /// Log info-level TileServer events
    #[arg(long = "data-server-log-info", default_value_t = true)]
    pub data_server_log_info: bool,

    /// Log error-level TileServer events
    #[arg(long = "data-server-log-error", default_value_t = true)]
    pub data_server_log_error: bool,

    /// Parent directory of DATA_DIR
    #[arg(short = 'o', long = "data-directory", default_value = ".")]
    pub data_directory: PathBuf,
}

impl CoordinatorConfig {
    pub fn parse_args() -> Self {
        CoordinatorConfig::parse()
    }

    /// Reject configurations that are syntactically valid but semantically
    /// broken: no owned levels, or the same level named twice.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.levels.is_empty() {
            return Err(ConfigError::NoLevels);
        }
        let mut seen = HashSet::new();
        for spec in &self.levels {
            if !seen.insert(spec.level) {
                return Err(ConfigError::DuplicateLevel(spec.level));
            }
        }
        Ok(())
    }

    pub fn distributer_socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        format!("{}:{}", self.distributer_addr, self.distributer_port)
            .parse()
            .map_err(|e| ConfigError::BadDistributerAddr {
                addr: self.distributer_addr.clone(),
                port: self.distributer_port,
                source: std::io::Error::new(std::io::ErrorKind::InvalidInput, e),
            })
    }

    pub fn data_server_socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        format!("{}:{}", self.data_server_addr, self.data_server_port)
            .parse()
            .map_err(|e| ConfigError::BadDataServerAddr {
                addr: self.data_server_addr.clone(),
                port: self.data_server_port,
                source: std::io::Error::new(std::io::ErrorKind::InvalidInput, e),
            })
    }

    /// `DATA_DIR`, rooted under the configured parent.
    pub fn data_dir(&self) -> PathBuf {
        self.data_directory.join("tiles")
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        self.timeout
            .then_some(Duration::from_millis(tilecoord_core::DEFAULT_READ_TIMEOUT_MS))
    }
}
