//! Server configuration
//!
//! Supports both programmatic and TOML file configuration. Every field has a
//! default, so an empty file is a valid configuration.

use oscroute_core::{DEFAULT_OSC_PORT, MAX_DATAGRAM_SIZE};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// OSC server configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Local host to bind (e.g. "127.0.0.1", "0.0.0.0")
    #[serde(default = "default_host")]
    pub host: String,

    /// Local UDP port; 0 picks an ephemeral port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Number of handler worker threads
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Jobs that may wait for a worker before new messages are dropped
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// How long shutdown waits for in-flight handlers (milliseconds)
    #[serde(default = "default_drain_grace_ms")]
    pub drain_grace_ms: u64,

    /// SO_RCVBUF size; the OS default is kept when unset
    #[serde(default)]
    pub recv_buffer_size: Option<usize>,

    /// Largest datagram accepted; larger ones are dropped
    #[serde(default = "default_max_packet_size")]
    pub max_packet_size: usize,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    DEFAULT_OSC_PORT
}

fn default_workers() -> usize {
    4
}

fn default_queue_capacity() -> usize {
    1024
}

fn default_drain_grace_ms() -> u64 {
    500
}

fn default_max_packet_size() -> usize {
    MAX_DATAGRAM_SIZE
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            workers: default_workers(),
            queue_capacity: default_queue_capacity(),
            drain_grace_ms: default_drain_grace_ms(),
            recv_buffer_size: None,
            max_packet_size: default_max_packet_size(),
        }
    }
}

impl ServerConfig {
    /// Configuration bound to `host:port`, defaults elsewhere
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Default::default()
        }
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.is_empty() {
            return Err(ConfigError::Invalid("host must not be empty".into()));
        }
        if self.workers == 0 {
            return Err(ConfigError::Invalid("workers must be at least 1".into()));
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "queue_capacity must be at least 1".into(),
            ));
        }
        if self.max_packet_size < 4 || self.max_packet_size > u16::MAX as usize {
            return Err(ConfigError::Invalid(format!(
                "max_packet_size must be between 4 and {}, got {}",
                u16::MAX,
                self.max_packet_size
            )));
        }
        Ok(())
    }

    /// "host:port" string for binding
    pub fn bind_addr(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            // Bare IPv6 literal
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    pub fn drain_grace(&self) -> Duration {
        Duration::from_millis(self.drain_grace_ms)
    }
}
