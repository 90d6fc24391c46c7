//! # Configuration Management
//!
//! Centralized configuration for registries (server role) and peers (client role).
//!
//! ## Configuration Sources
//! - TOML files via `from_file()` / `from_toml()`
//! - Direct instantiation with defaults
//! - Environment overrides via `from_env()` (`REMOTE_LINK_*` variables)
//!
//! ## Limits
//! - Frames above `max_frame_size` are rejected before their payload is buffered
//! - Raw-mode reads are capped at `raw_chunk_size`, itself capped at 64 MiB

use crate::core::frame::MAX_PAYLOAD_LEN;
use crate::core::serialization::SerializationFormat;
use crate::error::{ProtocolError, Result};
use crate::utils::timeout;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Duration;
use tracing::Level;

/// Default listen/connect port
pub const DEFAULT_PORT: u16 = 888;

/// Default largest payload accepted in a single frame (30 MiB)
pub const MAX_FRAME_SIZE: usize = 30 * 1024 * 1024;

/// Default raw-mode read chunk (30 MiB)
pub const RAW_CHUNK_SIZE: usize = 30 * 1024 * 1024;

/// Ceiling for the raw-mode read chunk (64 MiB)
pub const RAW_CHUNK_CEILING: usize = 64 * 1024 * 1024;

/// Main configuration structure that contains all configurable settings
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct NetworkConfig {
    /// Registry (server role) configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Peer (client role) configuration
    #[serde(default)]
    pub client: ClientConfig,

    /// Framing configuration shared by both roles
    #[serde(default)]
    pub transport: TransportConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl NetworkConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = File::open(path)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to open config file: {e}")))?;

        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to read config file: {e}")))?;

        Self::from_toml(&contents)
    }

    /// Load configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to parse TOML: {e}")))
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(port) = std::env::var("REMOTE_LINK_PORT") {
            let port = port.parse::<u16>().map_err(|e| {
                ProtocolError::ConfigError(format!("Invalid REMOTE_LINK_PORT '{port}': {e}"))
            })?;
            config.server.port = port;
            config.client.port = port;
        }

        if let Ok(addr) = std::env::var("REMOTE_LINK_BIND_ADDRESS") {
            config.server.bind_address = addr;
        }

        if let Ok(addr) = std::env::var("REMOTE_LINK_SERVER_ADDRESS") {
            config.client.address = addr;
        }

        if let Ok(timeout) = std::env::var("REMOTE_LINK_CONNECT_ATTEMPT_TIMEOUT_MS") {
            if let Ok(val) = timeout.parse::<u64>() {
                config.client.connect_attempt_timeout = Duration::from_millis(val);
            }
        }

        if let Ok(timeout) = std::env::var("REMOTE_LINK_WRITE_TIMEOUT_MS") {
            if let Ok(val) = timeout.parse::<u64>() {
                config.client.write_timeout = Duration::from_millis(val);
            }
        }

        if let Ok(size) = std::env::var("REMOTE_LINK_RAW_CHUNK_SIZE") {
            if let Ok(val) = size.parse::<usize>() {
                config.transport.raw_chunk_size = val;
            }
        }

        Ok(config)
    }

    /// Apply overrides to the default configuration
    pub fn default_with_overrides<F>(mutator: F) -> Self
    where
        F: FnOnce(&mut Self),
    {
        let mut config = Self::default();
        mutator(&mut config);
        config
    }

    /// Generate example configuration file content
    pub fn example_config() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|_| String::from("# Failed to generate example config"))
    }

    /// Save configuration to a file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path, content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to write config file: {e}")))?;

        Ok(())
    }

    /// Validate the configuration for common issues and misconfigurations
    ///
    /// Returns a list of validation errors. Empty list means configuration is valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        errors.extend(self.server.validate());
        errors.extend(self.client.validate());
        errors.extend(self.transport.validate());
        errors.extend(self.logging.validate());
        errors
    }

    /// Validate and return Result - convenience method
    pub fn validate_strict(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ProtocolError::ConfigError(format!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}

/// Registry (server role) configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Interface to bind (e.g., "0.0.0.0")
    pub bind_address: String,

    /// Listen port; 0 picks an ephemeral port
    pub port: u16,

    /// Pause after a failed accept before trying again
    #[serde(with = "duration_serde")]
    pub accept_backoff: Duration,

    /// Consecutive accept failures tolerated before the listener is reported dead
    pub max_accept_failures: u32,

    /// Bound on delivering the exit notice during dispose
    #[serde(with = "duration_serde")]
    pub shutdown_notify_timeout: Duration,

    /// Bound on each write to a client
    #[serde(with = "duration_serde")]
    pub write_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: String::from("0.0.0.0"),
            port: DEFAULT_PORT,
            accept_backoff: timeout::ACCEPT_BACKOFF,
            max_accept_failures: 16,
            shutdown_notify_timeout: timeout::SHUTDOWN_NOTIFY_TIMEOUT,
            write_timeout: timeout::WRITE_TIMEOUT,
        }
    }
}

impl ServerConfig {
    /// Validate server configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.bind_address.is_empty() {
            errors.push("Server bind address cannot be empty".to_string());
        } else if self.bind_address.parse::<std::net::IpAddr>().is_err() {
            errors.push(format!(
                "Invalid server bind address: '{}' (expected an IP such as '0.0.0.0')",
                self.bind_address
            ));
        }

        if self.accept_backoff.as_millis() < 10 {
            errors.push("Accept backoff too short (minimum: 10ms)".to_string());
        } else if self.accept_backoff.as_secs() > 30 {
            errors.push("Accept backoff too long (maximum: 30s)".to_string());
        }

        if self.max_accept_failures == 0 {
            errors.push("Max accept failures must be greater than 0".to_string());
        }

        if self.shutdown_notify_timeout.as_millis() < 10 {
            errors.push("Shutdown notify timeout too short (minimum: 10ms)".to_string());
        } else if self.shutdown_notify_timeout.as_secs() > 60 {
            errors.push("Shutdown notify timeout too long (maximum: 60s)".to_string());
        }

        if self.write_timeout.as_millis() < 10 {
            errors.push("Write timeout too short (minimum: 10ms)".to_string());
        }

        errors
    }
}

/// Peer (client role) configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClientConfig {
    /// Server host name or IP
    pub address: String,

    /// Server port
    pub port: u16,

    /// Bound on each connect attempt while waiting for a server
    #[serde(with = "duration_serde")]
    pub connect_attempt_timeout: Duration,

    /// Pause between connect attempts
    #[serde(with = "duration_serde")]
    pub retry_delay: Duration,

    /// Bound on each write to the server
    #[serde(with = "duration_serde")]
    pub write_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            address: String::from("localhost"),
            port: DEFAULT_PORT,
            connect_attempt_timeout: timeout::CONNECT_ATTEMPT_TIMEOUT,
            retry_delay: timeout::RETRY_DELAY,
            write_timeout: timeout::WRITE_TIMEOUT,
        }
    }
}

impl ClientConfig {
    /// Validate client configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.address.is_empty() {
            errors.push("Client address cannot be empty".to_string());
        }

        if self.port == 0 {
            errors.push("Client port must be greater than 0".to_string());
        }

        if self.connect_attempt_timeout.as_millis() < 10 {
            errors.push("Connect attempt timeout too short (minimum: 10ms)".to_string());
        } else if self.connect_attempt_timeout.as_secs() > 60 {
            errors.push("Connect attempt timeout too long (maximum: 60s)".to_string());
        }

        if self.retry_delay.as_millis() < 10 {
            errors.push("Retry delay too short (minimum: 10ms)".to_string());
        } else if self.retry_delay.as_secs() > 60 {
            errors.push("Retry delay too long (maximum: 60s)".to_string());
        }

        if self.write_timeout.as_millis() < 10 {
            errors.push("Write timeout too short (minimum: 10ms)".to_string());
        }

        errors
    }
}

/// Framing configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TransportConfig {
    /// Largest payload accepted in a single frame
    pub max_frame_size: usize,

    /// Largest chunk handed out by a single raw-mode read
    pub raw_chunk_size: usize,

    /// Whether new connections start in raw mode
    #[serde(default)]
    pub raw_mode: bool,

    /// Format used by `SerdeCodec` instances built from this config
    #[serde(default)]
    pub serialization_format: SerializationFormat,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_frame_size: MAX_FRAME_SIZE,
            raw_chunk_size: RAW_CHUNK_SIZE,
            raw_mode: false,
            serialization_format: SerializationFormat::default(),
        }
    }
}

impl TransportConfig {
    /// Validate transport configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.max_frame_size == 0 {
            errors.push("Max frame size cannot be 0".to_string());
        } else if self.max_frame_size > MAX_PAYLOAD_LEN {
            errors.push(format!(
                "Max frame size too large: {} bytes (length field is 32 bits)",
                self.max_frame_size
            ));
        }

        if self.raw_chunk_size == 0 {
            errors.push("Raw chunk size cannot be 0".to_string());
        } else if self.raw_chunk_size > RAW_CHUNK_CEILING {
            errors.push(format!(
                "Raw chunk size too large: {} bytes (maximum: {} bytes)",
                self.raw_chunk_size, RAW_CHUNK_CEILING
            ));
        }

        errors
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Application name for logs
    pub app_name: String,

    /// Log level
    #[serde(with = "log_level_serde")]
    pub log_level: Level,

    /// Whether to use JSON formatting for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            app_name: String::from("remote-link"),
            log_level: Level::INFO,
            json_format: false,
        }
    }
}

impl LoggingConfig {
    /// Validate logging configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.app_name.is_empty() {
            errors.push("Application name cannot be empty".to_string());
        } else if self.app_name.len() > 64 {
            errors.push(format!(
                "Application name too long: {} characters (maximum: 64)",
                self.app_name.len()
            ));
        }

        errors
    }
}

/// Helper module for Duration serialization/deserialization
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = duration.as_millis() as u64;
        millis.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// Helper module for tracing::Level serialization/deserialization
mod log_level_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::str::FromStr;
    use tracing::Level;

    pub fn serialize<S>(level: &Level, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let level_str = match *level {
            Level::TRACE => "trace",
            Level::DEBUG => "debug",
            Level::INFO => "info",
            Level::WARN => "warn",
            Level::ERROR => "error",
        };
        level_str.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Level, D::Error>
    where
        D: Deserializer<'de>,
    {
        let level_str = String::deserialize(deserializer)?;
        Level::from_str(&level_str)
            .map_err(|_| serde::de::Error::custom(format!("Invalid log level: {level_str}")))
    }
}
