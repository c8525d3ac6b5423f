//! # Configuration Management
//!
//! Centralized configuration for the BTP server plugin.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()`
//! - TOML strings via `from_toml()`
//! - Environment variables via `from_env()`
//! - Direct instantiation with defaults
//!
//! ## Environment Variables
//! - `BTP_PLUGIN_SERVER_ADDRESS`
//! - `BTP_PLUGIN_ILP_ADDRESS`
//! - `BTP_PLUGIN_CALL_TIMEOUT_MS`
//! - `BTP_PLUGIN_AUTH_TIMEOUT_MS`
//! - `BTP_PLUGIN_MAX_CONNECTIONS`
//!
//! Durations are written as milliseconds and the log level as a lowercase string.

use crate::core::packet::is_valid_address;
use crate::error::{PluginError, Result};
use crate::utils::timeout;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Duration;
use tracing::Level;

/// Main plugin configuration structure
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct PluginConfig {
    /// Listener configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Node identity and outbound call settings
    #[serde(default)]
    pub node: NodeConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl PluginConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = File::open(path)
            .map_err(|e| PluginError::ConfigError(format!("Failed to open config file: {e}")))?;

        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(|e| PluginError::ConfigError(format!("Failed to read config file: {e}")))?;

        Self::from_toml(&contents)
    }

    /// Load configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| PluginError::ConfigError(format!("Failed to parse TOML: {e}")))
    }

    /// Load configuration from environment variables on top of the defaults
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("BTP_PLUGIN_SERVER_ADDRESS") {
            config.server.address = addr;
        }

        if let Ok(address) = std::env::var("BTP_PLUGIN_ILP_ADDRESS") {
            config.node.ilp_address = address;
        }

        if let Ok(timeout) = std::env::var("BTP_PLUGIN_CALL_TIMEOUT_MS") {
            let val = timeout.parse::<u64>().map_err(|e| {
                PluginError::ConfigError(format!("Invalid BTP_PLUGIN_CALL_TIMEOUT_MS: {e}"))
            })?;
            config.node.call_timeout = Duration::from_millis(val);
        }

        if let Ok(timeout) = std::env::var("BTP_PLUGIN_AUTH_TIMEOUT_MS") {
            let val = timeout.parse::<u64>().map_err(|e| {
                PluginError::ConfigError(format!("Invalid BTP_PLUGIN_AUTH_TIMEOUT_MS: {e}"))
            })?;
            config.server.auth_timeout = Duration::from_millis(val);
        }

        if let Ok(max) = std::env::var("BTP_PLUGIN_MAX_CONNECTIONS") {
            let val = max.parse::<usize>().map_err(|e| {
                PluginError::ConfigError(format!("Invalid BTP_PLUGIN_MAX_CONNECTIONS: {e}"))
            })?;
            config.server.max_connections = val;
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
            .map_err(|e| PluginError::ConfigError(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path, content)
            .map_err(|e| PluginError::ConfigError(format!("Failed to write config file: {e}")))?;

        Ok(())
    }

    /// Validate the configuration for common issues and misconfigurations
    ///
    /// Returns a list of validation errors. Empty list means configuration is valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        errors.extend(self.server.validate());
        errors.extend(self.node.validate());
        errors.extend(self.logging.validate());
        errors
    }

    /// Validate and return Result - convenience method
    pub fn validate_strict(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(PluginError::ConfigError(format!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}

/// Listener configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// WebSocket listen address (e.g., "127.0.0.1:7768")
    pub address: String,

    /// Maximum number of frames queued for one connection's writer
    pub backpressure_limit: usize,

    /// Maximum number of concurrent connections
    pub max_connections: usize,

    /// Time a new connection has to authenticate
    #[serde(with = "duration_serde")]
    pub auth_timeout: Duration,

    /// Timeout for graceful server shutdown
    #[serde(with = "duration_serde")]
    pub shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: String::from("127.0.0.1:7768"),
            backpressure_limit: 64,
            max_connections: 1000,
            auth_timeout: timeout::AUTH_TIMEOUT,
            shutdown_timeout: timeout::SHUTDOWN_TIMEOUT,
        }
    }
}

impl ServerConfig {
    /// Validate server configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.address.is_empty() {
            errors.push("Server address cannot be empty".to_string());
        } else if self.address.parse::<std::net::SocketAddr>().is_err() {
            errors.push(format!(
                "Invalid server address format: '{}' (expected format: '0.0.0.0:7768')",
                self.address
            ));
        }

        if self.backpressure_limit == 0 {
            errors.push("Backpressure limit must be greater than 0".to_string());
        } else if self.backpressure_limit > 1_000_000 {
            errors.push(format!(
                "Backpressure limit too large: {} (max recommended: 1,000,000)",
                self.backpressure_limit
            ));
        }

        if self.max_connections == 0 {
            errors.push("Max connections must be greater than 0".to_string());
        } else if self.max_connections > 100_000 {
            errors.push(format!(
                "Max connections very high: {} (ensure system resources can support this)",
                self.max_connections
            ));
        }

        if self.auth_timeout.as_millis() < 100 {
            errors.push("Auth timeout too short (minimum: 100ms)".to_string());
        } else if self.auth_timeout.as_secs() > 300 {
            errors.push("Auth timeout too long (maximum: 300s)".to_string());
        }

        if self.shutdown_timeout.as_secs() < 1 {
            errors.push("Shutdown timeout too short (minimum: 1s)".to_string());
        } else if self.shutdown_timeout.as_secs() > 60 {
            errors.push("Shutdown timeout too long (maximum: 60s)".to_string());
        }

        errors
    }
}

/// Node identity and outbound call configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NodeConfig {
    /// This node's ILP address, reported as `triggeredBy` in local rejects
    pub ilp_address: String,

    /// How long an outbound call waits for the peer's response
    #[serde(with = "duration_serde")]
    pub call_timeout: Duration,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            ilp_address: String::from("test.btp-server"),
            call_timeout: timeout::CALL_TIMEOUT,
        }
    }
}

impl NodeConfig {
    /// Validate node configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.ilp_address.is_empty() {
            errors.push("ILP address cannot be empty".to_string());
        } else if !is_valid_address(&self.ilp_address) {
            errors.push(format!(
                "Invalid ILP address: '{}' (expected format: 'g.example.node')",
                self.ilp_address
            ));
        }

        if self.call_timeout.as_millis() < 10 {
            errors.push("Call timeout too short (minimum: 10ms)".to_string());
        } else if self.call_timeout.as_secs() > 600 {
            errors.push("Call timeout too long (maximum: 600s)".to_string());
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

    /// Whether to log to console
    pub log_to_console: bool,

    /// Whether to log to file
    pub log_to_file: bool,

    /// Path to log file (if log_to_file is true)
    pub log_file_path: Option<String>,

    /// Whether to use JSON formatting for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            app_name: String::from("btp-server"),
            log_level: Level::INFO,
            log_to_console: true,
            log_to_file: false,
            log_file_path: None,
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

        if self.log_to_file {
            if let Some(ref path) = self.log_file_path {
                if let Some(parent) = Path::new(path).parent() {
                    if !parent.as_os_str().is_empty() && !parent.exists() {
                        errors.push(format!(
                            "Log file directory does not exist: {}",
                            parent.display()
                        ));
                    }
                }
            } else {
                errors.push("log_file_path must be specified when log_to_file is true".to_string());
            }
        }

        if !self.log_to_console && !self.log_to_file {
            errors
                .push("At least one logging output (console or file) must be enabled".to_string());
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
        let millis = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
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

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(PluginConfig::default().validate().is_empty());
        assert!(PluginConfig::default().validate_strict().is_ok());
    }

    #[test]
    fn test_example_config_round_trips() {
        let text = PluginConfig::example_config();
        let parsed = PluginConfig::from_toml(&text).unwrap();
        assert_eq!(parsed.server.address, "127.0.0.1:7768");
        assert_eq!(parsed.node.call_timeout, timeout::CALL_TIMEOUT);
        assert_eq!(parsed.logging.log_level, Level::INFO);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = PluginConfig::from_toml(
            r#"
            [node]
            ilp_address = "g.alice"
            call_timeout = 1500
            "#,
        )
        .unwrap();
        assert_eq!(config.node.ilp_address, "g.alice");
        assert_eq!(config.node.call_timeout, Duration::from_millis(1500));
        assert_eq!(config.server.max_connections, 1000);
    }

    #[test]
    fn test_invalid_ilp_address_reported() {
        let config = PluginConfig::default_with_overrides(|c| {
            c.node.ilp_address = "nowhere".into();
        });
        let errors = config.validate();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("Invalid ILP address"));
        assert!(config.validate_strict().is_err());
    }
}
