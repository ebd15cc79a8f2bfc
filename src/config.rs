//! Configuration management for Voltbridge
//!
//! This module handles loading, validation, and management of the application
//! configuration from YAML files.

use crate::error::{Result, VoltbridgeError};
use serde::{Deserialize, Serialize};
use std::path::Path;

fn default_true() -> bool {
    true
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Controller (evcc) connection configuration
    pub controller: ControllerConfig,

    /// Update scheduling configuration
    pub updates: UpdatesConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Controller connection parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Hostname or IP address of the evcc controller
    pub address: String,

    /// TCP port of the controller API (typically 7070)
    pub port: u16,

    /// Optional API password; empty string disables authentication
    #[serde(default)]
    pub password: String,

    /// HTTP request timeout in seconds
    pub http_timeout_secs: u64,
}

/// Update scheduling parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdatesConfig {
    /// Whether to subscribe to the controller's WebSocket push API
    #[serde(default = "default_true")]
    pub streaming: bool,

    /// Polling interval in seconds when the stream is unavailable
    pub poll_interval_secs: u64,

    /// WebSocket handshake timeout in seconds
    pub connect_timeout_secs: u64,

    /// Stream connection attempts before falling back to polling
    pub stream_retry_limit: u32,

    /// Interval for proactively reopening the stream to bound staleness
    /// from silently dead connections
    pub forced_refresh_secs: u64,

    /// Minimum interval between accepted complete stream snapshots
    pub complete_throttle_secs: u64,

    /// Minimum dwell before folding accumulated partial updates
    pub partial_fold_secs: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    pub level: String,

    /// Path to log file or log directory
    pub file: String,

    /// Number of rotated files to keep
    pub backup_count: u32,

    /// Whether to log to console
    pub console_output: bool,

    /// Whether to use JSON format
    pub json_format: bool,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            address: "192.168.1.100".to_string(),
            port: 7070,
            password: String::new(),
            http_timeout_secs: 10,
        }
    }
}

impl Default for UpdatesConfig {
    fn default() -> Self {
        Self {
            streaming: true,
            poll_interval_secs: 60,
            connect_timeout_secs: 10,
            stream_retry_limit: 3,
            forced_refresh_secs: 60,
            complete_throttle_secs: 5,
            partial_fold_secs: 1,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "INFO".to_string(),
            file: "/tmp/voltbridge.log".to_string(),
            backup_count: 5,
            console_output: true,
            json_format: false,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            controller: ControllerConfig::default(),
            updates: UpdatesConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from default locations, falling back to defaults
    pub fn load() -> Result<Self> {
        let default_paths = [
            "voltbridge_config.yaml",
            "/data/voltbridge_config.yaml",
            "/etc/voltbridge/config.yaml",
        ];

        for path in &default_paths {
            if Path::new(path).exists() {
                return Self::from_file(path);
            }
        }

        Ok(Config::default())
    }

    /// Save configuration to a YAML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    /// Base URL of the controller REST API
    pub fn api_base_url(&self) -> String {
        format!(
            "http://{}:{}/api",
            self.controller.address, self.controller.port
        )
    }

    /// WebSocket URL of the controller push API
    pub fn ws_url(&self) -> String {
        format!("ws://{}:{}/ws", self.controller.address, self.controller.port)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.controller.address.is_empty() {
            return Err(VoltbridgeError::validation(
                "controller.address",
                "Address cannot be empty",
            ));
        }

        if self.controller.port == 0 {
            return Err(VoltbridgeError::validation(
                "controller.port",
                "Port must be greater than 0",
            ));
        }

        if self.controller.http_timeout_secs == 0 {
            return Err(VoltbridgeError::validation(
                "controller.http_timeout_secs",
                "HTTP timeout must be set; unbounded requests are a defect",
            ));
        }

        if self.updates.poll_interval_secs == 0 {
            return Err(VoltbridgeError::validation(
                "updates.poll_interval_secs",
                "Must be greater than 0",
            ));
        }

        if self.updates.connect_timeout_secs == 0 {
            return Err(VoltbridgeError::validation(
                "updates.connect_timeout_secs",
                "Must be greater than 0",
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.controller.port, 7070);
        assert_eq!(config.updates.poll_interval_secs, 60);
        assert!(config.updates.streaming);
        assert_eq!(config.updates.complete_throttle_secs, 5);
        assert_eq!(config.updates.partial_fold_secs, 1);
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        assert!(config.validate().is_ok());

        config.controller.address = String::new();
        assert!(config.validate().is_err());

        config = Config::default();
        config.controller.port = 0;
        assert!(config.validate().is_err());

        config = Config::default();
        config.controller.http_timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_api_urls() {
        let config = Config::default();
        assert_eq!(config.api_base_url(), "http://192.168.1.100:7070/api");
        assert_eq!(config.ws_url(), "ws://192.168.1.100:7070/ws");
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let yaml = serde_yaml::to_string(&config).unwrap();
        let deserialized: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(config.controller.port, deserialized.controller.port);
    }
}
