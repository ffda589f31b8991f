//! Server configuration

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use services_logger::LogLevel;

/// POSIX server configuration
///
/// Every field has a default, so a JSON file only needs the keys it changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Dispatcher threads receiving from the server port
    pub workers: usize,
    /// Ring buffer size of buffered pipes, in bytes
    pub pipe_capacity: usize,
    /// Maximum number of live resources
    pub max_resources: usize,
    /// Messages the server port queues before senders block
    pub port_capacity: usize,
    /// Minimum level of retained log entries
    pub log_level: LogLevel,
    /// Echo log entries to stderr
    pub log_to_stderr: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            pipe_capacity: 4096,
            max_resources: 65536,
            port_capacity: 256,
            log_level: LogLevel::Info,
            log_to_stderr: false,
        }
    }
}

impl ServerConfig {
    /// Parses a JSON configuration and validates it
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: ServerConfig =
            serde_json::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::ZeroWorkers);
        }
        if self.pipe_capacity == 0 {
            return Err(ConfigError::ZeroPipeCapacity);
        }
        if self.max_resources == 0 {
            return Err(ConfigError::ZeroResourceLimit);
        }
        if self.port_capacity == 0 {
            return Err(ConfigError::ZeroPortCapacity);
        }
        Ok(())
    }
}
