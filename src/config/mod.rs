/// Configuration management for portico

use crate::error::ConfigError;
use crate::proto::Protocol;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Main portico configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Backend cluster configuration
    pub backend: BackendConfig,
    /// Socket timeouts
    pub timeouts: TimeoutConfig,
    /// Health check configuration
    pub health: HealthConfig,
    /// Reader buffer sizing
    pub buffer: BufferConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Backend cluster configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Cluster name, reported in connection errors
    pub cluster: String,
    /// Wire protocol spoken by every node of the cluster
    pub protocol: Protocol,
    /// Node addresses as host:port
    pub nodes: Vec<String>,
}

/// Socket timeouts in milliseconds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    pub dial_ms: u64,
    /// 0 disables the read deadline
    pub read_ms: u64,
    /// 0 disables the write deadline
    pub write_ms: u64,
}

/// Health check configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    /// Health check interval in seconds
    pub interval_sec: u64,
    /// Health check timeout in seconds
    pub timeout_sec: u64,
    /// Number of consecutive failures before marking unhealthy
    pub failure_threshold: u32,
    /// Number of consecutive successes before marking healthy
    pub success_threshold: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferConfig {
    /// Initial reader arena size in bytes
    pub read_buffer_size: usize,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (error, warn, info, debug, trace)
    pub level: String,
    /// Log format (json, text)
    pub format: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend: BackendConfig {
                cluster: "default".to_string(),
                protocol: Protocol::MemcacheBinary,
                nodes: vec!["127.0.0.1:11211".to_string()],
            },
            timeouts: TimeoutConfig {
                dial_ms: 1000,
                read_ms: 1000,
                write_ms: 1000,
            },
            health: HealthConfig {
                interval_sec: 10,
                timeout_sec: 5,
                failure_threshold: 3,
                success_threshold: 2,
            },
            buffer: BufferConfig {
                read_buffer_size: crate::core::bufio::DEFAULT_BUFFER_SIZE,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "text".to_string(),
            },
        }
    }
}

impl TimeoutConfig {
    pub fn dial(&self) -> Duration {
        Duration::from_millis(self.dial_ms)
    }

    pub fn read(&self) -> Duration {
        Duration::from_millis(self.read_ms)
    }

    pub fn write(&self) -> Duration {
        Duration::from_millis(self.write_ms)
    }
}

impl HealthConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_sec)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_sec)
    }
}

impl Config {
    /// Load configuration from TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        fs::write(path, content)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        // Validate backend config
        if self.backend.cluster.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "backend cluster name cannot be empty".to_string(),
            ));
        }

        if self.backend.nodes.is_empty() {
            return Err(ConfigError::ValidationError(
                "backend nodes cannot be empty".to_string(),
            ));
        }

        for node in &self.backend.nodes {
            node.parse::<std::net::SocketAddr>()
                .map_err(|_| ConfigError::ValidationError(
                    format!("Invalid backend node: {}", node)
                ))?;
        }

        // Validate timeouts
        if self.timeouts.dial_ms == 0 {
            return Err(ConfigError::ValidationError(
                "dial_ms must be greater than 0".to_string(),
            ));
        }

        // Validate health config
        if self.health.interval_sec == 0 {
            return Err(ConfigError::ValidationError(
                "health check interval_sec must be greater than 0".to_string(),
            ));
        }

        if self.health.timeout_sec == 0 {
            return Err(ConfigError::ValidationError(
                "health check timeout_sec must be greater than 0".to_string(),
            ));
        }

        if self.health.timeout_sec >= self.health.interval_sec {
            return Err(ConfigError::ValidationError(
                "health check timeout_sec must be less than interval_sec".to_string(),
            ));
        }

        if self.health.failure_threshold == 0 || self.health.success_threshold == 0 {
            return Err(ConfigError::ValidationError(
                "health check thresholds must be greater than 0".to_string(),
            ));
        }

        if self.buffer.read_buffer_size == 0 {
            return Err(ConfigError::ValidationError(
                "read_buffer_size must be greater than 0".to_string(),
            ));
        }

        // Validate logging config
        match self.logging.level.as_str() {
            "error" | "warn" | "info" | "debug" | "trace" => {}
            _ => return Err(ConfigError::ValidationError(
                format!("Invalid log level: {}", self.logging.level)
            )),
        }

        match self.logging.format.as_str() {
            "json" | "text" => {}
            _ => return Err(ConfigError::ValidationError(
                format!("Invalid log format: {}", self.logging.format)
            )),
        }

        Ok(())
    }

    /// Create example configuration file
    pub fn create_example_config<P: AsRef<Path>>(path: P, protocol: &str) -> Result<(), ConfigError> {
        let config = match protocol {
            "memcache_binary" | "memcache" => Config {
                backend: BackendConfig {
                    cluster: "sessions".to_string(),
                    protocol: Protocol::MemcacheBinary,
                    nodes: vec![
                        "10.0.1.10:11211".to_string(),
                        "10.0.1.11:11211".to_string(),
                        "10.0.1.12:11211".to_string(),
                    ],
                },
                ..Default::default()
            },
            "redis" => Config {
                backend: BackendConfig {
                    cluster: "cache".to_string(),
                    protocol: Protocol::Redis,
                    nodes: vec![
                        "10.0.1.20:6379".to_string(),
                        "10.0.1.21:6379".to_string(),
                        "10.0.1.22:6379".to_string(),
                    ],
                },
                ..Default::default()
            },
            _ => return Err(ConfigError::ValidationError(
                "Protocol must be 'memcache_binary' or 'redis'".to_string(),
            )),
        };

        config.save_to_file(path)
    }
}
