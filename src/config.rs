//! Ring client configuration

use serde::{Deserialize, Serialize};

use crate::constants::{MAX_BLOCK_SIZE, MAX_RING_DEPTH};

/// Default configuration constants
///
/// Sizes match the usual USRBIO client setup: one 16MB block per segment
/// and a ring that holds a single outstanding operation.
pub mod defaults {
    /// Bytes per ring entry: 16MB
    pub const BLOCK_SIZE: usize = 1 << 24;

    /// Entries per segment
    pub const ENTRIES: usize = 1;

    /// Ring depth passed to the ring factory
    pub const RING_DEPTH: u32 = 1;

    /// Default log level
    pub const fn default_log_level() -> &'static str {
        "info"
    }
}

/// Ring client configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Bytes per ring entry (default: 16MB)
    #[serde(default = "default_block_size")]
    pub block_size: usize,

    /// Entries per segment; `chunk_capacity = block_size * entries`
    #[serde(default = "default_entries")]
    pub entries: usize,

    /// Ring depth (power of 2)
    #[serde(default = "default_ring_depth")]
    pub ring_depth: u32,

    /// Filesystem types considered during mount resolution (empty = any)
    #[serde(default)]
    pub mount_fs_types: Vec<String>,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_block_size() -> usize {
    defaults::BLOCK_SIZE
}

fn default_entries() -> usize {
    defaults::ENTRIES
}

fn default_ring_depth() -> u32 {
    defaults::RING_DEPTH
}

fn default_log_level() -> String {
    defaults::default_log_level().to_string()
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            block_size: default_block_size(),
            entries: default_entries(),
            ring_depth: default_ring_depth(),
            mount_fs_types: Vec::new(),
            log_level: default_log_level(),
        }
    }
}

impl ClientConfig {
    /// Configuration with a given chunk capacity and one entry per segment
    pub fn with_chunk_capacity(chunk_capacity: usize) -> Self {
        Self {
            block_size: chunk_capacity,
            entries: 1,
            ..Self::default()
        }
    }

    /// Bytes moved by at most one ring operation
    pub fn chunk_capacity(&self) -> usize {
        self.block_size.saturating_mul(self.entries)
    }

    /// Load configuration from TOML file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadError(format!("Failed to read config file: {}", e)))?;

        let config: ClientConfig = toml::from_str(&contents)
            .map_err(|e| ConfigError::ParseError(format!("Failed to parse config: {}", e)))?;

        config.validate()?;

        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn to_file(&self, path: &str) -> Result<(), ConfigError> {
        let contents = toml::to_string_pretty(self).map_err(|e| {
            ConfigError::SerializeError(format!("Failed to serialize config: {}", e))
        })?;

        std::fs::write(path, contents)
            .map_err(|e| ConfigError::WriteError(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.block_size == 0 || self.block_size > MAX_BLOCK_SIZE {
            return Err(ConfigError::ValidationError(format!(
                "Block size must be between 1 and {} bytes",
                MAX_BLOCK_SIZE
            )));
        }

        if self.entries == 0 {
            return Err(ConfigError::ValidationError(
                "Entries must be at least 1".to_string(),
            ));
        }

        if self
            .block_size
            .checked_mul(self.entries)
            .map_or(true, |cap| cap > MAX_BLOCK_SIZE)
        {
            return Err(ConfigError::ValidationError(format!(
                "Chunk capacity (block_size * entries) must not exceed {} bytes",
                MAX_BLOCK_SIZE
            )));
        }

        if self.ring_depth == 0
            || !self.ring_depth.is_power_of_two()
            || self.ring_depth > MAX_RING_DEPTH
        {
            return Err(ConfigError::ValidationError(format!(
                "Ring depth must be a power of 2 between 1 and {}",
                MAX_RING_DEPTH
            )));
        }

        match self.log_level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid log level: {}",
                    self.log_level
                )));
            }
        }

        Ok(())
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    ReadError(String),

    #[error("Failed to parse config: {0}")]
    ParseError(String),

    #[error("Failed to serialize config: {0}")]
    SerializeError(String),

    #[error("Failed to write config: {0}")]
    WriteError(String),

    #[error("Configuration validation error: {0}")]
    ValidationError(String),
}
