//! Configuration System
//!
//! Handles loading configuration from files and environment variables.
//! Supports TOML config files and environment variable overrides.

use crate::storage::{CodecKind, LayoutKind, ReadMode, StorageError, StorageResult};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub index: IndexConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Index engine configuration
#[derive(Debug, Clone, Deserialize)]
pub struct IndexConfig {
    /// Directory holding `<name>.acer` and `<schema>.row_data`
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    #[serde(default = "default_name")]
    pub name: String,

    /// Buffered events that trigger a flush
    #[serde(default = "default_capacity")]
    pub capacity: usize,

    /// Record store page size in bytes
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    #[serde(default)]
    pub layout: LayoutKind,

    #[serde(default)]
    pub codec: CodecKind,

    #[serde(default)]
    pub read_mode: ReadMode,

    /// Feed each predicate's answer into the next as context
    #[serde(default = "default_truncate")]
    pub truncate: bool,

    #[serde(default = "default_sample_capacity")]
    pub sample_capacity: usize,

    /// Fixed seed for reproducible sampling
    #[serde(default)]
    pub sample_seed: Option<u64>,
}

fn default_data_dir() -> String {
    dirs::data_local_dir()
        .map(|p| p.join("acer").to_string_lossy().to_string())
        .unwrap_or_else(|| "./acer_data".to_string())
}

fn default_name() -> String {
    "acer".to_string()
}

fn default_capacity() -> usize {
    64 * 1024
}

fn default_page_size() -> usize {
    8 * 1024 // 8 KB
}

fn default_truncate() -> bool {
    true
}

fn default_sample_capacity() -> usize {
    5000
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            name: default_name(),
            capacity: default_capacity(),
            page_size: default_page_size(),
            layout: LayoutKind::default(),
            codec: CodecKind::default(),
            read_mode: ReadMode::default(),
            truncate: default_truncate(),
            sample_capacity: default_sample_capacity(),
            sample_seed: None,
        }
    }
}

impl IndexConfig {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into().to_string_lossy().to_string(),
            ..Default::default()
        }
    }

    /// Builder method: set flush capacity
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Builder method: set stream layout
    pub fn layout(mut self, layout: LayoutKind) -> Self {
        self.layout = layout;
        self
    }

    /// Builder method: set sequence codec
    pub fn codec(mut self, codec: CodecKind) -> Self {
        self.codec = codec;
        self
    }

    /// Builder method: set block read mode
    pub fn read_mode(mut self, read_mode: ReadMode) -> Self {
        self.read_mode = read_mode;
        self
    }

    /// Builder method: toggle predicate truncation
    pub fn truncate(mut self, truncate: bool) -> Self {
        self.truncate = truncate;
        self
    }

    /// Builder method: set sampler seed
    pub fn sample_seed(mut self, seed: u64) -> Self {
        self.sample_seed = Some(seed);
        self
    }

    pub fn data_path(&self) -> PathBuf {
        PathBuf::from(&self.data_dir)
    }

    pub fn index_path(&self) -> PathBuf {
        self.data_path().join(format!("{}.acer", self.name))
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> StorageResult<()> {
        if self.capacity == 0 {
            return Err(StorageError::Config("capacity must be positive".to_string()));
        }
        if self.capacity > u32::MAX as usize {
            return Err(StorageError::Config(format!(
                "capacity {} exceeds block row limit",
                self.capacity
            )));
        }
        if self.page_size == 0 || self.page_size > u16::MAX as usize + 1 {
            return Err(StorageError::Config(format!(
                "page_size {} must be in 1..=65536",
                self.page_size
            )));
        }
        if self.sample_capacity == 0 {
            return Err(StorageError::Config(
                "sample_capacity must be positive".to_string(),
            ));
        }
        if self.name.is_empty() {
            return Err(StorageError::Config("name must not be empty".to_string()));
        }
        Ok(())
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    }

    /// Load configuration with environment variable overrides
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from default locations or environment
    pub fn load_default() -> Self {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("acer").join("config.toml")),
            Some(PathBuf::from("./acer.toml")),
        ];

        for path_opt in config_paths.iter().flatten() {
            if path_opt.exists() {
                match Self::load_with_env(path_opt) {
                    Ok(config) => {
                        tracing::info!("Loaded config from {:?}", path_opt);
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load config from {:?}: {}", path_opt, e);
                    }
                }
            }
        }

        // Fall back to environment-only config
        tracing::info!("Using default config with environment overrides");
        Self::from_env()
    }

    /// Apply environment variable overrides to an existing config
    fn apply_env_overrides(&mut self) {
        // Index overrides
        if let Ok(data_dir) = std::env::var("ACER_DATA_DIR") {
            self.index.data_dir = data_dir;
        }
        if let Ok(capacity) = std::env::var("ACER_CAPACITY") {
            match capacity.parse() {
                Ok(c) => self.index.capacity = c,
                Err(_) => tracing::warn!("Ignoring invalid ACER_CAPACITY={}", capacity),
            }
        }
        if let Ok(codec) = std::env::var("ACER_CODEC") {
            match codec.parse() {
                Ok(c) => self.index.codec = c,
                Err(e) => tracing::warn!("Ignoring ACER_CODEC: {}", e),
            }
        }

        // Logging overrides
        if let Ok(level) = std::env::var("ACER_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("ACER_LOG_FORMAT") {
            self.logging.format = format;
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse config file {path:?}: {error}")]
    Parse { path: PathBuf, error: String },
}

/// Generate a default config file content
pub fn generate_default_config() -> String {
    r#"# ACER Configuration
#
# Environment variables override these settings:
# - ACER_DATA_DIR
# - ACER_CAPACITY
# - ACER_CODEC
# - ACER_LOG_LEVEL
# - ACER_LOG_FORMAT

[index]
# Directory for the index file and the record store
data_dir = "~/.local/share/acer"

# Index name, the index file is <name>.acer
name = "acer"

# Buffered events that trigger a block flush
capacity = 65536

# Record store page size (bytes, at most 65536)
page_size = 8192

# Stream layout: per_cluster or whole_block
layout = "per_cluster"

# Timestamp/rid codec: delta, var_int, simple8b or delta_of_delta
codec = "simple8b"

# Block reads: selective (map only needed ranges) or whole_block
read_mode = "selective"

# Pass each predicate's answer to the next as context
truncate = true

# Reservoir sample size for selectivity estimates
sample_capacity = 5000

# Fixed sampler seed for reproducible query plans
# sample_seed = 42

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log format: pretty (for development) or json (for production)
format = "pretty"
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let config = IndexConfig::default();
        assert_eq!(config.capacity, 65536);
        assert_eq!(config.page_size, 8192);
        assert_eq!(config.layout, LayoutKind::PerCluster);
        assert_eq!(config.codec, CodecKind::Simple8b);
        assert_eq!(config.read_mode, ReadMode::Selective);
        assert!(config.truncate);
        assert_eq!(config.sample_capacity, 5000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_partial_toml() {
        let config: Config = toml::from_str(
            r#"
            [index]
            data_dir = "/tmp/acer"
            capacity = 1024
            layout = "whole_block"
            codec = "var_int"
            sample_seed = 9

            [logging]
            format = "json"
            "#,
        )
        .unwrap();
        assert_eq!(config.index.data_dir, "/tmp/acer");
        assert_eq!(config.index.capacity, 1024);
        assert_eq!(config.index.layout, LayoutKind::WholeBlock);
        assert_eq!(config.index.codec, CodecKind::VarInt);
        assert_eq!(config.index.sample_seed, Some(9));
        assert_eq!(config.index.page_size, 8192);
        assert_eq!(config.logging.format, "json");
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_generated_config_parses() {
        let config: Config = toml::from_str(&generate_default_config()).unwrap();
        assert_eq!(config.index.capacity, 65536);
        assert_eq!(config.index.codec, CodecKind::Simple8b);
        assert_eq!(config.index.read_mode, ReadMode::Selective);

        let config: Config =
            toml::from_str("[index]\ncodec = \"delta_of_delta\"\n").unwrap();
        assert_eq!(config.index.codec, CodecKind::DeltaOfDelta);
    }

    #[test]
    fn test_load_errors() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("missing.toml");
        assert!(matches!(Config::load(&missing), Err(ConfigError::Io { .. })));

        let bad = dir.path().join("bad.toml");
        std::fs::write(&bad, "[index]\ncodec = \"zstd\"\n").unwrap();
        assert!(matches!(Config::load(&bad), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_validate_rejects() {
        assert!(IndexConfig::default().capacity(0).validate().is_err());
        let mut config = IndexConfig::default();
        config.page_size = 70_000;
        assert!(config.validate().is_err());
        config.page_size = 4096;
        config.sample_capacity = 0;
        assert!(config.validate().is_err());
    }
}
