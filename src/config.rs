//! Executor Configuration
//!
//! Pool sizing for the executor service, loadable from TOML. Missing keys
//! fall back to the defaults below.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Sizing of one worker pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Workers started up front and never retired
    pub core_workers: usize,
    /// Upper bound on concurrently running workers
    pub max_workers: usize,
    /// Jobs waiting for a worker before admission blocks
    pub queue_capacity: usize,
    /// Idle time after which a non-core worker exits
    pub keep_alive_secs: u64,
}

impl PoolConfig {
    /// Fixed-size pool
    pub fn fixed(workers: usize, queue_capacity: usize) -> Self {
        Self {
            core_workers: workers,
            max_workers: workers,
            queue_capacity,
            keep_alive_secs: 0,
        }
    }

    /// Pool that grows on demand and shrinks when idle
    pub fn on_demand(max_workers: usize, queue_capacity: usize, keep_alive_secs: u64) -> Self {
        Self {
            core_workers: 0,
            max_workers,
            queue_capacity,
            keep_alive_secs,
        }
    }

    fn validate(&self, name: &str) -> Result<(), ConfigError> {
        if self.max_workers == 0 {
            return Err(ConfigError::Invalid(format!("{}.max_workers must be positive", name)));
        }
        if self.core_workers > self.max_workers {
            return Err(ConfigError::Invalid(format!(
                "{}.core_workers ({}) exceeds max_workers ({})",
                name, self.core_workers, self.max_workers
            )));
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::Invalid(format!("{}.queue_capacity must be positive", name)));
        }
        Ok(())
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::on_demand(32, 64, 60)
    }
}

/// Keys present in one pool table of a config file
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PoolOverrides {
    core_workers: Option<usize>,
    max_workers: Option<usize>,
    queue_capacity: Option<usize>,
    keep_alive_secs: Option<u64>,
}

impl PoolOverrides {
    fn apply(self, base: PoolConfig) -> PoolConfig {
        PoolConfig {
            core_workers: self.core_workers.unwrap_or(base.core_workers),
            max_workers: self.max_workers.unwrap_or(base.max_workers),
            queue_capacity: self.queue_capacity.unwrap_or(base.queue_capacity),
            keep_alive_secs: self.keep_alive_secs.unwrap_or(base.keep_alive_secs),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ExecutorOverrides {
    queued: PoolOverrides,
    demand: PoolOverrides,
}

impl From<ExecutorOverrides> for ExecutorConfig {
    fn from(overrides: ExecutorOverrides) -> Self {
        let defaults = ExecutorConfig::default();
        Self {
            queued: overrides.queued.apply(defaults.queued),
            demand: overrides.demand.apply(defaults.demand),
        }
    }
}

/// Executor service configuration.
///
/// Each pool table falls back key by key to that pool's own defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "ExecutorOverrides")]
pub struct ExecutorConfig {
    /// Background queue
    pub queued: PoolConfig,
    /// Prompt execution
    pub demand: PoolConfig,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            queued: PoolConfig::fixed(5, 256),
            demand: PoolConfig::default(),
        }
    }
}

impl ExecutorConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.queued.validate("queued")?;
        self.demand.validate("demand")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = ExecutorConfig::default();
        assert_eq!(config.queued.core_workers, 5);
        assert_eq!(config.queued.max_workers, 5);
        assert_eq!(config.demand.core_workers, 0);
        assert_eq!(config.demand.max_workers, 32);
        assert_eq!(config.demand.keep_alive_secs, 60);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml() {
        let config = ExecutorConfig::from_toml_str(
            r#"
            [demand]
            max_workers = 8
            "#,
        )
        .unwrap();
        assert_eq!(config.demand.max_workers, 8);
        assert_eq!(config.demand.queue_capacity, 64);
        assert_eq!(config.queued, PoolConfig::fixed(5, 256));
    }

    #[test]
    fn test_empty_toml_is_default() {
        assert_eq!(ExecutorConfig::from_toml_str("").unwrap(), ExecutorConfig::default());
    }

    #[test]
    fn test_rejects_invalid_sizes() {
        let err = ExecutorConfig::from_toml_str("[queued]\ncore_workers = 9\nmax_workers = 4\n")
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err = ExecutorConfig::from_toml_str("[demand]\nqueue_capacity = 0\n").unwrap_err();
        assert!(err.to_string().contains("demand.queue_capacity"));
    }

    #[test]
    fn test_parse_error() {
        let err = ExecutorConfig::from_toml_str("[demand\nmax_workers = ").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_load_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[queued]\ncore_workers = 2\nmax_workers = 2").unwrap();

        let config = ExecutorConfig::load(file.path()).unwrap();
        assert_eq!(config.queued.core_workers, 2);
        assert_eq!(config.queued.max_workers, 2);
        assert_eq!(config.queued.queue_capacity, 256);
    }

    #[test]
    fn test_partial_pool_keeps_its_own_defaults() {
        let config = ExecutorConfig::from_toml_str("[queued]
max_workers = 7
").unwrap();
        assert_eq!(config.queued.core_workers, 5);
        assert_eq!(config.queued.max_workers, 7);
        assert_eq!(config.queued.queue_capacity, 256);
        assert_eq!(config.queued.keep_alive_secs, 0);
        assert_eq!(config.demand, PoolConfig::default());
    }

    #[test]
    fn test_serialized_config_loads_back() {
        let config = ExecutorConfig {
            queued: PoolConfig::fixed(3, 16),
            demand: PoolConfig::on_demand(6, 12, 5),
        };
        let text = toml::to_string(&config).unwrap();
        assert_eq!(ExecutorConfig::from_toml_str(&text).unwrap(), config);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = ExecutorConfig::load(dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
