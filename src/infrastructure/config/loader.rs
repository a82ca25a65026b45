use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use thiserror::Error;

use crate::domain::models::config::Config;

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("State directory cannot be empty")]
    EmptyStateDir,

    #[error("Invalid lock timeout: {0} ms. Must be positive")]
    InvalidLockTimeout(u64),

    #[error("Invalid lock poll interval: {poll_interval_ms} ms. Must be positive and less than the timeout ({timeout_ms} ms)")]
    InvalidPollInterval {
        poll_interval_ms: u64,
        timeout_ms: u64,
    },

    #[error("Invalid compaction threshold: {0}. Must be within (0.0, 1.0]")]
    InvalidCompactionThreshold(f64),

    #[error("Invalid budget total: must be positive")]
    InvalidBudgetTotal,

    #[error("Invalid aggregation timeout: {0} ms. Must be positive")]
    InvalidAggregationTimeout(u64),
}

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. .echelon/config.yaml (project config)
    /// 3. .echelon/local.yaml (project local overrides, optional)
    /// 4. Environment variables (ECHELON_* prefix, highest priority)
    ///
    /// Configuration is always project-local (pwd/.echelon/) so multiple
    /// orchestration runs on one machine stay independent.
    pub fn load() -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(".echelon/config.yaml"))
            .merge(Yaml::file(".echelon/local.yaml"))
            .merge(Env::prefixed("ECHELON_").split("__"))
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: impl AsRef<std::path::Path>) -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path.as_ref()))
            .extract()
            .context(format!(
                "Failed to load config from {}",
                path.as_ref().display()
            ))?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        if config.state.dir.is_empty() {
            return Err(ConfigError::EmptyStateDir);
        }

        if config.lock.timeout_ms == 0 {
            return Err(ConfigError::InvalidLockTimeout(config.lock.timeout_ms));
        }
        if config.lock.poll_interval_ms == 0
            || config.lock.poll_interval_ms >= config.lock.timeout_ms
        {
            return Err(ConfigError::InvalidPollInterval {
                poll_interval_ms: config.lock.poll_interval_ms,
                timeout_ms: config.lock.timeout_ms,
            });
        }

        if config.budget.total == 0 {
            return Err(ConfigError::InvalidBudgetTotal);
        }
        let threshold = config.budget.compaction_threshold;
        if !(threshold > 0.0 && threshold <= 1.0) {
            return Err(ConfigError::InvalidCompactionThreshold(threshold));
        }

        if config.aggregation.timeout_ms == 0 {
            return Err(ConfigError::InvalidAggregationTimeout(
                config.aggregation.timeout_ms,
            ));
        }

        match config.logging.level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            other => return Err(ConfigError::InvalidLogLevel(other.to_string())),
        }
        match config.logging.format.as_str() {
            "json" | "pretty" => {}
            other => return Err(ConfigError::InvalidLogFormat(other.to_string())),
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_validates() {
        assert!(ConfigLoader::validate(&Config::default()).is_ok());
    }

    #[test]
    fn test_zero_lock_timeout_rejected() {
        let mut config = Config::default();
        config.lock.timeout_ms = 0;
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidLockTimeout(0))
        ));
    }

    #[test]
    fn test_poll_interval_must_undercut_timeout() {
        let mut config = Config::default();
        config.lock.poll_interval_ms = config.lock.timeout_ms;
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidPollInterval { .. })
        ));
    }

    #[test]
    fn test_threshold_bounds() {
        let mut config = Config::default();
        config.budget.compaction_threshold = 0.0;
        assert!(ConfigLoader::validate(&config).is_err());
        config.budget.compaction_threshold = 1.0;
        assert!(ConfigLoader::validate(&config).is_ok());
        config.budget.compaction_threshold = 1.2;
        assert!(ConfigLoader::validate(&config).is_err());
    }

    #[test]
    fn test_bad_log_level_rejected() {
        let mut config = Config::default();
        config.logging.level = "verbose".into();
        assert!(matches!(
            ConfigLoader::validate(&config),
            Err(ConfigError::InvalidLogLevel(_))
        ));
    }

    #[test]
    fn test_load_from_yaml_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "lock:\n  timeout_ms: 2500\nbudget:\n  total: 75000\n").unwrap();

        let config = ConfigLoader::load_from_file(&path).unwrap();
        assert_eq!(config.lock.timeout_ms, 2_500);
        assert_eq!(config.budget.total, 75_000);
        // Untouched sections keep defaults.
        assert_eq!(config.lock.stale_ms, 5_000);
    }
}
