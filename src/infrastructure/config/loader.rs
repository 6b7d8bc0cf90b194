//! Configuration loader with hierarchical merging.

use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use thiserror::Error;

use crate::domain::models::Config;

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid agent count: {0}. Must be between 1 and 100")]
    InvalidAgentCount(usize),

    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("Store path cannot be empty")]
    EmptyStorePath,

    #[error("Interval {name} must be positive")]
    ZeroInterval { name: &'static str },

    #[error("Invalid watermarks: low ({low}) must be <= high ({high}) <= max ({max})")]
    InvalidWatermarks { low: usize, high: usize, max: usize },

    #[error("Invalid timeout bounds: min ({0}ms) must be <= max ({1}ms)")]
    InvalidTimeoutBounds(u64, u64),

    #[error("Invalid memory governor fractions: soft <= hard <= critical <= 1.0 required")]
    InvalidMemoryFractions,
}

/// Loads configuration with hierarchical merging.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration.
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults
    /// 2. drover.yaml (project config)
    /// 3. drover.local.yaml (local overrides, optional)
    /// 4. Environment variables (DROVER_* prefix, `__` nesting)
    pub fn load() -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file("drover.yaml"))
            .merge(Yaml::file("drover.local.yaml"))
            .merge(Env::prefixed("DROVER_").split("__"))
            .extract()
            .context("Failed to extract configuration")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file, plus env overrides.
    pub fn load_from_file(path: impl AsRef<std::path::Path>) -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path.as_ref()))
            .merge(Env::prefixed("DROVER_").split("__"))
            .extract()
            .context(format!(
                "Failed to load config from {}",
                path.as_ref().display()
            ))?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Validate configuration after loading.
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        let agent_count = if config.agents.roster.is_empty() {
            config.agents.count
        } else {
            config.agents.roster.len()
        };
        if agent_count == 0 || agent_count > 100 {
            return Err(ConfigError::InvalidAgentCount(agent_count));
        }

        if config.store.path.is_empty() {
            return Err(ConfigError::EmptyStorePath);
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }
        let valid_log_formats = ["json", "pretty"];
        if !valid_log_formats.contains(&config.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }

        for (name, value) in [
            ("intervals.heartbeat_ms", config.intervals.heartbeat_ms),
            ("intervals.status_ms", config.intervals.status_ms),
            ("intervals.work_poll_ms", config.intervals.work_poll_ms),
            ("intervals.supervisor_ms", config.intervals.supervisor_ms),
            ("intervals.registry_ms", config.intervals.registry_ms),
            ("governor.check_interval_ms", config.governor.check_interval_ms),
            ("lease.ttl_ms", config.lease.ttl_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::ZeroInterval { name });
            }
        }

        let w = &config.watermarks;
        if w.low > w.high || w.high > w.max {
            return Err(ConfigError::InvalidWatermarks {
                low: w.low,
                high: w.high,
                max: w.max,
            });
        }

        if config.executor.min_timeout_ms > config.executor.max_timeout_ms {
            return Err(ConfigError::InvalidTimeoutBounds(
                config.executor.min_timeout_ms,
                config.executor.max_timeout_ms,
            ));
        }

        let m = &config.memory_governor;
        if !(m.soft_fraction <= m.hard_fraction
            && m.hard_fraction <= m.critical_fraction
            && m.critical_fraction <= 1.0)
        {
            return Err(ConfigError::InvalidMemoryFractions);
        }

        Ok(())
    }
}
