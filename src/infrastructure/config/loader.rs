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

    #[error("Database path cannot be empty")]
    EmptyDatabasePath,

    #[error("Invalid max_connections: {0}. Must be at least 1")]
    InvalidMaxConnections(u32),

    #[error("Invalid max_retries: {0}. Cannot be 0")]
    InvalidMaxRetries(u32),

    #[error("Invalid session_timeout_minutes: {0}. Cannot be 0")]
    InvalidSessionTimeout(u32),

    #[error("Invalid phase_lease_minutes: {0}. Cannot be 0")]
    InvalidPhaseLease(u32),

    #[error("Invalid cooldown range {min}-{max}h. Minimum cannot exceed maximum")]
    InvalidCooldownRange { min: u32, max: u32 },

    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. .warmup/config.yaml (project config, created by init)
    /// 3. .warmup/local.yaml (local overrides, optional)
    /// 4. Environment variables (WARMUP_* prefix, `__` separates nesting)
    pub fn load() -> Result<Config> {
        let config: Config = Self::figment()
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    fn figment() -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(".warmup/config.yaml"))
            .merge(Yaml::file(".warmup/local.yaml"))
            .merge(Env::prefixed("WARMUP_").split("__"))
    }

    /// Load configuration from a specific file, still honoring env overrides
    pub fn load_from_file(path: impl AsRef<std::path::Path>) -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path.as_ref()))
            .merge(Env::prefixed("WARMUP_").split("__"))
            .extract()
            .context(format!("Failed to load config from {}", path.as_ref().display()))?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        if config.database.path.is_empty() {
            return Err(ConfigError::EmptyDatabasePath);
        }

        if config.database.max_connections == 0 {
            return Err(ConfigError::InvalidMaxConnections(config.database.max_connections));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }

        let valid_log_formats = ["json", "pretty"];
        if !valid_log_formats.contains(&config.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }

        if config.warmup.max_retries == 0 {
            return Err(ConfigError::InvalidMaxRetries(config.warmup.max_retries));
        }

        if config.warmup.phase_lease_minutes == 0 {
            return Err(ConfigError::InvalidPhaseLease(config.warmup.phase_lease_minutes));
        }

        let ranges = std::iter::once(config.warmup.cooldown_range(None))
            .chain(config.warmup.model_cooldowns.values().copied());
        for range in ranges {
            if !range.is_valid() {
                return Err(ConfigError::InvalidCooldownRange { min: range.min_hours, max: range.max_hours });
            }
        }

        if config.bot.session_timeout_minutes == 0 {
            return Err(ConfigError::InvalidSessionTimeout(config.bot.session_timeout_minutes));
        }

        if config.device.runner.trim().is_empty() {
            return Err(ConfigError::ValidationFailed("device runner cannot be empty".to_string()));
        }

        if config.device.command_timeout_secs == 0 {
            return Err(ConfigError::ValidationFailed(
                "device command_timeout_secs cannot be 0".to_string(),
            ));
        }

        Ok(())
    }
}
