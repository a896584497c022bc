use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use super::phase::{FailureCategory, RetryPolicy};

/// Main configuration structure for the warmup engine
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Warmup phase engine policy
    #[serde(default)]
    pub warmup: WarmupConfig,

    /// Bot session and slot lease settings
    #[serde(default)]
    pub bot: BotConfig,

    /// Device automation runner
    #[serde(default)]
    pub device: DeviceConfig,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DatabaseConfig {
    /// Path to `SQLite` database file
    #[serde(default = "default_database_path")]
    pub path: String,

    /// Maximum number of database connections in pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_database_path() -> String {
    ".warmup/warmup.db".to_string()
}

const fn default_max_connections() -> u32 {
    5
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            max_connections: default_max_connections(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Directory for rolling log files; stdout only when unset
    #[serde(default)]
    pub log_dir: Option<String>,

    /// Number of days to retain logs
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

const fn default_retention_days() -> u32 {
    30
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            log_dir: None,
            retention_days: default_retention_days(),
        }
    }
}

/// Warmup phase engine policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct WarmupConfig {
    /// Attempts before a failing phase escalates to review
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Failure categories that escalate on the first occurrence
    #[serde(default = "FailureCategory::default_non_retryable")]
    pub non_retryable_categories: Vec<FailureCategory>,

    /// Wait before a failed phase is retry-eligible
    #[serde(default)]
    pub retry_cooldown_minutes: u32,

    /// Phases in progress longer than this are reaped as timed out
    #[serde(default = "default_phase_lease_minutes")]
    pub phase_lease_minutes: u32,

    /// Content used by an account within this window is not reassigned to it
    #[serde(default = "default_content_reuse_window_days")]
    pub content_reuse_window_days: u32,

    /// Shortest wait before the next phase after a bot completion
    #[serde(default = "default_cooldown_min_hours")]
    pub cooldown_min_hours: u32,

    /// Longest wait before the next phase after a bot completion
    #[serde(default = "default_cooldown_max_hours")]
    pub cooldown_max_hours: u32,

    /// Per-model cooldown ranges, keyed by model id
    #[serde(default)]
    pub model_cooldowns: HashMap<Uuid, CooldownRange>,
}

/// Inclusive range the post-completion cooldown is drawn from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct CooldownRange {
    pub min_hours: u32,
    pub max_hours: u32,
}

impl CooldownRange {
    pub const fn new(min_hours: u32, max_hours: u32) -> Self {
        Self { min_hours, max_hours }
    }

    pub fn is_valid(&self) -> bool {
        self.min_hours <= self.max_hours
    }
}

const fn default_max_retries() -> u32 {
    3
}

const fn default_phase_lease_minutes() -> u32 {
    60
}

const fn default_content_reuse_window_days() -> u32 {
    30
}

const fn default_cooldown_min_hours() -> u32 {
    15
}

const fn default_cooldown_max_hours() -> u32 {
    24
}

impl Default for WarmupConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            non_retryable_categories: FailureCategory::default_non_retryable(),
            retry_cooldown_minutes: 0,
            phase_lease_minutes: default_phase_lease_minutes(),
            content_reuse_window_days: default_content_reuse_window_days(),
            cooldown_min_hours: default_cooldown_min_hours(),
            cooldown_max_hours: default_cooldown_max_hours(),
            model_cooldowns: HashMap::new(),
        }
    }
}

impl WarmupConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy { non_retryable: self.non_retryable_categories.clone() }
    }

    /// Cooldown range for an account's model, falling back to the global one.
    pub fn cooldown_range(&self, model_id: Option<Uuid>) -> CooldownRange {
        model_id
            .and_then(|id| self.model_cooldowns.get(&id).copied())
            .unwrap_or(CooldownRange::new(self.cooldown_min_hours, self.cooldown_max_hours))
    }
}

/// Bot session and slot lease settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct BotConfig {
    /// Inactivity before a session expires and the slot lease lapses
    #[serde(default = "default_session_timeout_minutes")]
    pub session_timeout_minutes: u32,
}

const fn default_session_timeout_minutes() -> u32 {
    30
}

impl Default for BotConfig {
    fn default() -> Self {
        Self { session_timeout_minutes: default_session_timeout_minutes() }
    }
}

/// Device automation runner
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DeviceConfig {
    /// Executable invoked once per device command
    #[serde(default = "default_runner")]
    pub runner: String,

    /// Arguments placed before the script name
    #[serde(default = "default_runner_args")]
    pub runner_args: Vec<String>,

    /// Working directory for the runner
    #[serde(default)]
    pub working_dir: Option<String>,

    /// Pause between consecutive commands
    #[serde(default = "default_command_delay_ms")]
    pub command_delay_ms: u64,

    /// Per-command timeout
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,
}

fn default_runner() -> String {
    "node".to_string()
}

fn default_runner_args() -> Vec<String> {
    vec!["scripts/api/lua_executor.js".to_string()]
}

const fn default_command_delay_ms() -> u64 {
    2000
}

const fn default_command_timeout_secs() -> u64 {
    120
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            runner: default_runner(),
            runner_args: default_runner_args(),
            working_dir: None,
            command_delay_ms: default_command_delay_ms(),
            command_timeout_secs: default_command_timeout_secs(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cooldown_range_prefers_model_override() {
        let model = Uuid::new_v4();
        let mut config = WarmupConfig::default();
        config.model_cooldowns.insert(model, CooldownRange::new(30, 36));

        assert_eq!(config.cooldown_range(None), CooldownRange::new(15, 24));
        assert_eq!(config.cooldown_range(Some(Uuid::new_v4())), CooldownRange::new(15, 24));
        assert_eq!(config.cooldown_range(Some(model)), CooldownRange::new(30, 36));
    }
}
