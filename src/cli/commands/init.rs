//! Implementation of the `warmup init` command.

use anyhow::{Context, Result};
use clap::Args;
use std::path::PathBuf;
use tokio::fs;

use crate::adapters::sqlite::{database_url, initialize_database, PoolConfig};
use crate::cli::output::{output, CommandOutput};
use crate::domain::models::{Config, PhaseCatalog};

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Force reinitialization even if already initialized
    #[arg(long, short)]
    pub force: bool,

    /// Target directory (defaults to current directory)
    #[arg(default_value = ".")]
    pub path: PathBuf,
}

#[derive(Debug, serde::Serialize)]
pub struct InitOutput {
    pub success: bool,
    pub message: String,
    pub initialized_path: PathBuf,
    pub directories_created: Vec<String>,
    pub config_written: bool,
    pub database_initialized: bool,
    /// Standard phase schedule as (phase, hours after the account becomes ready)
    pub phase_schedule: Vec<(String, i64)>,
}

impl CommandOutput for InitOutput {
    fn to_human(&self) -> String {
        let mut lines = vec![self.message.clone()];
        if !self.directories_created.is_empty() {
            lines.push("\nCreated directories:".to_string());
            for dir in &self.directories_created {
                lines.push(format!("  - {dir}"));
            }
        }
        if self.config_written {
            lines.push("\nDefault configuration written to .warmup/config.yaml".to_string());
        }
        if self.database_initialized {
            lines.push("Database initialized at .warmup/warmup.db".to_string());
        }
        if !self.phase_schedule.is_empty() {
            lines.push(format!("\nWarmup schedule ({} phases):", self.phase_schedule.len()));
            for (phase, hours) in &self.phase_schedule {
                lines.push(format!("  +{hours:>4}h  {phase}"));
            }
        }
        lines.join("\n")
    }
}

pub async fn execute(args: InitArgs, json_mode: bool) -> Result<()> {
    let target_path = if args.path.is_absolute() {
        args.path.clone()
    } else {
        std::env::current_dir().context("Failed to get current directory")?.join(&args.path)
    };

    let warmup_dir = target_path.join(".warmup");

    if warmup_dir.exists() && !args.force {
        let output_data = InitOutput {
            success: false,
            message: "Project already initialized. Use --force to reinitialize.".to_string(),
            initialized_path: target_path,
            directories_created: vec![],
            config_written: false,
            database_initialized: false,
            phase_schedule: vec![],
        };
        output(&output_data, json_mode);
        return Ok(());
    }

    if args.force && warmup_dir.exists() {
        fs::remove_dir_all(&warmup_dir).await.context("Failed to remove existing .warmup directory")?;
    }

    let mut directories_created = vec![];
    for dir in [warmup_dir.clone(), warmup_dir.join("logs")] {
        if !dir.exists() {
            fs::create_dir_all(&dir).await.with_context(|| format!("Failed to create {}", dir.display()))?;
            let relative = dir.strip_prefix(&target_path).unwrap_or(&dir).to_string_lossy().to_string();
            directories_created.push(relative);
        }
    }

    let config = project_config();
    let config_yaml = serde_yaml::to_string(&config).context("Failed to render default config")?;
    fs::write(warmup_dir.join("config.yaml"), config_yaml).await.context("Failed to write config.yaml")?;

    // Paths in the config are relative to the project root
    let mut database = config.database.clone();
    database.path = target_path.join(&database.path).to_string_lossy().to_string();
    let pool = initialize_database(&database_url(&database), Some(PoolConfig::from(&database)))
        .await
        .context("Failed to initialize database")?;
    pool.close().await;

    let phase_schedule = PhaseCatalog::standard()
        .initial_offsets_hours()
        .into_iter()
        .map(|(phase, hours)| (phase.as_str().to_string(), hours))
        .collect();

    tracing::info!(path = %target_path.display(), "project initialized");

    let output_data = InitOutput {
        success: true,
        message: if args.force {
            "Project reinitialized successfully.".to_string()
        } else {
            "Project initialized successfully.".to_string()
        },
        initialized_path: target_path,
        directories_created,
        config_written: true,
        database_initialized: true,
        phase_schedule,
    };

    output(&output_data, json_mode);
    Ok(())
}

/// Defaults written by `init`: file logging under the project directory.
fn project_config() -> Config {
    let mut config = Config::default();
    config.logging.log_dir = Some(".warmup/logs".to_string());
    config
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_init_creates_layout() {
        let dir = tempfile::tempdir().unwrap();
        let args = InitArgs { force: false, path: dir.path().to_path_buf() };
        execute(args, true).await.unwrap();

        assert!(dir.path().join(".warmup/config.yaml").exists());
        assert!(dir.path().join(".warmup/warmup.db").exists());

        let written = std::fs::read_to_string(dir.path().join(".warmup/config.yaml")).unwrap();
        let config: Config = serde_yaml::from_str(&written).unwrap();
        assert_eq!(config.warmup.max_retries, 3);
        assert_eq!(config.logging.log_dir.as_deref(), Some(".warmup/logs"));
    }

    #[tokio::test]
    async fn test_init_refuses_to_overwrite_without_force() {
        let dir = tempfile::tempdir().unwrap();
        execute(InitArgs { force: false, path: dir.path().to_path_buf() }, true).await.unwrap();
        std::fs::write(dir.path().join(".warmup/config.yaml"), "warmup:\n  max_retries: 9\n").unwrap();

        execute(InitArgs { force: false, path: dir.path().to_path_buf() }, true).await.unwrap();
        let kept = std::fs::read_to_string(dir.path().join(".warmup/config.yaml")).unwrap();
        assert!(kept.contains("max_retries: 9"));

        execute(InitArgs { force: true, path: dir.path().to_path_buf() }, true).await.unwrap();
        let reset = std::fs::read_to_string(dir.path().join(".warmup/config.yaml")).unwrap();
        assert!(!reset.contains("max_retries: 9"));
    }
}
