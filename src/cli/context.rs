//! Wiring of repositories and services for CLI commands.

use anyhow::{Context, Result};
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;

use crate::adapters::device::{DeviceDispatcher, ProcessDeviceAutomation};
use crate::adapters::sqlite::{
    database_url, initialize_database, PoolConfig, SqliteAccountRepository, SqliteBotSessionRepository, SqliteContentRepository,
    SqlitePhaseRepository, SqliteReviewRepository,
};
use crate::domain::models::Config;
use crate::domain::ports::{Clock, DeviceAutomation, SystemClock};
use crate::services::{BotSessionService, LifecycleService, ReviewQueueService, WarmupService};

pub struct AppContext {
    pub config: Config,
    pub pool: SqlitePool,
    clock: Arc<dyn Clock>,
    automation: Arc<dyn DeviceAutomation>,
}

impl AppContext {
    /// Open the configured database, applying pending migrations.
    pub async fn open(config: Config) -> Result<Self> {
        let url = database_url(&config.database);
        let pool = initialize_database(&url, Some(PoolConfig::from(&config.database)))
            .await
            .context("Failed to open database. Run 'warmup init' first.")?;

        let automation: Arc<dyn DeviceAutomation> = Arc::new(ProcessDeviceAutomation::new(config.device.clone()));

        Ok(Self { config, pool, clock: Arc::new(SystemClock), automation })
    }

    fn accounts(&self) -> Arc<SqliteAccountRepository> {
        Arc::new(SqliteAccountRepository::new(self.pool.clone()))
    }

    fn phases(&self) -> Arc<SqlitePhaseRepository> {
        Arc::new(SqlitePhaseRepository::new(self.pool.clone()))
    }

    pub fn content(&self) -> SqliteContentRepository {
        SqliteContentRepository::new(self.pool.clone())
    }

    pub fn lifecycle(&self) -> LifecycleService {
        LifecycleService::new(self.accounts(), self.phases(), self.clock.clone())
            .with_max_retries(self.config.warmup.max_retries)
    }

    pub fn warmup(&self) -> WarmupService {
        WarmupService::new(
            self.accounts(),
            self.phases(),
            Arc::new(SqliteBotSessionRepository::new(self.pool.clone())),
            Arc::new(self.content()),
            self.automation.clone(),
            self.clock.clone(),
        )
        .with_config(self.config.warmup.clone())
        .with_bot_config(self.config.bot.clone())
        .with_command_delay(self.command_delay())
    }

    pub fn reviews(&self) -> ReviewQueueService {
        ReviewQueueService::new(
            Arc::new(SqliteReviewRepository::new(self.pool.clone())),
            self.phases(),
            self.clock.clone(),
        )
    }

    pub fn bots(&self) -> BotSessionService {
        BotSessionService::new(Arc::new(SqliteBotSessionRepository::new(self.pool.clone())), self.clock.clone())
            .with_config(self.config.bot.clone())
    }

    pub fn dispatcher(&self) -> DeviceDispatcher {
        DeviceDispatcher::new(self.automation.clone(), self.command_delay())
    }

    fn command_delay(&self) -> Duration {
        Duration::from_millis(self.config.device.command_delay_ms)
    }
}
