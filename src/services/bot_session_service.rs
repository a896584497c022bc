//! Bot session bookkeeping and slot lease upkeep.

use chrono::Duration;
use std::sync::Arc;

use crate::domain::errors::DomainResult;
use crate::domain::models::{BotConfig, BotSession, BotSlot};
use crate::domain::ports::{BotSessionRepository, Clock};

pub struct BotSessionService {
    sessions: Arc<dyn BotSessionRepository>,
    clock: Arc<dyn Clock>,
    config: BotConfig,
}

impl BotSessionService {
    pub fn new(sessions: Arc<dyn BotSessionRepository>, clock: Arc<dyn Clock>) -> Self {
        Self { sessions, clock, config: BotConfig::default() }
    }

    pub fn with_config(mut self, config: BotConfig) -> Self {
        self.config = config;
        self
    }

    fn timeout(&self) -> Duration {
        Duration::minutes(i64::from(self.config.session_timeout_minutes))
    }

    pub async fn register(&self, bot_id: &str, session_id: &str) -> DomainResult<BotSession> {
        let session = self.sessions.register(bot_id, session_id, self.clock.now()).await?;
        tracing::info!(bot_id = %bot_id, session_id = %session_id, "bot session registered");
        Ok(session)
    }

    /// Keep the session alive and extend the slot lease if this bot holds it.
    pub async fn heartbeat(&self, bot_id: &str, session_id: &str) -> DomainResult<bool> {
        let now = self.clock.now();
        self.sessions.heartbeat(bot_id, session_id, now, now + self.timeout()).await
    }

    pub async fn end(&self, session_id: &str) -> DomainResult<bool> {
        let ended = self.sessions.end(session_id, self.clock.now()).await?;
        if ended {
            tracing::info!(session_id = %session_id, "bot session ended");
        }
        Ok(ended)
    }

    pub async fn expire_inactive(&self) -> DomainResult<u64> {
        let now = self.clock.now();
        let expired = self.sessions.expire_inactive(now - self.timeout(), now).await?;
        if expired > 0 {
            tracing::info!(expired, "inactive bot sessions expired");
        }
        Ok(expired)
    }

    pub async fn get(&self, session_id: &str) -> DomainResult<Option<BotSession>> {
        self.sessions.get(session_id).await
    }

    pub async fn list_active(&self) -> DomainResult<Vec<BotSession>> {
        self.sessions.list_active().await
    }

    pub async fn slot(&self) -> DomainResult<BotSlot> {
        self.sessions.slot().await
    }
}
