use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::errors::DomainResult;
use crate::domain::models::{BotSession, BotSlot};

#[async_trait]
pub trait BotSessionRepository: Send + Sync {
    /// Create the session, or reactivate it if it already exists.
    async fn register(&self, bot_id: &str, session_id: &str, now: DateTime<Utc>) -> DomainResult<BotSession>;

    async fn get(&self, session_id: &str) -> DomainResult<Option<BotSession>>;

    async fn list_active(&self) -> DomainResult<Vec<BotSession>>;

    /// Refresh the session and extend the slot lease when this bot holds it.
    async fn heartbeat(
        &self,
        bot_id: &str,
        session_id: &str,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> DomainResult<bool>;

    async fn end(&self, session_id: &str, now: DateTime<Utc>) -> DomainResult<bool>;

    /// Expire sessions without a heartbeat since `cutoff`.
    async fn expire_inactive(&self, cutoff: DateTime<Utc>, now: DateTime<Utc>) -> DomainResult<u64>;

    async fn slot(&self) -> DomainResult<BotSlot>;
}
