use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use super::{format_datetime, parse_datetime, parse_optional_datetime};
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{BotSession, BotSlot, SessionStatus};
use crate::domain::ports::BotSessionRepository;

#[derive(Clone)]
pub struct SqliteBotSessionRepository {
    pool: SqlitePool,
}

impl SqliteBotSessionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BotSessionRepository for SqliteBotSessionRepository {
    async fn register(&self, bot_id: &str, session_id: &str, now: DateTime<Utc>) -> DomainResult<BotSession> {
        let ts = format_datetime(now);
        let result = sqlx::query(
            r#"INSERT INTO bot_sessions (session_id, bot_id, status, started_at, last_heartbeat)
               VALUES (?, ?, 'active', ?, ?)
               ON CONFLICT(session_id) DO UPDATE SET status = 'active', ended_at = NULL,
               last_heartbeat = excluded.last_heartbeat
               WHERE bot_sessions.bot_id = excluded.bot_id"#,
        )
        .bind(session_id)
        .bind(bot_id)
        .bind(&ts)
        .bind(&ts)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DomainError::BotConstraintViolation {
                bot_id: bot_id.to_string(),
                reason: format!("session {session_id} belongs to another bot"),
            });
        }

        self.get(session_id)
            .await?
            .ok_or_else(|| DomainError::ValidationFailed(format!("session {session_id} was not stored")))
    }

    async fn get(&self, session_id: &str) -> DomainResult<Option<BotSession>> {
        let row: Option<SessionRow> = sqlx::query_as("SELECT * FROM bot_sessions WHERE session_id = ?")
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(BotSession::try_from).transpose()
    }

    async fn list_active(&self) -> DomainResult<Vec<BotSession>> {
        let rows: Vec<SessionRow> =
            sqlx::query_as("SELECT * FROM bot_sessions WHERE status = 'active' ORDER BY last_heartbeat DESC")
                .fetch_all(&self.pool)
                .await?;

        rows.into_iter().map(BotSession::try_from).collect()
    }

    async fn heartbeat(
        &self,
        bot_id: &str,
        session_id: &str,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> DomainResult<bool> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            "UPDATE bot_sessions SET last_heartbeat = ? WHERE session_id = ? AND bot_id = ? AND status = 'active'",
        )
        .bind(format_datetime(now))
        .bind(session_id)
        .bind(bot_id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query("UPDATE bot_slot SET expires_at = ? WHERE id = 1 AND bot_id = ? AND expires_at > ?")
            .bind(format_datetime(lease_until))
            .bind(bot_id)
            .bind(format_datetime(now))
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn end(&self, session_id: &str, now: DateTime<Utc>) -> DomainResult<bool> {
        let result = sqlx::query(
            "UPDATE bot_sessions SET status = 'ended', ended_at = ? WHERE session_id = ? AND status = 'active'",
        )
        .bind(format_datetime(now))
        .bind(session_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn expire_inactive(&self, cutoff: DateTime<Utc>, now: DateTime<Utc>) -> DomainResult<u64> {
        let result = sqlx::query(
            "UPDATE bot_sessions SET status = 'expired', ended_at = ? WHERE status = 'active' AND last_heartbeat < ?",
        )
        .bind(format_datetime(now))
        .bind(format_datetime(cutoff))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn slot(&self) -> DomainResult<BotSlot> {
        let row: (Option<String>, Option<String>, Option<String>, Option<String>) =
            sqlx::query_as("SELECT bot_id, session_id, claimed_at, expires_at FROM bot_slot WHERE id = 1")
                .fetch_one(&self.pool)
                .await?;

        Ok(BotSlot {
            bot_id: row.0,
            session_id: row.1,
            claimed_at: parse_optional_datetime(row.2)?,
            expires_at: parse_optional_datetime(row.3)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct SessionRow {
    session_id: String,
    bot_id: String,
    status: String,
    started_at: String,
    last_heartbeat: String,
    ended_at: Option<String>,
    accounts_processed: i64,
    phases_completed: i64,
    phases_failed: i64,
    last_error_message: Option<String>,
}

impl TryFrom<SessionRow> for BotSession {
    type Error = DomainError;

    fn try_from(row: SessionRow) -> Result<Self, Self::Error> {
        let status = SessionStatus::from_str(&row.status)
            .ok_or_else(|| DomainError::SerializationError(format!("Invalid session status: {}", row.status)))?;

        Ok(BotSession {
            session_id: row.session_id,
            bot_id: row.bot_id,
            status,
            started_at: parse_datetime(&row.started_at)?,
            last_heartbeat: parse_datetime(&row.last_heartbeat)?,
            ended_at: parse_optional_datetime(row.ended_at)?,
            accounts_processed: row.accounts_processed,
            phases_completed: row.phases_completed,
            phases_failed: row.phases_failed,
            last_error_message: row.last_error_message,
        })
    }
}
