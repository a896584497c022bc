//! SQLite implementation of the PhaseRepository.
//!
//! Every compound transition runs in one transaction whose first statement is
//! a write, so the database write lock is taken before anything is read.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use uuid::Uuid;

use super::account_repository::insert_transition_record;
use super::content_repository::insert_usage;
use super::review_repository::{insert_review, resolve_open_reviews_for_phase};
use super::{format_datetime, parse_datetime, parse_optional_datetime, parse_optional_json, parse_optional_uuid, parse_uuid};
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    CompletionOutcome, FailureCategory, FailureDisposition, FailureOutcome, LifecycleState,
    PhaseStatistics, PhaseStatus, PriorityLevel, ReadyAccount, ResolutionMethod, ReviewItem, TransitionRecord,
    WarmupPhase, WarmupPhaseKind, WarmupStatistics,
};
use crate::domain::ports::{ClaimRequest, CompletionRecord, FailureRecord, PhaseRepository, ReadyQuery};

/// Audit identity for transitions the engine performs on its own.
pub const SYSTEM_ACTOR: &str = "system";

#[derive(Clone)]
pub struct SqlitePhaseRepository {
    pool: SqlitePool,
}

impl SqlitePhaseRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

/// Insert phase rows that do not exist yet inside an open transaction.
pub(crate) async fn insert_phases(conn: &mut SqliteConnection, phases: &[WarmupPhase]) -> DomainResult<u64> {
    let mut inserted = 0;
    for phase in phases {
        let result = sqlx::query(
            r#"INSERT OR IGNORE INTO warmup_phases (id, account_id, phase, phase_order, status, available_at,
               retry_count, max_retries, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(phase.id.to_string())
        .bind(phase.account_id.to_string())
        .bind(phase.phase.as_str())
        .bind(phase.phase_order)
        .bind(phase.status.as_str())
        .bind(format_datetime(phase.available_at))
        .bind(i64::from(phase.retry_count))
        .bind(i64::from(phase.max_retries))
        .bind(format_datetime(phase.created_at))
        .bind(format_datetime(phase.updated_at))
        .execute(&mut *conn)
        .await?;
        inserted += result.rows_affected();
    }
    Ok(inserted)
}

async fn fetch_phase(
    conn: &mut SqliteConnection,
    account_id: Uuid,
    phase: WarmupPhaseKind,
) -> DomainResult<Option<WarmupPhase>> {
    let row: Option<PhaseRow> = sqlx::query_as("SELECT * FROM warmup_phases WHERE account_id = ? AND phase = ?")
        .bind(account_id.to_string())
        .bind(phase.as_str())
        .fetch_optional(&mut *conn)
        .await?;

    row.map(WarmupPhase::try_from).transpose()
}

async fn require_phase(
    conn: &mut SqliteConnection,
    account_id: Uuid,
    phase: WarmupPhaseKind,
) -> DomainResult<WarmupPhase> {
    fetch_phase(conn, account_id, phase).await?.ok_or_else(|| DomainError::PhaseNotFound {
        account_id,
        phase: phase.as_str().to_string(),
    })
}

/// Free the global slot once `bot_id` has nothing left in progress.
async fn release_slot_if_idle(conn: &mut SqliteConnection, bot_id: &str) -> DomainResult<bool> {
    let result = sqlx::query(
        r#"UPDATE bot_slot SET bot_id = NULL, session_id = NULL, claimed_at = NULL, expires_at = NULL
           WHERE id = 1 AND bot_id = ?
           AND NOT EXISTS (SELECT 1 FROM warmup_phases WHERE status = 'in_progress' AND bot_id = ?)"#,
    )
    .bind(bot_id)
    .bind(bot_id)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Return an account's in-progress phases to `pending` inside an open
/// transaction, freeing the slot of every bot left idle.
pub(crate) async fn release_in_progress_phases(
    conn: &mut SqliteConnection,
    account_id: Uuid,
    now: DateTime<Utc>,
) -> DomainResult<u64> {
    let bots: Vec<(Option<String>,)> =
        sqlx::query_as("SELECT DISTINCT bot_id FROM warmup_phases WHERE account_id = ? AND status = 'in_progress'")
            .bind(account_id.to_string())
            .fetch_all(&mut *conn)
            .await?;
    if bots.is_empty() {
        return Ok(0);
    }

    let result = sqlx::query(
        r#"UPDATE warmup_phases SET status = 'pending', started_at = NULL, bot_id = NULL, session_id = NULL,
           updated_at = ? WHERE account_id = ? AND status = 'in_progress'"#,
    )
    .bind(format_datetime(now))
    .bind(account_id.to_string())
    .execute(&mut *conn)
    .await?;

    for bot_id in bots.into_iter().filter_map(|(b,)| b) {
        let freed = release_slot_if_idle(conn, &bot_id).await?;
        tracing::warn!(account_id = %account_id, bot_id = %bot_id, slot_freed = freed, "in-progress phase interrupted");
    }

    Ok(result.rows_affected())
}

async fn account_state(conn: &mut SqliteConnection, account_id: Uuid) -> DomainResult<LifecycleState> {
    let current: Option<(String,)> = sqlx::query_as("SELECT lifecycle_state FROM accounts WHERE id = ?")
        .bind(account_id.to_string())
        .fetch_optional(&mut *conn)
        .await?;
    current
        .and_then(|(s,)| LifecycleState::from_str(&s))
        .ok_or(DomainError::AccountNotFound(account_id))
}

async fn touch_account_bot_action(
    conn: &mut SqliteConnection,
    account_id: Uuid,
    bot_id: &str,
    now: DateTime<Utc>,
) -> DomainResult<()> {
    sqlx::query("UPDATE accounts SET last_bot_action_by = ?, last_bot_action_at = ?, updated_at = ? WHERE id = ?")
        .bind(bot_id)
        .bind(format_datetime(now))
        .bind(format_datetime(now))
        .bind(account_id.to_string())
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Clear the account review flag once none of its phases awaits review.
async fn clear_review_flag_if_no_phase_in_review(
    conn: &mut SqliteConnection,
    account_id: Uuid,
    now: DateTime<Utc>,
) -> DomainResult<()> {
    sqlx::query(
        r#"UPDATE accounts SET requires_human_review = 0, updated_at = ?
           WHERE id = ? AND requires_human_review = 1
           AND NOT EXISTS (SELECT 1 FROM warmup_phases WHERE account_id = ? AND status = 'requires_review')"#,
    )
    .bind(format_datetime(now))
    .bind(account_id.to_string())
    .bind(account_id.to_string())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Promote the account to `active` when every bot phase is completed.
async fn promote_if_complete(
    conn: &mut SqliteConnection,
    account_id: Uuid,
    bot_phases: &[WarmupPhaseKind],
    now: DateTime<Utc>,
) -> DomainResult<bool> {
    if bot_phases.is_empty() {
        return Ok(false);
    }

    let placeholders = vec!["?"; bot_phases.len()].join(", ");
    let sql = format!(
        "SELECT COUNT(*) FROM warmup_phases WHERE account_id = ? AND status = 'completed' AND phase IN ({placeholders})"
    );
    let mut query = sqlx::query_as::<_, (i64,)>(&sql).bind(account_id.to_string());
    for phase in bot_phases {
        query = query.bind(phase.as_str());
    }
    let (completed,) = query.fetch_one(&mut *conn).await?;

    if usize::try_from(completed).unwrap_or(0) < bot_phases.len() {
        return Ok(false);
    }

    let from_state = account_state(conn, account_id).await?;
    if !from_state.accepts_bot_work() {
        return Ok(false);
    }

    let notes = "All warmup phases completed";
    sqlx::query(
        r#"UPDATE accounts SET lifecycle_state = 'active', state_changed_at = ?, state_changed_by = ?,
           state_notes = ?, updated_at = ? WHERE id = ? AND lifecycle_state = ?"#,
    )
    .bind(format_datetime(now))
    .bind(SYSTEM_ACTOR)
    .bind(notes)
    .bind(format_datetime(now))
    .bind(account_id.to_string())
    .bind(from_state.as_str())
    .execute(&mut *conn)
    .await?;

    insert_transition_record(
        conn,
        &TransitionRecord {
            account_id,
            from_state,
            to_state: LifecycleState::Active,
            reason: Some("warmup_complete".to_string()),
            notes: Some(notes.to_string()),
            changed_by: SYSTEM_ACTOR.to_string(),
            forced: true,
            changed_at: now,
        },
    )
    .await?;

    Ok(true)
}

#[async_trait]
impl PhaseRepository for SqlitePhaseRepository {
    async fn initialize(&self, phases: &[WarmupPhase]) -> DomainResult<u64> {
        let mut tx = self.pool.begin().await?;
        let inserted = insert_phases(&mut tx, phases).await?;
        tx.commit().await?;
        Ok(inserted)
    }

    async fn get(&self, account_id: Uuid, phase: WarmupPhaseKind) -> DomainResult<Option<WarmupPhase>> {
        let mut conn = self.pool.acquire().await?;
        fetch_phase(&mut conn, account_id, phase).await
    }

    async fn list_for_account(&self, account_id: Uuid) -> DomainResult<Vec<WarmupPhase>> {
        let rows: Vec<PhaseRow> = sqlx::query_as("SELECT * FROM warmup_phases WHERE account_id = ? ORDER BY phase_order")
            .bind(account_id.to_string())
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(WarmupPhase::try_from).collect()
    }

    async fn mark_available(&self, phase_id: Uuid, expected: PhaseStatus, now: DateTime<Utc>) -> DomainResult<bool> {
        let result = sqlx::query("UPDATE warmup_phases SET status = 'available', updated_at = ? WHERE id = ? AND status = ?")
            .bind(format_datetime(now))
            .bind(phase_id.to_string())
            .bind(expected.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn claim(&self, request: &ClaimRequest) -> DomainResult<WarmupPhase> {
        let now = format_datetime(request.now);
        let mut tx = self.pool.begin().await?;

        let slot = sqlx::query(
            r#"UPDATE bot_slot SET bot_id = ?, session_id = ?, claimed_at = ?, expires_at = ?
               WHERE id = 1 AND (bot_id IS NULL OR bot_id = ? OR expires_at IS NULL OR expires_at <= ?)"#,
        )
        .bind(&request.bot_id)
        .bind(&request.session_id)
        .bind(&now)
        .bind(format_datetime(request.lease_until))
        .bind(&request.bot_id)
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        if slot.rows_affected() == 0 {
            let holder: Option<(Option<String>,)> = sqlx::query_as("SELECT bot_id FROM bot_slot WHERE id = 1")
                .fetch_optional(&mut *tx)
                .await?;
            tx.rollback().await?;
            let holder = holder.and_then(|(b,)| b).unwrap_or_else(|| "another bot".to_string());
            tracing::warn!(bot_id = %request.bot_id, holder = %holder, "execution slot held by another bot");
            return Err(DomainError::BotConstraintViolation {
                bot_id: request.bot_id.clone(),
                reason: format!("execution slot is held by {holder}"),
            });
        }

        let claimed = sqlx::query(
            r#"UPDATE warmup_phases SET status = 'in_progress', started_at = ?, bot_id = ?, session_id = ?, updated_at = ?
               WHERE account_id = ? AND phase = ? AND status = 'available'
               AND NOT EXISTS (
                   SELECT 1 FROM warmup_phases
                   WHERE status = 'in_progress' AND (bot_id IS NULL OR bot_id != ?)
               )"#,
        )
        .bind(&now)
        .bind(&request.bot_id)
        .bind(&request.session_id)
        .bind(&now)
        .bind(request.account_id.to_string())
        .bind(request.phase.as_str())
        .bind(&request.bot_id)
        .execute(&mut *tx)
        .await?;

        if claimed.rows_affected() == 0 {
            let foreign: Option<(Option<String>,)> = sqlx::query_as(
                "SELECT bot_id FROM warmup_phases WHERE status = 'in_progress' AND (bot_id IS NULL OR bot_id != ?) LIMIT 1",
            )
            .bind(&request.bot_id)
            .fetch_optional(&mut *tx)
            .await?;
            let current = fetch_phase(&mut tx, request.account_id, request.phase).await?;
            tx.rollback().await?;

            if let Some((other,)) = foreign {
                return Err(DomainError::BotConstraintViolation {
                    bot_id: request.bot_id.clone(),
                    reason: format!(
                        "a phase is in progress under {}",
                        other.unwrap_or_else(|| "an unknown bot".to_string())
                    ),
                });
            }
            return Err(match current {
                None => DomainError::PhaseNotFound {
                    account_id: request.account_id,
                    phase: request.phase.as_str().to_string(),
                },
                Some(phase) => DomainError::PhaseNotAvailable {
                    phase: request.phase.as_str().to_string(),
                    status: phase.status.as_str().to_string(),
                },
            });
        }

        if request.image.is_some() || request.text.is_some() {
            sqlx::query(
                r#"UPDATE warmup_phases SET assigned_content_id = COALESCE(?, assigned_content_id),
                   assigned_text_id = COALESCE(?, assigned_text_id), content_assigned_at = ?
                   WHERE account_id = ? AND phase = ?"#,
            )
            .bind(request.image.map(|id| id.to_string()))
            .bind(request.text.map(|id| id.to_string()))
            .bind(&now)
            .bind(request.account_id.to_string())
            .bind(request.phase.as_str())
            .execute(&mut *tx)
            .await?;

            for content_id in [request.image, request.text].into_iter().flatten() {
                insert_usage(&mut tx, content_id, request.account_id, request.phase, request.now).await?;
            }
        }

        let phase = require_phase(&mut tx, request.account_id, request.phase).await?;

        sqlx::query(
            r#"INSERT INTO bot_sessions (session_id, bot_id, status, started_at, last_heartbeat)
               VALUES (?, ?, 'active', ?, ?)
               ON CONFLICT(session_id) DO UPDATE SET status = 'active', last_heartbeat = excluded.last_heartbeat"#,
        )
        .bind(&request.session_id)
        .bind(&request.bot_id)
        .bind(&now)
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"UPDATE bot_sessions SET accounts_processed = accounts_processed + 1
               WHERE session_id = ? AND NOT EXISTS (
                   SELECT 1 FROM warmup_phases WHERE account_id = ? AND session_id = ? AND id != ?
               )"#,
        )
        .bind(&request.session_id)
        .bind(request.account_id.to_string())
        .bind(&request.session_id)
        .bind(phase.id.to_string())
        .execute(&mut *tx)
        .await?;

        touch_account_bot_action(&mut tx, request.account_id, &request.bot_id, request.now).await?;

        tx.commit().await?;

        tracing::info!(
            account_id = %request.account_id,
            phase = %request.phase,
            bot_id = %request.bot_id,
            "phase claimed"
        );
        Ok(phase)
    }

    async fn record_completion(&self, record: &CompletionRecord) -> DomainResult<CompletionOutcome> {
        let now = format_datetime(record.now);
        let response_json = record.response.as_ref().map(serde_json::to_string).transpose()?;
        let mut tx = self.pool.begin().await?;

        let result = match &record.bot_id {
            Some(bot_id) => {
                sqlx::query(
                    r#"UPDATE warmup_phases SET status = 'completed', completed_at = ?, execution_time_ms = ?,
                       automation_response = ?, updated_at = ?
                       WHERE account_id = ? AND phase = ? AND status = 'in_progress' AND bot_id = ?"#,
                )
                .bind(&now)
                .bind(record.execution_time_ms)
                .bind(&response_json)
                .bind(&now)
                .bind(record.account_id.to_string())
                .bind(record.phase.as_str())
                .bind(bot_id)
                .execute(&mut *tx)
                .await?
            }
            None => {
                sqlx::query(
                    r#"UPDATE warmup_phases SET status = 'completed', completed_at = ?, execution_time_ms = ?,
                       automation_response = ?, review_required_at = NULL, updated_at = ?
                       WHERE account_id = ? AND phase = ? AND status NOT IN ('completed', 'in_progress')"#,
                )
                .bind(&now)
                .bind(record.execution_time_ms)
                .bind(&response_json)
                .bind(&now)
                .bind(record.account_id.to_string())
                .bind(record.phase.as_str())
                .execute(&mut *tx)
                .await?
            }
        };

        if record.bot_id.is_some() {
            let state = account_state(&mut tx, record.account_id).await?;
            if !state.accepts_bot_work() {
                tx.rollback().await?;
                tracing::warn!(
                    account_id = %record.account_id,
                    phase = %record.phase,
                    state = %state,
                    "bot completion rejected for account outside warmup"
                );
                return Err(DomainError::AccountNotAcceptingWork {
                    account_id: record.account_id,
                    state: state.as_str().to_string(),
                });
            }
        }

        if result.rows_affected() == 0 {
            let current = fetch_phase(&mut tx, record.account_id, record.phase).await?;
            tx.rollback().await?;
            return Err(match (current, &record.bot_id) {
                (None, _) => DomainError::PhaseNotFound {
                    account_id: record.account_id,
                    phase: record.phase.as_str().to_string(),
                },
                (Some(_), Some(bot_id)) => DomainError::PhaseNotOwned {
                    phase: record.phase.as_str().to_string(),
                    bot_id: bot_id.clone(),
                },
                (Some(phase), None) => DomainError::PhaseNotAvailable {
                    phase: record.phase.as_str().to_string(),
                    status: phase.status.as_str().to_string(),
                },
            });
        }

        let phase = require_phase(&mut tx, record.account_id, record.phase).await?;

        if let Some(username) = &record.new_username {
            sqlx::query("UPDATE accounts SET username = ?, updated_at = ? WHERE id = ?")
                .bind(username)
                .bind(&now)
                .bind(record.account_id.to_string())
                .execute(&mut *tx)
                .await?;
        }

        if let Some(next) = record.next_phase {
            let earliest = format_datetime(record.now + next.cooldown);
            sqlx::query(
                r#"UPDATE warmup_phases SET
                   status = CASE WHEN status = 'available' AND available_at < ? THEN 'pending' ELSE status END,
                   available_at = MAX(available_at, ?), updated_at = ?
                   WHERE account_id = ? AND phase = ? AND status IN ('pending', 'available', 'failed')"#,
            )
            .bind(&earliest)
            .bind(&earliest)
            .bind(&now)
            .bind(record.account_id.to_string())
            .bind(next.phase.as_str())
            .execute(&mut *tx)
            .await?;
        }

        if let Some(bot_id) = &record.bot_id {
            touch_account_bot_action(&mut tx, record.account_id, bot_id, record.now).await?;

            if let Some(session_id) = &phase.session_id {
                sqlx::query("UPDATE bot_sessions SET phases_completed = phases_completed + 1, last_heartbeat = ? WHERE session_id = ?")
                    .bind(&now)
                    .bind(session_id)
                    .execute(&mut *tx)
                    .await?;
            }

            release_slot_if_idle(&mut tx, bot_id).await?;
        } else {
            let resolved = resolve_open_reviews_for_phase(
                &mut tx,
                phase.id,
                ResolutionMethod::ManualCompletion,
                "Phase completed manually",
                &record.completed_by,
                record.now,
            )
            .await?;
            if resolved > 0 {
                tracing::info!(account_id = %record.account_id, phase = %record.phase, resolved, "open reviews resolved");
            }
            clear_review_flag_if_no_phase_in_review(&mut tx, record.account_id, record.now).await?;
        }

        let warmup_complete = promote_if_complete(&mut tx, record.account_id, &record.bot_phases, record.now).await?;

        tx.commit().await?;

        tracing::info!(
            account_id = %record.account_id,
            phase = %record.phase,
            completed_by = %record.completed_by,
            warmup_complete,
            "phase completed"
        );

        Ok(CompletionOutcome { phase, warmup_complete, username_updated: record.new_username.clone() })
    }

    async fn record_failure(&self, record: &FailureRecord) -> DomainResult<FailureOutcome> {
        let now = format_datetime(record.now);
        let mut tx = self.pool.begin().await?;

        let owned = sqlx::query(
            "UPDATE warmup_phases SET updated_at = ? WHERE account_id = ? AND phase = ? AND status = 'in_progress' AND bot_id = ?",
        )
        .bind(&now)
        .bind(record.account_id.to_string())
        .bind(record.phase.as_str())
        .bind(&record.bot_id)
        .execute(&mut *tx)
        .await?;

        if owned.rows_affected() == 0 {
            let current = fetch_phase(&mut tx, record.account_id, record.phase).await?;
            tx.rollback().await?;
            return Err(match current {
                None => DomainError::PhaseNotFound {
                    account_id: record.account_id,
                    phase: record.phase.as_str().to_string(),
                },
                Some(_) => DomainError::PhaseNotOwned {
                    phase: record.phase.as_str().to_string(),
                    bot_id: record.bot_id.clone(),
                },
            });
        }

        let before = require_phase(&mut tx, record.account_id, record.phase).await?;
        let failure = &record.failure;
        let disposition = record.policy.disposition(
            failure.category,
            before.retry_count,
            before.max_retries,
            failure.force_escalate,
        );
        let details_json = failure.details.as_ref().map(serde_json::to_string).transpose()?;

        let (status, available_at, review_required_at) = match disposition {
            FailureDisposition::Retry => (PhaseStatus::Failed, format_datetime(record.retry_available_at), None),
            FailureDisposition::Escalate => (PhaseStatus::RequiresReview, format_datetime(before.available_at), Some(now.clone())),
        };

        sqlx::query(
            r#"UPDATE warmup_phases SET status = ?, retry_count = retry_count + 1, failure_category = ?,
               error_message = ?, error_details = ?, available_at = ?, review_required_at = ?, updated_at = ?
               WHERE id = ?"#,
        )
        .bind(status.as_str())
        .bind(failure.category.as_str())
        .bind(&failure.error_message)
        .bind(&details_json)
        .bind(&available_at)
        .bind(&review_required_at)
        .bind(&now)
        .bind(before.id.to_string())
        .execute(&mut *tx)
        .await?;

        let mut review_id = None;
        if disposition == FailureDisposition::Escalate {
            sqlx::query(
                r#"UPDATE accounts SET requires_human_review = 1, last_error_message = ?, last_error_at = ?, updated_at = ?
                   WHERE id = ?"#,
            )
            .bind(&failure.error_message)
            .bind(&now)
            .bind(&now)
            .bind(record.account_id.to_string())
            .execute(&mut *tx)
            .await?;

            let exhausted = before.retry_count.saturating_add(1) >= before.max_retries;
            let review = ReviewItem::new(
                before.id,
                record.account_id,
                record.phase.as_str(),
                failure.category,
                failure.error_message.clone(),
                PriorityLevel::for_failure(failure.category, exhausted),
                record.now,
            )
            .with_bot(Some(record.bot_id.clone()), before.retry_count.saturating_add(1));
            insert_review(&mut tx, &review).await?;
            review_id = Some(review.id);
        }

        if let Some(session_id) = &before.session_id {
            sqlx::query(
                r#"UPDATE bot_sessions SET phases_failed = phases_failed + 1, last_error_message = ?, last_heartbeat = ?
                   WHERE session_id = ?"#,
            )
            .bind(&failure.error_message)
            .bind(&now)
            .bind(session_id)
            .execute(&mut *tx)
            .await?;
        }

        touch_account_bot_action(&mut tx, record.account_id, &record.bot_id, record.now).await?;
        release_slot_if_idle(&mut tx, &record.bot_id).await?;

        let phase = require_phase(&mut tx, record.account_id, record.phase).await?;
        tx.commit().await?;

        match disposition {
            FailureDisposition::Retry => tracing::warn!(
                account_id = %record.account_id,
                phase = %record.phase,
                category = %failure.category,
                retry_count = phase.retry_count,
                "phase failed, will retry"
            ),
            FailureDisposition::Escalate => tracing::warn!(
                account_id = %record.account_id,
                phase = %record.phase,
                category = %failure.category,
                retry_count = phase.retry_count,
                review_id = ?review_id,
                "phase escalated to human review"
            ),
        }

        Ok(FailureOutcome { phase, disposition, review_id })
    }

    async fn reset_for_retry(
        &self,
        account_id: Uuid,
        phase: WarmupPhaseKind,
        now: DateTime<Utc>,
    ) -> DomainResult<WarmupPhase> {
        let ts = format_datetime(now);
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"UPDATE warmup_phases SET status = 'pending', available_at = ?, retry_count = 0, started_at = NULL,
               bot_id = NULL, session_id = NULL, failure_category = NULL, error_message = NULL,
               error_details = NULL, review_required_at = NULL, updated_at = ?
               WHERE account_id = ? AND phase = ? AND status IN ('failed', 'requires_review')"#,
        )
        .bind(&ts)
        .bind(&ts)
        .bind(account_id.to_string())
        .bind(phase.as_str())
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            let current = require_phase(&mut tx, account_id, phase).await?;
            tx.rollback().await?;
            return Err(DomainError::PhaseNotAvailable {
                phase: phase.as_str().to_string(),
                status: current.status.as_str().to_string(),
            });
        }

        clear_review_flag_if_no_phase_in_review(&mut tx, account_id, now).await?;
        let reset = require_phase(&mut tx, account_id, phase).await?;
        tx.commit().await?;

        tracing::info!(account_id = %account_id, phase = %phase, "phase reset for retry");
        Ok(reset)
    }

    async fn escalate_to_review(&self, review: &ReviewItem, now: DateTime<Utc>) -> DomainResult<()> {
        let ts = format_datetime(now);
        let phase_kind = WarmupPhaseKind::from_str(&review.phase)
            .ok_or_else(|| DomainError::UnknownPhase(review.phase.clone()))?;

        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"UPDATE warmup_phases SET status = 'requires_review', review_required_at = ?,
               failure_category = ?, error_message = ?, updated_at = ?
               WHERE account_id = ? AND phase = ? AND status != 'completed'"#,
        )
        .bind(&ts)
        .bind(review.failure_type.as_str())
        .bind(&review.failure_message)
        .bind(&ts)
        .bind(review.account_id.to_string())
        .bind(phase_kind.as_str())
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            let current = require_phase(&mut tx, review.account_id, phase_kind).await?;
            tx.rollback().await?;
            return Err(DomainError::PhaseNotAvailable {
                phase: review.phase.clone(),
                status: current.status.as_str().to_string(),
            });
        }

        sqlx::query(
            r#"UPDATE accounts SET requires_human_review = 1, last_error_message = ?, last_error_at = ?, updated_at = ?
               WHERE id = ?"#,
        )
        .bind(&review.failure_message)
        .bind(&ts)
        .bind(&ts)
        .bind(review.account_id.to_string())
        .execute(&mut *tx)
        .await?;

        insert_review(&mut tx, review).await?;

        if let Some(bot_id) = &review.original_bot_id {
            release_slot_if_idle(&mut tx, bot_id).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn in_progress(&self) -> DomainResult<Vec<WarmupPhase>> {
        let rows: Vec<PhaseRow> = sqlx::query_as("SELECT * FROM warmup_phases WHERE status = 'in_progress' ORDER BY started_at")
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(WarmupPhase::try_from).collect()
    }

    async fn stale_in_progress(&self, cutoff: DateTime<Utc>) -> DomainResult<Vec<WarmupPhase>> {
        let rows: Vec<PhaseRow> = sqlx::query_as(
            "SELECT * FROM warmup_phases WHERE status = 'in_progress' AND started_at < ? ORDER BY started_at",
        )
        .bind(format_datetime(cutoff))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(WarmupPhase::try_from).collect()
    }

    async fn statistics(&self) -> DomainResult<WarmupStatistics> {
        let (total, completed, failed, review, in_progress, avg_ms): (i64, i64, i64, i64, i64, Option<f64>) =
            sqlx::query_as(
                r#"SELECT COUNT(*),
                   COALESCE(SUM(status = 'completed'), 0),
                   COALESCE(SUM(status = 'failed'), 0),
                   COALESCE(SUM(status = 'requires_review'), 0),
                   COALESCE(SUM(status = 'in_progress'), 0),
                   AVG(execution_time_ms)
                   FROM warmup_phases"#,
            )
            .fetch_one(&self.pool)
            .await?;

        let rows: Vec<(String, i64, i64, i64, i64, Option<f64>)> = sqlx::query_as(
            r#"SELECT phase, COUNT(*),
               COALESCE(SUM(status = 'completed'), 0),
               COALESCE(SUM(status = 'failed'), 0),
               COALESCE(SUM(status = 'requires_review'), 0),
               AVG(execution_time_ms)
               FROM warmup_phases GROUP BY phase ORDER BY MIN(phase_order)"#,
        )
        .fetch_all(&self.pool)
        .await?;

        let attempted = completed + failed + review;
        #[allow(clippy::cast_precision_loss)]
        let success_rate = if attempted == 0 { 0.0 } else { completed as f64 / attempted as f64 * 100.0 };

        Ok(WarmupStatistics {
            total_phases: total,
            completed_phases: completed,
            failed_phases: failed,
            phases_requiring_review: review,
            in_progress_phases: in_progress,
            success_rate,
            avg_execution_time_ms: avg_ms,
            by_phase: rows
                .into_iter()
                .map(|(phase, total, completed, failed, requires_review, avg)| PhaseStatistics {
                    phase,
                    total,
                    completed,
                    failed,
                    requires_review,
                    avg_execution_time_ms: avg,
                })
                .collect(),
        })
    }

    async fn ready_accounts(&self, query: &ReadyQuery) -> DomainResult<Vec<ReadyAccount>> {
        if query.phases.is_empty() || query.limit == 0 {
            return Ok(Vec::new());
        }

        let dependencies: Vec<(WarmupPhaseKind, WarmupPhaseKind)> = query
            .phases
            .iter()
            .flat_map(|(phase, deps)| deps.iter().map(move |dep| (*phase, *dep)))
            .collect();
        let dependency_rows = if dependencies.is_empty() {
            "SELECT NULL, NULL WHERE 0".to_string()
        } else {
            format!("VALUES {}", vec!["(?, ?)"; dependencies.len()].join(", "))
        };
        let workable: Vec<LifecycleState> =
            LifecycleState::ALL.into_iter().filter(LifecycleState::accepts_bot_work).collect();
        let phase_placeholders = vec!["?"; query.phases.len()].join(", ");
        let state_placeholders = vec!["?"; workable.len()].join(", ");

        // A phase is ready when it is available, or awaiting eligibility with
        // its time reached and every dependency completed.
        let sql = format!(
            r#"WITH deps(phase, dependency) AS ({dependency_rows})
               SELECT a.id, a.username, a.model_id, a.container_number, a.lifecycle_state,
                   COUNT(*) AS total_phases,
                   COALESCE(SUM(p.status = 'completed'), 0) AS completed_phases,
                   COALESCE(SUM(
                       p.phase IN ({phase_placeholders})
                       AND (p.status = 'available' OR (p.status IN ('pending', 'failed') AND p.available_at <= ?))
                       AND NOT EXISTS (
                           SELECT 1 FROM deps d
                           WHERE d.phase = p.phase AND NOT EXISTS (
                               SELECT 1 FROM warmup_phases q
                               WHERE q.account_id = p.account_id AND q.phase = d.dependency AND q.status = 'completed'
                           )
                       )
                   ), 0) AS ready_phases
               FROM accounts a JOIN warmup_phases p ON p.account_id = a.id
               WHERE a.container_number IS NOT NULL
               AND a.lifecycle_state IN ({state_placeholders})
               AND (? IS NULL OR a.model_id = ?)
               AND NOT EXISTS (SELECT 1 FROM warmup_phases x WHERE x.account_id = a.id AND x.status = 'in_progress')
               GROUP BY a.id
               HAVING ready_phases > 0
               ORDER BY ready_phases DESC, completed_phases ASC, a.username ASC
               LIMIT ?"#
        );

        let mut q = sqlx::query_as::<_, ReadyRow>(&sql);
        for (phase, dependency) in &dependencies {
            q = q.bind(phase.as_str()).bind(dependency.as_str());
        }
        for (phase, _) in &query.phases {
            q = q.bind(phase.as_str());
        }
        q = q.bind(format_datetime(query.now));
        for state in &workable {
            q = q.bind(state.as_str());
        }
        let model_id = query.model_id.map(|id| id.to_string());
        q = q.bind(model_id.clone()).bind(model_id).bind(i64::from(query.limit));

        let rows = q.fetch_all(&self.pool).await?;
        rows.into_iter().map(ReadyAccount::try_from).collect()
    }
}

#[derive(sqlx::FromRow)]
struct ReadyRow {
    id: String,
    username: String,
    model_id: Option<String>,
    container_number: i64,
    lifecycle_state: String,
    total_phases: i64,
    completed_phases: i64,
    ready_phases: i64,
}

impl TryFrom<ReadyRow> for ReadyAccount {
    type Error = DomainError;

    fn try_from(row: ReadyRow) -> Result<Self, Self::Error> {
        let lifecycle_state = LifecycleState::from_str(&row.lifecycle_state).ok_or_else(|| {
            DomainError::SerializationError(format!("Invalid lifecycle state: {}", row.lifecycle_state))
        })?;

        Ok(ReadyAccount {
            account_id: parse_uuid(&row.id)?,
            username: row.username,
            model_id: parse_optional_uuid(row.model_id)?,
            container_number: row.container_number,
            lifecycle_state,
            total_phases: row.total_phases,
            completed_phases: row.completed_phases,
            ready_phases: row.ready_phases,
        })
    }
}

#[derive(sqlx::FromRow)]
struct PhaseRow {
    id: String,
    account_id: String,
    phase: String,
    phase_order: i64,
    status: String,
    available_at: String,
    started_at: Option<String>,
    completed_at: Option<String>,
    assigned_content_id: Option<String>,
    assigned_text_id: Option<String>,
    content_assigned_at: Option<String>,
    bot_id: Option<String>,
    session_id: Option<String>,
    retry_count: i64,
    max_retries: i64,
    failure_category: Option<String>,
    error_message: Option<String>,
    error_details: Option<String>,
    execution_time_ms: Option<i64>,
    automation_response: Option<String>,
    review_required_at: Option<String>,
    created_at: String,
    updated_at: String,
}

impl TryFrom<PhaseRow> for WarmupPhase {
    type Error = DomainError;

    fn try_from(row: PhaseRow) -> Result<Self, Self::Error> {
        let phase = WarmupPhaseKind::from_str(&row.phase)
            .ok_or_else(|| DomainError::UnknownPhase(row.phase.clone()))?;

        let status = PhaseStatus::from_str(&row.status)
            .ok_or_else(|| DomainError::SerializationError(format!("Invalid phase status: {}", row.status)))?;

        let failure_category = row
            .failure_category
            .map(|c| {
                FailureCategory::from_str(&c)
                    .ok_or_else(|| DomainError::SerializationError(format!("Invalid failure category: {c}")))
            })
            .transpose()?;

        let to_u32 = |v: i64| {
            u32::try_from(v).map_err(|e| DomainError::SerializationError(format!("Invalid counter: {e}")))
        };

        Ok(WarmupPhase {
            id: parse_uuid(&row.id)?,
            account_id: parse_uuid(&row.account_id)?,
            phase,
            phase_order: row.phase_order,
            status,
            available_at: parse_datetime(&row.available_at)?,
            started_at: parse_optional_datetime(row.started_at)?,
            completed_at: parse_optional_datetime(row.completed_at)?,
            assigned_content_id: parse_optional_uuid(row.assigned_content_id)?,
            assigned_text_id: parse_optional_uuid(row.assigned_text_id)?,
            content_assigned_at: parse_optional_datetime(row.content_assigned_at)?,
            bot_id: row.bot_id,
            session_id: row.session_id,
            retry_count: to_u32(row.retry_count)?,
            max_retries: to_u32(row.max_retries)?,
            failure_category,
            error_message: row.error_message,
            error_details: parse_optional_json(row.error_details)?,
            execution_time_ms: row.execution_time_ms,
            automation_response: parse_optional_json(row.automation_response)?,
            review_required_at: parse_optional_datetime(row.review_required_at)?,
            created_at: parse_datetime(&row.created_at)?,
            updated_at: parse_datetime(&row.updated_at)?,
        })
    }
}
