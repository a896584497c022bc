//! SQLite implementation of the ReviewRepository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use std::collections::BTreeMap;
use uuid::Uuid;

use super::{format_datetime, format_optional_datetime, parse_datetime, parse_optional_datetime, parse_uuid};
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    escalation_note, FailureCategory, PriorityLevel, ResolutionMethod, ReviewAnalytics, ReviewFilter, ReviewItem,
    ReviewStatus,
};
use crate::domain::ports::ReviewRepository;

#[derive(Clone)]
pub struct SqliteReviewRepository {
    pool: SqlitePool,
}

impl SqliteReviewRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn exists(&self, conn: &mut SqliteConnection, id: Uuid) -> DomainResult<bool> {
        let row: Option<(String,)> = sqlx::query_as("SELECT id FROM review_items WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&mut *conn)
            .await?;
        Ok(row.is_some())
    }
}

/// Resolve every open review of a phase inside an open transaction.
pub(crate) async fn resolve_open_reviews_for_phase(
    conn: &mut SqliteConnection,
    phase_id: Uuid,
    method: ResolutionMethod,
    notes: &str,
    resolved_by: &str,
    now: DateTime<Utc>,
) -> DomainResult<u64> {
    let ts = format_datetime(now);
    let result = sqlx::query(
        r#"UPDATE review_items SET review_status = 'resolved', resolution_method = ?,
           resolution_notes = CASE
               WHEN resolution_notes IS NULL OR resolution_notes = '' THEN ?
               ELSE resolution_notes || char(10) || ?
           END,
           resolved_by = ?, resolved_at = ?, updated_at = ?
           WHERE phase_id = ? AND review_status != 'resolved'"#,
    )
    .bind(method.as_str())
    .bind(notes)
    .bind(notes)
    .bind(resolved_by)
    .bind(&ts)
    .bind(&ts)
    .bind(phase_id.to_string())
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected())
}

/// Insert a review item inside an open transaction.
pub(crate) async fn insert_review(conn: &mut SqliteConnection, item: &ReviewItem) -> DomainResult<()> {
    sqlx::query(
        r#"INSERT INTO review_items (id, phase_id, account_id, phase, failure_type, failure_message,
           original_bot_id, retry_count_before_review, priority_level, review_status, assigned_to,
           resolution_method, resolution_notes, resolved_by, escalation_count, failed_at,
           review_started_at, resolved_at, created_at, updated_at)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
    )
    .bind(item.id.to_string())
    .bind(item.phase_id.to_string())
    .bind(item.account_id.to_string())
    .bind(&item.phase)
    .bind(item.failure_type.as_str())
    .bind(&item.failure_message)
    .bind(&item.original_bot_id)
    .bind(i64::from(item.retry_count_before_review))
    .bind(item.priority_level.as_i64())
    .bind(item.review_status.as_str())
    .bind(&item.assigned_to)
    .bind(item.resolution_method.map(|m| m.as_str()))
    .bind(&item.resolution_notes)
    .bind(&item.resolved_by)
    .bind(i64::from(item.escalation_count))
    .bind(format_datetime(item.failed_at))
    .bind(format_optional_datetime(item.review_started_at))
    .bind(format_optional_datetime(item.resolved_at))
    .bind(format_datetime(item.created_at))
    .bind(format_datetime(item.updated_at))
    .execute(&mut *conn)
    .await?;
    Ok(())
}

#[async_trait]
impl ReviewRepository for SqliteReviewRepository {
    async fn get(&self, id: Uuid) -> DomainResult<Option<ReviewItem>> {
        let row: Option<ReviewRow> = sqlx::query_as("SELECT * FROM review_items WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(ReviewItem::try_from).transpose()
    }

    async fn list(&self, filter: ReviewFilter) -> DomainResult<Vec<ReviewItem>> {
        let mut sql = String::from("SELECT * FROM review_items WHERE 1=1");
        let mut bindings: Vec<String> = Vec::new();

        if let Some(status) = &filter.status {
            sql.push_str(" AND review_status = ?");
            bindings.push(status.as_str().to_string());
        }
        if let Some(account_id) = &filter.account_id {
            sql.push_str(" AND account_id = ?");
            bindings.push(account_id.to_string());
        }

        sql.push_str(" ORDER BY priority_level ASC, failed_at ASC");

        match (filter.limit, filter.offset) {
            (Some(limit), Some(offset)) => sql.push_str(&format!(" LIMIT {limit} OFFSET {offset}")),
            (Some(limit), None) => sql.push_str(&format!(" LIMIT {limit}")),
            (None, Some(offset)) => sql.push_str(&format!(" LIMIT -1 OFFSET {offset}")),
            (None, None) => {}
        }

        let mut q = sqlx::query_as::<_, ReviewRow>(&sql);
        for binding in &bindings {
            q = q.bind(binding);
        }

        let rows: Vec<ReviewRow> = q.fetch_all(&self.pool).await?;
        rows.into_iter().map(ReviewItem::try_from).collect()
    }

    async fn claim(&self, id: Uuid, assigned_to: &str, now: DateTime<Utc>) -> DomainResult<bool> {
        let mut conn = self.pool.acquire().await?;
        let result = sqlx::query(
            r#"UPDATE review_items SET review_status = 'in_progress', assigned_to = ?, review_started_at = ?, updated_at = ?
               WHERE id = ? AND review_status = 'pending'"#,
        )
        .bind(assigned_to)
        .bind(format_datetime(now))
        .bind(format_datetime(now))
        .bind(id.to_string())
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 0 {
            if !self.exists(&mut conn, id).await? {
                return Err(DomainError::ReviewNotFound(id));
            }
            return Ok(false);
        }
        Ok(true)
    }

    async fn release(&self, id: Uuid, now: DateTime<Utc>) -> DomainResult<bool> {
        let mut conn = self.pool.acquire().await?;
        let result = sqlx::query(
            r#"UPDATE review_items SET review_status = 'pending', assigned_to = NULL, updated_at = ?
               WHERE id = ? AND review_status = 'in_progress'"#,
        )
        .bind(format_datetime(now))
        .bind(id.to_string())
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 0 {
            if !self.exists(&mut conn, id).await? {
                return Err(DomainError::ReviewNotFound(id));
            }
            return Ok(false);
        }
        Ok(true)
    }

    async fn resolve(
        &self,
        id: Uuid,
        method: ResolutionMethod,
        notes: Option<&str>,
        resolved_by: &str,
        now: DateTime<Utc>,
    ) -> DomainResult<bool> {
        let ts = format_datetime(now);
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"UPDATE review_items SET review_status = 'resolved', resolution_method = ?,
               resolution_notes = CASE
                   WHEN ? IS NULL THEN resolution_notes
                   WHEN resolution_notes IS NULL OR resolution_notes = '' THEN ?
                   ELSE resolution_notes || char(10) || ?
               END,
               resolved_by = ?, resolved_at = ?, updated_at = ?
               WHERE id = ? AND review_status != 'resolved'"#,
        )
        .bind(method.as_str())
        .bind(notes)
        .bind(notes)
        .bind(notes)
        .bind(resolved_by)
        .bind(&ts)
        .bind(&ts)
        .bind(id.to_string())
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            let found = self.exists(&mut tx, id).await?;
            tx.rollback().await?;
            if !found {
                return Err(DomainError::ReviewNotFound(id));
            }
            return Ok(false);
        }

        sqlx::query(
            r#"UPDATE accounts SET requires_human_review = 0, updated_at = ?
               WHERE id = (SELECT account_id FROM review_items WHERE id = ?)
               AND requires_human_review = 1
               AND NOT EXISTS (
                   SELECT 1 FROM review_items
                   WHERE account_id = accounts.id AND review_status != 'resolved'
               )"#,
        )
        .bind(&ts)
        .bind(id.to_string())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::info!(review_id = %id, method = %method, resolved_by = %resolved_by, "review resolved");
        Ok(true)
    }

    async fn escalate(&self, id: Uuid, escalated_by: &str, notes: &str, now: DateTime<Utc>) -> DomainResult<bool> {
        let note = escalation_note(escalated_by, notes);
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"UPDATE review_items SET
               priority_level = MAX(priority_level - 1, 1),
               escalation_count = escalation_count + 1,
               resolution_notes = CASE
                   WHEN resolution_notes IS NULL OR resolution_notes = '' THEN ?
                   ELSE resolution_notes || char(10) || ?
               END,
               review_status = CASE WHEN review_status = 'resolved' THEN review_status ELSE 'escalated' END,
               updated_at = ?
               WHERE id = ?"#,
        )
        .bind(&note)
        .bind(&note)
        .bind(format_datetime(now))
        .bind(id.to_string())
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(DomainError::ReviewNotFound(id));
        }

        let (status,): (String,) = sqlx::query_as("SELECT review_status FROM review_items WHERE id = ?")
            .bind(id.to_string())
            .fetch_one(&mut *tx)
            .await?;
        tx.commit().await?;

        tracing::warn!(review_id = %id, escalated_by = %escalated_by, "review escalated");
        Ok(status == ReviewStatus::Escalated.as_str())
    }

    async fn analytics(&self) -> DomainResult<ReviewAnalytics> {
        let rows: Vec<ReviewRow> = sqlx::query_as("SELECT * FROM review_items")
            .fetch_all(&self.pool)
            .await?;
        let items = rows.into_iter().map(ReviewItem::try_from).collect::<DomainResult<Vec<_>>>()?;

        Ok(summarize(&items))
    }
}

#[allow(clippy::cast_precision_loss)]
fn summarize(items: &[ReviewItem]) -> ReviewAnalytics {
    let mut by_status = BTreeMap::new();
    let mut by_failure_type = BTreeMap::new();
    let mut by_priority = BTreeMap::new();
    let mut minutes = Vec::new();
    let mut successful_minutes = Vec::new();

    for item in items {
        *by_status.entry(item.review_status.as_str().to_string()).or_insert(0) += 1;
        *by_failure_type.entry(item.failure_type.as_str().to_string()).or_insert(0) += 1;
        *by_priority.entry(item.priority_level.as_str().to_string()).or_insert(0) += 1;

        if let (Some(resolved_at), Some(method)) = (item.resolved_at, item.resolution_method) {
            let elapsed = (resolved_at - item.failed_at).num_seconds() as f64 / 60.0;
            minutes.push(elapsed);
            if method.is_successful() {
                successful_minutes.push(elapsed);
            }
        }
    }

    let mean = |values: &[f64]| {
        if values.is_empty() {
            None
        } else {
            Some(values.iter().sum::<f64>() / values.len() as f64)
        }
    };

    let resolved = minutes.len() as i64;
    let resolved_successfully = successful_minutes.len() as i64;

    ReviewAnalytics {
        total: items.len() as i64,
        by_status,
        by_failure_type,
        by_priority,
        resolved,
        resolved_successfully,
        success_rate: if resolved == 0 { 0.0 } else { resolved_successfully as f64 / resolved as f64 * 100.0 },
        avg_resolution_minutes: mean(&minutes),
        avg_successful_resolution_minutes: mean(&successful_minutes),
    }
}

#[derive(sqlx::FromRow)]
struct ReviewRow {
    id: String,
    phase_id: String,
    account_id: String,
    phase: String,
    failure_type: String,
    failure_message: String,
    original_bot_id: Option<String>,
    retry_count_before_review: i64,
    priority_level: i64,
    review_status: String,
    assigned_to: Option<String>,
    resolution_method: Option<String>,
    resolution_notes: Option<String>,
    resolved_by: Option<String>,
    escalation_count: i64,
    failed_at: String,
    review_started_at: Option<String>,
    resolved_at: Option<String>,
    created_at: String,
    updated_at: String,
}

impl TryFrom<ReviewRow> for ReviewItem {
    type Error = DomainError;

    fn try_from(row: ReviewRow) -> Result<Self, Self::Error> {
        let failure_type = FailureCategory::from_str(&row.failure_type)
            .ok_or_else(|| DomainError::SerializationError(format!("Invalid failure type: {}", row.failure_type)))?;

        let review_status = ReviewStatus::from_str(&row.review_status)
            .ok_or_else(|| DomainError::SerializationError(format!("Invalid review status: {}", row.review_status)))?;

        let resolution_method = row
            .resolution_method
            .map(|m| {
                ResolutionMethod::from_str(&m)
                    .ok_or_else(|| DomainError::SerializationError(format!("Invalid resolution method: {m}")))
            })
            .transpose()?;

        let to_u32 = |v: i64| {
            u32::try_from(v).map_err(|e| DomainError::SerializationError(format!("Invalid counter: {e}")))
        };

        Ok(ReviewItem {
            id: parse_uuid(&row.id)?,
            phase_id: parse_uuid(&row.phase_id)?,
            account_id: parse_uuid(&row.account_id)?,
            phase: row.phase,
            failure_type,
            failure_message: row.failure_message,
            original_bot_id: row.original_bot_id,
            retry_count_before_review: to_u32(row.retry_count_before_review)?,
            priority_level: PriorityLevel::from_i64(row.priority_level),
            review_status,
            assigned_to: row.assigned_to,
            resolution_method,
            resolution_notes: row.resolution_notes,
            resolved_by: row.resolved_by,
            escalation_count: to_u32(row.escalation_count)?,
            failed_at: parse_datetime(&row.failed_at)?,
            review_started_at: parse_optional_datetime(row.review_started_at)?,
            resolved_at: parse_optional_datetime(row.resolved_at)?,
            created_at: parse_datetime(&row.created_at)?,
            updated_at: parse_datetime(&row.updated_at)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::{create_migrated_test_pool, SqliteAccountRepository, SqlitePhaseRepository};
    use crate::domain::models::{Account, LifecycleState, WarmupPhase, WarmupPhaseKind};
    use crate::domain::ports::{AccountRepository, PhaseRepository};
    use chrono::Duration;

    struct Fixture {
        reviews: SqliteReviewRepository,
        accounts: SqliteAccountRepository,
        account_id: Uuid,
    }

    async fn setup() -> Fixture {
        let pool = create_migrated_test_pool().await.unwrap();
        let accounts = SqliteAccountRepository::new(pool.clone());
        let phases = SqlitePhaseRepository::new(pool.clone());
        let now = Utc::now();

        let account = Account::new("review_user", now).with_state(LifecycleState::Warmup);
        accounts.create(&account).await.unwrap();
        let phase = WarmupPhase::new(account.id, WarmupPhaseKind::Bio, 1, now, 3, now);
        phases.initialize(&[phase.clone()]).await.unwrap();

        Fixture { reviews: SqliteReviewRepository::new(pool), accounts, account_id: account.id }
    }

    async fn open_review(fx: &Fixture, category: FailureCategory) -> ReviewItem {
        let pool = fx.reviews.pool.clone();
        let phases = SqlitePhaseRepository::new(pool);
        let phase = phases.get(fx.account_id, WarmupPhaseKind::Bio).await.unwrap().unwrap();
        let item = ReviewItem::new(
            phase.id,
            fx.account_id,
            "bio",
            category,
            "challenge screen",
            PriorityLevel::for_failure(category, false),
            Utc::now(),
        );
        phases.escalate_to_review(&item, Utc::now()).await.unwrap();
        item
    }

    #[tokio::test]
    async fn test_claim_and_release_are_compare_and_swap() {
        let fx = setup().await;
        let item = open_review(&fx, FailureCategory::Other).await;

        assert!(fx.reviews.claim(item.id, "alice", Utc::now()).await.unwrap());
        assert!(!fx.reviews.claim(item.id, "bob", Utc::now()).await.unwrap());

        let claimed = fx.reviews.get(item.id).await.unwrap().unwrap();
        assert_eq!(claimed.review_status, ReviewStatus::InProgress);
        assert_eq!(claimed.assigned_to.as_deref(), Some("alice"));

        assert!(fx.reviews.release(item.id, Utc::now()).await.unwrap());
        assert!(!fx.reviews.release(item.id, Utc::now()).await.unwrap());
        let released = fx.reviews.get(item.id).await.unwrap().unwrap();
        assert!(released.assigned_to.is_none());
    }

    #[tokio::test]
    async fn test_unknown_review_is_not_found() {
        let fx = setup().await;
        let err = fx.reviews.claim(Uuid::new_v4(), "alice", Utc::now()).await.unwrap_err();
        assert!(matches!(err, DomainError::ReviewNotFound(_)));
        let err = fx.reviews.escalate(Uuid::new_v4(), "alice", "help", Utc::now()).await.unwrap_err();
        assert!(matches!(err, DomainError::ReviewNotFound(_)));
    }

    #[tokio::test]
    async fn test_resolve_clears_account_flag_and_is_terminal() {
        let fx = setup().await;
        let item = open_review(&fx, FailureCategory::Captcha).await;
        assert!(fx.accounts.get(fx.account_id).await.unwrap().unwrap().requires_human_review);

        assert!(fx
            .reviews
            .resolve(item.id, ResolutionMethod::ManualCompletion, Some("solved"), "alice", Utc::now())
            .await
            .unwrap());
        assert!(!fx
            .reviews
            .resolve(item.id, ResolutionMethod::Other, None, "bob", Utc::now())
            .await
            .unwrap());

        let resolved = fx.reviews.get(item.id).await.unwrap().unwrap();
        assert_eq!(resolved.resolved_by.as_deref(), Some("alice"));
        assert_eq!(resolved.resolution_notes.as_deref(), Some("solved"));
        assert!(!fx.accounts.get(fx.account_id).await.unwrap().unwrap().requires_human_review);
    }

    #[tokio::test]
    async fn test_escalate_raises_priority_and_saturates() {
        let fx = setup().await;
        let item = open_review(&fx, FailureCategory::Other).await;
        assert_eq!(item.priority_level, PriorityLevel::Normal);

        assert!(fx.reviews.escalate(item.id, "alice", "stuck", Utc::now()).await.unwrap());
        assert!(fx.reviews.escalate(item.id, "bob", "still stuck", Utc::now()).await.unwrap());
        assert!(fx.reviews.escalate(item.id, "carol", "again", Utc::now()).await.unwrap());

        let escalated = fx.reviews.get(item.id).await.unwrap().unwrap();
        assert_eq!(escalated.priority_level, PriorityLevel::Urgent);
        assert_eq!(escalated.escalation_count, 3);
        assert_eq!(escalated.review_status, ReviewStatus::Escalated);
        let notes = escalated.resolution_notes.unwrap();
        assert!(notes.starts_with("[ESCALATED by alice]: stuck"));
        assert!(notes.contains("[ESCALATED by carol]: again"));
    }

    #[tokio::test]
    async fn test_escalating_resolved_item_keeps_status() {
        let fx = setup().await;
        let item = open_review(&fx, FailureCategory::Other).await;
        fx.reviews
            .resolve(item.id, ResolutionMethod::SkipPhase, None, "alice", Utc::now())
            .await
            .unwrap();

        assert!(!fx.reviews.escalate(item.id, "bob", "late note", Utc::now()).await.unwrap());
        let after = fx.reviews.get(item.id).await.unwrap().unwrap();
        assert_eq!(after.review_status, ReviewStatus::Resolved);
        assert_eq!(after.escalation_count, 1);
        assert!(after.resolution_notes.unwrap().contains("late note"));
    }

    #[test]
    fn test_summarize_resolution_times() {
        let now = Utc::now();
        let mut ok = ReviewItem::new(Uuid::new_v4(), Uuid::new_v4(), "bio", FailureCategory::Captcha, "x", PriorityLevel::High, now);
        ok.review_status = ReviewStatus::Resolved;
        ok.resolution_method = Some(ResolutionMethod::RetryBot);
        ok.resolved_at = Some(now + Duration::minutes(30));

        let mut support = ok.clone();
        support.resolution_method = Some(ResolutionMethod::EscalateSupport);
        support.resolved_at = Some(now + Duration::minutes(90));

        let open = ReviewItem::new(Uuid::new_v4(), Uuid::new_v4(), "bio", FailureCategory::Other, "y", PriorityLevel::Normal, now);

        let analytics = summarize(&[ok, support, open]);
        assert_eq!(analytics.total, 3);
        assert_eq!(analytics.resolved, 2);
        assert_eq!(analytics.resolved_successfully, 1);
        assert!((analytics.success_rate - 50.0).abs() < 1e-9);
        assert_eq!(analytics.avg_resolution_minutes, Some(60.0));
        assert_eq!(analytics.avg_successful_resolution_minutes, Some(30.0));
        assert_eq!(analytics.by_status.get("pending"), Some(&1));
    }
}
