//! SQLite-backed content catalog and provider.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use uuid::Uuid;

use super::{format_datetime, parse_datetime, parse_uuid};
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{ContentItem, ContentKind, ContentRef, ContentRequest, WarmupPhaseKind};
use crate::domain::ports::ContentProvider;

const SELECT_CANDIDATE: &str = r#"
    SELECT c.* FROM content_items c
    WHERE c.kind = ? AND c.status = 'active'
    AND EXISTS (SELECT 1 FROM json_each(c.categories) WHERE json_each.value = ?)
    AND NOT EXISTS (
        SELECT 1 FROM content_usage u
        WHERE u.content_id = c.id AND u.account_id = ? AND u.used_at >= ?
    )
    ORDER BY (SELECT COUNT(*) FROM content_usage u2 WHERE u2.content_id = c.id) ASC, c.created_at ASC
    LIMIT 1
"#;

const SELECT_ANY_CANDIDATE: &str = r#"
    SELECT c.* FROM content_items c
    WHERE c.kind = ? AND c.status = 'active'
    AND NOT EXISTS (
        SELECT 1 FROM content_usage u
        WHERE u.content_id = c.id AND u.account_id = ? AND u.used_at >= ?
    )
    ORDER BY (SELECT COUNT(*) FROM content_usage u2 WHERE u2.content_id = c.id) ASC, c.created_at ASC
    LIMIT 1
"#;

#[derive(Clone)]
pub struct SqliteContentRepository {
    pool: SqlitePool,
}

impl SqliteContentRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn add(&self, item: &ContentItem) -> DomainResult<()> {
        let categories = serde_json::to_string(&item.categories)?;

        sqlx::query(
            "INSERT INTO content_items (id, kind, categories, payload, status, created_at) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(item.id.to_string())
        .bind(item.kind.as_str())
        .bind(&categories)
        .bind(&item.payload)
        .bind(if item.active { "active" } else { "inactive" })
        .bind(format_datetime(item.created_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn list(&self, kind: Option<ContentKind>) -> DomainResult<Vec<ContentItem>> {
        let rows: Vec<ContentRow> = match kind {
            Some(kind) => {
                sqlx::query_as("SELECT * FROM content_items WHERE kind = ? ORDER BY created_at")
                    .bind(kind.as_str())
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                sqlx::query_as("SELECT * FROM content_items ORDER BY kind, created_at")
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        rows.into_iter().map(ContentItem::try_from).collect()
    }

    pub async fn deactivate(&self, id: Uuid) -> DomainResult<bool> {
        let result = sqlx::query("UPDATE content_items SET status = 'inactive' WHERE id = ? AND status = 'active'")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Number of times `account_id` has been given `content_id`.
    pub async fn usage_count(&self, content_id: Uuid, account_id: Uuid) -> DomainResult<i64> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM content_usage WHERE content_id = ? AND account_id = ?")
                .bind(content_id.to_string())
                .bind(account_id.to_string())
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }
}

/// Record that an account was given a content item, inside an open transaction.
pub(crate) async fn insert_usage(
    conn: &mut SqliteConnection,
    content_id: Uuid,
    account_id: Uuid,
    phase: WarmupPhaseKind,
    now: DateTime<Utc>,
) -> DomainResult<()> {
    sqlx::query("INSERT INTO content_usage (content_id, account_id, phase, used_at) VALUES (?, ?, ?, ?)")
        .bind(content_id.to_string())
        .bind(account_id.to_string())
        .bind(phase.as_str())
        .bind(format_datetime(now))
        .execute(&mut *conn)
        .await?;
    Ok(())
}

#[async_trait]
impl ContentProvider for SqliteContentRepository {
    async fn select_content(&self, request: &ContentRequest, now: DateTime<Utc>) -> DomainResult<Option<ContentRef>> {
        let window_start = format_datetime(now - Duration::days(i64::from(request.exclude_used_within_days)));
        let account_id = request.account_id.to_string();

        let mut selected: Option<(ContentItem, String)> = None;

        if request.categories.is_empty() {
            let row: Option<ContentRow> = sqlx::query_as(SELECT_ANY_CANDIDATE)
                .bind(request.kind.as_str())
                .bind(&account_id)
                .bind(&window_start)
                .fetch_optional(&self.pool)
                .await?;
            if let Some(row) = row {
                let item = ContentItem::try_from(row)?;
                let category = item.categories.first().cloned().unwrap_or_default();
                selected = Some((item, category));
            }
        } else {
            for category in &request.categories {
                let row: Option<ContentRow> = sqlx::query_as(SELECT_CANDIDATE)
                    .bind(request.kind.as_str())
                    .bind(category)
                    .bind(&account_id)
                    .bind(&window_start)
                    .fetch_optional(&self.pool)
                    .await?;
                if let Some(row) = row {
                    selected = Some((ContentItem::try_from(row)?, category.clone()));
                    break;
                }
            }
        }

        let Some((item, category)) = selected else {
            tracing::debug!(
                account_id = %request.account_id,
                phase = %request.phase,
                kind = request.kind.as_str(),
                "no content matched"
            );
            return Ok(None);
        };

        tracing::debug!(content_id = %item.id, account_id = %request.account_id, category = %category, "content selected");

        Ok(Some(ContentRef { id: item.id, kind: item.kind, category, payload: item.payload }))
    }

    async fn get_content(&self, id: Uuid) -> DomainResult<Option<ContentRef>> {
        let row: Option<ContentRow> = sqlx::query_as("SELECT * FROM content_items WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        let Some(item) = row.map(ContentItem::try_from).transpose()? else {
            return Ok(None);
        };
        let category = item.categories.first().cloned().unwrap_or_default();
        Ok(Some(ContentRef { id: item.id, kind: item.kind, category, payload: item.payload }))
    }
}

#[derive(sqlx::FromRow)]
struct ContentRow {
    id: String,
    kind: String,
    categories: String,
    payload: String,
    status: String,
    created_at: String,
}

impl TryFrom<ContentRow> for ContentItem {
    type Error = DomainError;

    fn try_from(row: ContentRow) -> Result<Self, Self::Error> {
        let kind = ContentKind::from_str(&row.kind)
            .ok_or_else(|| DomainError::SerializationError(format!("Invalid content kind: {}", row.kind)))?;
        let categories: Vec<String> = serde_json::from_str(&row.categories)?;

        Ok(ContentItem {
            id: parse_uuid(&row.id)?,
            kind,
            categories,
            payload: row.payload,
            active: row.status == "active",
            created_at: parse_datetime(&row.created_at)?,
        })
    }
}
