//! SQLite implementation of the AccountRepository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use uuid::Uuid;

use super::phase_repository::{insert_phases, release_in_progress_phases};
use super::{format_datetime, format_optional_datetime, parse_datetime, parse_optional_datetime, parse_optional_uuid, parse_uuid};
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    Account, LifecycleState, LifecycleSummaryEntry, StateChange, TransitionRecord, WarmupPhase,
};
use crate::domain::ports::AccountRepository;

#[derive(Clone)]
pub struct SqliteAccountRepository {
    pool: SqlitePool,
}

impl SqliteAccountRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

/// Append an audit record inside an open transaction.
pub(crate) async fn insert_transition_record(conn: &mut SqliteConnection, record: &TransitionRecord) -> DomainResult<()> {
    sqlx::query(
        r#"INSERT INTO account_state_transitions
           (account_id, from_state, to_state, reason, notes, changed_by, forced, changed_at)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?)"#,
    )
    .bind(record.account_id.to_string())
    .bind(record.from_state.as_str())
    .bind(record.to_state.as_str())
    .bind(&record.reason)
    .bind(&record.notes)
    .bind(&record.changed_by)
    .bind(record.forced)
    .bind(format_datetime(record.changed_at))
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Bind a container to an account inside an open transaction.
async fn bind_container(
    conn: &mut SqliteConnection,
    account_id: Uuid,
    container_number: i64,
    now: DateTime<Utc>,
) -> DomainResult<()> {
    sqlx::query("UPDATE device_containers SET account_id = NULL, assigned_at = NULL WHERE account_id = ? AND container_number != ?")
        .bind(account_id.to_string())
        .bind(container_number)
        .execute(&mut *conn)
        .await?;

    let result = sqlx::query(
        r#"INSERT INTO device_containers (container_number, account_id, assigned_at) VALUES (?, ?, ?)
           ON CONFLICT(container_number) DO UPDATE SET account_id = excluded.account_id, assigned_at = excluded.assigned_at
           WHERE device_containers.account_id IS NULL OR device_containers.account_id = excluded.account_id"#,
    )
    .bind(container_number)
    .bind(account_id.to_string())
    .bind(format_datetime(now))
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DomainError::ValidationFailed(format!(
            "Container {container_number} is assigned to another account"
        )));
    }
    Ok(())
}

#[async_trait]
impl AccountRepository for SqliteAccountRepository {
    async fn create(&self, account: &Account) -> DomainResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"INSERT INTO accounts (id, username, lifecycle_state, model_id, proxy_host, proxy_port,
               proxy_assigned_at, container_number, requires_human_review, is_private, last_error_message,
               last_error_at, state_changed_at, state_changed_by, state_notes, last_bot_action_by,
               last_bot_action_at, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(account.id.to_string())
        .bind(&account.username)
        .bind(account.lifecycle_state.as_str())
        .bind(account.model_id.map(|id| id.to_string()))
        .bind(&account.proxy_host)
        .bind(account.proxy_port.map(i64::from))
        .bind(format_optional_datetime(account.proxy_assigned_at))
        .bind(account.container_number)
        .bind(account.requires_human_review)
        .bind(account.is_private)
        .bind(&account.last_error_message)
        .bind(format_optional_datetime(account.last_error_at))
        .bind(format_datetime(account.state_changed_at))
        .bind(&account.state_changed_by)
        .bind(&account.state_notes)
        .bind(&account.last_bot_action_by)
        .bind(format_optional_datetime(account.last_bot_action_at))
        .bind(format_datetime(account.created_at))
        .bind(format_datetime(account.updated_at))
        .execute(&mut *tx)
        .await?;

        if let Some(container_number) = account.container_number {
            bind_container(&mut tx, account.id, container_number, account.created_at).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> DomainResult<Option<Account>> {
        let row: Option<AccountRow> = sqlx::query_as("SELECT * FROM accounts WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(Account::try_from).transpose()
    }

    async fn update_profile(&self, account: &Account) -> DomainResult<()> {
        let result = sqlx::query(
            r#"UPDATE accounts SET username = ?, model_id = ?, proxy_host = ?, proxy_port = ?,
               proxy_assigned_at = ?, updated_at = ?
               WHERE id = ?"#,
        )
        .bind(&account.username)
        .bind(account.model_id.map(|id| id.to_string()))
        .bind(&account.proxy_host)
        .bind(account.proxy_port.map(i64::from))
        .bind(format_optional_datetime(account.proxy_assigned_at))
        .bind(format_datetime(account.updated_at))
        .bind(account.id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DomainError::AccountNotFound(account.id));
        }
        Ok(())
    }

    async fn list_by_state(&self, state: LifecycleState) -> DomainResult<Vec<Account>> {
        let rows: Vec<AccountRow> = sqlx::query_as(
            "SELECT * FROM accounts WHERE lifecycle_state = ? ORDER BY state_changed_at, id",
        )
        .bind(state.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Account::try_from).collect()
    }

    async fn create_model(&self, id: Uuid, name: &str, now: DateTime<Utc>) -> DomainResult<()> {
        sqlx::query("INSERT INTO models (id, name, created_at) VALUES (?, ?, ?)")
            .bind(id.to_string())
            .bind(name)
            .bind(format_datetime(now))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn model_exists(&self, id: Uuid) -> DomainResult<bool> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM models WHERE id = ?")
            .bind(id.to_string())
            .fetch_one(&self.pool)
            .await?;
        Ok(count > 0)
    }

    async fn assign_container(&self, account_id: Uuid, container_number: i64, now: DateTime<Utc>) -> DomainResult<()> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query("UPDATE accounts SET container_number = ?, updated_at = ? WHERE id = ?")
            .bind(container_number)
            .bind(format_datetime(now))
            .bind(account_id.to_string())
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(DomainError::AccountNotFound(account_id));
        }

        bind_container(&mut tx, account_id, container_number, now).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn container_holder(&self, container_number: i64) -> DomainResult<Option<Uuid>> {
        let row: Option<(Option<String>,)> =
            sqlx::query_as("SELECT account_id FROM device_containers WHERE container_number = ?")
                .bind(container_number)
                .fetch_optional(&self.pool)
                .await?;

        parse_optional_uuid(row.and_then(|(id,)| id))
    }

    async fn apply_state_change(&self, change: &StateChange, initial_phases: &[WarmupPhase]) -> DomainResult<()> {
        let record = &change.record;
        let release_columns = if change.release_resources {
            ", container_number = NULL, proxy_host = NULL, proxy_port = NULL, proxy_assigned_at = NULL"
        } else {
            ""
        };
        let sql = format!(
            "UPDATE accounts SET lifecycle_state = ?, state_changed_at = ?, state_changed_by = ?, state_notes = ?, updated_at = ?{release_columns} WHERE id = ? AND lifecycle_state = ?"
        );

        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(&sql)
            .bind(record.to_state.as_str())
            .bind(format_datetime(record.changed_at))
            .bind(&record.changed_by)
            .bind(&record.notes)
            .bind(format_datetime(record.changed_at))
            .bind(change.account_id.to_string())
            .bind(change.expected.as_str())
            .execute(&mut *tx)
            .await?;

        if result.rows_affected() == 0 {
            let exists: Option<(String,)> = sqlx::query_as("SELECT lifecycle_state FROM accounts WHERE id = ?")
                .bind(change.account_id.to_string())
                .fetch_optional(&mut *tx)
                .await?;
            tx.rollback().await?;
            return Err(match exists {
                None => DomainError::AccountNotFound(change.account_id),
                Some(_) => DomainError::ConcurrencyConflict {
                    entity: "account".to_string(),
                    id: change.account_id.to_string(),
                },
            });
        }

        if change.release_resources {
            sqlx::query("UPDATE device_containers SET account_id = NULL, assigned_at = NULL WHERE account_id = ?")
                .bind(change.account_id.to_string())
                .execute(&mut *tx)
                .await?;
        }

        if !record.to_state.accepts_bot_work() {
            release_in_progress_phases(&mut tx, change.account_id, record.changed_at).await?;
        }

        insert_transition_record(&mut tx, record).await?;

        if !initial_phases.is_empty() {
            insert_phases(&mut tx, initial_phases).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn history(&self, account_id: Uuid) -> DomainResult<Vec<TransitionRecord>> {
        let rows: Vec<TransitionRow> = sqlx::query_as(
            r#"SELECT account_id, from_state, to_state, reason, notes, changed_by, forced, changed_at
               FROM account_state_transitions WHERE account_id = ? ORDER BY changed_at, id"#,
        )
        .bind(account_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TransitionRecord::try_from).collect()
    }

    async fn lifecycle_summary(&self) -> DomainResult<Vec<LifecycleSummaryEntry>> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT lifecycle_state, COUNT(*) FROM accounts GROUP BY lifecycle_state",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut summary = Vec::new();
        for state in LifecycleState::ALL {
            let count = rows.iter().find(|(s, _)| s == state.as_str()).map_or(0, |(_, c)| *c);
            summary.push(LifecycleSummaryEntry { state, count });
        }
        Ok(summary)
    }

    async fn mark_private(&self, account_id: Uuid, now: DateTime<Utc>) -> DomainResult<()> {
        let result = sqlx::query("UPDATE accounts SET is_private = 1, updated_at = ? WHERE id = ?")
            .bind(format_datetime(now))
            .bind(account_id.to_string())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DomainError::AccountNotFound(account_id));
        }
        Ok(())
    }
}

#[derive(sqlx::FromRow)]
struct AccountRow {
    id: String,
    username: String,
    lifecycle_state: String,
    model_id: Option<String>,
    proxy_host: Option<String>,
    proxy_port: Option<i64>,
    proxy_assigned_at: Option<String>,
    container_number: Option<i64>,
    requires_human_review: bool,
    is_private: bool,
    last_error_message: Option<String>,
    last_error_at: Option<String>,
    state_changed_at: String,
    state_changed_by: Option<String>,
    state_notes: Option<String>,
    last_bot_action_by: Option<String>,
    last_bot_action_at: Option<String>,
    created_at: String,
    updated_at: String,
}

impl TryFrom<AccountRow> for Account {
    type Error = DomainError;

    fn try_from(row: AccountRow) -> Result<Self, Self::Error> {
        let lifecycle_state = LifecycleState::from_str(&row.lifecycle_state)
            .ok_or_else(|| DomainError::SerializationError(format!("Invalid lifecycle state: {}", row.lifecycle_state)))?;

        let proxy_port = row
            .proxy_port
            .map(u16::try_from)
            .transpose()
            .map_err(|e| DomainError::SerializationError(format!("Invalid proxy port: {e}")))?;

        Ok(Account {
            id: parse_uuid(&row.id)?,
            username: row.username,
            lifecycle_state,
            model_id: parse_optional_uuid(row.model_id)?,
            proxy_host: row.proxy_host,
            proxy_port,
            proxy_assigned_at: parse_optional_datetime(row.proxy_assigned_at)?,
            container_number: row.container_number,
            requires_human_review: row.requires_human_review,
            is_private: row.is_private,
            last_error_message: row.last_error_message,
            last_error_at: parse_optional_datetime(row.last_error_at)?,
            state_changed_at: parse_datetime(&row.state_changed_at)?,
            state_changed_by: row.state_changed_by,
            state_notes: row.state_notes,
            last_bot_action_by: row.last_bot_action_by,
            last_bot_action_at: parse_optional_datetime(row.last_bot_action_at)?,
            created_at: parse_datetime(&row.created_at)?,
            updated_at: parse_datetime(&row.updated_at)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct TransitionRow {
    account_id: String,
    from_state: String,
    to_state: String,
    reason: Option<String>,
    notes: Option<String>,
    changed_by: String,
    forced: bool,
    changed_at: String,
}

impl TryFrom<TransitionRow> for TransitionRecord {
    type Error = DomainError;

    fn try_from(row: TransitionRow) -> Result<Self, Self::Error> {
        let parse_state = |s: &str| {
            LifecycleState::from_str(s)
                .ok_or_else(|| DomainError::SerializationError(format!("Invalid lifecycle state: {s}")))
        };

        Ok(TransitionRecord {
            account_id: parse_uuid(&row.account_id)?,
            from_state: parse_state(&row.from_state)?,
            to_state: parse_state(&row.to_state)?,
            reason: row.reason,
            notes: row.notes,
            changed_by: row.changed_by,
            forced: row.forced,
            changed_at: parse_datetime(&row.changed_at)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::create_migrated_test_pool;

    async fn setup_test_repo() -> SqliteAccountRepository {
        let pool = create_migrated_test_pool().await.unwrap();
        SqliteAccountRepository::new(pool)
    }

    #[tokio::test]
    async fn test_create_and_get_account() {
        let repo = setup_test_repo().await;
        let account = Account::new("warm_user", Utc::now()).with_proxy("10.0.0.1", 3128).with_container(4);

        repo.create(&account).await.unwrap();

        let retrieved = repo.get(account.id).await.unwrap().unwrap();
        assert_eq!(retrieved.username, "warm_user");
        assert_eq!(retrieved.proxy_port, Some(3128));
        assert_eq!(retrieved.lifecycle_state, LifecycleState::Imported);
        assert_eq!(repo.container_holder(4).await.unwrap(), Some(account.id));
    }

    #[tokio::test]
    async fn test_container_cannot_be_shared() {
        let repo = setup_test_repo().await;
        let first = Account::new("first_user", Utc::now()).with_container(1);
        let second = Account::new("second_user", Utc::now());
        repo.create(&first).await.unwrap();
        repo.create(&second).await.unwrap();

        let err = repo.assign_container(second.id, 1, Utc::now()).await.unwrap_err();
        assert!(matches!(err, DomainError::ValidationFailed(_)));

        repo.assign_container(second.id, 2, Utc::now()).await.unwrap();
        assert_eq!(repo.get(second.id).await.unwrap().unwrap().container_number, Some(2));
    }

    #[tokio::test]
    async fn test_state_change_compare_and_swap() {
        let repo = setup_test_repo().await;
        let account = Account::new("warm_user", Utc::now());
        repo.create(&account).await.unwrap();

        let record = TransitionRecord {
            account_id: account.id,
            from_state: LifecycleState::Imported,
            to_state: LifecycleState::Ready,
            reason: Some("setup".into()),
            notes: None,
            changed_by: "ops".into(),
            forced: false,
            changed_at: Utc::now(),
        };
        let change = StateChange {
            account_id: account.id,
            expected: LifecycleState::Imported,
            record: record.clone(),
            release_resources: false,
        };

        repo.apply_state_change(&change, &[]).await.unwrap();
        let err = repo.apply_state_change(&change, &[]).await.unwrap_err();
        assert!(matches!(err, DomainError::ConcurrencyConflict { .. }));

        let history = repo.history(account.id).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].to_state, LifecycleState::Ready);
    }

    #[tokio::test]
    async fn test_lifecycle_summary_counts_all_states() {
        let repo = setup_test_repo().await;
        repo.create(&Account::new("one_user", Utc::now())).await.unwrap();
        repo.create(&Account::new("two_user", Utc::now())).await.unwrap();

        let summary = repo.lifecycle_summary().await.unwrap();
        assert_eq!(summary.len(), LifecycleState::ALL.len());
        let imported = summary.iter().find(|e| e.state == LifecycleState::Imported).unwrap();
        assert_eq!(imported.count, 2);
    }
}
