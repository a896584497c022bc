use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{
    Account, LifecycleState, LifecycleSummaryEntry, StateChange, TransitionRecord, WarmupPhase,
};

/// Repository port for account lifecycle persistence.
#[async_trait]
pub trait AccountRepository: Send + Sync {
    async fn create(&self, account: &Account) -> DomainResult<()>;

    async fn get(&self, id: Uuid) -> DomainResult<Option<Account>>;

    /// Update profile and resource fields; lifecycle state is untouched.
    async fn update_profile(&self, account: &Account) -> DomainResult<()>;

    async fn list_by_state(&self, state: LifecycleState) -> DomainResult<Vec<Account>>;

    async fn create_model(&self, id: Uuid, name: &str, now: DateTime<Utc>) -> DomainResult<()>;

    async fn model_exists(&self, id: Uuid) -> DomainResult<bool>;

    /// Bind a device container to an account, releasing any previous binding.
    async fn assign_container(&self, account_id: Uuid, container_number: i64, now: DateTime<Utc>) -> DomainResult<()>;

    /// Account currently bound to a container, if any.
    async fn container_holder(&self, container_number: i64) -> DomainResult<Option<Uuid>>;

    /// Apply a lifecycle change atomically.
    ///
    /// Compare-and-swap on the expected state, audit insert, optional release
    /// of container and proxy, and insertion of any initial phase rows all
    /// commit together. Leaving the bot-workable states returns in-progress
    /// phases to `pending` and frees the slot of a bot left idle. Fails with
    /// `ConcurrencyConflict` if the state moved.
    async fn apply_state_change(&self, change: &StateChange, initial_phases: &[WarmupPhase]) -> DomainResult<()>;

    async fn history(&self, account_id: Uuid) -> DomainResult<Vec<TransitionRecord>>;

    async fn lifecycle_summary(&self) -> DomainResult<Vec<LifecycleSummaryEntry>>;

    async fn mark_private(&self, account_id: Uuid, now: DateTime<Utc>) -> DomainResult<()>;
}
