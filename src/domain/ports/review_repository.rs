use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{ResolutionMethod, ReviewAnalytics, ReviewFilter, ReviewItem};

/// Repository port for the review escalation queue.
///
/// Status changes are compare-and-swap updates: losing a race returns
/// `Ok(false)` rather than an error.
#[async_trait]
pub trait ReviewRepository: Send + Sync {
    async fn get(&self, id: Uuid) -> DomainResult<Option<ReviewItem>>;

    /// Ordered by priority, then oldest failure first.
    async fn list(&self, filter: ReviewFilter) -> DomainResult<Vec<ReviewItem>>;

    /// `pending -> in_progress`.
    async fn claim(&self, id: Uuid, assigned_to: &str, now: DateTime<Utc>) -> DomainResult<bool>;

    /// `in_progress -> pending`.
    async fn release(&self, id: Uuid, now: DateTime<Utc>) -> DomainResult<bool>;

    /// Any open status `-> resolved`; clears the account review flag when no
    /// other open item remains for it.
    async fn resolve(
        &self,
        id: Uuid,
        method: ResolutionMethod,
        notes: Option<&str>,
        resolved_by: &str,
        now: DateTime<Utc>,
    ) -> DomainResult<bool>;

    /// Raise priority one step and append an audit note.
    async fn escalate(&self, id: Uuid, escalated_by: &str, notes: &str, now: DateTime<Utc>) -> DomainResult<bool>;

    async fn analytics(&self) -> DomainResult<ReviewAnalytics>;
}
