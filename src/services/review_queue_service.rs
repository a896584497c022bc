//! Human review queue for escalated phases.

use std::sync::Arc;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    FailureCategory, PhaseStatus, PriorityLevel, ResolutionMethod, ReviewAnalytics, ReviewFilter, ReviewItem,
    WarmupPhaseKind,
};
use crate::domain::ports::{Clock, PhaseRepository, ReviewRepository};

pub struct ReviewQueueService {
    reviews: Arc<dyn ReviewRepository>,
    phases: Arc<dyn PhaseRepository>,
    clock: Arc<dyn Clock>,
}

impl ReviewQueueService {
    pub fn new(reviews: Arc<dyn ReviewRepository>, phases: Arc<dyn PhaseRepository>, clock: Arc<dyn Clock>) -> Self {
        Self { reviews, phases, clock }
    }

    pub async fn get(&self, review_id: Uuid) -> DomainResult<ReviewItem> {
        self.reviews.get(review_id).await?.ok_or(DomainError::ReviewNotFound(review_id))
    }

    pub async fn list(&self, filter: ReviewFilter) -> DomainResult<Vec<ReviewItem>> {
        self.reviews.list(filter).await
    }

    /// Take an item for review; `false` if someone else got it first.
    pub async fn claim(&self, review_id: Uuid, assigned_to: &str) -> DomainResult<bool> {
        let claimed = self.reviews.claim(review_id, assigned_to, self.clock.now()).await?;
        if claimed {
            tracing::info!(review_id = %review_id, assigned_to = %assigned_to, "review claimed");
        }
        Ok(claimed)
    }

    pub async fn release(&self, review_id: Uuid) -> DomainResult<bool> {
        self.reviews.release(review_id, self.clock.now()).await
    }

    /// Record the operator's decision. Does not act on the phase itself.
    pub async fn resolve(
        &self,
        review_id: Uuid,
        method: ResolutionMethod,
        notes: Option<&str>,
        resolved_by: &str,
    ) -> DomainResult<bool> {
        self.reviews.resolve(review_id, method, notes, resolved_by, self.clock.now()).await
    }

    pub async fn escalate(&self, review_id: Uuid, escalated_by: &str, notes: &str) -> DomainResult<bool> {
        self.reviews.escalate(review_id, escalated_by, notes, self.clock.now()).await
    }

    /// Open a review by hand, forcing the phase into `requires_review`.
    pub async fn create_manual_review(
        &self,
        account_id: Uuid,
        phase: WarmupPhaseKind,
        failure_type: FailureCategory,
        message: &str,
        created_by: &str,
    ) -> DomainResult<ReviewItem> {
        let row = self.phases.get(account_id, phase).await?.ok_or_else(|| DomainError::PhaseNotFound {
            account_id,
            phase: phase.as_str().to_string(),
        })?;
        if row.status == PhaseStatus::Completed {
            return Err(DomainError::PhaseNotAvailable {
                phase: phase.as_str().to_string(),
                status: row.status.as_str().to_string(),
            });
        }

        let active_bot = if row.status == PhaseStatus::InProgress { row.bot_id.clone() } else { None };
        let now = self.clock.now();
        let item = ReviewItem::new(
            row.id,
            account_id,
            phase.as_str(),
            failure_type,
            message,
            PriorityLevel::for_failure(failure_type, false),
            now,
        )
        .with_bot(active_bot, row.retry_count);

        self.phases.escalate_to_review(&item, now).await?;
        tracing::info!(
            review_id = %item.id,
            account_id = %account_id,
            phase = %phase,
            created_by = %created_by,
            "manual review created"
        );
        Ok(item)
    }

    pub async fn analytics(&self) -> DomainResult<ReviewAnalytics> {
        self.reviews.analytics().await
    }
}
