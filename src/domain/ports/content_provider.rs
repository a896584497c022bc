use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{ContentRef, ContentRequest};

/// Selects content for a phase.
///
/// Selection is read-only. Usage is recorded by the phase claim that consumes
/// the content, so two concurrent selections may return the same item.
#[async_trait]
pub trait ContentProvider: Send + Sync {
    async fn select_content(&self, request: &ContentRequest, now: DateTime<Utc>) -> DomainResult<Option<ContentRef>>;

    async fn get_content(&self, id: Uuid) -> DomainResult<Option<ContentRef>>;
}
