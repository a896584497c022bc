//! Content catalog entries and selection requests.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::catalog::ContentKind;
use super::phase::WarmupPhaseKind;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentItem {
    pub id: Uuid,
    pub kind: ContentKind,
    pub categories: Vec<String>,
    /// Image location or literal text
    pub payload: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

impl ContentItem {
    pub fn new(kind: ContentKind, categories: &[&str], payload: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            categories: categories.iter().map(ToString::to_string).collect(),
            payload: payload.into(),
            active: true,
            created_at: now,
        }
    }
}

/// Content selected for a phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentRef {
    pub id: Uuid,
    pub kind: ContentKind,
    pub category: String,
    pub payload: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentRequest {
    pub account_id: Uuid,
    pub phase: WarmupPhaseKind,
    pub kind: ContentKind,
    /// Preference order; the first category with a match wins
    pub categories: Vec<String>,
    /// Skip content this account used within this many days
    pub exclude_used_within_days: u32,
}
