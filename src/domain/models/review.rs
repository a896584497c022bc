//! Review escalation queue domain model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

use super::phase::FailureCategory;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    Pending,
    InProgress,
    Escalated,
    Resolved,
}

impl Default for ReviewStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl ReviewStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Escalated => "escalated",
            Self::Resolved => "resolved",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "in_progress" => Some(Self::InProgress),
            "escalated" => Some(Self::Escalated),
            "resolved" => Some(Self::Resolved),
            _ => None,
        }
    }

    pub fn is_open(&self) -> bool {
        !matches!(self, Self::Resolved)
    }
}

impl fmt::Display for ReviewStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operator decision recorded on resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionMethod {
    RetryBot,
    ManualCompletion,
    SkipPhase,
    ResetAccount,
    ChangeContent,
    EscalateSupport,
    Other,
}

impl ResolutionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RetryBot => "retry_bot",
            Self::ManualCompletion => "manual_completion",
            Self::SkipPhase => "skip_phase",
            Self::ResetAccount => "reset_account",
            Self::ChangeContent => "change_content",
            Self::EscalateSupport => "escalate_support",
            Self::Other => "other",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "retry_bot" => Some(Self::RetryBot),
            "manual_completion" => Some(Self::ManualCompletion),
            "skip_phase" => Some(Self::SkipPhase),
            "reset_account" => Some(Self::ResetAccount),
            "change_content" => Some(Self::ChangeContent),
            "escalate_support" => Some(Self::EscalateSupport),
            "other" => Some(Self::Other),
            _ => None,
        }
    }

    /// Whether the resolution counts as a successful fix for analytics.
    pub fn is_successful(&self) -> bool {
        !matches!(self, Self::EscalateSupport | Self::Other)
    }
}

impl fmt::Display for ResolutionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Numerically lower is more urgent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PriorityLevel {
    Urgent = 1,
    High = 2,
    Normal = 3,
}

impl PriorityLevel {
    pub fn as_i64(self) -> i64 {
        self as i64
    }

    pub fn from_i64(level: i64) -> Self {
        match level {
            i64::MIN..=1 => Self::Urgent,
            2 => Self::High,
            _ => Self::Normal,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Urgent => "urgent",
            Self::High => "high",
            Self::Normal => "normal",
        }
    }

    /// One step more urgent, saturating at urgent.
    pub fn raised(self) -> Self {
        Self::from_i64((self.as_i64() - 1).max(1))
    }

    /// Initial priority for an escalated failure.
    pub fn for_failure(category: FailureCategory, retries_exhausted: bool) -> Self {
        match category {
            FailureCategory::AccountSuspended | FailureCategory::InstagramChallenge => Self::Urgent,
            FailureCategory::Captcha | FailureCategory::ContentRejection => Self::High,
            _ if retries_exhausted => Self::High,
            _ => Self::Normal,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewItem {
    pub id: Uuid,
    pub phase_id: Uuid,
    pub account_id: Uuid,
    pub phase: String,
    pub failure_type: FailureCategory,
    pub failure_message: String,
    pub original_bot_id: Option<String>,
    pub retry_count_before_review: u32,
    pub priority_level: PriorityLevel,
    pub review_status: ReviewStatus,
    pub assigned_to: Option<String>,
    pub resolution_method: Option<ResolutionMethod>,
    pub resolution_notes: Option<String>,
    pub resolved_by: Option<String>,
    pub escalation_count: u32,
    pub failed_at: DateTime<Utc>,
    pub review_started_at: Option<DateTime<Utc>>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ReviewItem {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        phase_id: Uuid,
        account_id: Uuid,
        phase: impl Into<String>,
        failure_type: FailureCategory,
        failure_message: impl Into<String>,
        priority_level: PriorityLevel,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            phase_id,
            account_id,
            phase: phase.into(),
            failure_type,
            failure_message: failure_message.into(),
            original_bot_id: None,
            retry_count_before_review: 0,
            priority_level,
            review_status: ReviewStatus::Pending,
            assigned_to: None,
            resolution_method: None,
            resolution_notes: None,
            resolved_by: None,
            escalation_count: 0,
            failed_at: now,
            review_started_at: None,
            resolved_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_bot(mut self, bot_id: Option<String>, retry_count: u32) -> Self {
        self.original_bot_id = bot_id;
        self.retry_count_before_review = retry_count;
        self
    }
}

/// Format the audit note appended on escalation.
pub fn escalation_note(escalated_by: &str, notes: &str) -> String {
    format!("[ESCALATED by {escalated_by}]: {notes}")
}

#[derive(Debug, Clone, Default)]
pub struct ReviewFilter {
    pub status: Option<ReviewStatus>,
    pub account_id: Option<Uuid>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// Aggregate review queue statistics; observability only.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReviewAnalytics {
    pub total: i64,
    pub by_status: BTreeMap<String, i64>,
    pub by_failure_type: BTreeMap<String, i64>,
    pub by_priority: BTreeMap<String, i64>,
    pub resolved: i64,
    pub resolved_successfully: i64,
    pub success_rate: f64,
    pub avg_resolution_minutes: Option<f64>,
    pub avg_successful_resolution_minutes: Option<f64>,
}
