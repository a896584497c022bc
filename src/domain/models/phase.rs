//! Warmup phase domain model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use uuid::Uuid;

use super::account::LifecycleState;

/// Identifier of a warmup phase, in catalog order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarmupPhaseKind {
    ManualSetup,
    Bio,
    Gender,
    Name,
    Username,
    FirstHighlight,
    NewHighlight,
    PostCaption,
    PostNoCaption,
    StoryCaption,
    StoryNoCaption,
}

impl WarmupPhaseKind {
    pub const ALL: [WarmupPhaseKind; 11] = [
        Self::ManualSetup,
        Self::Bio,
        Self::Gender,
        Self::Name,
        Self::Username,
        Self::FirstHighlight,
        Self::NewHighlight,
        Self::PostCaption,
        Self::PostNoCaption,
        Self::StoryCaption,
        Self::StoryNoCaption,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ManualSetup => "manual_setup",
            Self::Bio => "bio",
            Self::Gender => "gender",
            Self::Name => "name",
            Self::Username => "username",
            Self::FirstHighlight => "first_highlight",
            Self::NewHighlight => "new_highlight",
            Self::PostCaption => "post_caption",
            Self::PostNoCaption => "post_no_caption",
            Self::StoryCaption => "story_caption",
            Self::StoryNoCaption => "story_no_caption",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == s.to_lowercase())
    }
}

impl fmt::Display for WarmupPhaseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of a single (account, phase) row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    /// Waiting on cooldown or dependencies
    Pending,
    /// Eligible to be started by a bot
    Available,
    /// Claimed and executing
    InProgress,
    Completed,
    /// Failed, eligible for retry after cooldown
    Failed,
    /// Escalated to the human review queue
    RequiresReview,
}

impl Default for PhaseStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl PhaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Available => "available",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::RequiresReview => "requires_review",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "available" => Some(Self::Available),
            "in_progress" => Some(Self::InProgress),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "requires_review" => Some(Self::RequiresReview),
            _ => None,
        }
    }

    pub fn valid_transitions(&self) -> Vec<PhaseStatus> {
        match self {
            Self::Pending => vec![Self::Available],
            Self::Available => vec![Self::InProgress],
            Self::InProgress => vec![Self::Completed, Self::Failed, Self::RequiresReview],
            Self::Completed => vec![],
            Self::Failed => vec![Self::Available],
            Self::RequiresReview => vec![],
        }
    }

    pub fn can_transition_to(&self, new_status: Self) -> bool {
        self.valid_transitions().contains(&new_status)
    }

    /// Statuses from which a row may be promoted to `available`.
    pub fn awaits_eligibility(&self) -> bool {
        matches!(self, Self::Pending | Self::Failed)
    }
}

impl fmt::Display for PhaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classification of an execution failure reported by the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    BotError,
    InstagramChallenge,
    ContentRejection,
    Captcha,
    RateLimit,
    AccountSuspended,
    NetworkError,
    Timeout,
    Other,
}

impl Default for FailureCategory {
    fn default() -> Self {
        Self::BotError
    }
}

impl FailureCategory {
    pub const ALL: [FailureCategory; 9] = [
        Self::BotError,
        Self::InstagramChallenge,
        Self::ContentRejection,
        Self::Captcha,
        Self::RateLimit,
        Self::AccountSuspended,
        Self::NetworkError,
        Self::Timeout,
        Self::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BotError => "bot_error",
            Self::InstagramChallenge => "instagram_challenge",
            Self::ContentRejection => "content_rejection",
            Self::Captcha => "captcha",
            Self::RateLimit => "rate_limit",
            Self::AccountSuspended => "account_suspended",
            Self::NetworkError => "network_error",
            Self::Timeout => "timeout",
            Self::Other => "other",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == s.to_lowercase())
    }

    /// Default policy set of categories that escalate immediately.
    pub fn default_non_retryable() -> Vec<FailureCategory> {
        vec![Self::InstagramChallenge, Self::AccountSuspended, Self::Captcha]
    }
}

impl fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row per (account, phase).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarmupPhase {
    pub id: Uuid,
    pub account_id: Uuid,
    pub phase: WarmupPhaseKind,
    pub phase_order: i64,
    pub status: PhaseStatus,
    pub available_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub assigned_content_id: Option<Uuid>,
    pub assigned_text_id: Option<Uuid>,
    pub content_assigned_at: Option<DateTime<Utc>>,
    pub bot_id: Option<String>,
    pub session_id: Option<String>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub failure_category: Option<FailureCategory>,
    pub error_message: Option<String>,
    pub error_details: Option<serde_json::Value>,
    pub execution_time_ms: Option<i64>,
    pub automation_response: Option<serde_json::Value>,
    pub review_required_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WarmupPhase {
    pub fn new(
        account_id: Uuid,
        phase: WarmupPhaseKind,
        phase_order: i64,
        available_at: DateTime<Utc>,
        max_retries: u32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            account_id,
            phase,
            phase_order,
            status: PhaseStatus::Pending,
            available_at,
            started_at: None,
            completed_at: None,
            assigned_content_id: None,
            assigned_text_id: None,
            content_assigned_at: None,
            bot_id: None,
            session_id: None,
            retry_count: 0,
            max_retries,
            failure_category: None,
            error_message: None,
            error_details: None,
            execution_time_ms: None,
            automation_response: None,
            review_required_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn has_content(&self) -> bool {
        self.assigned_content_id.is_some() || self.assigned_text_id.is_some()
    }
}

/// Derive whether a row is eligible to become `available`.
///
/// Eligible when the row awaits eligibility, its `available_at` has passed and
/// every dependency is completed.
pub fn is_eligible(
    phase: &WarmupPhase,
    dependencies: &[WarmupPhaseKind],
    completed: &HashSet<WarmupPhaseKind>,
    now: DateTime<Utc>,
) -> bool {
    phase.status.awaits_eligibility()
        && phase.available_at <= now
        && dependencies.iter().all(|dep| completed.contains(dep))
}

/// Outcome of applying the escalation rule to a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureDisposition {
    /// Back to `failed`, retry-eligible after the retry cooldown
    Retry,
    /// Escalated to `requires_review`
    Escalate,
}

/// Retry policy: which failures escalate immediately.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub non_retryable: Vec<FailureCategory>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { non_retryable: FailureCategory::default_non_retryable() }
    }
}

impl RetryPolicy {
    /// Escalate when forced, when the category is non-retryable, or when this
    /// failure exhausts the retry budget.
    pub fn disposition(
        &self,
        category: FailureCategory,
        retry_count: u32,
        max_retries: u32,
        force_escalate: bool,
    ) -> FailureDisposition {
        if force_escalate
            || self.non_retryable.contains(&category)
            || retry_count.saturating_add(1) >= max_retries
        {
            FailureDisposition::Escalate
        } else {
            FailureDisposition::Retry
        }
    }
}

/// A failure report from the dispatcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseFailure {
    pub error_message: String,
    pub details: Option<serde_json::Value>,
    pub category: FailureCategory,
    pub force_escalate: bool,
}

impl PhaseFailure {
    pub fn new(error_message: impl Into<String>, category: FailureCategory) -> Self {
        Self { error_message: error_message.into(), details: None, category, force_escalate: false }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn escalated(mut self) -> Self {
        self.force_escalate = true;
        self
    }
}

/// Result of recording a failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureOutcome {
    pub phase: WarmupPhase,
    pub disposition: FailureDisposition,
    pub review_id: Option<Uuid>,
}

/// Result of recording a completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionOutcome {
    pub phase: WarmupPhase,
    /// All bot phases complete; the account was promoted to `active`.
    pub warmup_complete: bool,
    pub username_updated: Option<String>,
}

/// Aggregate view of one account's warmup progress.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarmupStatusSummary {
    pub account_id: Uuid,
    pub total_phases: usize,
    pub completed_phases: usize,
    pub available_phases: usize,
    pub in_progress_phases: usize,
    pub failed_phases: usize,
    pub review_phases: usize,
    pub progress_percent: f64,
    pub is_complete: bool,
    pub phases: Vec<WarmupPhase>,
}

/// Entry of the cross-account queue of accounts with bot work ready.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadyAccount {
    pub account_id: Uuid,
    pub username: String,
    pub model_id: Option<Uuid>,
    pub container_number: i64,
    pub lifecycle_state: LifecycleState,
    pub total_phases: i64,
    pub completed_phases: i64,
    pub ready_phases: i64,
}

/// Per-phase statistics across all accounts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseStatistics {
    pub phase: String,
    pub total: i64,
    pub completed: i64,
    pub failed: i64,
    pub requires_review: i64,
    pub avg_execution_time_ms: Option<f64>,
}

/// Global warmup statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarmupStatistics {
    pub total_phases: i64,
    pub completed_phases: i64,
    pub failed_phases: i64,
    pub phases_requiring_review: i64,
    pub in_progress_phases: i64,
    pub success_rate: f64,
    pub avg_execution_time_ms: Option<f64>,
    pub by_phase: Vec<PhaseStatistics>,
}
