use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{
    CompletionOutcome, FailureOutcome, PhaseFailure, PhaseStatus, ReadyAccount, ReviewItem, RetryPolicy,
    WarmupPhase, WarmupPhaseKind, WarmupStatistics,
};

/// Claim of an available phase by a bot.
#[derive(Debug, Clone)]
pub struct ClaimRequest {
    pub account_id: Uuid,
    pub phase: WarmupPhaseKind,
    pub bot_id: String,
    pub session_id: String,
    pub now: DateTime<Utc>,
    /// Slot lease expiry written on a successful claim
    pub lease_until: DateTime<Utc>,
    /// Newly selected image, assigned and recorded as used only if the claim wins
    pub image: Option<Uuid>,
    /// Newly selected text, assigned and recorded as used only if the claim wins
    pub text: Option<Uuid>,
}

/// Cooldown applied to the phase after the one being completed.
#[derive(Debug, Clone, Copy)]
pub struct NextPhaseCooldown {
    pub phase: WarmupPhaseKind,
    pub cooldown: Duration,
}

/// Cross-account lookup of accounts with bot work ready now.
#[derive(Debug, Clone)]
pub struct ReadyQuery {
    pub model_id: Option<Uuid>,
    pub limit: u32,
    /// Phases a bot may run, each with the phases it depends on
    pub phases: Vec<(WarmupPhaseKind, Vec<WarmupPhaseKind>)>,
    pub now: DateTime<Utc>,
}

/// Everything the storage layer needs to record a completion atomically.
#[derive(Debug, Clone)]
pub struct CompletionRecord {
    pub account_id: Uuid,
    pub phase: WarmupPhaseKind,
    /// Ownership check; `None` for operator completion outside the bot path
    pub bot_id: Option<String>,
    pub completed_by: String,
    pub execution_time_ms: Option<i64>,
    pub response: Option<serde_json::Value>,
    pub new_username: Option<String>,
    pub next_phase: Option<NextPhaseCooldown>,
    /// Phases that must all be completed for warmup to be done
    pub bot_phases: Vec<WarmupPhaseKind>,
    pub now: DateTime<Utc>,
}

/// Everything the storage layer needs to record a failure atomically.
#[derive(Debug, Clone)]
pub struct FailureRecord {
    pub account_id: Uuid,
    pub phase: WarmupPhaseKind,
    pub bot_id: String,
    pub failure: PhaseFailure,
    pub policy: RetryPolicy,
    /// When a retry-eligible failure becomes eligible again
    pub retry_available_at: DateTime<Utc>,
    pub now: DateTime<Utc>,
}

/// Repository port for warmup phase rows and their compound transitions.
#[async_trait]
pub trait PhaseRepository: Send + Sync {
    /// Insert rows that do not exist yet; returns how many were created.
    async fn initialize(&self, phases: &[WarmupPhase]) -> DomainResult<u64>;

    async fn get(&self, account_id: Uuid, phase: WarmupPhaseKind) -> DomainResult<Option<WarmupPhase>>;

    /// All rows of an account in catalog order.
    async fn list_for_account(&self, account_id: Uuid) -> DomainResult<Vec<WarmupPhase>>;

    /// Persist the derived `available` status if the row is still `expected`.
    async fn mark_available(&self, phase_id: Uuid, expected: PhaseStatus, now: DateTime<Utc>) -> DomainResult<bool>;

    /// Claim the global bot slot and the phase row in one transaction.
    ///
    /// Rejects with `BotConstraintViolation` when another bot holds the slot
    /// or has a phase in progress, and `PhaseNotAvailable` when the row is not
    /// `available`. Content named in the request is assigned and its usage
    /// recorded in the same transaction.
    async fn claim(&self, request: &ClaimRequest) -> DomainResult<WarmupPhase>;

    /// Record success, cooldown bump, username propagation, session counters,
    /// slot release and warmup promotion in one transaction.
    ///
    /// Bot completions are rejected with `AccountNotAcceptingWork` once the
    /// account has left the bot-workable states. Operator completions resolve
    /// any open review of the phase.
    async fn record_completion(&self, record: &CompletionRecord) -> DomainResult<CompletionOutcome>;

    /// Record a failure applying the escalation rule; escalation flags the
    /// account and creates the review item in the same transaction.
    async fn record_failure(&self, record: &FailureRecord) -> DomainResult<FailureOutcome>;

    /// Operator reset of a failed or escalated phase; the only path that
    /// lowers `retry_count`.
    async fn reset_for_retry(
        &self,
        account_id: Uuid,
        phase: WarmupPhaseKind,
        now: DateTime<Utc>,
    ) -> DomainResult<WarmupPhase>;

    /// Force a phase into review and create the review item.
    async fn escalate_to_review(&self, review: &ReviewItem, now: DateTime<Utc>) -> DomainResult<()>;

    /// Rows currently `in_progress` anywhere.
    async fn in_progress(&self) -> DomainResult<Vec<WarmupPhase>>;

    /// Rows `in_progress` since before `cutoff`.
    async fn stale_in_progress(&self, cutoff: DateTime<Utc>) -> DomainResult<Vec<WarmupPhase>>;

    async fn statistics(&self) -> DomainResult<WarmupStatistics>;

    /// Accounts with a container and at least one ready phase, most ready
    /// phases first, then least completed.
    async fn ready_accounts(&self, query: &ReadyQuery) -> DomainResult<Vec<ReadyAccount>>;
}
