//! Account lifecycle domain model.
//!
//! The lifecycle is a coarse state machine over the whole account, independent
//! of the fine-grained warmup phase progress. Transitions follow a fixed
//! adjacency table; each target state carries a static set of prerequisite
//! rules that must hold before a non-forced transition is allowed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Coarse-grained account lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Imported,
    Ready,
    ReadyForBotAssignment,
    Warmup,
    Active,
    Paused,
    Cleanup,
    Maintenance,
    Archived,
}

impl Default for LifecycleState {
    fn default() -> Self {
        Self::Imported
    }
}

impl LifecycleState {
    pub const ALL: [LifecycleState; 9] = [
        Self::Imported,
        Self::Ready,
        Self::ReadyForBotAssignment,
        Self::Warmup,
        Self::Active,
        Self::Paused,
        Self::Cleanup,
        Self::Maintenance,
        Self::Archived,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Imported => "imported",
            Self::Ready => "ready",
            Self::ReadyForBotAssignment => "ready_for_bot_assignment",
            Self::Warmup => "warmup",
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Cleanup => "cleanup",
            Self::Maintenance => "maintenance",
            Self::Archived => "archived",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "imported" => Some(Self::Imported),
            "ready" => Some(Self::Ready),
            "ready_for_bot_assignment" => Some(Self::ReadyForBotAssignment),
            "warmup" => Some(Self::Warmup),
            "active" => Some(Self::Active),
            "paused" => Some(Self::Paused),
            "cleanup" => Some(Self::Cleanup),
            "maintenance" => Some(Self::Maintenance),
            "archived" => Some(Self::Archived),
            _ => None,
        }
    }

    /// Valid (non-forced) transitions from this state.
    pub fn valid_transitions(&self) -> Vec<LifecycleState> {
        match self {
            Self::Imported => vec![Self::Ready, Self::Archived],
            Self::Ready => vec![Self::ReadyForBotAssignment, Self::Warmup, Self::Archived],
            Self::ReadyForBotAssignment => vec![Self::Warmup, Self::Archived],
            Self::Warmup => vec![Self::Maintenance, Self::Paused, Self::Archived],
            Self::Active => vec![Self::Paused, Self::Cleanup, Self::Archived],
            Self::Paused => vec![Self::Active, Self::Cleanup, Self::Archived],
            Self::Cleanup => vec![Self::Ready, Self::Archived],
            Self::Maintenance => vec![Self::Paused, Self::Cleanup, Self::Archived],
            Self::Archived => vec![],
        }
    }

    pub fn can_transition_to(&self, target: Self) -> bool {
        self.valid_transitions().contains(&target)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Archived)
    }

    /// States in which bots may execute warmup phases.
    pub fn accepts_bot_work(&self) -> bool {
        matches!(self, Self::Ready | Self::ReadyForBotAssignment | Self::Warmup)
    }

    /// Entering these states creates the warmup phase rows.
    pub fn initializes_phases(&self) -> bool {
        matches!(self, Self::Ready | Self::Warmup)
    }

    /// Prerequisite rules checked before entering this state.
    pub fn requirements(&self) -> StateRequirements {
        match self {
            Self::Ready => StateRequirements {
                requires_profile_configuration: true,
                ..Default::default()
            },
            Self::ReadyForBotAssignment | Self::Warmup => StateRequirements {
                requires_proxy: true,
                requires_model_assignment: true,
                ..Default::default()
            },
            Self::Active => StateRequirements {
                requires_warmup_completion: true,
                requires_no_active_errors: true,
                ..Default::default()
            },
            _ => StateRequirements::default(),
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Static per-target-state prerequisite rules.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateRequirements {
    pub requires_proxy: bool,
    pub requires_model_assignment: bool,
    pub requires_warmup_completion: bool,
    pub requires_profile_configuration: bool,
    pub requires_no_active_errors: bool,
}

/// Minimum username length for a configured profile.
pub const MIN_USERNAME_LEN: usize = 3;

/// An account under lifecycle management.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: Uuid,
    pub username: String,
    pub lifecycle_state: LifecycleState,
    pub model_id: Option<Uuid>,
    pub proxy_host: Option<String>,
    pub proxy_port: Option<u16>,
    pub proxy_assigned_at: Option<DateTime<Utc>>,
    pub container_number: Option<i64>,
    pub requires_human_review: bool,
    pub is_private: bool,
    pub last_error_message: Option<String>,
    pub last_error_at: Option<DateTime<Utc>>,
    pub state_changed_at: DateTime<Utc>,
    pub state_changed_by: Option<String>,
    pub state_notes: Option<String>,
    pub last_bot_action_by: Option<String>,
    pub last_bot_action_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    pub fn new(username: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            username: username.into(),
            lifecycle_state: LifecycleState::Imported,
            model_id: None,
            proxy_host: None,
            proxy_port: None,
            proxy_assigned_at: None,
            container_number: None,
            requires_human_review: false,
            is_private: false,
            last_error_message: None,
            last_error_at: None,
            state_changed_at: now,
            state_changed_by: None,
            state_notes: None,
            last_bot_action_by: None,
            last_bot_action_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_proxy(mut self, host: impl Into<String>, port: u16) -> Self {
        self.proxy_host = Some(host.into());
        self.proxy_port = Some(port);
        self.proxy_assigned_at = Some(self.created_at);
        self
    }

    pub fn with_model(mut self, model_id: Uuid) -> Self {
        self.model_id = Some(model_id);
        self
    }

    pub fn with_container(mut self, container_number: i64) -> Self {
        self.container_number = Some(container_number);
        self
    }

    pub fn with_state(mut self, state: LifecycleState) -> Self {
        self.lifecycle_state = state;
        self
    }

    pub fn has_proxy(&self) -> bool {
        self.proxy_host.as_deref().is_some_and(|h| !h.trim().is_empty()) && self.proxy_port.is_some()
    }

    pub fn has_configured_profile(&self) -> bool {
        self.username.trim().chars().count() >= MIN_USERNAME_LEN
    }
}

/// Facts about an account that live outside the account row itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct PrerequisiteContext {
    /// The referenced model exists.
    pub model_exists: bool,
    /// Every phase except manual setup is completed.
    pub warmup_complete: bool,
}

/// One failed prerequisite or adjacency rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
    pub code: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>, code: impl Into<String>) -> Self {
        Self { field: field.into(), message: message.into(), code: code.into() }
    }
}

/// Structured validation result surfaced to operators.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateValidationResult {
    pub is_valid: bool,
    pub errors: Vec<ValidationError>,
    pub missing_requirements: Vec<String>,
}

impl StateValidationResult {
    pub fn valid() -> Self {
        Self { is_valid: true, ..Default::default() }
    }

    fn push(&mut self, error: ValidationError, requirement: &str) {
        self.is_valid = false;
        self.errors.push(error);
        self.missing_requirements.push(requirement.to_string());
    }
}

/// Check adjacency (unless forced) and the target state's prerequisite rules.
pub fn validate_transition(
    account: &Account,
    target: LifecycleState,
    ctx: PrerequisiteContext,
    force: bool,
) -> StateValidationResult {
    let mut result = StateValidationResult::valid();

    if !force && !account.lifecycle_state.can_transition_to(target) {
        result.push(
            ValidationError::new(
                "lifecycle_state",
                format!("Invalid transition from {} to {}", account.lifecycle_state, target),
                "INVALID_TRANSITION",
            ),
            "Valid state transition",
        );
        return result;
    }

    let rules = target.requirements();

    if rules.requires_proxy && !account.has_proxy() {
        result.push(
            ValidationError::new("proxy", "Proxy configuration is required", "PROXY_REQUIRED"),
            "Proxy assignment",
        );
    }

    if rules.requires_model_assignment && (account.model_id.is_none() || !ctx.model_exists) {
        result.push(
            ValidationError::new("model_id", "A valid model assignment is required", "MODEL_ASSIGNMENT_REQUIRED"),
            "Model assignment",
        );
    }

    if rules.requires_warmup_completion && !ctx.warmup_complete {
        result.push(
            ValidationError::new("warmup", "All warmup phases must be completed", "WARMUP_INCOMPLETE"),
            "Warmup completion",
        );
    }

    if rules.requires_profile_configuration && !account.has_configured_profile() {
        result.push(
            ValidationError::new(
                "username",
                format!("Username must be at least {MIN_USERNAME_LEN} characters"),
                "PROFILE_INCOMPLETE",
            ),
            "Profile configuration",
        );
    }

    if rules.requires_no_active_errors && account.requires_human_review {
        result.push(
            ValidationError::new(
                "requires_human_review",
                "Account has unresolved errors requiring human review",
                "ACTIVE_ERRORS_EXIST",
            ),
            "Resolve active errors",
        );
    }

    result
}

/// Parameters for a lifecycle transition.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransitionRequest {
    pub reason: Option<String>,
    pub notes: Option<String>,
    pub force: bool,
    pub changed_by: String,
}

impl TransitionRequest {
    pub fn by(changed_by: impl Into<String>) -> Self {
        Self { changed_by: changed_by.into(), ..Default::default() }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn forced(mut self) -> Self {
        self.force = true;
        self
    }
}

/// Immutable audit record of a lifecycle transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub account_id: Uuid,
    pub from_state: LifecycleState,
    pub to_state: LifecycleState,
    pub reason: Option<String>,
    pub notes: Option<String>,
    pub changed_by: String,
    pub forced: bool,
    pub changed_at: DateTime<Utc>,
}

/// What the storage layer applies atomically for a lifecycle change.
#[derive(Debug, Clone)]
pub struct StateChange {
    pub account_id: Uuid,
    pub expected: LifecycleState,
    pub record: TransitionRecord,
    pub release_resources: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkTransitionFailure {
    pub account_id: Uuid,
    pub error: String,
    pub validation_errors: Vec<ValidationError>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BulkTransitionResult {
    pub successful: Vec<Uuid>,
    pub failed: Vec<BulkTransitionFailure>,
    pub total_processed: usize,
    pub success_count: usize,
    pub failure_count: usize,
}

/// Account count per lifecycle state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleSummaryEntry {
    pub state: LifecycleState,
    pub count: i64,
}
