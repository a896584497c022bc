pub mod account;
pub mod bot_session;
pub mod catalog;
pub mod config;
pub mod content;
pub mod phase;
pub mod review;

pub use account::{
    validate_transition, Account, BulkTransitionFailure, BulkTransitionResult, LifecycleState,
    LifecycleSummaryEntry, PrerequisiteContext, StateChange, StateRequirements,
    StateValidationResult, TransitionRecord, TransitionRequest, ValidationError,
};
pub use bot_session::{BotSession, BotSlot, SessionStatus, WorkPermission};
pub use catalog::{
    private_account_sequence, CommandKind, ContentKind, ContentRequirement, DeviceCommand,
    PhaseCatalog, PhaseDefinition, PhaseRequirements, PostExecutionAction, UNKNOWN_PHASE_MARKER,
};
pub use config::{BotConfig, Config, CooldownRange, DatabaseConfig, DeviceConfig, LoggingConfig, WarmupConfig};
pub use content::{ContentItem, ContentRef, ContentRequest};
pub use phase::{
    is_eligible, CompletionOutcome, FailureCategory, FailureDisposition, FailureOutcome,
    PhaseFailure, PhaseStatistics, PhaseStatus, ReadyAccount, RetryPolicy, WarmupPhase, WarmupPhaseKind,
    WarmupStatistics, WarmupStatusSummary,
};
pub use review::{
    escalation_note, PriorityLevel, ResolutionMethod, ReviewAnalytics, ReviewFilter, ReviewItem,
    ReviewStatus,
};
