//! Domain errors for the warmup engine.

use thiserror::Error;
use uuid::Uuid;

use crate::domain::models::account::ValidationError;

fn format_validation_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| format!("{} ({})", e.message, e.code))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Domain-level errors that can occur in the warmup engine.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("Account not found: {0}")]
    AccountNotFound(Uuid),

    #[error("Warmup phase not found: {phase} for account {account_id}")]
    PhaseNotFound { account_id: Uuid, phase: String },

    #[error("Review item not found: {0}")]
    ReviewNotFound(Uuid),

    #[error("Unknown warmup phase: {0}")]
    UnknownPhase(String),

    #[error("Invalid lifecycle transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Prerequisites not met: {}", format_validation_errors(.errors))]
    PrerequisitesNotMet { errors: Vec<ValidationError> },

    #[error("Phase {phase} is not available (status: {status})")]
    PhaseNotAvailable { phase: String, status: String },

    #[error("Bot {bot_id} cannot start work: {reason}")]
    BotConstraintViolation { bot_id: String, reason: String },

    #[error("Phase {phase} is not in progress under bot {bot_id}")]
    PhaseNotOwned { phase: String, bot_id: String },

    #[error("Account {account_id} does not accept bot work in state {state}")]
    AccountNotAcceptingWork { account_id: Uuid, state: String },

    #[error("No {kind} content available for phase {phase} (categories: {categories:?})")]
    ContentUnavailable { phase: String, kind: String, categories: Vec<String> },

    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Concurrency conflict: {entity} {id} was modified")]
    ConcurrencyConflict { entity: String, id: String },

    #[error("Device automation failed: {0}")]
    AutomationFailed(String),
}

impl DomainError {
    /// Recoverable rejections that the caller may retry or surface to an operator.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            Self::InvalidTransition { .. }
                | Self::PrerequisitesNotMet { .. }
                | Self::PhaseNotAvailable { .. }
                | Self::BotConstraintViolation { .. }
                | Self::PhaseNotOwned { .. }
                | Self::AccountNotAcceptingWork { .. }
                | Self::ContentUnavailable { .. }
                | Self::ConcurrencyConflict { .. }
        )
    }

    /// Short machine-readable code for CLI and JSON output.
    pub fn code(&self) -> &'static str {
        match self {
            Self::AccountNotFound(_) => "ACCOUNT_NOT_FOUND",
            Self::PhaseNotFound { .. } => "PHASE_NOT_FOUND",
            Self::ReviewNotFound(_) => "REVIEW_NOT_FOUND",
            Self::UnknownPhase(_) => "UNKNOWN_PHASE",
            Self::InvalidTransition { .. } => "INVALID_TRANSITION",
            Self::PrerequisitesNotMet { .. } => "PREREQUISITES_NOT_MET",
            Self::PhaseNotAvailable { .. } => "PHASE_NOT_AVAILABLE",
            Self::BotConstraintViolation { .. } => "BOT_CONSTRAINT_VIOLATION",
            Self::PhaseNotOwned { .. } => "PHASE_NOT_OWNED",
            Self::AccountNotAcceptingWork { .. } => "ACCOUNT_NOT_ACCEPTING_WORK",
            Self::ContentUnavailable { .. } => "CONTENT_UNAVAILABLE",
            Self::ValidationFailed(_) => "VALIDATION_FAILED",
            Self::DatabaseError(_) => "DATABASE_ERROR",
            Self::SerializationError(_) => "SERIALIZATION_ERROR",
            Self::ConcurrencyConflict { .. } => "CONCURRENCY_CONFLICT",
            Self::AutomationFailed(_) => "AUTOMATION_FAILED",
        }
    }
}

pub type DomainResult<T> = Result<T, DomainError>;

impl From<sqlx::Error> for DomainError {
    fn from(err: sqlx::Error) -> Self {
        DomainError::DatabaseError(err.to_string())
    }
}

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        DomainError::SerializationError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_precondition_classification() {
        let err = DomainError::InvalidTransition { from: "imported".into(), to: "active".into() };
        assert!(err.is_precondition());
        assert_eq!(err.code(), "INVALID_TRANSITION");

        let err = DomainError::AccountNotFound(Uuid::new_v4());
        assert!(!err.is_precondition());

        let err = DomainError::DatabaseError("disk I/O error".into());
        assert!(!err.is_precondition());
    }

    #[test]
    fn test_prerequisites_message_lists_codes() {
        let err = DomainError::PrerequisitesNotMet {
            errors: vec![
                ValidationError::new("proxy", "Proxy configuration is required", "PROXY_REQUIRED"),
                ValidationError::new("model_id", "Model assignment is required", "MODEL_ASSIGNMENT_REQUIRED"),
            ],
        };
        let msg = err.to_string();
        assert!(msg.contains("PROXY_REQUIRED"));
        assert!(msg.contains("MODEL_ASSIGNMENT_REQUIRED"));
    }
}
