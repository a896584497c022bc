//! Lifecycle state machine behavior against the database.

mod common;

use chrono::Duration;

use common::{epoch, toy_catalog, Harness};
use warmup_engine::adapters::sqlite::SqliteAccountRepository;
use warmup_engine::domain::errors::DomainError;
use warmup_engine::domain::models::{LifecycleState, PhaseStatus, TransitionRequest, WarmupPhaseKind};
use warmup_engine::domain::ports::AccountRepository;

fn codes(err: &DomainError) -> Vec<String> {
    match err {
        DomainError::PrerequisitesNotMet { errors } => errors.iter().map(|e| e.code.clone()).collect(),
        other => panic!("expected prerequisite failure, got {other}"),
    }
}

#[tokio::test]
async fn test_non_adjacent_transition_needs_force() {
    let h = Harness::in_memory(toy_catalog()).await;
    let account = h.lifecycle.register_account("skipper").await.unwrap();

    let err = h
        .lifecycle
        .transition(account.id, LifecycleState::Active, TransitionRequest::by("operator"))
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::InvalidTransition { .. }));
    assert_eq!(h.lifecycle.get_account(account.id).await.unwrap().lifecycle_state, LifecycleState::Imported);

    let record = h
        .lifecycle
        .transition(
            account.id,
            LifecycleState::Active,
            TransitionRequest::by("admin").with_reason("migration").forced(),
        )
        .await
        .unwrap();
    assert!(record.forced);

    let history = h.lifecycle.history(account.id).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].from_state, LifecycleState::Imported);
    assert_eq!(history[0].to_state, LifecycleState::Active);
    assert_eq!(history[0].changed_by, "admin");
    assert_eq!(history[0].reason.as_deref(), Some("migration"));
    assert!(history[0].forced);
}

#[tokio::test]
async fn test_prerequisites_are_reported_together() {
    let h = Harness::in_memory(toy_catalog()).await;

    let short = h.lifecycle.register_account("ab").await.unwrap();
    let err = h
        .lifecycle
        .transition(short.id, LifecycleState::Ready, TransitionRequest::by("operator"))
        .await
        .unwrap_err();
    assert_eq!(codes(&err), vec!["PROFILE_INCOMPLETE"]);

    let bare = h.lifecycle.register_account("bare_user").await.unwrap();
    h.lifecycle.transition(bare.id, LifecycleState::Ready, TransitionRequest::by("operator")).await.unwrap();
    let err = h
        .lifecycle
        .transition(bare.id, LifecycleState::Warmup, TransitionRequest::by("operator"))
        .await
        .unwrap_err();
    let found = codes(&err);
    assert!(found.contains(&"PROXY_REQUIRED".to_string()));
    assert!(found.contains(&"MODEL_ASSIGNMENT_REQUIRED".to_string()));

    let validation = h.lifecycle.validate_transition(bare.id, LifecycleState::Warmup, false).await.unwrap();
    assert!(!validation.is_valid);
    assert_eq!(validation.missing_requirements.len(), 2);
}

#[tokio::test]
async fn test_active_requires_finished_warmup() {
    let h = Harness::in_memory(toy_catalog()).await;
    let account = h.warming_account("paused_user", 3).await;

    h.lifecycle.transition(account.id, LifecycleState::Paused, TransitionRequest::by("operator")).await.unwrap();
    let err = h
        .lifecycle
        .transition(account.id, LifecycleState::Active, TransitionRequest::by("operator"))
        .await
        .unwrap_err();
    assert_eq!(codes(&err), vec!["WARMUP_INCOMPLETE"]);
}

#[tokio::test]
async fn test_ready_creates_staggered_phase_rows() {
    let h = Harness::in_memory(toy_catalog()).await;
    let account = h.ready_account("fresh_user", 2).await;

    let status = h.warmup.warmup_status(account.id).await.unwrap();
    assert_eq!(status.total_phases, 3);

    let offsets: Vec<_> = status
        .phases
        .iter()
        .map(|p| (p.phase, (p.available_at - epoch()).num_hours()))
        .collect();
    assert_eq!(
        offsets,
        vec![(WarmupPhaseKind::ManualSetup, 0), (WarmupPhaseKind::Bio, 24), (WarmupPhaseKind::Gender, 48)]
    );
    assert_eq!(status.phases[0].status, PhaseStatus::Available);

    // Initialization is idempotent
    assert_eq!(h.warmup.initialize_phases(account.id).await.unwrap(), 0);
}

#[tokio::test]
async fn test_invalidate_releases_container_and_proxy() {
    let h = Harness::in_memory(toy_catalog()).await;
    let accounts = SqliteAccountRepository::new(h.pool.clone());
    let account = h.warming_account("burned_user", 7).await;
    assert_eq!(accounts.container_holder(7).await.unwrap(), Some(account.id));

    h.advance(Duration::minutes(5));
    let record = h.lifecycle.invalidate(account.id, "operator").await.unwrap();
    assert_eq!(record.from_state, LifecycleState::Warmup);
    assert_eq!(record.to_state, LifecycleState::Archived);

    let reloaded = h.lifecycle.get_account(account.id).await.unwrap();
    assert_eq!(reloaded.lifecycle_state, LifecycleState::Archived);
    assert!(reloaded.container_number.is_none());
    assert!(!reloaded.has_proxy());
    assert_eq!(accounts.container_holder(7).await.unwrap(), None);

    // The container can be handed to a new account straight away
    let next = h.lifecycle.register_account("next_user").await.unwrap();
    h.lifecycle.assign_container(next.id, 7).await.unwrap();

    let err = h.lifecycle.invalidate(account.id, "operator").await.unwrap_err();
    assert!(matches!(err, DomainError::InvalidTransition { .. }));
}

#[tokio::test]
async fn test_invalidate_is_all_or_nothing() {
    let h = Harness::in_memory(toy_catalog()).await;
    let accounts = SqliteAccountRepository::new(h.pool.clone());
    let account = h.warming_account("crash_user", 11).await;

    sqlx::query(
        "CREATE TRIGGER fail_audit BEFORE INSERT ON account_state_transitions BEGIN SELECT RAISE(ABORT, 'simulated crash'); END",
    )
    .execute(&h.pool)
    .await
    .unwrap();

    assert!(h.lifecycle.invalidate(account.id, "operator").await.is_err());

    let unchanged = h.lifecycle.get_account(account.id).await.unwrap();
    assert_eq!(unchanged.lifecycle_state, LifecycleState::Warmup);
    assert_eq!(unchanged.container_number, Some(11));
    assert!(unchanged.has_proxy());
    assert_eq!(accounts.container_holder(11).await.unwrap(), Some(account.id));

    sqlx::query("DROP TRIGGER fail_audit").execute(&h.pool).await.unwrap();

    h.lifecycle.invalidate(account.id, "operator").await.unwrap();
    assert_eq!(accounts.container_holder(11).await.unwrap(), None);
    assert_eq!(
        h.lifecycle.get_account(account.id).await.unwrap().lifecycle_state,
        LifecycleState::Archived
    );
}

#[tokio::test]
async fn test_bulk_transition_collects_failures() {
    let h = Harness::in_memory(toy_catalog()).await;
    let good = h.lifecycle.register_account("good_user").await.unwrap();
    let short = h.lifecycle.register_account("x").await.unwrap();
    let missing = uuid::Uuid::new_v4();

    let result = h
        .lifecycle
        .bulk_transition(&[good.id, short.id, missing], LifecycleState::Ready, TransitionRequest::by("operator"))
        .await;

    assert_eq!(result.total_processed, 3);
    assert_eq!(result.successful, vec![good.id]);
    assert_eq!(result.failure_count, 2);
    let short_failure = result.failed.iter().find(|f| f.account_id == short.id).unwrap();
    assert_eq!(short_failure.validation_errors[0].code, "PROFILE_INCOMPLETE");
    let missing_failure = result.failed.iter().find(|f| f.account_id == missing).unwrap();
    assert!(missing_failure.validation_errors.is_empty());

    let summary = h.lifecycle.lifecycle_summary().await.unwrap();
    let count = |state: LifecycleState| summary.iter().find(|e| e.state == state).map_or(0, |e| e.count);
    assert_eq!(count(LifecycleState::Ready), 1);
    assert_eq!(count(LifecycleState::Imported), 1);
    assert_eq!(count(LifecycleState::Archived), 0);
}

#[tokio::test]
async fn test_manual_setup_signoff_moves_imported_account_to_ready() {
    let h = Harness::in_memory(toy_catalog()).await;
    let account = h.lifecycle.register_account("manual_user").await.unwrap();

    let outcome = h.lifecycle.complete_manual_setup(account.id, "operator").await.unwrap();
    assert_eq!(outcome.phase.phase, WarmupPhaseKind::ManualSetup);
    assert_eq!(outcome.phase.status, PhaseStatus::Completed);
    assert!(!outcome.warmup_complete);

    let account = h.lifecycle.get_account(account.id).await.unwrap();
    assert_eq!(account.lifecycle_state, LifecycleState::Ready);
    assert_eq!(
        h.lifecycle.available_transitions(account.lifecycle_state),
        vec![LifecycleState::ReadyForBotAssignment, LifecycleState::Warmup, LifecycleState::Archived]
    );
}
