//! The single-active-bot rule under real connection concurrency.

mod common;

use chrono::Duration;

use common::{database, toy_catalog, Harness};
use warmup_engine::domain::errors::DomainError;
use warmup_engine::domain::models::{
    FailureCategory, LifecycleState, PhaseFailure, PhaseStatus, TransitionRequest, WarmupConfig, WarmupPhaseKind,
};

async fn file_harness() -> (tempfile::TempDir, Harness) {
    let (dir, pool) = database::setup_file_db(4).await;
    (dir, Harness::new(pool, toy_catalog(), WarmupConfig::default()))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_claims_by_two_bots_admit_exactly_one() {
    let (_dir, h) = file_harness().await;
    let bio = h.add_text(&["bio"], "trail running").await;
    let first = h.warming_account("first_user", 1).await;
    let second = h.warming_account("second_user", 2).await;
    h.advance(Duration::hours(24));

    let (a, b) = tokio::join!(
        h.warmup.start_phase(first.id, WarmupPhaseKind::Bio, "bot-a", "session-a"),
        h.warmup.start_phase(second.id, WarmupPhaseKind::Bio, "bot-b", "session-b"),
    );

    let results = [a, b];
    let successes = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(successes, 1, "{results:?}");
    for result in &results {
        if let Err(e) = result {
            assert!(matches!(e, DomainError::BotConstraintViolation { .. }), "unexpected error: {e}");
        }
    }

    let winner = results.iter().find_map(|r| r.as_ref().ok()).unwrap();
    let slot = h.bots.slot().await.unwrap();
    assert_eq!(slot.bot_id, winner.phase.bot_id);

    // Only the winning claim consumes the content both bots may have picked
    let loser = if winner.phase.account_id == first.id { second.id } else { first.id };
    assert_eq!(h.content.usage_count(bio, winner.phase.account_id).await.unwrap(), 1);
    assert_eq!(h.content.usage_count(bio, loser).await.unwrap(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_same_bot_may_work_several_accounts() {
    let (_dir, h) = file_harness().await;
    h.add_text(&["bio"], "street photography").await;
    let first = h.warming_account("alpha_user", 1).await;
    let second = h.warming_account("beta_user", 2).await;
    h.advance(Duration::hours(24));

    h.warmup.start_phase(first.id, WarmupPhaseKind::Bio, "bot-a", "session-a").await.unwrap();
    h.warmup.start_phase(second.id, WarmupPhaseKind::Bio, "bot-a", "session-a").await.unwrap();

    let session = h.bots.get("session-a").await.unwrap().unwrap();
    assert_eq!(session.accounts_processed, 2);

    // The slot stays held until the bot has nothing left in progress
    h.warmup.complete_phase(first.id, WarmupPhaseKind::Bio, "bot-a", None, None).await.unwrap();
    assert_eq!(h.bots.slot().await.unwrap().bot_id.as_deref(), Some("bot-a"));
    h.warmup.complete_phase(second.id, WarmupPhaseKind::Bio, "bot-a", None, None).await.unwrap();
    assert!(h.bots.slot().await.unwrap().bot_id.is_none());
}

#[tokio::test]
async fn test_only_the_claiming_bot_may_finish_a_phase() {
    let h = Harness::in_memory(toy_catalog()).await;
    h.add_text(&["bio"], "jazz records").await;
    let account = h.warming_account("owned_user", 1).await;
    h.advance(Duration::hours(24));

    h.warmup.start_phase(account.id, WarmupPhaseKind::Bio, "bot-a", "session-a").await.unwrap();

    let err = h
        .warmup
        .complete_phase(account.id, WarmupPhaseKind::Bio, "bot-b", None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::PhaseNotOwned { .. }));

    let err = h
        .warmup
        .fail_phase(account.id, WarmupPhaseKind::Bio, "bot-b", PhaseFailure::new("nope", FailureCategory::Other))
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::PhaseNotOwned { .. }));

    let permission = h.warmup.can_bot_start_work("bot-b").await.unwrap();
    assert!(!permission.allowed);
    assert_eq!(permission.active_bot_id.as_deref(), Some("bot-a"));
    assert!(h.warmup.can_bot_start_work("bot-a").await.unwrap().allowed);

    h.warmup.complete_phase(account.id, WarmupPhaseKind::Bio, "bot-a", None, None).await.unwrap();
    assert!(h.warmup.can_bot_start_work("bot-b").await.unwrap().allowed);
}

#[tokio::test]
async fn test_abandoned_work_is_reaped_before_another_bot_claims() {
    let h = Harness::in_memory(toy_catalog()).await;
    h.add_text(&["bio"], "bouldering").await;
    let first = h.warming_account("abandoned_user", 1).await;
    let second = h.warming_account("waiting_user", 2).await;
    h.advance(Duration::hours(24));

    h.warmup.start_phase(first.id, WarmupPhaseKind::Bio, "bot-a", "session-a").await.unwrap();

    let err = h
        .warmup
        .start_phase(second.id, WarmupPhaseKind::Bio, "bot-b", "session-b")
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::BotConstraintViolation { .. }));

    // Past the phase lease the abandoned claim is failed as a timeout
    h.advance(Duration::minutes(61));
    let started = h.warmup.start_phase(second.id, WarmupPhaseKind::Bio, "bot-b", "session-b").await.unwrap();
    assert_eq!(started.phase.bot_id.as_deref(), Some("bot-b"));

    let abandoned = h.warmup.warmup_status(first.id).await.unwrap();
    let bio = abandoned.phases.iter().find(|p| p.phase == WarmupPhaseKind::Bio).unwrap();
    assert_eq!(bio.failure_category, Some(FailureCategory::Timeout));
    assert_eq!(bio.retry_count, 1);
}

#[tokio::test]
async fn test_heartbeat_extends_slot_lease() {
    let h = Harness::in_memory(toy_catalog()).await;
    h.add_text(&["bio"], "sailing").await;
    let account = h.warming_account("lease_user", 1).await;
    h.advance(Duration::hours(24));

    h.warmup.start_phase(account.id, WarmupPhaseKind::Bio, "bot-a", "session-a").await.unwrap();
    let before = h.bots.slot().await.unwrap().expires_at.unwrap();

    h.advance(Duration::minutes(10));
    assert!(h.bots.heartbeat("bot-a", "session-a").await.unwrap());
    let after = h.bots.slot().await.unwrap().expires_at.unwrap();
    assert!(after > before);

    // Heartbeats from a bot that does not own the session are ignored
    assert!(!h.bots.heartbeat("bot-b", "session-a").await.unwrap());
}

#[tokio::test]
async fn test_invalidating_an_account_frees_its_bot_immediately() {
    let h = Harness::in_memory(toy_catalog()).await;
    h.add_text(&["bio"], "pottery").await;
    let doomed = h.warming_account("doomed_user", 1).await;
    let next = h.warming_account("next_user", 2).await;
    h.advance(Duration::hours(24));

    h.warmup.start_phase(doomed.id, WarmupPhaseKind::Bio, "bot-a", "session-a").await.unwrap();
    h.lifecycle.invalidate(doomed.id, "operator").await.unwrap();

    assert!(h.bots.slot().await.unwrap().bot_id.is_none());
    assert!(h.warmup.can_bot_start_work("bot-b").await.unwrap().allowed);

    let status = h.warmup.warmup_status(doomed.id).await.unwrap();
    let bio = status.phases.iter().find(|p| p.phase == WarmupPhaseKind::Bio).unwrap();
    assert_ne!(bio.status, PhaseStatus::InProgress);
    assert!(bio.bot_id.is_none());

    // No lease expiry needed before another bot starts
    let started = h.warmup.start_phase(next.id, WarmupPhaseKind::Bio, "bot-b", "session-b").await.unwrap();
    assert_eq!(started.phase.bot_id.as_deref(), Some("bot-b"));

    let err = h
        .warmup
        .complete_phase(doomed.id, WarmupPhaseKind::Bio, "bot-a", None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::AccountNotAcceptingWork { ref state, .. } if state == "archived"), "{err}");
}

#[tokio::test]
async fn test_pausing_mid_phase_rejects_the_late_completion() {
    let h = Harness::in_memory(toy_catalog()).await;
    h.add_text(&["bio"], "kite surfing").await;
    let account = h.warming_account("paused_mid_phase", 1).await;
    h.advance(Duration::hours(24));

    h.warmup.start_phase(account.id, WarmupPhaseKind::Bio, "bot-a", "session-a").await.unwrap();
    h.lifecycle.transition(account.id, LifecycleState::Paused, TransitionRequest::by("operator")).await.unwrap();
    assert!(h.bots.slot().await.unwrap().bot_id.is_none());

    let err = h
        .warmup
        .complete_phase(account.id, WarmupPhaseKind::Bio, "bot-a", Some(900), None)
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::AccountNotAcceptingWork { ref state, .. } if state == "paused"), "{err}");

    let status = h.warmup.warmup_status(account.id).await.unwrap();
    assert_eq!(status.completed_phases, 1);
    assert_eq!(status.in_progress_phases, 0);
    assert_eq!(h.lifecycle.get_account(account.id).await.unwrap().lifecycle_state, LifecycleState::Paused);
}
