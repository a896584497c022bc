//! End-to-end warmup runs over the in-memory database.

mod common;

use chrono::Duration;
use std::collections::HashSet;
use std::sync::Arc;

use common::{database, epoch, toy_catalog, Harness};
use uuid::Uuid;
use warmup_engine::adapters::device::DeviceDispatcher;
use warmup_engine::adapters::sqlite::SqliteAccountRepository;
use warmup_engine::domain::errors::DomainError;
use warmup_engine::domain::models::{
    CooldownRange, FailureCategory, FailureDisposition, LifecycleState, PhaseCatalog, PhaseFailure, PhaseStatus,
    PriorityLevel, ReviewFilter, ReviewStatus, TransitionRequest, WarmupConfig, WarmupPhaseKind, WarmupStatusSummary,
};
use warmup_engine::domain::ports::{AccountRepository, UniformCooldown};
use warmup_engine::services::PhaseRunOutcome;

#[tokio::test]
async fn test_cooldowns_gate_the_sequence_and_completion_promotes() {
    let h = Harness::in_memory(toy_catalog()).await;
    h.add_text(&["bio"], "coffee, film, long walks").await;
    let account = h.warming_account("toy_user", 7).await;
    assert_eq!(account.lifecycle_state, LifecycleState::Warmup);

    // Manual setup is done but bio waits out its own cooldown
    assert!(h.warmup.available_phases(account.id).await.unwrap().is_empty());
    let err = h.warmup.start_phase(account.id, WarmupPhaseKind::Bio, "bot-1", "s1").await.unwrap_err();
    assert!(matches!(err, DomainError::PhaseNotAvailable { .. }));

    h.advance(Duration::hours(23));
    assert!(h.warmup.available_phases(account.id).await.unwrap().is_empty());

    h.advance(Duration::hours(1));
    let available: Vec<_> =
        h.warmup.available_phases(account.id).await.unwrap().into_iter().map(|p| p.phase).collect();
    assert_eq!(available, vec![WarmupPhaseKind::Bio]);

    let started = h.warmup.start_phase(account.id, WarmupPhaseKind::Bio, "bot-1", "s1").await.unwrap();
    assert_eq!(started.phase.status, PhaseStatus::InProgress);
    assert_eq!(started.text.as_ref().map(|t| t.payload.as_str()), Some("coffee, film, long walks"));
    let scripts: Vec<_> = started.commands.iter().map(|c| c.script.as_str()).collect();
    assert!(scripts.contains(&"select_container_7.lua"));
    assert!(scripts.contains(&"skip_onboarding.lua"));
    assert!(scripts.contains(&"clipboard"));
    assert_eq!(scripts.last(), Some(&"change_bio_to_clipboard.lua"));

    let outcome = h
        .warmup
        .complete_phase(account.id, WarmupPhaseKind::Bio, "bot-1", Some(1_200), None)
        .await
        .unwrap();
    assert!(!outcome.warmup_complete);
    assert!(h.bots.slot().await.unwrap().bot_id.is_none());

    // Gender follows a day after bio
    assert!(h.warmup.available_phases(account.id).await.unwrap().is_empty());
    h.advance(Duration::hours(24));

    let mut reports = h.warmup.subscribe_finalization();
    let started = h.warmup.start_phase(account.id, WarmupPhaseKind::Gender, "bot-1", "s1").await.unwrap();
    assert!(!started.commands.iter().any(|c| c.script == "skip_onboarding.lua"));
    assert!(started.text.is_none());

    let outcome = h
        .warmup
        .complete_phase(account.id, WarmupPhaseKind::Gender, "bot-1", Some(900), None)
        .await
        .unwrap();
    assert!(outcome.warmup_complete);

    let report = tokio::time::timeout(std::time::Duration::from_secs(5), reports.recv())
        .await
        .expect("finalization report")
        .unwrap();
    assert_eq!(report.account_id, account.id);
    assert!(report.succeeded, "{:?}", report.error);
    assert_eq!(report.container_number, Some(7));
    assert_eq!(report.commands_run, 4);
    assert!(h.automation.scripts().await.contains(&"set_account_private.lua".to_string()));

    let account = h.lifecycle.get_account(account.id).await.unwrap();
    assert_eq!(account.lifecycle_state, LifecycleState::Active);
    assert!(account.is_private);

    let history = h.lifecycle.history(account.id).await.unwrap();
    let promotion = history.iter().find(|r| r.to_state == LifecycleState::Active).unwrap();
    assert_eq!(promotion.from_state, LifecycleState::Warmup);
    assert_eq!(promotion.reason.as_deref(), Some("warmup_complete"));
    assert!(promotion.forced);

    let status = h.warmup.warmup_status(account.id).await.unwrap();
    assert!(status.is_complete);
    assert_eq!(status.completed_phases, 3);
}

#[tokio::test]
async fn test_repeated_bot_errors_escalate_after_max_retries() {
    let h = Harness::in_memory(toy_catalog()).await;
    let text_id = h.add_text(&["bio"], "plants and sourdough").await;
    let account = h.warming_account("retry_user", 3).await;
    h.advance(Duration::hours(24));

    let mut last_retry_count = 0;
    for attempt in 1..=3u32 {
        let started = h.warmup.start_phase(account.id, WarmupPhaseKind::Bio, "bot-1", "s1").await.unwrap();
        // Content assigned on the first claim is reused on retries
        assert_eq!(started.text.as_ref().map(|t| t.id), Some(text_id));

        let outcome = h
            .warmup
            .fail_phase(
                account.id,
                WarmupPhaseKind::Bio,
                "bot-1",
                PhaseFailure::new(format!("tap missed on attempt {attempt}"), FailureCategory::BotError),
            )
            .await
            .unwrap();

        assert!(outcome.phase.retry_count > last_retry_count);
        last_retry_count = outcome.phase.retry_count;

        if attempt < 3 {
            assert_eq!(outcome.disposition, FailureDisposition::Retry);
            assert_eq!(outcome.phase.status, PhaseStatus::Failed);
            assert!(outcome.review_id.is_none());
        } else {
            assert_eq!(outcome.disposition, FailureDisposition::Escalate);
            assert_eq!(outcome.phase.status, PhaseStatus::RequiresReview);
            assert!(outcome.review_id.is_some());
        }
    }

    let items = h
        .reviews
        .list(ReviewFilter { account_id: Some(account.id), ..Default::default() })
        .await
        .unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].failure_type, FailureCategory::BotError);
    assert_eq!(items[0].review_status, ReviewStatus::Pending);
    assert_eq!(items[0].priority_level, PriorityLevel::High);
    assert_eq!(items[0].original_bot_id.as_deref(), Some("bot-1"));

    let account = h.lifecycle.get_account(account.id).await.unwrap();
    assert!(account.requires_human_review);

    // Escalated phases are never offered to bots
    h.advance(Duration::days(3));
    let available = h.warmup.available_phases(account.id).await.unwrap();
    assert!(available.iter().all(|p| p.phase != WarmupPhaseKind::Bio));
}

#[tokio::test]
async fn test_captcha_escalates_on_first_attempt() {
    let h = Harness::in_memory(toy_catalog()).await;
    h.add_text(&["bio"], "ceramics").await;
    let account = h.warming_account("captcha_user", 4).await;
    h.advance(Duration::hours(24));

    h.warmup.start_phase(account.id, WarmupPhaseKind::Bio, "bot-1", "s1").await.unwrap();
    let outcome = h
        .warmup
        .fail_phase(
            account.id,
            WarmupPhaseKind::Bio,
            "bot-1",
            PhaseFailure::new("captcha shown", FailureCategory::Captcha),
        )
        .await
        .unwrap();

    assert_eq!(outcome.disposition, FailureDisposition::Escalate);
    assert_eq!(outcome.phase.status, PhaseStatus::RequiresReview);
    assert_eq!(outcome.phase.retry_count, 1);

    let review = h.reviews.get(outcome.review_id.unwrap()).await.unwrap();
    assert_eq!(review.failure_type, FailureCategory::Captcha);
    assert_eq!(review.retry_count_before_review, 1);
}

#[tokio::test]
async fn test_operator_reset_reopens_escalated_phase() {
    let h = Harness::in_memory(toy_catalog()).await;
    h.add_text(&["bio"], "cycling").await;
    let account = h.warming_account("reset_user", 5).await;
    h.advance(Duration::hours(24));

    h.warmup.start_phase(account.id, WarmupPhaseKind::Bio, "bot-1", "s1").await.unwrap();
    h.warmup
        .fail_phase(
            account.id,
            WarmupPhaseKind::Bio,
            "bot-1",
            PhaseFailure::new("proxy unreachable", FailureCategory::NetworkError).escalated(),
        )
        .await
        .unwrap();

    let reset = h.warmup.reset_phase_for_retry(account.id, WarmupPhaseKind::Bio, "ops").await.unwrap();
    assert_eq!(reset.retry_count, 0);
    assert_eq!(reset.status, PhaseStatus::Pending);
    assert!(!h.lifecycle.get_account(account.id).await.unwrap().requires_human_review);

    let available = h.warmup.available_phases(account.id).await.unwrap();
    assert_eq!(available.len(), 1);
    assert_eq!(available[0].phase, WarmupPhaseKind::Bio);

    // Completed phases cannot be reset
    let err = h.warmup.reset_phase_for_retry(account.id, WarmupPhaseKind::ManualSetup, "ops").await.unwrap_err();
    assert!(matches!(err, DomainError::PhaseNotAvailable { .. }));
}

#[tokio::test]
async fn test_new_highlight_waits_for_first_highlight() {
    let h = Harness::in_memory(PhaseCatalog::standard()).await;
    let account = h.ready_account("highlight_user", 9).await;

    // Nothing but manual setup opens before the operator signs off
    h.advance(Duration::days(400));
    let available: Vec<_> =
        h.warmup.available_phases(account.id).await.unwrap().into_iter().map(|p| p.phase).collect();
    assert_eq!(available, vec![WarmupPhaseKind::ManualSetup]);

    h.lifecycle.complete_manual_setup(account.id, "operator").await.unwrap();
    // Sign-off pushes bio a cooldown into the future
    h.advance(Duration::days(1));

    let available: HashSet<_> =
        h.warmup.available_phases(account.id).await.unwrap().into_iter().map(|p| p.phase).collect();
    assert!(!available.contains(&WarmupPhaseKind::NewHighlight));
    assert!(available.contains(&WarmupPhaseKind::FirstHighlight));
    assert!(available.contains(&WarmupPhaseKind::StoryNoCaption));
    assert_eq!(available.len(), 9);
}

#[tokio::test]
async fn test_missing_required_content_leaves_phase_unclaimed() {
    let h = Harness::in_memory(toy_catalog()).await;
    let account = h.warming_account("no_content_user", 6).await;
    h.advance(Duration::hours(24));

    let err = h.warmup.start_phase(account.id, WarmupPhaseKind::Bio, "bot-1", "s1").await.unwrap_err();
    assert!(matches!(err, DomainError::ContentUnavailable { .. }));

    let status = h.warmup.warmup_status(account.id).await.unwrap();
    assert_eq!(status.in_progress_phases, 0);
    assert!(h.bots.slot().await.unwrap().bot_id.is_none());
}

#[tokio::test]
async fn test_stale_phase_is_reaped_as_timeout() {
    let h = Harness::in_memory(toy_catalog()).await;
    h.add_text(&["bio"], "vinyl").await;
    let account = h.warming_account("stale_user", 8).await;
    h.advance(Duration::hours(24));

    h.warmup.start_phase(account.id, WarmupPhaseKind::Bio, "bot-1", "s1").await.unwrap();
    h.advance(Duration::minutes(61));

    let reaped = h.warmup.reap_stale_phases().await.unwrap();
    assert_eq!(reaped.len(), 1);
    assert_eq!(reaped[0].phase.failure_category, Some(FailureCategory::Timeout));
    assert_eq!(reaped[0].phase.status, PhaseStatus::Failed);
    assert_eq!(reaped[0].disposition, FailureDisposition::Retry);

    // Another bot may now pick the work up
    let started = h.warmup.start_phase(account.id, WarmupPhaseKind::Bio, "bot-2", "s2").await.unwrap();
    assert_eq!(started.phase.bot_id.as_deref(), Some("bot-2"));
}

#[tokio::test]
async fn test_work_refused_outside_warmup_states() {
    let h = Harness::in_memory(toy_catalog()).await;
    let account = h.lifecycle.register_account("imported_user").await.unwrap();

    let err = h.warmup.start_phase(account.id, WarmupPhaseKind::Bio, "bot-1", "s1").await.unwrap_err();
    assert!(matches!(err, DomainError::AccountNotAcceptingWork { .. }));
    assert!(h.warmup.next_available_phase(account.id, "bot-1").await.unwrap().is_none());
}

#[tokio::test]
async fn test_execute_phase_through_device_dispatcher() {
    let h = Harness::in_memory(toy_catalog()).await;
    h.add_text(&["bio"], "birdwatching").await;
    let account = h.warming_account("dispatch_user", 12).await;
    h.advance(Duration::hours(24));

    let dispatcher = DeviceDispatcher::new(h.automation.clone(), std::time::Duration::ZERO);
    h.automation.fail_on("change_bio_to_clipboard.lua").await;

    let outcome = h
        .warmup
        .execute_phase(account.id, WarmupPhaseKind::Bio, "bot-1", "s1", &dispatcher)
        .await
        .unwrap();
    let PhaseRunOutcome::Failed(failure) = outcome else {
        panic!("expected failure");
    };
    assert_eq!(failure.disposition, FailureDisposition::Retry);
    assert_eq!(failure.phase.failure_category, Some(FailureCategory::BotError));

    // The clipboard command carried the assigned text
    let executed = h.automation.executed().await;
    let clipboard = executed.iter().find(|c| c.script == "clipboard").unwrap();
    assert_eq!(clipboard.payload.as_deref(), Some("birdwatching"));
    assert!(executed.iter().all(|c| c.container_number == 12));

    let working = Arc::new(warmup_engine::adapters::device::MockDeviceAutomation::new());
    let dispatcher = DeviceDispatcher::new(working, std::time::Duration::ZERO);
    let outcome = h
        .warmup
        .execute_phase(account.id, WarmupPhaseKind::Bio, "bot-1", "s1", &dispatcher)
        .await
        .unwrap();
    let PhaseRunOutcome::Completed(completion) = outcome else {
        panic!("expected completion");
    };
    assert_eq!(completion.phase.status, PhaseStatus::Completed);
    assert!(completion.phase.automation_response.is_some());
}

#[tokio::test]
async fn test_ready_queue_orders_by_ready_then_least_completed() {
    let h = Harness::in_memory(toy_catalog()).await;
    h.add_text(&["bio"], "vinyl and vintage cameras").await;

    let most_ready = h.warming_account("queue_a", 1).await;
    let ahead = h.warming_account("queue_b", 2).await;

    // Ready state but no container: never queued
    let bare = h.lifecycle.register_account("queue_bare").await.unwrap();
    h.lifecycle.transition(bare.id, LifecycleState::Ready, TransitionRequest::by("operator")).await.unwrap();
    h.lifecycle.complete_manual_setup(bare.id, "operator").await.unwrap();

    h.advance(Duration::hours(24));
    h.warmup.start_phase(ahead.id, WarmupPhaseKind::Bio, "bot-1", "s1").await.unwrap();
    h.warmup.complete_phase(ahead.id, WarmupPhaseKind::Bio, "bot-1", None, None).await.unwrap();
    let behind = h.warming_account("queue_c", 3).await;

    h.advance(Duration::hours(1));
    let cooling = h.warming_account("queue_d", 4).await;
    h.advance(Duration::hours(23));

    let queue = h.warmup.ready_accounts(None, 10).await.unwrap();
    let order: Vec<_> = queue.iter().map(|a| (a.username.as_str(), a.ready_phases, a.completed_phases)).collect();
    assert_eq!(order, vec![("queue_a", 2, 1), ("queue_c", 1, 1), ("queue_b", 1, 2)]);
    assert!(queue.iter().all(|a| a.account_id != bare.id && a.account_id != cooling.id));
    assert_eq!(queue[0].container_number, 1);
    assert_eq!(queue[1].account_id, behind.id);

    let limited = h.warmup.ready_accounts(None, 2).await.unwrap();
    assert_eq!(limited.len(), 2);

    let for_model = h.warmup.ready_accounts(most_ready.model_id, 10).await.unwrap();
    assert_eq!(for_model.len(), 1);
    assert_eq!(for_model[0].account_id, most_ready.id);

    // An account with work in flight leaves the queue until it finishes
    h.warmup.start_phase(most_ready.id, WarmupPhaseKind::Bio, "bot-1", "s1").await.unwrap();
    let queue = h.warmup.ready_accounts(None, 10).await.unwrap();
    assert!(queue.iter().all(|a| a.account_id != most_ready.id));
}

#[tokio::test]
async fn test_completion_cooldown_is_drawn_from_the_configured_range() {
    let pool = database::setup_test_db().await;
    let override_model = Uuid::new_v4();
    let mut config = WarmupConfig { cooldown_min_hours: 15, cooldown_max_hours: 20, ..WarmupConfig::default() };
    config.model_cooldowns.insert(override_model, CooldownRange::new(30, 30));
    let h = Harness::with_cooldowns(pool.clone(), toy_catalog(), config, Arc::new(UniformCooldown));
    h.add_text(&["bio"], "gardening").await;

    let plain = h.warming_account("range_user", 1).await;

    SqliteAccountRepository::new(pool).create_model(override_model, "slow-model", epoch()).await.unwrap();
    let special = h.lifecycle.register_account("override_user").await.unwrap();
    h.lifecycle.assign_model(special.id, override_model).await.unwrap();
    h.lifecycle.assign_proxy(special.id, "10.0.0.9", 8080).await.unwrap();
    h.lifecycle.assign_container(special.id, 2).await.unwrap();
    h.lifecycle.transition(special.id, LifecycleState::Ready, TransitionRequest::by("operator")).await.unwrap();
    h.lifecycle.complete_manual_setup(special.id, "operator").await.unwrap();
    h.warmup.start_warmup(special.id, "bot-1").await.unwrap();

    // Late enough that the drawn wait outlasts the initial schedule
    h.advance(Duration::hours(40));
    let completed_at = epoch() + Duration::hours(40);
    for account_id in [plain.id, special.id] {
        h.warmup.start_phase(account_id, WarmupPhaseKind::Bio, "bot-1", "s1").await.unwrap();
        h.warmup.complete_phase(account_id, WarmupPhaseKind::Bio, "bot-1", None, None).await.unwrap();
    }

    let gender_wait = |status: &WarmupStatusSummary| {
        let gender = status.phases.iter().find(|p| p.phase == WarmupPhaseKind::Gender).unwrap();
        gender.available_at - completed_at
    };

    let wait = gender_wait(&h.warmup.warmup_status(plain.id).await.unwrap());
    assert!(wait >= Duration::hours(15) && wait <= Duration::hours(20), "cooldown {wait} outside 15-20h");

    let wait = gender_wait(&h.warmup.warmup_status(special.id).await.unwrap());
    assert_eq!(wait, Duration::hours(30));
}
