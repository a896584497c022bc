//! Common test utilities for integration tests
//!
//! Provides a fully wired set of services over a fresh database, a
//! deterministic clock and a recording device mock.

#![allow(dead_code)]

pub mod database;

use chrono::{DateTime, Duration, TimeZone, Utc};
use sqlx::SqlitePool;
use std::sync::Arc;
use uuid::Uuid;

use warmup_engine::adapters::device::MockDeviceAutomation;
use warmup_engine::adapters::sqlite::{
    SqliteAccountRepository, SqliteBotSessionRepository, SqliteContentRepository, SqlitePhaseRepository,
    SqliteReviewRepository,
};
use warmup_engine::domain::models::{
    Account, ContentItem, ContentKind, ContentRequirement, LifecycleState, PhaseCatalog, PhaseDefinition,
    TransitionRequest, WarmupConfig, WarmupPhaseKind,
};
use warmup_engine::domain::ports::{Clock, CooldownSource, FakeClock, FixedCooldown};
use warmup_engine::services::{BotSessionService, LifecycleService, ReviewQueueService, WarmupService};

/// Fixed starting instant so cooldown arithmetic reads naturally.
pub fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).single().expect("valid epoch")
}

/// Manual setup, then bio and gender one day apart.
pub fn toy_catalog() -> PhaseCatalog {
    PhaseCatalog::from_entries(vec![
        PhaseDefinition::new(WarmupPhaseKind::ManualSetup, "Manual account setup"),
        PhaseDefinition::new(WarmupPhaseKind::Bio, "Change bio")
            .with_text(ContentRequirement::required(&["bio"]))
            .with_cooldown_hours(24)
            .with_script("change_bio_to_clipboard.lua"),
        PhaseDefinition::new(WarmupPhaseKind::Gender, "Set gender")
            .with_cooldown_hours(24)
            .with_script("change_gender_to_female.lua"),
    ])
}

pub struct Harness {
    pub pool: SqlitePool,
    pub clock: Arc<FakeClock>,
    pub automation: Arc<MockDeviceAutomation>,
    pub content: Arc<SqliteContentRepository>,
    pub lifecycle: LifecycleService,
    pub warmup: WarmupService,
    pub reviews: ReviewQueueService,
    pub bots: BotSessionService,
}

impl Harness {
    /// Bot completions hold the next phase back exactly 24 hours.
    pub fn new(pool: SqlitePool, catalog: PhaseCatalog, config: WarmupConfig) -> Self {
        Self::with_cooldowns(pool, catalog, config, Arc::new(FixedCooldown(Duration::hours(24))))
    }

    pub fn with_cooldowns(
        pool: SqlitePool,
        catalog: PhaseCatalog,
        config: WarmupConfig,
        cooldowns: Arc<dyn CooldownSource>,
    ) -> Self {
        let catalog = Arc::new(catalog);
        let clock = Arc::new(FakeClock::at(epoch()));
        let dyn_clock: Arc<dyn Clock> = clock.clone();
        let automation = Arc::new(MockDeviceAutomation::new());

        let accounts = Arc::new(SqliteAccountRepository::new(pool.clone()));
        let phases = Arc::new(SqlitePhaseRepository::new(pool.clone()));
        let sessions = Arc::new(SqliteBotSessionRepository::new(pool.clone()));
        let reviews = Arc::new(SqliteReviewRepository::new(pool.clone()));
        let content = Arc::new(SqliteContentRepository::new(pool.clone()));

        let lifecycle = LifecycleService::new(accounts.clone(), phases.clone(), dyn_clock.clone())
            .with_catalog(catalog.clone())
            .with_max_retries(config.max_retries);
        let warmup = WarmupService::new(
            accounts,
            phases.clone(),
            sessions.clone(),
            content.clone(),
            automation.clone(),
            dyn_clock.clone(),
        )
        .with_catalog(catalog)
        .with_config(config)
        .with_cooldown_source(cooldowns);
        let reviews = ReviewQueueService::new(reviews, phases, dyn_clock.clone());
        let bots = BotSessionService::new(sessions, dyn_clock);

        Self { pool, clock, automation, content, lifecycle, warmup, reviews, bots }
    }

    pub async fn in_memory(catalog: PhaseCatalog) -> Self {
        Self::new(database::setup_test_db().await, catalog, WarmupConfig::default())
    }

    pub fn advance(&self, by: Duration) {
        self.clock.advance(by);
    }

    /// Register an account with model, proxy and container, then move it to
    /// `ready` so its phase rows exist.
    pub async fn ready_account(&self, username: &str, container: i64) -> Account {
        let account = self.lifecycle.register_account(username).await.expect("register account");
        let model = self.lifecycle.create_model(&format!("model-{username}")).await.expect("create model");
        self.lifecycle.assign_model(account.id, model).await.expect("assign model");
        self.lifecycle.assign_proxy(account.id, "10.0.0.8", 8080).await.expect("assign proxy");
        self.lifecycle.assign_container(account.id, container).await.expect("assign container");
        self.lifecycle
            .transition(account.id, LifecycleState::Ready, TransitionRequest::by("operator"))
            .await
            .expect("transition to ready");
        self.lifecycle.get_account(account.id).await.expect("reload account")
    }

    /// A ready account with manual setup signed off and warmup started.
    pub async fn warming_account(&self, username: &str, container: i64) -> Account {
        let account = self.ready_account(username, container).await;
        self.lifecycle.complete_manual_setup(account.id, "operator").await.expect("manual setup");
        self.warmup.start_warmup(account.id, "bot-1").await.expect("start warmup");
        self.lifecycle.get_account(account.id).await.expect("reload account")
    }

    pub async fn add_text(&self, categories: &[&str], payload: &str) -> Uuid {
        let item = ContentItem::new(ContentKind::Text, categories, payload, self.clock.now());
        self.content.add(&item).await.expect("add content");
        item.id
    }
}
