//! Warmup phase engine.
//!
//! Drives per-account phase rows from `pending` through `completed`, enforcing
//! dependency and cooldown gating, content assignment, the single-active-bot
//! rule and the retry/escalation policy. Compound state changes are delegated
//! to the repositories, which run each one in a single transaction.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::lifecycle_service::{completion_record, LifecycleService};
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    is_eligible, private_account_sequence, BotConfig, CompletionOutcome, ContentKind, ContentRef, ContentRequest,
    DeviceCommand, FailureCategory, FailureOutcome, LifecycleState, PhaseCatalog, PhaseFailure, PhaseStatus,
    PostExecutionAction, ReadyAccount, TransitionRecord, TransitionRequest, WarmupConfig, WarmupPhase,
    WarmupPhaseKind, WarmupStatistics, WarmupStatusSummary, WorkPermission,
};
use crate::domain::ports::{
    AccountRepository, BotSessionRepository, ClaimRequest, Clock, CompletionRecord, ContentProvider,
    CooldownSource, DeviceAutomation, ExecutionDispatcher, ExecutionJob, ExecutionReport, FailureRecord,
    PhaseRepository, ReadyQuery, UniformCooldown,
};

const FINALIZATION_CHANNEL_CAPACITY: usize = 64;

/// Content resolved for a phase before it is claimed.
struct PhaseContent {
    image: Option<ContentRef>,
    text: Option<ContentRef>,
    /// Selected now rather than reused from an earlier attempt
    new_image: Option<Uuid>,
    new_text: Option<Uuid>,
}

/// A phase that has just been claimed by a bot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartedPhase {
    pub phase: WarmupPhase,
    /// Empty when the account has no container bound
    pub commands: Vec<DeviceCommand>,
    pub image: Option<ContentRef>,
    pub text: Option<ContentRef>,
}

/// Result of running a phase end to end through a dispatcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum PhaseRunOutcome {
    Completed(CompletionOutcome),
    Failed(FailureOutcome),
}

/// Outcome of the post-warmup private-account sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalizationReport {
    pub account_id: Uuid,
    pub container_number: Option<i64>,
    pub succeeded: bool,
    pub commands_run: usize,
    pub error: Option<String>,
    pub finished_at: DateTime<Utc>,
}

pub struct WarmupService {
    accounts: Arc<dyn AccountRepository>,
    phases: Arc<dyn PhaseRepository>,
    sessions: Arc<dyn BotSessionRepository>,
    content: Arc<dyn ContentProvider>,
    automation: Arc<dyn DeviceAutomation>,
    clock: Arc<dyn Clock>,
    cooldowns: Arc<dyn CooldownSource>,
    catalog: Arc<PhaseCatalog>,
    config: WarmupConfig,
    bot_config: BotConfig,
    command_delay: std::time::Duration,
    finalization_tx: broadcast::Sender<FinalizationReport>,
}

impl WarmupService {
    pub fn new(
        accounts: Arc<dyn AccountRepository>,
        phases: Arc<dyn PhaseRepository>,
        sessions: Arc<dyn BotSessionRepository>,
        content: Arc<dyn ContentProvider>,
        automation: Arc<dyn DeviceAutomation>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (finalization_tx, _) = broadcast::channel(FINALIZATION_CHANNEL_CAPACITY);
        Self {
            accounts,
            phases,
            sessions,
            content,
            automation,
            clock,
            cooldowns: Arc::new(UniformCooldown),
            catalog: Arc::new(PhaseCatalog::standard()),
            config: WarmupConfig::default(),
            bot_config: BotConfig::default(),
            command_delay: std::time::Duration::ZERO,
            finalization_tx,
        }
    }

    pub fn with_catalog(mut self, catalog: Arc<PhaseCatalog>) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn with_config(mut self, config: WarmupConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_cooldown_source(mut self, cooldowns: Arc<dyn CooldownSource>) -> Self {
        self.cooldowns = cooldowns;
        self
    }

    pub fn with_bot_config(mut self, bot_config: BotConfig) -> Self {
        self.bot_config = bot_config;
        self
    }

    /// Pause between finalization commands.
    pub fn with_command_delay(mut self, delay: std::time::Duration) -> Self {
        self.command_delay = delay;
        self
    }

    pub fn catalog(&self) -> &PhaseCatalog {
        &self.catalog
    }

    /// Receive a report for every finalization run started after this call.
    pub fn subscribe_finalization(&self) -> broadcast::Receiver<FinalizationReport> {
        self.finalization_tx.subscribe()
    }

    fn lifecycle(&self) -> LifecycleService {
        LifecycleService::new(self.accounts.clone(), self.phases.clone(), self.clock.clone())
            .with_catalog(self.catalog.clone())
            .with_max_retries(self.config.max_retries)
    }

    fn session_lease(&self) -> Duration {
        Duration::minutes(i64::from(self.bot_config.session_timeout_minutes))
    }

    fn require_known(&self, phase: WarmupPhaseKind) -> DomainResult<()> {
        if self.catalog.contains(phase) {
            Ok(())
        } else {
            Err(DomainError::UnknownPhase(phase.as_str().to_string()))
        }
    }

    /// Create the account's phase rows if they do not exist yet.
    pub async fn initialize_phases(&self, account_id: Uuid) -> DomainResult<u64> {
        self.lifecycle().get_account(account_id).await?;
        let rows = self.lifecycle().build_initial_phases(account_id, self.clock.now());
        let inserted = self.phases.initialize(&rows).await?;
        tracing::debug!(account_id = %account_id, inserted, "warmup phases initialized");
        Ok(inserted)
    }

    /// Persist `available` for every row that has become eligible.
    ///
    /// The stored status is a cache of the eligibility rule; the rule itself
    /// is always re-derived from timestamps and dependency completion here.
    pub async fn refresh_availability(&self, account_id: Uuid) -> DomainResult<Vec<WarmupPhase>> {
        let now = self.clock.now();
        let mut rows = self.phases.list_for_account(account_id).await?;
        let completed: HashSet<WarmupPhaseKind> =
            rows.iter().filter(|r| r.status == PhaseStatus::Completed).map(|r| r.phase).collect();

        for row in &mut rows {
            if is_eligible(row, self.catalog.dependencies(row.phase), &completed, now)
                && self.phases.mark_available(row.id, row.status, now).await?
            {
                row.status = PhaseStatus::Available;
                row.updated_at = now;
            }
        }

        Ok(rows)
    }

    /// Advisory check of the single-active-bot rule.
    pub async fn can_bot_start_work(&self, bot_id: &str) -> DomainResult<WorkPermission> {
        let now = self.clock.now();

        let in_progress = self.phases.in_progress().await?;
        if let Some(other) = in_progress.iter().find(|p| p.bot_id.as_deref() != Some(bot_id)) {
            let holder = other.bot_id.clone().unwrap_or_else(|| "unknown".to_string());
            return Ok(WorkPermission {
                allowed: false,
                reason: Some(format!(
                    "Bot {holder} is processing phase {} for account {}",
                    other.phase, other.account_id
                )),
                active_bot_id: other.bot_id.clone(),
            });
        }

        let slot = self.sessions.slot().await?;
        if !slot.is_claimable_by(bot_id, now) {
            return Ok(WorkPermission {
                allowed: false,
                reason: Some("Execution slot is held by another bot".to_string()),
                active_bot_id: slot.bot_id,
            });
        }

        Ok(WorkPermission { allowed: true, reason: None, active_bot_id: slot.bot_id.filter(|b| b == bot_id) })
    }

    /// Claim an available phase for a bot.
    pub async fn start_phase(
        &self,
        account_id: Uuid,
        phase: WarmupPhaseKind,
        bot_id: &str,
        session_id: &str,
    ) -> DomainResult<StartedPhase> {
        self.require_known(phase)?;
        let account = self.lifecycle().get_account(account_id).await?;
        if !account.lifecycle_state.accepts_bot_work() {
            return Err(DomainError::AccountNotAcceptingWork {
                account_id,
                state: account.lifecycle_state.as_str().to_string(),
            });
        }

        self.reap_stale_phases().await?;
        let rows = self.refresh_availability(account_id).await?;
        let row = rows.iter().find(|r| r.phase == phase).cloned().ok_or_else(|| DomainError::PhaseNotFound {
            account_id,
            phase: phase.as_str().to_string(),
        })?;

        if row.status != PhaseStatus::Available {
            return Err(DomainError::PhaseNotAvailable {
                phase: phase.as_str().to_string(),
                status: row.status.as_str().to_string(),
            });
        }

        let permission = self.can_bot_start_work(bot_id).await?;
        if !permission.allowed {
            return Err(DomainError::BotConstraintViolation {
                bot_id: bot_id.to_string(),
                reason: permission.reason.unwrap_or_default(),
            });
        }

        let content = self.resolve_content(&row).await?;

        let now = self.clock.now();
        let claimed = self
            .phases
            .claim(&ClaimRequest {
                account_id,
                phase,
                bot_id: bot_id.to_string(),
                session_id: session_id.to_string(),
                now,
                lease_until: now + self.session_lease(),
                image: content.new_image,
                text: content.new_text,
            })
            .await?;

        let commands = match account.container_number {
            Some(container) => {
                let first_automation =
                    !rows.iter().any(|r| r.phase != WarmupPhaseKind::ManualSetup && r.started_at.is_some());
                self.catalog.script_sequence(phase, container, first_automation)
            }
            None => {
                tracing::warn!(account_id = %account_id, "no device container bound; no commands generated");
                Vec::new()
            }
        };

        Ok(StartedPhase { phase: claimed, commands, image: content.image, text: content.text })
    }

    /// Resolve content for every kind the phase needs, reusing assignments.
    ///
    /// Nothing is written here; the claim assigns new picks and records their
    /// usage only if it wins.
    async fn resolve_content(&self, row: &WarmupPhase) -> DomainResult<PhaseContent> {
        let Some(def) = self.catalog.get(row.phase) else {
            return Err(DomainError::UnknownPhase(row.phase.as_str().to_string()));
        };
        let now = self.clock.now();

        let mut selected = [None, None];
        let mut newly_assigned = [None, None];

        for (slot, kind, existing) in [
            (0, ContentKind::Image, row.assigned_content_id),
            (1, ContentKind::Text, row.assigned_text_id),
        ] {
            let Some(requirement) = def.requirement(kind) else {
                continue;
            };

            let found = match existing {
                Some(id) => self.content.get_content(id).await?,
                None => None,
            };
            let found = match found {
                Some(content) => Some(content),
                None => {
                    let picked = self
                        .content
                        .select_content(
                            &ContentRequest {
                                account_id: row.account_id,
                                phase: row.phase,
                                kind,
                                categories: requirement.categories.clone(),
                                exclude_used_within_days: self.config.content_reuse_window_days,
                            },
                            now,
                        )
                        .await?;
                    newly_assigned[slot] = picked.as_ref().map(|c| c.id);
                    picked
                }
            };

            if found.is_none() && requirement.required {
                tracing::warn!(
                    account_id = %row.account_id,
                    phase = %row.phase,
                    kind = kind.as_str(),
                    "required content unavailable"
                );
                return Err(DomainError::ContentUnavailable {
                    phase: row.phase.as_str().to_string(),
                    kind: kind.as_str().to_string(),
                    categories: requirement.categories.clone(),
                });
            }
            selected[slot] = found;
        }

        let [image, text] = selected;
        let [new_image, new_text] = newly_assigned;
        Ok(PhaseContent { image, text, new_image, new_text })
    }

    /// Replace the catalog cooldown of the next phase with a draw from the
    /// account's configured range. Phases without a cooldown keep none.
    async fn draw_next_cooldown(&self, record: &mut CompletionRecord) -> DomainResult<()> {
        let Some(next) = record.next_phase.as_mut() else {
            return Ok(());
        };
        if next.cooldown <= Duration::zero() {
            return Ok(());
        }

        let account = self.lifecycle().get_account(record.account_id).await?;
        let range = self.config.cooldown_range(account.model_id);
        next.cooldown = self.cooldowns.draw(range);
        tracing::debug!(
            account_id = %record.account_id,
            next_phase = %next.phase,
            cooldown_minutes = next.cooldown.num_minutes(),
            min_hours = range.min_hours,
            max_hours = range.max_hours,
            "next phase cooldown drawn"
        );
        Ok(())
    }

    /// Record a bot's successful run of a phase it owns.
    pub async fn complete_phase(
        &self,
        account_id: Uuid,
        phase: WarmupPhaseKind,
        bot_id: &str,
        execution_time_ms: Option<i64>,
        response: Option<serde_json::Value>,
    ) -> DomainResult<CompletionOutcome> {
        self.require_known(phase)?;

        let new_username = match self.catalog.get(phase).and_then(|d| d.post_action) {
            Some(PostExecutionAction::UpdateUsername) => response
                .as_ref()
                .and_then(|r| r.get("new_username"))
                .and_then(serde_json::Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(ToString::to_string),
            None => None,
        };

        let mut record = completion_record(&self.catalog, account_id, phase, Some(bot_id), bot_id, self.clock.now());
        record.execution_time_ms = execution_time_ms;
        record.response = response;
        record.new_username = new_username;
        self.draw_next_cooldown(&mut record).await?;

        let outcome = self.phases.record_completion(&record).await?;
        if outcome.warmup_complete {
            self.spawn_finalization(account_id);
        }
        Ok(outcome)
    }

    /// Record a bot's failed run, applying the retry/escalation rule.
    pub async fn fail_phase(
        &self,
        account_id: Uuid,
        phase: WarmupPhaseKind,
        bot_id: &str,
        failure: PhaseFailure,
    ) -> DomainResult<FailureOutcome> {
        self.require_known(phase)?;
        let now = self.clock.now();

        self.phases
            .record_failure(&FailureRecord {
                account_id,
                phase,
                bot_id: bot_id.to_string(),
                failure,
                policy: self.config.retry_policy(),
                retry_available_at: now + Duration::minutes(i64::from(self.config.retry_cooldown_minutes)),
                now,
            })
            .await
    }

    /// Start a phase, hand it to the dispatcher and record what it reports.
    pub async fn execute_phase(
        &self,
        account_id: Uuid,
        phase: WarmupPhaseKind,
        bot_id: &str,
        session_id: &str,
        dispatcher: &dyn ExecutionDispatcher,
    ) -> DomainResult<PhaseRunOutcome> {
        let started = self.start_phase(account_id, phase, bot_id, session_id).await?;
        let account = self.lifecycle().get_account(account_id).await?;

        let Some(container_number) = account.container_number else {
            let failure = PhaseFailure::new("Account has no device container bound", FailureCategory::Other).escalated();
            return Ok(PhaseRunOutcome::Failed(self.fail_phase(account_id, phase, bot_id, failure).await?));
        };

        let job = ExecutionJob {
            account_id,
            phase,
            bot_id: bot_id.to_string(),
            session_id: session_id.to_string(),
            container_number,
            commands: started.commands,
            image: started.image,
            text: started.text,
        };

        match dispatcher.dispatch(&job).await {
            ExecutionReport::Succeeded { execution_time_ms, response } => {
                let outcome = self.complete_phase(account_id, phase, bot_id, Some(execution_time_ms), response).await?;
                Ok(PhaseRunOutcome::Completed(outcome))
            }
            ExecutionReport::Failed(failure) => {
                let outcome = self.fail_phase(account_id, phase, bot_id, failure).await?;
                Ok(PhaseRunOutcome::Failed(outcome))
            }
        }
    }

    /// Move a `ready`/`ready_for_bot_assignment` account into `warmup`.
    pub async fn start_warmup(&self, account_id: Uuid, bot_id: &str) -> DomainResult<TransitionRecord> {
        let lifecycle = self.lifecycle();
        let account = lifecycle.get_account(account_id).await?;
        if account.container_number.is_none() {
            return Err(DomainError::ValidationFailed(format!(
                "Account {account_id} has no device container assigned"
            )));
        }

        lifecycle
            .transition(
                account_id,
                LifecycleState::Warmup,
                TransitionRequest::by(bot_id).with_reason("warmup_started"),
            )
            .await
    }

    pub async fn available_phases(&self, account_id: Uuid) -> DomainResult<Vec<WarmupPhase>> {
        let rows = self.refresh_availability(account_id).await?;
        Ok(rows.into_iter().filter(|r| r.status == PhaseStatus::Available).collect())
    }

    /// First available phase in catalog order, if this bot may work now.
    pub async fn next_available_phase(&self, account_id: Uuid, bot_id: &str) -> DomainResult<Option<WarmupPhase>> {
        if !self.can_bot_start_work(bot_id).await?.allowed {
            return Ok(None);
        }
        let account = self.lifecycle().get_account(account_id).await?;
        if !account.lifecycle_state.accepts_bot_work() {
            return Ok(None);
        }
        Ok(self.available_phases(account_id).await?.into_iter().next())
    }

    #[allow(clippy::cast_precision_loss)]
    pub async fn warmup_status(&self, account_id: Uuid) -> DomainResult<WarmupStatusSummary> {
        self.lifecycle().get_account(account_id).await?;
        let phases = self.refresh_availability(account_id).await?;

        let count = |status: PhaseStatus| phases.iter().filter(|p| p.status == status).count();
        let bot_total = self.catalog.bot_phases().count();
        let bot_done = phases
            .iter()
            .filter(|p| p.phase != WarmupPhaseKind::ManualSetup && p.status == PhaseStatus::Completed)
            .count();

        Ok(WarmupStatusSummary {
            account_id,
            total_phases: phases.len(),
            completed_phases: count(PhaseStatus::Completed),
            available_phases: count(PhaseStatus::Available),
            in_progress_phases: count(PhaseStatus::InProgress),
            failed_phases: count(PhaseStatus::Failed),
            review_phases: count(PhaseStatus::RequiresReview),
            progress_percent: if bot_total == 0 { 0.0 } else { bot_done as f64 / bot_total as f64 * 100.0 },
            is_complete: bot_total > 0 && bot_done == bot_total,
            phases,
        })
    }

    /// Accounts with bot work ready now across the fleet, optionally for one
    /// model, most ready phases first.
    pub async fn ready_accounts(&self, model_id: Option<Uuid>, limit: u32) -> DomainResult<Vec<ReadyAccount>> {
        let phases = self
            .catalog
            .bot_phases()
            .map(|kind| (kind, self.catalog.dependencies(kind).to_vec()))
            .collect();

        self.phases
            .ready_accounts(&ReadyQuery { model_id, limit, phases, now: self.clock.now() })
            .await
    }

    pub async fn warmup_statistics(&self) -> DomainResult<WarmupStatistics> {
        self.phases.statistics().await
    }

    /// Operator reset of a failed or escalated phase.
    pub async fn reset_phase_for_retry(
        &self,
        account_id: Uuid,
        phase: WarmupPhaseKind,
        operator: &str,
    ) -> DomainResult<WarmupPhase> {
        self.require_known(phase)?;
        let reset = self.phases.reset_for_retry(account_id, phase, self.clock.now()).await?;
        tracing::info!(account_id = %account_id, phase = %phase, operator = %operator, "phase reset by operator");
        Ok(reset)
    }

    /// Operator completion outside the bot path.
    pub async fn complete_phase_manually(
        &self,
        account_id: Uuid,
        phase: WarmupPhaseKind,
        operator: &str,
    ) -> DomainResult<CompletionOutcome> {
        self.require_known(phase)?;
        let mut record = completion_record(&self.catalog, account_id, phase, None, operator, self.clock.now());
        record.response = Some(serde_json::json!({ "manual": true, "operator": operator }));
        self.draw_next_cooldown(&mut record).await?;

        let outcome = self.phases.record_completion(&record).await?;
        if outcome.warmup_complete {
            self.spawn_finalization(account_id);
        }
        Ok(outcome)
    }

    /// Fail phases whose lease has run out through the normal failure path.
    pub async fn reap_stale_phases(&self) -> DomainResult<Vec<FailureOutcome>> {
        let lease = Duration::minutes(i64::from(self.config.phase_lease_minutes));
        let stale = self.phases.stale_in_progress(self.clock.now() - lease).await?;
        let mut reaped = Vec::with_capacity(stale.len());

        for phase in stale {
            let Some(bot_id) = phase.bot_id.clone() else {
                continue;
            };
            let failure = PhaseFailure::new(
                format!("Phase lease expired after {} minutes", self.config.phase_lease_minutes),
                FailureCategory::Timeout,
            );

            match self.fail_phase(phase.account_id, phase.phase, &bot_id, failure).await {
                Ok(outcome) => {
                    tracing::warn!(
                        account_id = %phase.account_id,
                        phase = %phase.phase,
                        bot_id = %bot_id,
                        "stale phase reaped"
                    );
                    reaped.push(outcome);
                }
                // Finished by its bot between the scan and the update
                Err(DomainError::PhaseNotOwned { .. }) => {}
                Err(e) => return Err(e),
            }
        }

        Ok(reaped)
    }

    /// Run the private-account sequence without blocking the caller.
    pub fn spawn_finalization(&self, account_id: Uuid) -> JoinHandle<()> {
        let accounts = self.accounts.clone();
        let automation = self.automation.clone();
        let clock = self.clock.clone();
        let delay = self.command_delay;
        let tx = self.finalization_tx.clone();

        tokio::spawn(async move {
            let report = finalize_account(accounts.as_ref(), automation.as_ref(), clock.as_ref(), delay, account_id).await;
            if report.succeeded {
                tracing::info!(account_id = %account_id, "account set to private");
            } else {
                tracing::error!(
                    account_id = %account_id,
                    error = report.error.as_deref().unwrap_or("unknown"),
                    "account finalization failed"
                );
            }
            // No subscribers is fine
            let _ = tx.send(report);
        })
    }
}

async fn finalize_account(
    accounts: &dyn AccountRepository,
    automation: &dyn DeviceAutomation,
    clock: &dyn Clock,
    delay: std::time::Duration,
    account_id: Uuid,
) -> FinalizationReport {
    let mut report = FinalizationReport {
        account_id,
        container_number: None,
        succeeded: false,
        commands_run: 0,
        error: None,
        finished_at: clock.now(),
    };

    let container = match accounts.get(account_id).await {
        Ok(Some(account)) => account.container_number,
        Ok(None) => {
            report.error = Some(DomainError::AccountNotFound(account_id).to_string());
            return report;
        }
        Err(e) => {
            report.error = Some(e.to_string());
            return report;
        }
    };
    let Some(container) = container else {
        report.error = Some("Account has no device container bound".to_string());
        return report;
    };
    report.container_number = Some(container);

    for (index, command) in private_account_sequence(container).iter().enumerate() {
        if index > 0 && !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if let Err(e) = automation.execute(container, command, None).await {
            report.error = Some(e.to_string());
            report.finished_at = clock.now();
            return report;
        }
        report.commands_run += 1;
    }

    report.finished_at = clock.now();
    match accounts.mark_private(account_id, report.finished_at).await {
        Ok(()) => report.succeeded = true,
        Err(e) => report.error = Some(e.to_string()),
    }
    report
}
