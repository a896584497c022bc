//! Account lifecycle state machine service.

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    validate_transition, Account, BulkTransitionFailure, BulkTransitionResult, CompletionOutcome, LifecycleState,
    LifecycleSummaryEntry, PhaseCatalog, PhaseStatus, PrerequisiteContext, StateChange, StateValidationResult,
    TransitionRecord, TransitionRequest, WarmupPhase, WarmupPhaseKind,
};
use crate::domain::ports::{AccountRepository, Clock, CompletionRecord, NextPhaseCooldown, PhaseRepository};

const DEFAULT_MAX_RETRIES: u32 = 3;

pub struct LifecycleService {
    accounts: Arc<dyn AccountRepository>,
    phases: Arc<dyn PhaseRepository>,
    catalog: Arc<PhaseCatalog>,
    clock: Arc<dyn Clock>,
    max_retries: u32,
}

impl LifecycleService {
    pub fn new(accounts: Arc<dyn AccountRepository>, phases: Arc<dyn PhaseRepository>, clock: Arc<dyn Clock>) -> Self {
        Self {
            accounts,
            phases,
            catalog: Arc::new(PhaseCatalog::standard()),
            clock,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    pub fn with_catalog(mut self, catalog: Arc<PhaseCatalog>) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub async fn register_account(&self, username: &str) -> DomainResult<Account> {
        let account = Account::new(username, self.clock.now());
        self.accounts.create(&account).await?;
        tracing::info!(account_id = %account.id, username = %account.username, "account registered");
        Ok(account)
    }

    pub async fn get_account(&self, account_id: Uuid) -> DomainResult<Account> {
        self.accounts.get(account_id).await?.ok_or(DomainError::AccountNotFound(account_id))
    }

    pub async fn list_accounts(&self, state: LifecycleState) -> DomainResult<Vec<Account>> {
        self.accounts.list_by_state(state).await
    }

    pub async fn create_model(&self, name: &str) -> DomainResult<Uuid> {
        let id = Uuid::new_v4();
        self.accounts.create_model(id, name, self.clock.now()).await?;
        Ok(id)
    }

    pub async fn assign_model(&self, account_id: Uuid, model_id: Uuid) -> DomainResult<Account> {
        if !self.accounts.model_exists(model_id).await? {
            return Err(DomainError::ValidationFailed(format!("Model {model_id} does not exist")));
        }
        let mut account = self.get_account(account_id).await?;
        account.model_id = Some(model_id);
        account.updated_at = self.clock.now();
        self.accounts.update_profile(&account).await?;
        Ok(account)
    }

    pub async fn assign_proxy(&self, account_id: Uuid, host: &str, port: u16) -> DomainResult<Account> {
        let now = self.clock.now();
        let mut account = self.get_account(account_id).await?;
        account.proxy_host = Some(host.to_string());
        account.proxy_port = Some(port);
        account.proxy_assigned_at = Some(now);
        account.updated_at = now;
        self.accounts.update_profile(&account).await?;
        Ok(account)
    }

    pub async fn assign_container(&self, account_id: Uuid, container_number: i64) -> DomainResult<Account> {
        self.get_account(account_id).await?;
        self.accounts.assign_container(account_id, container_number, self.clock.now()).await?;
        self.get_account(account_id).await
    }

    /// Adjacency (skipped when forced) then the target's prerequisite rules.
    pub async fn validate_transition(
        &self,
        account_id: Uuid,
        target: LifecycleState,
        force: bool,
    ) -> DomainResult<StateValidationResult> {
        let account = self.get_account(account_id).await?;
        let ctx = self.prerequisite_context(&account).await?;
        Ok(validate_transition(&account, target, ctx, force))
    }

    async fn prerequisite_context(&self, account: &Account) -> DomainResult<PrerequisiteContext> {
        let model_exists = match account.model_id {
            Some(model_id) => self.accounts.model_exists(model_id).await?,
            None => false,
        };

        let rows = self.phases.list_for_account(account.id).await?;
        let warmup_complete = self.catalog.bot_phases().all(|kind| {
            rows.iter().any(|row| row.phase == kind && row.status == PhaseStatus::Completed)
        });

        Ok(PrerequisiteContext { model_exists, warmup_complete })
    }

    /// Move an account to `target`, recording the audit entry atomically.
    pub async fn transition(
        &self,
        account_id: Uuid,
        target: LifecycleState,
        request: TransitionRequest,
    ) -> DomainResult<TransitionRecord> {
        let account = self.get_account(account_id).await?;
        let from = account.lifecycle_state;

        if !request.force {
            let ctx = self.prerequisite_context(&account).await?;
            let result = validate_transition(&account, target, ctx, false);
            if !result.is_valid {
                if result.errors.iter().any(|e| e.code == "INVALID_TRANSITION") {
                    return Err(DomainError::InvalidTransition {
                        from: from.as_str().to_string(),
                        to: target.as_str().to_string(),
                    });
                }
                return Err(DomainError::PrerequisitesNotMet { errors: result.errors });
            }
        }

        let now = self.clock.now();
        let record = TransitionRecord {
            account_id,
            from_state: from,
            to_state: target,
            reason: request.reason,
            notes: request.notes,
            changed_by: request.changed_by,
            forced: request.force,
            changed_at: now,
        };

        let initial_phases =
            if target.initializes_phases() { self.build_initial_phases(account_id, now) } else { Vec::new() };

        self.accounts
            .apply_state_change(
                &StateChange { account_id, expected: from, record: record.clone(), release_resources: false },
                &initial_phases,
            )
            .await?;

        tracing::info!(
            account_id = %account_id,
            from = %from,
            to = %target,
            forced = record.forced,
            changed_by = %record.changed_by,
            "lifecycle transition"
        );
        Ok(record)
    }

    /// Apply the same transition to many accounts; failures are collected.
    pub async fn bulk_transition(
        &self,
        account_ids: &[Uuid],
        target: LifecycleState,
        request: TransitionRequest,
    ) -> BulkTransitionResult {
        let mut successful = Vec::new();
        let mut failed = Vec::new();

        for &account_id in account_ids {
            match self.transition(account_id, target, request.clone()).await {
                Ok(_) => successful.push(account_id),
                Err(e) => {
                    let validation_errors = match &e {
                        DomainError::PrerequisitesNotMet { errors } => errors.clone(),
                        _ => Vec::new(),
                    };
                    failed.push(BulkTransitionFailure { account_id, error: e.to_string(), validation_errors });
                }
            }
        }

        if !failed.is_empty() {
            tracing::warn!(to_state = %target, failed = failed.len(), "bulk transition partially failed");
        }

        BulkTransitionResult {
            total_processed: account_ids.len(),
            success_count: successful.len(),
            failure_count: failed.len(),
            successful,
            failed,
        }
    }

    /// Archive the account, releasing its container and proxy in the same
    /// transaction as the state change.
    pub async fn invalidate(&self, account_id: Uuid, changed_by: &str) -> DomainResult<TransitionRecord> {
        let account = self.get_account(account_id).await?;
        let from = account.lifecycle_state;
        if from.is_terminal() {
            return Err(DomainError::InvalidTransition {
                from: from.as_str().to_string(),
                to: LifecycleState::Archived.as_str().to_string(),
            });
        }

        let record = TransitionRecord {
            account_id,
            from_state: from,
            to_state: LifecycleState::Archived,
            reason: Some("invalidation".to_string()),
            notes: Some("Account invalidated; device and proxy released".to_string()),
            changed_by: changed_by.to_string(),
            forced: true,
            changed_at: self.clock.now(),
        };

        self.accounts
            .apply_state_change(
                &StateChange { account_id, expected: from, record: record.clone(), release_resources: true },
                &[],
            )
            .await?;

        tracing::warn!(
            account_id = %account_id,
            container = ?account.container_number,
            changed_by = %changed_by,
            "account invalidated"
        );
        Ok(record)
    }

    pub fn available_transitions(&self, state: LifecycleState) -> Vec<LifecycleState> {
        state.valid_transitions()
    }

    pub async fn history(&self, account_id: Uuid) -> DomainResult<Vec<TransitionRecord>> {
        self.get_account(account_id).await?;
        self.accounts.history(account_id).await
    }

    pub async fn lifecycle_summary(&self) -> DomainResult<Vec<LifecycleSummaryEntry>> {
        self.accounts.lifecycle_summary().await
    }

    /// Operator sign-off on manual setup: `imported -> ready` when needed,
    /// then `manual_setup` is marked completed.
    pub async fn complete_manual_setup(&self, account_id: Uuid, changed_by: &str) -> DomainResult<CompletionOutcome> {
        let account = self.get_account(account_id).await?;

        if account.lifecycle_state == LifecycleState::Imported {
            self.transition(
                account_id,
                LifecycleState::Ready,
                TransitionRequest::by(changed_by).with_reason("manual_setup_complete"),
            )
            .await?;
        } else if self.phases.get(account_id, WarmupPhaseKind::ManualSetup).await?.is_none() {
            let now = self.clock.now();
            self.phases.initialize(&self.build_initial_phases(account_id, now)).await?;
        }

        let record = completion_record(
            &self.catalog,
            account_id,
            WarmupPhaseKind::ManualSetup,
            None,
            changed_by,
            self.clock.now(),
        );
        self.phases.record_completion(&record).await
    }

    /// One pending row per catalog phase, staggered by cumulative cooldowns.
    pub fn build_initial_phases(&self, account_id: Uuid, now: DateTime<Utc>) -> Vec<WarmupPhase> {
        self.catalog
            .initial_offsets_hours()
            .into_iter()
            .enumerate()
            .map(|(order, (kind, offset_hours))| {
                let order = i64::try_from(order).unwrap_or(i64::MAX);
                WarmupPhase::new(account_id, kind, order, now + Duration::hours(offset_hours), self.max_retries, now)
            })
            .collect()
    }
}

/// Cooldown the next catalog phase must observe after `phase` completes.
pub(crate) fn next_phase_cooldown(catalog: &PhaseCatalog, phase: WarmupPhaseKind) -> Option<NextPhaseCooldown> {
    let next = catalog.next_phase(phase)?;
    let cooldown_hours = catalog.get(next).map_or(0, |def| def.cooldown_hours);
    Some(NextPhaseCooldown { phase: next, cooldown: Duration::hours(i64::from(cooldown_hours)) })
}

pub(crate) fn completion_record(
    catalog: &PhaseCatalog,
    account_id: Uuid,
    phase: WarmupPhaseKind,
    bot_id: Option<&str>,
    completed_by: &str,
    now: DateTime<Utc>,
) -> CompletionRecord {
    CompletionRecord {
        account_id,
        phase,
        bot_id: bot_id.map(ToString::to_string),
        completed_by: completed_by.to_string(),
        execution_time_ms: None,
        response: None,
        new_username: None,
        next_phase: next_phase_cooldown(catalog, phase),
        bot_phases: catalog.bot_phases().collect(),
        now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::{create_migrated_test_pool, SqliteAccountRepository, SqlitePhaseRepository};
    use crate::domain::ports::FakeClock;

    async fn service() -> (LifecycleService, FakeClock) {
        let pool = create_migrated_test_pool().await.unwrap();
        let clock = FakeClock::new();
        let svc = LifecycleService::new(
            Arc::new(SqliteAccountRepository::new(pool.clone())),
            Arc::new(SqlitePhaseRepository::new(pool)),
            Arc::new(clock.clone()),
        );
        (svc, clock)
    }

    #[test]
    fn test_next_phase_cooldown() {
        let catalog = PhaseCatalog::standard();
        let next = next_phase_cooldown(&catalog, WarmupPhaseKind::ManualSetup).unwrap();
        assert_eq!(next.phase, WarmupPhaseKind::Bio);
        assert_eq!(next.cooldown, Duration::hours(24));
        assert!(next_phase_cooldown(&catalog, WarmupPhaseKind::StoryNoCaption).is_none());
    }

    #[tokio::test]
    async fn test_invalid_adjacency_is_rejected() {
        let (svc, _) = service().await;
        let account = svc.register_account("adjacent").await.unwrap();

        let err = svc
            .transition(account.id, LifecycleState::Active, TransitionRequest::by("ops"))
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn test_prerequisites_reported() {
        let (svc, _) = service().await;
        let account = svc.register_account("prereq_user").await.unwrap();
        svc.transition(account.id, LifecycleState::Ready, TransitionRequest::by("ops")).await.unwrap();

        let err = svc
            .transition(account.id, LifecycleState::Warmup, TransitionRequest::by("ops"))
            .await
            .unwrap_err();
        let DomainError::PrerequisitesNotMet { errors } = err else {
            panic!("expected prerequisites error");
        };
        let codes: Vec<_> = errors.iter().map(|e| e.code.as_str()).collect();
        assert_eq!(codes, vec!["PROXY_REQUIRED", "MODEL_ASSIGNMENT_REQUIRED"]);
    }

    #[tokio::test]
    async fn test_entering_ready_initializes_phases() {
        let (svc, clock) = service().await;
        let account = svc.register_account("phase_user").await.unwrap();
        svc.transition(account.id, LifecycleState::Ready, TransitionRequest::by("ops")).await.unwrap();

        let rows = svc.phases.list_for_account(account.id).await.unwrap();
        assert_eq!(rows.len(), WarmupPhaseKind::ALL.len());
        assert_eq!(rows[0].phase, WarmupPhaseKind::ManualSetup);
        assert_eq!(rows[0].available_at, clock.now());
        assert_eq!(rows[1].available_at, clock.now() + Duration::hours(24));
        assert_eq!(rows[2].available_at, clock.now() + Duration::hours(48));
    }

    #[tokio::test]
    async fn test_forced_transition_is_audited() {
        let (svc, _) = service().await;
        let account = svc.register_account("forced_user").await.unwrap();

        svc.transition(
            account.id,
            LifecycleState::Maintenance,
            TransitionRequest::by("ops").with_reason("device repair").forced(),
        )
        .await
        .unwrap();

        let history = svc.history(account.id).await.unwrap();
        assert_eq!(history.len(), 1);
        assert!(history[0].forced);
        assert_eq!(history[0].from_state, LifecycleState::Imported);
        assert_eq!(history[0].to_state, LifecycleState::Maintenance);
    }

    #[tokio::test]
    async fn test_bulk_transition_reports_partial_failure() {
        let (svc, _) = service().await;
        let good = svc.register_account("good_user").await.unwrap();
        let short = svc.register_account("ab").await.unwrap();
        let missing = Uuid::new_v4();

        let result = svc
            .bulk_transition(&[good.id, short.id, missing], LifecycleState::Ready, TransitionRequest::by("ops"))
            .await;

        assert_eq!(result.total_processed, 3);
        assert_eq!(result.success_count, 1);
        assert_eq!(result.failure_count, 2);
        assert_eq!(result.successful, vec![good.id]);
        let short_failure = result.failed.iter().find(|f| f.account_id == short.id).unwrap();
        assert_eq!(short_failure.validation_errors[0].code, "PROFILE_INCOMPLETE");
        let missing_failure = result.failed.iter().find(|f| f.account_id == missing).unwrap();
        assert!(missing_failure.validation_errors.is_empty());
    }

    #[tokio::test]
    async fn test_complete_manual_setup() {
        let (svc, _) = service().await;
        let account = svc.register_account("setup_user").await.unwrap();

        let outcome = svc.complete_manual_setup(account.id, "ops").await.unwrap();
        assert_eq!(outcome.phase.phase, WarmupPhaseKind::ManualSetup);
        assert_eq!(outcome.phase.status, PhaseStatus::Completed);
        assert!(!outcome.warmup_complete);
        assert_eq!(svc.get_account(account.id).await.unwrap().lifecycle_state, LifecycleState::Ready);
    }
}
