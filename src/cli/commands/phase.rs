//! Warmup phase CLI commands.

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use std::time::Duration;

use super::{format_time, parse_category, parse_phase};
use crate::cli::context::AppContext;
use crate::cli::id_resolver::{resolve_account_id, resolve_model_id};
use crate::cli::output::{output, short_id, truncate, ActionOutput, CommandOutput};
use crate::cli::table::{list_table, render_list};
use crate::domain::models::{
    FailureDisposition, FailureOutcome, PhaseFailure, ReadyAccount, WarmupStatistics, WarmupStatusSummary,
};
use crate::services::{PhaseRunOutcome, StartedPhase};

/// Upper bound on waiting for the private-account sequence after promotion.
const FINALIZATION_WAIT: Duration = Duration::from_secs(600);

#[derive(Args, Debug)]
pub struct PhaseArgs {
    #[command(subcommand)]
    pub command: PhaseCommands,
}

#[derive(Subcommand, Debug)]
pub enum PhaseCommands {
    /// Create the account's phase rows if missing
    Init {
        account: String,
    },
    /// Show warmup progress for an account
    Status {
        account: String,
    },
    /// Move an account into warmup
    StartWarmup {
        account: String,
        #[arg(long)]
        bot: String,
    },
    /// Show the next phase the bot could start
    Next {
        account: String,
        #[arg(long)]
        bot: String,
    },
    /// Check whether a bot may start work now
    CanStart {
        #[arg(long)]
        bot: String,
    },
    /// Claim a phase and print its device commands
    Start {
        account: String,
        phase: String,
        #[arg(long)]
        bot: String,
        #[arg(long)]
        session: String,
    },
    /// Report a claimed phase as completed
    Complete {
        account: String,
        phase: String,
        #[arg(long)]
        bot: String,
        #[arg(long)]
        execution_time_ms: Option<i64>,
        /// Raw JSON automation response
        #[arg(long)]
        response: Option<String>,
    },
    /// Report a claimed phase as failed
    Fail {
        account: String,
        phase: String,
        #[arg(long)]
        bot: String,
        #[arg(long)]
        message: String,
        #[arg(long, default_value = "bot_error")]
        category: String,
        /// Send straight to review
        #[arg(long)]
        escalate: bool,
    },
    /// Claim, run on the device and record the result
    Run {
        account: String,
        phase: String,
        #[arg(long)]
        bot: String,
        #[arg(long)]
        session: String,
    },
    /// Operator reset of a failed or escalated phase
    Reset {
        account: String,
        phase: String,
        #[arg(long, default_value = "operator")]
        by: String,
    },
    /// Operator completion outside the bot path
    CompleteManual {
        account: String,
        phase: String,
        #[arg(long, default_value = "operator")]
        by: String,
    },
    /// Accounts with bot work ready now, most ready first
    Queue {
        /// Only accounts of this model
        #[arg(long)]
        model: Option<String>,
        #[arg(long, default_value_t = 50)]
        limit: u32,
    },
    /// Fail phases whose lease has expired
    Reap,
    /// Global phase statistics
    Stats,
}

impl CommandOutput for WarmupStatusSummary {
    fn to_human(&self) -> String {
        let mut lines = vec![format!(
            "Warmup {:.0}% complete ({} of {} phases){}",
            self.progress_percent,
            self.completed_phases,
            self.total_phases,
            if self.is_complete { " - done" } else { "" }
        )];
        let mut table = list_table(&["#", "phase", "status", "available at", "retries", "error"]);
        for p in &self.phases {
            table.add_row(vec![
                p.phase_order.to_string(),
                p.phase.as_str().to_string(),
                p.status.as_str().to_string(),
                format_time(p.available_at),
                format!("{}/{}", p.retry_count, p.max_retries),
                p.error_message.as_deref().map(|e| truncate(e, 40)).unwrap_or_default(),
            ]);
        }
        lines.push(table.to_string());
        lines.join("\n")
    }
}

#[derive(Debug, serde::Serialize)]
pub struct ReadyQueueOutput {
    pub accounts: Vec<ReadyAccount>,
}

impl CommandOutput for ReadyQueueOutput {
    fn to_human(&self) -> String {
        let mut table = list_table(&["id", "username", "container", "state", "ready", "completed", "total"]);
        for a in &self.accounts {
            table.add_row(vec![
                short_id(a.account_id),
                a.username.clone(),
                a.container_number.to_string(),
                a.lifecycle_state.as_str().to_string(),
                a.ready_phases.to_string(),
                a.completed_phases.to_string(),
                a.total_phases.to_string(),
            ]);
        }
        render_list("ready account", &table, self.accounts.len())
    }
}

impl CommandOutput for StartedPhase {
    fn to_human(&self) -> String {
        let mut lines = vec![format!("Started {} (attempt {})", self.phase.phase, self.phase.retry_count + 1)];
        for content in [&self.image, &self.text].into_iter().flatten() {
            lines.push(format!("  {} content [{}]: {}", content.kind.as_str(), content.category, content.payload));
        }
        if self.commands.is_empty() {
            lines.push("  No device commands (no container bound)".to_string());
        }
        for (i, command) in self.commands.iter().enumerate() {
            lines.push(format!("  {}. {} - {}", i + 1, command.script, command.description));
        }
        lines.join("\n")
    }
}

impl CommandOutput for FailureOutcome {
    fn to_human(&self) -> String {
        match self.disposition {
            FailureDisposition::Retry => format!(
                "Phase {} failed ({}/{}); retry after {}",
                self.phase.phase,
                self.phase.retry_count,
                self.phase.max_retries,
                format_time(self.phase.available_at)
            ),
            FailureDisposition::Escalate => format!(
                "Phase {} escalated to review{}",
                self.phase.phase,
                self.review_id.map(|id| format!(" ({id})")).unwrap_or_default()
            ),
        }
    }
}

impl CommandOutput for PhaseRunOutcome {
    fn to_human(&self) -> String {
        match self {
            Self::Completed(outcome) => format!(
                "Phase {} completed{}",
                outcome.phase.phase,
                if outcome.warmup_complete { "; warmup complete, account promoted to active" } else { "" }
            ),
            Self::Failed(outcome) => outcome.to_human(),
        }
    }
}

impl CommandOutput for WarmupStatistics {
    fn to_human(&self) -> String {
        let mut lines = vec![
            format!("Phases:        {}", self.total_phases),
            format!("Completed:     {}", self.completed_phases),
            format!("Failed:        {}", self.failed_phases),
            format!("In review:     {}", self.phases_requiring_review),
            format!("In progress:   {}", self.in_progress_phases),
            format!("Success rate:  {:.1}%", self.success_rate),
        ];
        if let Some(avg) = self.avg_execution_time_ms {
            lines.push(format!("Avg exec time: {avg:.0} ms"));
        }
        let mut table = list_table(&["phase", "total", "completed", "failed", "review"]);
        for p in &self.by_phase {
            table.add_row(vec![
                p.phase.clone(),
                p.total.to_string(),
                p.completed.to_string(),
                p.failed.to_string(),
                p.requires_review.to_string(),
            ]);
        }
        lines.push(String::new());
        lines.push(table.to_string());
        lines.join("\n")
    }
}

pub async fn execute(args: PhaseArgs, ctx: &AppContext, json_mode: bool) -> Result<()> {
    let warmup = ctx.warmup();

    match args.command {
        PhaseCommands::Init { account } => {
            let account_id = resolve_account_id(&ctx.pool, &account).await?;
            let inserted = warmup.initialize_phases(account_id).await?;
            output(&ActionOutput::ok(format!("Initialized {inserted} phase(s)")), json_mode);
        }
        PhaseCommands::Status { account } => {
            let account_id = resolve_account_id(&ctx.pool, &account).await?;
            output(&warmup.warmup_status(account_id).await?, json_mode);
        }
        PhaseCommands::StartWarmup { account, bot } => {
            let account_id = resolve_account_id(&ctx.pool, &account).await?;
            let record = warmup.start_warmup(account_id, &bot).await?;
            output(&ActionOutput::ok(format!("Account moved {} -> warmup", record.from_state)).with_data(&record), json_mode);
        }
        PhaseCommands::Next { account, bot } => {
            let account_id = resolve_account_id(&ctx.pool, &account).await?;
            let out = match warmup.next_available_phase(account_id, &bot).await? {
                Some(phase) => ActionOutput::ok(format!("Next phase: {}", phase.phase)).with_data(&phase),
                None => ActionOutput::failed("No phase available for this bot right now"),
            };
            output(&out, json_mode);
        }
        PhaseCommands::CanStart { bot } => {
            let permission = warmup.can_bot_start_work(&bot).await?;
            let out = if permission.allowed {
                ActionOutput::ok(format!("Bot {bot} may start work"))
            } else {
                ActionOutput::failed(permission.reason.clone().unwrap_or_default())
            };
            output(&out.with_data(&permission), json_mode);
        }
        PhaseCommands::Start { account, phase, bot, session } => {
            let account_id = resolve_account_id(&ctx.pool, &account).await?;
            let started = warmup.start_phase(account_id, parse_phase(&phase)?, &bot, &session).await?;
            output(&started, json_mode);
        }
        PhaseCommands::Complete { account, phase, bot, execution_time_ms, response } => {
            let account_id = resolve_account_id(&ctx.pool, &account).await?;
            let response = response
                .map(|raw| serde_json::from_str::<serde_json::Value>(&raw))
                .transpose()
                .context("--response must be valid JSON")?;
            let mut finalization = warmup.subscribe_finalization();
            let outcome =
                warmup.complete_phase(account_id, parse_phase(&phase)?, &bot, execution_time_ms, response).await?;
            let promoted = outcome.warmup_complete;
            output(&PhaseRunOutcome::Completed(outcome), json_mode);
            if promoted {
                await_finalization(&mut finalization, json_mode).await;
            }
        }
        PhaseCommands::Fail { account, phase, bot, message, category, escalate } => {
            let account_id = resolve_account_id(&ctx.pool, &account).await?;
            let mut failure = PhaseFailure::new(message, parse_category(&category)?);
            if escalate {
                failure = failure.escalated();
            }
            let outcome = warmup.fail_phase(account_id, parse_phase(&phase)?, &bot, failure).await?;
            output(&outcome, json_mode);
        }
        PhaseCommands::Run { account, phase, bot, session } => {
            let account_id = resolve_account_id(&ctx.pool, &account).await?;
            let dispatcher = ctx.dispatcher();
            let mut finalization = warmup.subscribe_finalization();
            let outcome =
                warmup.execute_phase(account_id, parse_phase(&phase)?, &bot, &session, &dispatcher).await?;
            let promoted = matches!(&outcome, PhaseRunOutcome::Completed(o) if o.warmup_complete);
            output(&outcome, json_mode);
            if promoted {
                await_finalization(&mut finalization, json_mode).await;
            }
        }
        PhaseCommands::Reset { account, phase, by } => {
            let account_id = resolve_account_id(&ctx.pool, &account).await?;
            let reset = warmup.reset_phase_for_retry(account_id, parse_phase(&phase)?, &by).await?;
            output(&ActionOutput::ok(format!("Phase {} reset to pending", reset.phase)).with_data(&reset), json_mode);
        }
        PhaseCommands::CompleteManual { account, phase, by } => {
            let account_id = resolve_account_id(&ctx.pool, &account).await?;
            let mut finalization = warmup.subscribe_finalization();
            let outcome = warmup.complete_phase_manually(account_id, parse_phase(&phase)?, &by).await?;
            let promoted = outcome.warmup_complete;
            output(&PhaseRunOutcome::Completed(outcome), json_mode);
            if promoted {
                await_finalization(&mut finalization, json_mode).await;
            }
        }
        PhaseCommands::Queue { model, limit } => {
            let model_id = match model {
                Some(prefix) => Some(resolve_model_id(&ctx.pool, &prefix).await?),
                None => None,
            };
            let accounts = warmup.ready_accounts(model_id, limit).await?;
            output(&ReadyQueueOutput { accounts }, json_mode);
        }
        PhaseCommands::Reap => {
            let reaped = warmup.reap_stale_phases().await?;
            output(&ActionOutput::ok(format!("Reaped {} stale phase(s)", reaped.len())).with_data(&reaped), json_mode);
        }
        PhaseCommands::Stats => {
            output(&warmup.warmup_statistics().await?, json_mode);
        }
    }

    Ok(())
}

/// Keep the process alive until the background private-account run reports.
async fn await_finalization(
    rx: &mut tokio::sync::broadcast::Receiver<crate::services::FinalizationReport>,
    json_mode: bool,
) {
    match tokio::time::timeout(FINALIZATION_WAIT, rx.recv()).await {
        Ok(Ok(report)) => {
            let out = if report.succeeded {
                ActionOutput::ok("Account set to private")
            } else {
                ActionOutput::failed(format!(
                    "Finalization failed: {}",
                    report.error.as_deref().unwrap_or("unknown error")
                ))
            };
            output(&out.with_data(&report), json_mode);
        }
        Ok(Err(e)) => tracing::warn!(error = %e, "finalization report lost"),
        Err(_) => tracing::warn!("timed out waiting for account finalization"),
    }
}
