//! Review queue CLI commands.

use anyhow::{bail, Result};
use clap::{Args, Subcommand};

use super::{format_time, parse_category, parse_phase, parse_resolution, parse_review_status};
use crate::cli::context::AppContext;
use crate::cli::id_resolver::{resolve_account_id, resolve_review_id};
use crate::cli::output::{output, short_id, truncate, ActionOutput, CommandOutput};
use crate::cli::table::{list_table, render_list};
use crate::domain::models::{ReviewAnalytics, ReviewFilter, ReviewItem};

#[derive(Args, Debug)]
pub struct ReviewArgs {
    #[command(subcommand)]
    pub command: ReviewCommands,
}

#[derive(Subcommand, Debug)]
pub enum ReviewCommands {
    /// List review items, most urgent first
    List {
        #[arg(short, long)]
        status: Option<String>,
        #[arg(short, long)]
        account: Option<String>,
        #[arg(short, long, default_value = "50")]
        limit: i64,
        #[arg(long, default_value = "0")]
        offset: i64,
    },
    /// Show a review item
    Show {
        id: String,
    },
    /// Take a pending item
    Claim {
        id: String,
        #[arg(long)]
        operator: String,
    },
    /// Hand a claimed item back to the queue
    Release {
        id: String,
    },
    /// Record a resolution
    Resolve {
        id: String,
        /// retry_bot, manual_completion, skip_phase, reset_account, change_content, escalate_support, other
        #[arg(long)]
        method: String,
        #[arg(long)]
        notes: Option<String>,
        #[arg(long)]
        operator: String,
    },
    /// Raise priority and mark escalated
    Escalate {
        id: String,
        #[arg(long)]
        operator: String,
        #[arg(long)]
        notes: String,
    },
    /// Open a review for a phase by hand
    Create {
        account: String,
        phase: String,
        #[arg(long, default_value = "other")]
        category: String,
        #[arg(long)]
        message: String,
        #[arg(long, default_value = "operator")]
        by: String,
    },
    /// Queue statistics
    Analytics,
}

#[derive(Debug, serde::Serialize)]
pub struct ReviewListOutput {
    pub items: Vec<ReviewItem>,
}

impl CommandOutput for ReviewListOutput {
    fn to_human(&self) -> String {
        let mut table = list_table(&["id", "priority", "status", "account", "phase", "failure", "message"]);
        for item in &self.items {
            table.add_row(vec![
                short_id(item.id),
                item.priority_level.as_str().to_string(),
                item.review_status.as_str().to_string(),
                short_id(item.account_id),
                item.phase.clone(),
                item.failure_type.as_str().to_string(),
                truncate(&item.failure_message, 40),
            ]);
        }
        render_list("review item", &table, self.items.len())
    }
}

impl CommandOutput for ReviewItem {
    fn to_human(&self) -> String {
        let mut lines = vec![
            format!("Review:     {}", self.id),
            format!("Account:    {}", self.account_id),
            format!("Phase:      {}", self.phase),
            format!("Status:     {}", self.review_status.as_str()),
            format!("Priority:   {}", self.priority_level.as_str()),
            format!("Failure:    {} - {}", self.failure_type.as_str(), self.failure_message),
            format!("Retries:    {}", self.retry_count_before_review),
            format!("Escalated:  {} time(s)", self.escalation_count),
            format!("Failed at:  {}", format_time(self.failed_at)),
        ];
        if let Some(bot) = &self.original_bot_id {
            lines.push(format!("Bot:        {bot}"));
        }
        if let Some(assignee) = &self.assigned_to {
            lines.push(format!("Assigned:   {assignee}"));
        }
        if let Some(method) = self.resolution_method {
            lines.push(format!("Resolution: {method}"));
        }
        if let Some(notes) = &self.resolution_notes {
            lines.push(format!("\nNotes:\n{notes}"));
        }
        lines.join("\n")
    }
}

impl CommandOutput for ReviewAnalytics {
    fn to_human(&self) -> String {
        let mut lines = vec![
            format!("Total items:   {}", self.total),
            format!("Resolved:      {} ({} successfully)", self.resolved, self.resolved_successfully),
            format!("Success rate:  {:.1}%", self.success_rate),
        ];
        if let Some(avg) = self.avg_resolution_minutes {
            lines.push(format!("Avg resolution: {avg:.1} min"));
        }
        for (title, counts) in
            [("By status", &self.by_status), ("By failure", &self.by_failure_type), ("By priority", &self.by_priority)]
        {
            lines.push(format!("\n{title}:"));
            for (key, count) in counts {
                lines.push(format!("  {key:<20} {count}"));
            }
        }
        lines.join("\n")
    }
}

pub async fn execute(args: ReviewArgs, ctx: &AppContext, json_mode: bool) -> Result<()> {
    let reviews = ctx.reviews();

    match args.command {
        ReviewCommands::List { status, account, limit, offset } => {
            if limit <= 0 || offset < 0 {
                bail!("--limit must be positive and --offset non-negative");
            }
            let account_id = match account {
                Some(a) => Some(resolve_account_id(&ctx.pool, &a).await?),
                None => None,
            };
            let filter = ReviewFilter {
                status: status.as_deref().map(parse_review_status).transpose()?,
                account_id,
                limit: Some(limit),
                offset: Some(offset),
            };
            output(&ReviewListOutput { items: reviews.list(filter).await? }, json_mode);
        }
        ReviewCommands::Show { id } => {
            let review_id = resolve_review_id(&ctx.pool, &id).await?;
            output(&reviews.get(review_id).await?, json_mode);
        }
        ReviewCommands::Claim { id, operator } => {
            let review_id = resolve_review_id(&ctx.pool, &id).await?;
            let out = if reviews.claim(review_id, &operator).await? {
                ActionOutput::ok(format!("Review {} claimed by {operator}", short_id(review_id)))
            } else {
                ActionOutput::failed("Review is not pending; someone else may have claimed it")
            };
            output(&out, json_mode);
        }
        ReviewCommands::Release { id } => {
            let review_id = resolve_review_id(&ctx.pool, &id).await?;
            let out = if reviews.release(review_id).await? {
                ActionOutput::ok(format!("Review {} returned to the queue", short_id(review_id)))
            } else {
                ActionOutput::failed("Review is not in progress")
            };
            output(&out, json_mode);
        }
        ReviewCommands::Resolve { id, method, notes, operator } => {
            let review_id = resolve_review_id(&ctx.pool, &id).await?;
            let method = parse_resolution(&method)?;
            let out = if reviews.resolve(review_id, method, notes.as_deref(), &operator).await? {
                ActionOutput::ok(format!("Review {} resolved ({method})", short_id(review_id)))
            } else {
                ActionOutput::failed("Review is already resolved")
            };
            output(&out, json_mode);
        }
        ReviewCommands::Escalate { id, operator, notes } => {
            let review_id = resolve_review_id(&ctx.pool, &id).await?;
            let escalated = reviews.escalate(review_id, &operator, &notes).await?;
            let item = reviews.get(review_id).await?;
            let out = if escalated {
                ActionOutput::ok(format!("Review escalated; priority now {}", item.priority_level.as_str()))
            } else {
                ActionOutput::failed("Review is resolved; note recorded")
            };
            output(&out.with_data(&item), json_mode);
        }
        ReviewCommands::Create { account, phase, category, message, by } => {
            let account_id = resolve_account_id(&ctx.pool, &account).await?;
            let item = reviews
                .create_manual_review(account_id, parse_phase(&phase)?, parse_category(&category)?, &message, &by)
                .await?;
            output(&item, json_mode);
        }
        ReviewCommands::Analytics => {
            output(&reviews.analytics().await?, json_mode);
        }
    }

    Ok(())
}
