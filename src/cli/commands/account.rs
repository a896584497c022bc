//! Account CLI commands: registration, resources and lifecycle transitions.

use anyhow::Result;
use clap::{Args, Subcommand};

use super::{format_time, parse_state};
use crate::cli::context::AppContext;
use crate::cli::id_resolver::{resolve_account_id, resolve_model_id};
use crate::cli::output::{output, short_id, ActionOutput, CommandOutput};
use crate::cli::table::{list_table, render_list};
use crate::domain::models::{
    Account, BulkTransitionResult, LifecycleState, LifecycleSummaryEntry, StateValidationResult, TransitionRecord,
    TransitionRequest,
};

#[derive(Args, Debug)]
pub struct AccountArgs {
    #[command(subcommand)]
    pub command: AccountCommands,
}

#[derive(Subcommand, Debug)]
pub enum AccountCommands {
    /// Register a new account in the `imported` state
    Add {
        username: String,
    },
    /// Show account details
    Show {
        /// Account ID or unique prefix
        id: String,
    },
    /// List accounts in a lifecycle state
    List {
        #[arg(short, long, default_value = "warmup")]
        state: String,
    },
    /// Create a persona model
    CreateModel {
        name: String,
    },
    /// Link an account to a persona model
    AssignModel {
        id: String,
        model: String,
    },
    /// Set the account's proxy
    AssignProxy {
        id: String,
        host: String,
        port: u16,
    },
    /// Bind the account to a device container
    AssignContainer {
        id: String,
        container: i64,
    },
    /// Check whether a transition would be accepted
    Validate {
        id: String,
        state: String,
        #[arg(long)]
        force: bool,
    },
    /// Move an account to another lifecycle state
    Transition {
        id: String,
        state: String,
        #[arg(long)]
        reason: Option<String>,
        #[arg(long)]
        notes: Option<String>,
        /// Skip adjacency and prerequisite checks
        #[arg(long)]
        force: bool,
        #[arg(long, default_value = "operator")]
        by: String,
    },
    /// Transition several accounts at once; failures are reported per account
    BulkTransition {
        state: String,
        #[arg(required = true, num_args = 1..)]
        ids: Vec<String>,
        #[arg(long)]
        reason: Option<String>,
        #[arg(long)]
        force: bool,
        #[arg(long, default_value = "operator")]
        by: String,
    },
    /// Archive the account and release its container and proxy
    Invalidate {
        id: String,
        #[arg(long, default_value = "operator")]
        by: String,
    },
    /// Sign off manual setup so bot phases can be scheduled
    CompleteSetup {
        id: String,
        #[arg(long, default_value = "operator")]
        by: String,
    },
    /// Show the transition audit trail
    History {
        id: String,
    },
    /// List the states reachable from a state
    Transitions {
        state: String,
    },
    /// Account counts per lifecycle state
    Summary,
}

#[derive(Debug, serde::Serialize)]
pub struct AccountDetailOutput {
    pub account: Account,
    pub available_transitions: Vec<LifecycleState>,
}

impl CommandOutput for AccountDetailOutput {
    fn to_human(&self) -> String {
        let a = &self.account;
        let none = || "-".to_string();
        let mut lines = vec![
            format!("Account: {}", a.username),
            format!("ID:         {}", a.id),
            format!("State:      {}", a.lifecycle_state),
            format!("Model:      {}", a.model_id.map_or_else(none, |m| m.to_string())),
            format!(
                "Proxy:      {}",
                match (&a.proxy_host, a.proxy_port) {
                    (Some(host), Some(port)) => format!("{host}:{port}"),
                    _ => none(),
                }
            ),
            format!("Container:  {}", a.container_number.map_or_else(none, |c| c.to_string())),
            format!("Review:     {}", if a.requires_human_review { "required" } else { "no" }),
            format!("Private:    {}", if a.is_private { "yes" } else { "no" }),
            format!("Changed at: {}", format_time(a.state_changed_at)),
        ];
        if let Some(err) = &a.last_error_message {
            lines.push(format!("Last error: {err}"));
        }
        let next: Vec<&str> = self.available_transitions.iter().map(LifecycleState::as_str).collect();
        lines.push(format!("Next:       {}", if next.is_empty() { "-".to_string() } else { next.join(", ") }));
        lines.join("\n")
    }
}

#[derive(Debug, serde::Serialize)]
pub struct AccountListOutput {
    pub accounts: Vec<Account>,
}

impl CommandOutput for AccountListOutput {
    fn to_human(&self) -> String {
        let mut table = list_table(&["id", "username", "state", "container", "review"]);
        for a in &self.accounts {
            table.add_row(vec![
                short_id(a.id),
                a.username.clone(),
                a.lifecycle_state.as_str().to_string(),
                a.container_number.map(|c| c.to_string()).unwrap_or_default(),
                if a.requires_human_review { "yes".to_string() } else { String::new() },
            ]);
        }
        render_list("account", &table, self.accounts.len())
    }
}

#[derive(Debug, serde::Serialize)]
pub struct ValidationOutput(pub StateValidationResult);

impl CommandOutput for ValidationOutput {
    fn to_human(&self) -> String {
        if self.0.is_valid {
            return "Transition is valid.".to_string();
        }
        let mut lines = vec!["Transition rejected:".to_string()];
        for e in &self.0.errors {
            lines.push(format!("  - [{}] {}: {}", e.code, e.field, e.message));
        }
        lines.join("\n")
    }
}

#[derive(Debug, serde::Serialize)]
pub struct HistoryOutput {
    pub records: Vec<TransitionRecord>,
}

impl CommandOutput for HistoryOutput {
    fn to_human(&self) -> String {
        let mut table = list_table(&["at", "from", "to", "by", "forced", "reason"]);
        for r in &self.records {
            table.add_row(vec![
                format_time(r.changed_at),
                r.from_state.as_str().to_string(),
                r.to_state.as_str().to_string(),
                r.changed_by.clone(),
                if r.forced { "yes".to_string() } else { String::new() },
                r.reason.clone().unwrap_or_default(),
            ]);
        }
        render_list("transition", &table, self.records.len())
    }
}

#[derive(Debug, serde::Serialize)]
pub struct BulkOutput(pub BulkTransitionResult);

impl CommandOutput for BulkOutput {
    fn to_human(&self) -> String {
        let r = &self.0;
        let mut lines = vec![format!(
            "Processed {}: {} succeeded, {} failed",
            r.total_processed, r.success_count, r.failure_count
        )];
        for f in &r.failed {
            lines.push(format!("  {} - {}", short_id(f.account_id), f.error));
        }
        lines.join("\n")
    }
}

#[derive(Debug, serde::Serialize)]
pub struct SummaryOutput {
    pub states: Vec<LifecycleSummaryEntry>,
}

impl CommandOutput for SummaryOutput {
    fn to_human(&self) -> String {
        let mut table = list_table(&["state", "accounts"]);
        for entry in &self.states {
            table.add_row(vec![entry.state.as_str().to_string(), entry.count.to_string()]);
        }
        table.to_string()
    }
}

fn transition_message(record: &TransitionRecord) -> String {
    format!(
        "Account {} moved {} -> {}{}",
        short_id(record.account_id),
        record.from_state,
        record.to_state,
        if record.forced { " (forced)" } else { "" }
    )
}

pub async fn execute(args: AccountArgs, ctx: &AppContext, json_mode: bool) -> Result<()> {
    let lifecycle = ctx.lifecycle();

    match args.command {
        AccountCommands::Add { username } => {
            let account = lifecycle.register_account(&username).await?;
            let out = ActionOutput::ok(format!("Registered account {} ({})", account.username, account.id))
                .with_data(&account);
            output(&out, json_mode);
        }
        AccountCommands::Show { id } => {
            let account_id = resolve_account_id(&ctx.pool, &id).await?;
            let account = lifecycle.get_account(account_id).await?;
            let available_transitions = lifecycle.available_transitions(account.lifecycle_state);
            output(&AccountDetailOutput { account, available_transitions }, json_mode);
        }
        AccountCommands::List { state } => {
            let state = parse_state(&state)?;
            let accounts = lifecycle.list_accounts(state).await?;
            output(&AccountListOutput { accounts }, json_mode);
        }
        AccountCommands::CreateModel { name } => {
            let model_id = lifecycle.create_model(&name).await?;
            let out = ActionOutput::ok(format!("Created model {name} ({model_id})"))
                .with_data(&serde_json::json!({ "model_id": model_id }));
            output(&out, json_mode);
        }
        AccountCommands::AssignModel { id, model } => {
            let account_id = resolve_account_id(&ctx.pool, &id).await?;
            let model_id = resolve_model_id(&ctx.pool, &model).await?;
            let account = lifecycle.assign_model(account_id, model_id).await?;
            output(&ActionOutput::ok(format!("Model {model_id} assigned")).with_data(&account), json_mode);
        }
        AccountCommands::AssignProxy { id, host, port } => {
            let account_id = resolve_account_id(&ctx.pool, &id).await?;
            let account = lifecycle.assign_proxy(account_id, &host, port).await?;
            output(&ActionOutput::ok(format!("Proxy {host}:{port} assigned")).with_data(&account), json_mode);
        }
        AccountCommands::AssignContainer { id, container } => {
            let account_id = resolve_account_id(&ctx.pool, &id).await?;
            let account = lifecycle.assign_container(account_id, container).await?;
            output(&ActionOutput::ok(format!("Container {container} bound")).with_data(&account), json_mode);
        }
        AccountCommands::Validate { id, state, force } => {
            let account_id = resolve_account_id(&ctx.pool, &id).await?;
            let result = lifecycle.validate_transition(account_id, parse_state(&state)?, force).await?;
            output(&ValidationOutput(result), json_mode);
        }
        AccountCommands::Transition { id, state, reason, notes, force, by } => {
            let account_id = resolve_account_id(&ctx.pool, &id).await?;
            let request = build_request(by, reason, notes, force);
            let record = lifecycle.transition(account_id, parse_state(&state)?, request).await?;
            output(&ActionOutput::ok(transition_message(&record)).with_data(&record), json_mode);
        }
        AccountCommands::BulkTransition { state, ids, reason, force, by } => {
            let mut account_ids = Vec::with_capacity(ids.len());
            for id in &ids {
                account_ids.push(resolve_account_id(&ctx.pool, id).await?);
            }
            let result = lifecycle
                .bulk_transition(&account_ids, parse_state(&state)?, build_request(by, reason, None, force))
                .await;
            output(&BulkOutput(result), json_mode);
        }
        AccountCommands::Invalidate { id, by } => {
            let account_id = resolve_account_id(&ctx.pool, &id).await?;
            let record = lifecycle.invalidate(account_id, &by).await?;
            output(&ActionOutput::ok(transition_message(&record)).with_data(&record), json_mode);
        }
        AccountCommands::CompleteSetup { id, by } => {
            let account_id = resolve_account_id(&ctx.pool, &id).await?;
            let outcome = lifecycle.complete_manual_setup(account_id, &by).await?;
            output(&ActionOutput::ok("Manual setup completed").with_data(&outcome), json_mode);
        }
        AccountCommands::History { id } => {
            let account_id = resolve_account_id(&ctx.pool, &id).await?;
            let records = lifecycle.history(account_id).await?;
            output(&HistoryOutput { records }, json_mode);
        }
        AccountCommands::Transitions { state } => {
            let state = parse_state(&state)?;
            let targets = lifecycle.available_transitions(state);
            let names: Vec<&str> = targets.iter().map(LifecycleState::as_str).collect();
            let message = if names.is_empty() {
                format!("{state} is terminal")
            } else {
                format!("{state} -> {}", names.join(", "))
            };
            output(&ActionOutput::ok(message).with_data(&targets), json_mode);
        }
        AccountCommands::Summary => {
            let states = lifecycle.lifecycle_summary().await?;
            output(&SummaryOutput { states }, json_mode);
        }
    }

    Ok(())
}

fn build_request(by: String, reason: Option<String>, notes: Option<String>, force: bool) -> TransitionRequest {
    let mut request = TransitionRequest::by(by);
    request.reason = reason;
    request.notes = notes;
    request.force = force;
    request
}
