//! Bot session CLI commands.

use anyhow::Result;
use clap::{Args, Subcommand};

use super::format_time;
use crate::cli::context::AppContext;
use crate::cli::output::{output, ActionOutput, CommandOutput};
use crate::cli::table::{list_table, render_list};
use crate::domain::models::{BotSession, BotSlot};

#[derive(Args, Debug)]
pub struct BotArgs {
    #[command(subcommand)]
    pub command: BotCommands,
}

#[derive(Subcommand, Debug)]
pub enum BotCommands {
    /// Open (or resume) a session
    Register {
        #[arg(long)]
        bot: String,
        #[arg(long)]
        session: String,
    },
    /// Record activity and extend the slot lease
    Heartbeat {
        #[arg(long)]
        bot: String,
        #[arg(long)]
        session: String,
    },
    /// Close a session
    End {
        #[arg(long)]
        session: String,
    },
    /// Expire sessions with no recent heartbeat
    Expire,
    /// List active sessions
    List,
    /// Show who holds the execution slot
    Slot,
}

#[derive(Debug, serde::Serialize)]
pub struct SessionListOutput {
    pub sessions: Vec<BotSession>,
}

impl CommandOutput for SessionListOutput {
    fn to_human(&self) -> String {
        let mut table = list_table(&["session", "bot", "started", "heartbeat", "accounts", "done", "failed"]);
        for s in &self.sessions {
            table.add_row(vec![
                s.session_id.clone(),
                s.bot_id.clone(),
                format_time(s.started_at),
                format_time(s.last_heartbeat),
                s.accounts_processed.to_string(),
                s.phases_completed.to_string(),
                s.phases_failed.to_string(),
            ]);
        }
        render_list("session", &table, self.sessions.len())
    }
}

impl CommandOutput for BotSlot {
    fn to_human(&self) -> String {
        match (&self.bot_id, self.expires_at) {
            (Some(bot), Some(expires)) => format!(
                "Slot held by {bot} (session {}) until {}",
                self.session_id.as_deref().unwrap_or("-"),
                format_time(expires)
            ),
            _ => "Slot is free".to_string(),
        }
    }
}

pub async fn execute(args: BotArgs, ctx: &AppContext, json_mode: bool) -> Result<()> {
    let bots = ctx.bots();

    match args.command {
        BotCommands::Register { bot, session } => {
            let registered = bots.register(&bot, &session).await?;
            output(&ActionOutput::ok(format!("Session {session} active for {bot}")).with_data(&registered), json_mode);
        }
        BotCommands::Heartbeat { bot, session } => {
            let out = if bots.heartbeat(&bot, &session).await? {
                ActionOutput::ok("Heartbeat recorded")
            } else {
                ActionOutput::failed(format!("Session {session} is not active for {bot}"))
            };
            output(&out, json_mode);
        }
        BotCommands::End { session } => {
            let out = if bots.end(&session).await? {
                ActionOutput::ok(format!("Session {session} ended"))
            } else {
                ActionOutput::failed(format!("Session {session} is not active"))
            };
            output(&out, json_mode);
        }
        BotCommands::Expire => {
            let expired = bots.expire_inactive().await?;
            output(&ActionOutput::ok(format!("Expired {expired} session(s)")), json_mode);
        }
        BotCommands::List => {
            output(&SessionListOutput { sessions: bots.list_active().await? }, json_mode);
        }
        BotCommands::Slot => {
            output(&bots.slot().await?, json_mode);
        }
    }

    Ok(())
}
