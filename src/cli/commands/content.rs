//! Content catalog CLI commands.

use anyhow::{bail, Result};
use chrono::Utc;
use clap::{Args, Subcommand};

use super::parse_content_kind;
use crate::cli::context::AppContext;
use crate::cli::id_resolver::resolve_content_id;
use crate::cli::output::{output, short_id, truncate, ActionOutput, CommandOutput};
use crate::cli::table::{list_table, render_list};
use crate::domain::models::ContentItem;

#[derive(Args, Debug)]
pub struct ContentArgs {
    #[command(subcommand)]
    pub command: ContentCommands,
}

#[derive(Subcommand, Debug)]
pub enum ContentCommands {
    /// Add an image path or text snippet
    Add {
        /// image or text
        kind: String,
        payload: String,
        /// Category tags, e.g. --category travel --category lifestyle
        #[arg(short, long = "category", required = true)]
        categories: Vec<String>,
    },
    /// List catalog entries
    List {
        #[arg(short, long)]
        kind: Option<String>,
    },
    /// Stop offering an item
    Deactivate {
        id: String,
    },
}

#[derive(Debug, serde::Serialize)]
pub struct ContentListOutput {
    pub items: Vec<ContentItem>,
}

impl CommandOutput for ContentListOutput {
    fn to_human(&self) -> String {
        let mut table = list_table(&["id", "kind", "categories", "active", "payload"]);
        for item in &self.items {
            table.add_row(vec![
                short_id(item.id),
                item.kind.as_str().to_string(),
                item.categories.join(","),
                if item.active { "yes".to_string() } else { "no".to_string() },
                truncate(&item.payload, 50),
            ]);
        }
        render_list("content item", &table, self.items.len())
    }
}

pub async fn execute(args: ContentArgs, ctx: &AppContext, json_mode: bool) -> Result<()> {
    let content = ctx.content();

    match args.command {
        ContentCommands::Add { kind, payload, categories } => {
            if payload.trim().is_empty() {
                bail!("Content payload cannot be empty");
            }
            let tags: Vec<&str> = categories.iter().map(String::as_str).collect();
            let item = ContentItem::new(parse_content_kind(&kind)?, &tags, payload, Utc::now());
            content.add(&item).await?;
            output(&ActionOutput::ok(format!("Added {} content {}", item.kind.as_str(), item.id)).with_data(&item), json_mode);
        }
        ContentCommands::List { kind } => {
            let kind = kind.as_deref().map(parse_content_kind).transpose()?;
            output(&ContentListOutput { items: content.list(kind).await? }, json_mode);
        }
        ContentCommands::Deactivate { id } => {
            let content_id = resolve_content_id(&ctx.pool, &id).await?;
            let out = if content.deactivate(content_id).await? {
                ActionOutput::ok(format!("Content {} deactivated", short_id(content_id)))
            } else {
                ActionOutput::failed("Content is already inactive")
            };
            output(&out, json_mode);
        }
    }

    Ok(())
}
