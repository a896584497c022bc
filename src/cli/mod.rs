//! Command-line interface for the warmup engine.

pub mod commands;
pub mod context;
pub mod id_resolver;
pub mod output;
pub mod table;

use clap::{Parser, Subcommand};

use crate::domain::errors::DomainError;

#[derive(Parser, Debug)]
#[command(name = "warmup")]
#[command(about = "Account warmup engine: lifecycle, phase scheduling and review queue", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output in JSON format
    #[arg(short, long, global = true)]
    pub json: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize configuration and database
    Init(commands::init::InitArgs),
    /// Account registration and lifecycle transitions
    Account(commands::account::AccountArgs),
    /// Warmup phase scheduling and execution
    Phase(commands::phase::PhaseArgs),
    /// Human review queue
    Review(commands::review::ReviewArgs),
    /// Bot sessions and the execution slot
    Bot(commands::bot::BotArgs),
    /// Content catalog
    Content(commands::content::ContentArgs),
}

/// Print an error and exit non-zero.
pub fn handle_error(err: anyhow::Error, json_mode: bool) -> ! {
    let code = err.downcast_ref::<DomainError>().map(DomainError::code);

    if json_mode {
        let body = serde_json::json!({
            "success": false,
            "error": err.to_string(),
            "code": code,
            "chain": err.chain().skip(1).map(ToString::to_string).collect::<Vec<_>>(),
        });
        println!("{}", serde_json::to_string_pretty(&body).unwrap_or_default());
    } else {
        eprintln!("Error: {err}");
        for cause in err.chain().skip(1) {
            eprintln!("  caused by: {cause}");
        }
    }
    std::process::exit(1);
}
