//! Warmup engine CLI entry point.

use clap::Parser;

use warmup_engine::cli::context::AppContext;
use warmup_engine::cli::{commands, handle_error, Cli, Commands};
use warmup_engine::infrastructure::config::ConfigLoader;
use warmup_engine::infrastructure::logging::{LogConfig, LoggerImpl};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let json = cli.json;

    if let Err(err) = run(cli).await {
        handle_error(err, json);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = ConfigLoader::load()?;
    let _logger = LoggerImpl::init(&LogConfig::from(&config.logging))?;

    let command = match cli.command {
        Commands::Init(args) => return commands::init::execute(args, cli.json).await,
        other => other,
    };

    let ctx = AppContext::open(config).await?;
    match command {
        Commands::Init(_) => Ok(()),
        Commands::Account(args) => commands::account::execute(args, &ctx, cli.json).await,
        Commands::Phase(args) => commands::phase::execute(args, &ctx, cli.json).await,
        Commands::Review(args) => commands::review::execute(args, &ctx, cli.json).await,
        Commands::Bot(args) => commands::bot::execute(args, &ctx, cli.json).await,
        Commands::Content(args) => commands::content::execute(args, &ctx, cli.json).await,
    }
}
