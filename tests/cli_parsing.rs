use clap::Parser;

use warmup_engine::cli::commands::account::AccountCommands;
use warmup_engine::cli::commands::content::ContentCommands;
use warmup_engine::cli::commands::phase::PhaseCommands;
use warmup_engine::cli::commands::review::ReviewCommands;
use warmup_engine::cli::{Cli, Commands};

#[test]
fn test_parse_account_transition() {
    let cli = Cli::try_parse_from([
        "warmup",
        "account",
        "transition",
        "1f0c",
        "paused",
        "--reason",
        "proxy rotation",
        "--force",
        "--by",
        "alice",
    ])
    .unwrap();

    match cli.command {
        Commands::Account(args) => match args.command {
            AccountCommands::Transition { id, state, reason, notes, force, by } => {
                assert_eq!(id, "1f0c");
                assert_eq!(state, "paused");
                assert_eq!(reason.as_deref(), Some("proxy rotation"));
                assert!(notes.is_none());
                assert!(force);
                assert_eq!(by, "alice");
            }
            _ => panic!("Wrong account command"),
        },
        _ => panic!("Wrong top-level command"),
    }
}

#[test]
fn test_parse_phase_fail_defaults() {
    let cli = Cli::try_parse_from([
        "warmup",
        "phase",
        "fail",
        "1f0c",
        "bio",
        "--bot",
        "bot-1",
        "--message",
        "tap missed",
    ])
    .unwrap();

    match cli.command {
        Commands::Phase(args) => match args.command {
            PhaseCommands::Fail { account, phase, bot, message, category, escalate } => {
                assert_eq!(account, "1f0c");
                assert_eq!(phase, "bio");
                assert_eq!(bot, "bot-1");
                assert_eq!(message, "tap missed");
                assert_eq!(category, "bot_error");
                assert!(!escalate);
            }
            _ => panic!("Wrong phase command"),
        },
        _ => panic!("Wrong top-level command"),
    }
}

#[test]
fn test_parse_phase_start_requires_session() {
    let result = Cli::try_parse_from(["warmup", "phase", "start", "1f0c", "bio", "--bot", "bot-1"]);
    assert!(result.is_err());
}

#[test]
fn test_parse_review_list_with_global_json() {
    let cli = Cli::try_parse_from(["warmup", "review", "list", "--status", "pending", "--json"]).unwrap();
    assert!(cli.json);

    match cli.command {
        Commands::Review(args) => match args.command {
            ReviewCommands::List { status, account, limit, offset } => {
                assert_eq!(status.as_deref(), Some("pending"));
                assert!(account.is_none());
                assert_eq!(limit, 50);
                assert_eq!(offset, 0);
            }
            _ => panic!("Wrong review command"),
        },
        _ => panic!("Wrong top-level command"),
    }
}

#[test]
fn test_parse_content_add_repeated_categories() {
    let cli = Cli::try_parse_from([
        "warmup",
        "content",
        "add",
        "image",
        "img/beach.jpg",
        "--category",
        "travel",
        "--category",
        "story",
    ])
    .unwrap();

    match cli.command {
        Commands::Content(args) => match args.command {
            ContentCommands::Add { kind, payload, categories } => {
                assert_eq!(kind, "image");
                assert_eq!(payload, "img/beach.jpg");
                assert_eq!(categories, vec!["travel", "story"]);
            }
            _ => panic!("Wrong content command"),
        },
        _ => panic!("Wrong top-level command"),
    }

    assert!(Cli::try_parse_from(["warmup", "content", "add", "text", "hello"]).is_err());
}

#[test]
fn test_parse_bulk_transition_needs_ids() {
    assert!(Cli::try_parse_from(["warmup", "account", "bulk-transition", "archived"]).is_err());

    let cli = Cli::try_parse_from(["warmup", "account", "bulk-transition", "archived", "a1", "b2"]).unwrap();
    match cli.command {
        Commands::Account(args) => match args.command {
            AccountCommands::BulkTransition { state, ids, force, .. } => {
                assert_eq!(state, "archived");
                assert_eq!(ids, vec!["a1", "b2"]);
                assert!(!force);
            }
            _ => panic!("Wrong account command"),
        },
        _ => panic!("Wrong top-level command"),
    }
}

#[test]
fn test_parse_phase_queue_defaults() {
    let cli = Cli::try_parse_from(["warmup", "phase", "queue"]).unwrap();

    match cli.command {
        Commands::Phase(args) => match args.command {
            PhaseCommands::Queue { model, limit } => {
                assert!(model.is_none());
                assert_eq!(limit, 50);
            }
            _ => panic!("Wrong phase command"),
        },
        _ => panic!("Wrong top-level command"),
    }

    let cli = Cli::try_parse_from(["warmup", "phase", "queue", "--model", "7a2b", "--limit", "5"]).unwrap();
    match cli.command {
        Commands::Phase(args) => match args.command {
            PhaseCommands::Queue { model, limit } => {
                assert_eq!(model.as_deref(), Some("7a2b"));
                assert_eq!(limit, 5);
            }
            _ => panic!("Wrong phase command"),
        },
        _ => panic!("Wrong top-level command"),
    }
}
