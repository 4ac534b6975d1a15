pub mod commands;

use clap::{ArgAction, Parser, Subcommand};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "switchboard",
    about = "Switchboard operator CLI",
    long_about = "Inspect configuration, apply migrations, administer the multi-specialist rollout, \
                  query handoff history, and run single turns locally.",
    after_help = "Examples:\n  switchboard doctor --json\n  switchboard rollout set 25\n  \
                  switchboard rollout override set user123 true\n  \
                  switchboard ask --user user123 \"My incidents stopped auto-assigning\""
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Inspect effective configuration values with source attribution and redaction")]
    Config,
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Validate config, database connectivity, and migration state")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Read or change the multi-specialist rollout")]
    Rollout {
        #[command(subcommand)]
        command: RolloutCommand,
    },
    #[command(about = "Query recorded specialist handoffs")]
    Handoffs {
        #[command(subcommand)]
        command: HandoffsCommand,
    },
    #[command(about = "Run a single conversational turn against the local configuration")]
    Ask {
        #[arg(long, help = "User id used for the rollout decision")]
        user: Option<String>,
        #[arg(long, help = "Conversation id to record handoffs under")]
        conversation: Option<String>,
        message: String,
    },
}

#[derive(Debug, Subcommand)]
enum RolloutCommand {
    #[command(about = "Show the rollout percentage and per-user overrides")]
    Get,
    #[command(about = "Set the rollout percentage (0-100)")]
    Set {
        #[arg(allow_negative_numbers = true)]
        percentage: i64,
    },
    #[command(about = "Manage per-user overrides")]
    Override {
        #[command(subcommand)]
        command: OverrideCommand,
    },
}

#[derive(Debug, Subcommand)]
enum OverrideCommand {
    Get {
        user_id: String,
    },
    Set {
        user_id: String,
        #[arg(action = ArgAction::Set)]
        enabled: bool,
    },
    Clear {
        user_id: String,
    },
}

#[derive(Debug, Subcommand)]
enum HandoffsCommand {
    #[command(about = "List the handoffs recorded for one conversation")]
    List { conversation_id: String },
    #[command(about = "Count handoff paths inside a time window (RFC 3339 bounds)")]
    Window {
        #[arg(long, help = "Inclusive lower bound; defaults to 24 hours before --until")]
        since: Option<String>,
        #[arg(long, help = "Exclusive upper bound; defaults to now")]
        until: Option<String>,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Migrate => commands::migrate::run(),
        Command::Doctor { json } => {
            commands::CommandResult { exit_code: 0, output: commands::doctor::run(json) }
        }
        Command::Rollout { command } => match command {
            RolloutCommand::Get => commands::rollout::get(),
            RolloutCommand::Set { percentage } => commands::rollout::set(percentage),
            RolloutCommand::Override { command } => match command {
                OverrideCommand::Get { user_id } => commands::rollout::get_override(&user_id),
                OverrideCommand::Set { user_id, enabled } => {
                    commands::rollout::set_override(&user_id, enabled)
                }
                OverrideCommand::Clear { user_id } => commands::rollout::clear_override(&user_id),
            },
        },
        Command::Handoffs { command } => match command {
            HandoffsCommand::List { conversation_id } => commands::handoffs::list(&conversation_id),
            HandoffsCommand::Window { since, until } => {
                commands::handoffs::window(since.as_deref(), until.as_deref())
            }
        },
        Command::Ask { user, conversation, message } => {
            commands::ask::run(user.as_deref(), conversation.as_deref(), &message)
        }
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
