pub mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use nova_core::config::{ConfigOverrides, LoadOptions};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "nova",
    about = "NovaCRM support assistant CLI",
    long_about = "Ask the support assistant questions, replay query batches, and inspect configuration readiness.",
    after_help = "Examples:\n  nova ask \"What is the pricing?\"\n  nova ask --account A001 \"Show my invoices\" --json\n  nova batch queries.jsonl\n  nova doctor --json"
)]
pub struct Cli {
    #[arg(long, global = true, help = "Config file to load instead of nova.toml / config/nova.toml")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Run one query through the assistant pipeline")]
    Ask {
        query: String,
        #[arg(long, short = 'a', help = "Account identifier used for data lookups (e.g. A001)")]
        account: Option<String>,
        #[arg(long = "history", help = "Prior turn summary; repeat for several turns")]
        history: Vec<String>,
        #[arg(long, short = 'm', help = "Override the configured completion model")]
        model: Option<String>,
        #[arg(long, help = "Emit the result record as JSON")]
        json: bool,
    },
    #[command(about = "Run every query of a JSONL file concurrently and summarize the outcomes")]
    Batch {
        file: PathBuf,
        #[arg(long, short = 'm', help = "Override the configured completion model")]
        model: Option<String>,
        #[arg(long, help = "Emit per-query results and the summary as JSON")]
        json: bool,
    },
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, guardrail rules, and collaborator readiness")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();
    init_logging();

    let load_options = |model: Option<String>| LoadOptions {
        require_file: cli.config.is_some(),
        config_path: cli.config.clone(),
        overrides: ConfigOverrides { llm_model: model, ..ConfigOverrides::default() },
    };

    let result = match cli.command {
        Command::Ask { query, account, history, model, json } => {
            commands::ask::run(load_options(model), &query, account, history, json)
        }
        Command::Batch { file, model, json } => commands::batch::run(load_options(model), &file, json),
        Command::Config => commands::CommandResult {
            exit_code: 0,
            output: commands::config::run(load_options(None)),
        },
        Command::Doctor { json } => commands::doctor::run(load_options(None), json),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}

/// Diagnostics go to stderr so command output stays machine readable.
fn init_logging() {
    let filter = EnvFilter::try_from_env("NOVA_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .compact()
        .try_init();
}
