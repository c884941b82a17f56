pub mod commands;

use airloop_core::config::{AppConfig, LoadOptions, LoggingConfig};
use clap::{Parser, Subcommand};
use std::process::ExitCode;
use tracing_subscriber::filter::LevelFilter;

#[derive(Debug, Parser)]
#[command(
    name = "airloop",
    about = "Airloop operator CLI",
    long_about = "Inspect configuration, check readiness, apply migrations, browse sessions, and run conversation rounds against the local store.",
    after_help = "Examples:\n  airloop doctor --json\n  airloop sessions --limit 5\n  airloop chat --session 3f2a \"What is my flight status?\""
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Inspect effective configuration values with source attribution")]
    Config,
    #[command(about = "Validate config, database connectivity, migrations, and agent wiring")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "List the most recently updated sessions")]
    Sessions {
        #[arg(long, default_value_t = 20, help = "Maximum number of sessions to list")]
        limit: u32,
    },
    #[command(about = "Send one customer message and print the committed round")]
    Chat {
        #[arg(long, help = "Continue this session instead of starting a new one")]
        session: Option<String>,
        #[arg(help = "Customer message")]
        message: String,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();
    // An unloadable config is reported by the command itself.
    if let Ok(config) = AppConfig::load(LoadOptions::default()) {
        init_logging(&config.logging);
    }

    let result = match cli.command {
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Doctor { json } => commands::doctor::run(json),
        Command::Migrate => commands::migrate::run(),
        Command::Sessions { limit } => commands::sessions::run(limit),
        Command::Chat { session, message } => commands::chat::run(session, message),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}

/// Logs go to stderr so stdout stays a single JSON document.
fn init_logging(logging: &LoggingConfig) -> bool {
    use airloop_core::config::LogFormat::*;

    let level = logging.level.parse::<LevelFilter>().unwrap_or(LevelFilter::WARN);
    let builder = tracing_subscriber::fmt()
        .with_target(false)
        .with_max_level(level)
        .with_writer(std::io::stderr);

    match logging.format {
        Compact => builder.compact().try_init().is_ok(),
        Pretty => builder.pretty().try_init().is_ok(),
        Json => builder.json().try_init().is_ok(),
    }
}
