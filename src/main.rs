use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::time::Duration;

use oura_clockify_sync::commands::{self, cleanup::DEFAULT_CLEANUP_DAYS, CommandError};
use oura_clockify_sync::config::Settings;
use oura_clockify_sync::telemetry::{get_subscriber, init_subscriber};

#[derive(Parser)]
#[command(name = "oura-clockify-sync", version, about = "Sync Oura sleep sessions into Clockify")]
struct Cli {
  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Run the HTTP server, cron trigger and sync worker
  Serve,
  /// Run one sync now
  Sync {
    /// Sync the last N days
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..=365))]
    days: Option<u32>,
    /// First day to sync (YYYY-MM-DD)
    #[arg(long)]
    start: Option<NaiveDate>,
    /// Last day to sync (YYYY-MM-DD), defaults to today
    #[arg(long)]
    end: Option<NaiveDate>,
  },
  /// Authorize with Oura through a local callback
  Auth {
    /// Seconds to wait for the browser redirect
    #[arg(long, default_value_t = 300)]
    timeout: u64,
  },
  /// Inspect or manage stored Oura tokens
  Token {
    #[command(subcommand)]
    action: TokenAction,
  },
  /// Delete sleep entries previously written to Clockify
  Cleanup {
    /// How far back to look
    #[arg(long, default_value_t = DEFAULT_CLEANUP_DAYS, value_parser = clap::value_parser!(u32).range(1..=3650))]
    days: u32,
    /// Actually delete; without this only a preview is shown
    #[arg(long)]
    yes: bool,
  },
}

#[derive(Subcommand)]
enum TokenAction {
  /// Show where tokens are stored and whether they are still valid
  Status,
  /// Remove stored tokens
  Reset,
  /// Exchange the refresh token for a new access token
  Refresh,
}

#[tokio::main]
async fn main() {
  let cli = Cli::parse();

  let settings = match Settings::load() {
    Ok(settings) => settings,
    Err(e) => {
      eprintln!("error: {e}");
      std::process::exit(1);
    }
  };

  let subscriber = get_subscriber(&settings.log_level, std::io::stdout);
  if let Err(e) = init_subscriber(subscriber) {
    eprintln!("Failed to install log subscriber: {e}");
  }

  if let Err(e) = dispatch(cli.command, settings).await {
    tracing::error!("❌ {}", e);
    eprintln!("error: {e}");
    std::process::exit(1);
  }
}

async fn dispatch(command: Commands, settings: Settings) -> Result<(), CommandError> {
  let runner = commands::open_runner(settings).await?;

  match command {
    Commands::Serve => commands::serve::run(runner).await,
    Commands::Sync { days, start, end } => commands::sync::run(runner, start, end, days).await.map(|_| ()),
    Commands::Auth { timeout } => commands::auth::run(runner, Duration::from_secs(timeout)).await,
    Commands::Token { action } => match action {
      TokenAction::Status => commands::token::status(&runner).await.map(|_| ()),
      TokenAction::Reset => commands::token::reset(&runner).await,
      TokenAction::Refresh => commands::token::refresh(&runner).await.map(|_| ()),
    },
    Commands::Cleanup { days, yes } => commands::cleanup::run(runner, days, yes).await.map(|_| ()),
  }
}
