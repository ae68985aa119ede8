use std::sync::Arc;

use clap::{Parser, Subcommand};

use channel_mover::commands::{self, MoveRequest, PurgeRequest};
use channel_mover::config::Config;
use channel_mover::error::{Error, Result};
use channel_mover::jobs::{JobHandle, JobRunner, JobStatus};
use channel_mover::model::{ChannelId, UserId};
use channel_mover::source::{ChannelDataSource, DiscordSource};

#[derive(Debug, Parser)]
#[command(name = "channel-mover", version, about = "Move or purge channel messages")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Move messages from one channel to another.
    Move {
        /// The source channel to move messages from.
        #[arg(long = "from")]
        channel_from: ChannelId,
        /// The target channel to move messages to.
        #[arg(long = "to")]
        channel_to: ChannelId,
        /// Action to perform: -all, -last, -from_user.
        #[arg(long, default_value = "-all", allow_hyphen_values = true)]
        action: String,
        /// Time period for the -last action (e.g. "7 days", "1 hour").
        #[arg(long)]
        time_period: Option<String>,
        /// The user to filter messages for the -from_user action.
        #[arg(long)]
        user: Option<UserId>,
    },
    /// Delete messages in a channel older than a time period.
    Purge {
        /// The channel to delete messages from.
        #[arg(long)]
        channel: ChannelId,
        /// Time period to delete messages from (e.g. "7 days", "1 hour").
        #[arg(long)]
        time_period: String,
    },
}

#[tokio::main]
async fn main() {
    // A missing .env file is fine; the environment may already be set.
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let code = match run(cli).await {
        Ok(code) => code,
        Err(Error::Policy(e)) => {
            eprintln!("{}", commands::policy_error_reply(&e));
            2
        }
        Err(Error::Parse(_)) => {
            eprintln!("{}", commands::INVALID_PERIOD_REPLY);
            2
        }
        Err(e) => {
            eprintln!("Error: {e}");
            1
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli) -> Result<i32> {
    let config = Config::from_env()?;

    eprintln!("📦 Channel Mover v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   API: {}", config.api_base);
    eprintln!("   Page size: {}", config.page_size);

    let source: Arc<dyn ChannelDataSource> = Arc::new(DiscordSource::new(&config));
    let runner = JobRunner::new(source, config.page_size);

    let handle = match cli.command {
        Command::Move {
            channel_from,
            channel_to,
            action,
            time_period,
            user,
        } => runner.spawn_move(MoveRequest {
            source_channel: channel_from,
            destination_channel: channel_to,
            action,
            time_period,
            user_id: user,
        })?,
        Command::Purge {
            channel,
            time_period,
        } => runner.spawn_purge(PurgeRequest {
            channel,
            time_period,
        })?,
    };

    eprintln!("   {} (job {})", handle.ack.message, handle.job_id());
    Ok(await_job(handle).await)
}

/// Wait for a job, cancelling it on Ctrl-C. Returns the process exit code.
async fn await_job(handle: JobHandle) -> i32 {
    let cancel = handle.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("   Cancelling at the next safe point...");
            cancel.cancel();
        }
    });

    let outcome = handle.wait().await;
    println!("{}", outcome.summary);
    match outcome.status {
        JobStatus::Completed => 0,
        JobStatus::Partial | JobStatus::Failed => 1,
    }
}
