//! backupctl - run backup and restore plans from a configuration file.

mod commands;
mod logger;
mod shutdown;

use anyhow::Result;
use backup_engine::Config;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

use crate::commands::Context;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", env = "BACKUP_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run backup plans now (every enabled plan when none are named)
    Backup {
        plan_ids: Vec<String>,
    },
    /// Run a restore plan
    Restore {
        restore_id: String,
        /// Restore only this artifact instead of resolving the chain
        #[arg(long)]
        artifact: Option<String>,
    },
    /// List the stored artifacts of a backup plan
    List {
        plan_id: String,
    },
    /// Show when plans are next due
    NextDue {
        plan_id: Option<String>,
    },
    /// Download an artifact and check its manifest
    Verify {
        plan_id: String,
        /// Artifact name; the newest when omitted
        artifact: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // .env is optional
    let _ = dotenvy::dotenv();
    let args = Args::parse();

    let config = Config::load(args.config.as_deref())?;

    let log_level = args.log_level.as_deref().unwrap_or(&config.log.level);
    logger::init(log_level)?;

    tracing::debug!(
        "backupctl v{} ({} backup plans, {} restore plans)",
        env!("CARGO_PKG_VERSION"),
        config.backup_plans.len(),
        config.restore_plans.len()
    );

    let cancel = CancellationToken::new();
    let listener = shutdown::cancel_on_signal(cancel.clone());
    let ctx = Context::new(config, cancel.clone());

    let result = match &args.command {
        Command::Backup { plan_ids } => commands::backup(&ctx, plan_ids).await,
        Command::Restore {
            restore_id,
            artifact,
        } => commands::restore(&ctx, restore_id, artifact.as_deref()).await,
        Command::List { plan_id } => commands::list(&ctx, plan_id).await,
        Command::NextDue { plan_id } => {
            commands::next_due(&ctx, plan_id.as_deref(), chrono::Local::now())
        }
        Command::Verify { plan_id, artifact } => {
            commands::verify(&ctx, plan_id, artifact.as_deref()).await
        }
    };

    // Stop the signal listener.
    cancel.cancel();
    let _ = listener.await;
    result
}
