use anyhow::Result;
use clap::{Parser, Subcommand};
use klassgram::config::Config;
use klassgram::error::Error;
use klassgram::klassly::KlasslyClient;
use klassgram::storage::History;
use klassgram::sync::SyncRunner;
use klassgram::telegram::Notifier;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(
    name = "klassgram",
    version,
    about = "Forward new Klassroom posts to a Telegram chat",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format (text, json)
    #[arg(long, global = true, default_value = "text")]
    log_format: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one sync: fetch new posts and forward them
    Sync {
        /// Home directory holding config.toml and run state
        #[arg(long, default_value = ".")]
        home: PathBuf,
    },

    /// Show the delivery history
    History {
        /// Home directory holding config.toml and run state
        #[arg(long, default_value = ".")]
        home: PathBuf,

        /// Number of most recent entries to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_tracing(&cli.log_format, cli.verbose)?;

    match cli.command {
        Commands::Sync { home } => {
            tracing::info!(home = %home.display(), "starting sync");
            sync(home).await;
        }

        Commands::History { home, limit } => {
            history(home, limit)?;
        }
    }

    Ok(())
}

fn setup_tracing(format: &str, verbose: bool) -> Result<()> {
    let env_filter = if verbose {
        tracing_subscriber::EnvFilter::new("klassgram=debug,info")
    } else {
        tracing_subscriber::EnvFilter::new("klassgram=info,warn")
    };

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
        }
    }

    Ok(())
}

/// Run one sync and exit with a status a scheduler can act on:
/// 0 = ran to completion (per-post failures only logged),
/// 2 = another run holds the lock,
/// 1 = aborted before delivery (config, auth, ledger I/O).
async fn sync(home: PathBuf) {
    let config = match Config::load(&home) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "failed to load configuration");
            std::process::exit(1);
        }
    };

    let result = run_pipeline(&config).await;
    match result {
        Ok(report) => {
            if report.failed > 0 || report.classes_failed > 0 {
                tracing::warn!(
                    delivered = report.delivered,
                    failed = report.failed,
                    classes_failed = report.classes_failed,
                    "sync completed with failures; missed posts retry next run"
                );
            } else {
                tracing::info!(delivered = report.delivered, "sync completed");
            }
        }
        Err(Error::LockHeld) => {
            tracing::warn!("another sync run is in progress, exiting");
            std::process::exit(2);
        }
        Err(e) => {
            tracing::error!(error = %e, "sync aborted");
            std::process::exit(1);
        }
    }
}

async fn run_pipeline(config: &Config) -> klassgram::error::Result<klassgram::sync::SyncReport> {
    let source = KlasslyClient::new(
        &config.login.user,
        &config.login.password,
        &config.http.agent,
    )?;
    let publisher = Notifier::new(
        &config.telegram.token,
        &config.telegram.chat_id,
        Duration::from_millis(config.telegram.throttling_ms),
    )?;

    let mut runner = SyncRunner::new(
        source,
        publisher,
        config.classes.names.clone(),
        &config.home,
    );
    runner.run().await
}

fn history(home: PathBuf, limit: usize) -> Result<()> {
    let history = History::load(&home.join("history.json"))?;

    if history.is_empty() {
        println!("No posts delivered yet.");
        return Ok(());
    }

    let entries = history.entries();
    let shown = &entries[entries.len().saturating_sub(limit)..];
    println!(
        "Showing {} of {} delivered posts:",
        shown.len(),
        entries.len()
    );
    for entry in shown {
        println!("  {}  {}", entry.date.format("%Y-%m-%d %H:%M:%S"), entry.id);
    }

    Ok(())
}
