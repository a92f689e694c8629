//! statuslog CLI
//!
//! Operator commands against a status log:
//! - Print the status report rebuilt from the log
//! - Print the records of a time range
//! - Generate a default config file

use anyhow::Context;
use chrono::{DateTime, Duration, FixedOffset, Local};
use clap::{Parser, Subcommand};
use statuslog::config::{generate_default_config, Config, LoggingConfig};
use statuslog::storage::Store;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use url::Url;

#[derive(Parser)]
#[command(name = "statuslog")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Log-structured status store for health monitoring")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file (default: user config dir, /etc/statuslog, ./config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Restore the log and print the status report as JSON
    Report {
        /// Records per target
        #[arg(short, long, default_value = "20")]
        records: usize,
    },

    /// Print the records checked within a time range
    Scan {
        /// Start of the range: RFC 3339 or relative (e.g. 30m, 6h, 7d)
        #[arg(short, long, default_value = "1d")]
        since: String,
        /// End of the range (exclusive): RFC 3339, relative, or "now"
        #[arg(short, long, default_value = "now")]
        until: String,
    },

    /// Print or write a default config file
    Config {
        /// Write to this path instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Report { records } => {
            let store = open_store(cli.config.as_deref(), true).await?;
            let source = Url::parse("statuslog:cli")?;
            for target in store.targets().await {
                store.activate_target(&source, &target).await;
            }
            let report = store.make_report(records).await;
            println!("{}", serde_json::to_string_pretty(&report)?);
            store.close().await?;
        }

        Commands::Scan { since, until } => {
            let now = Local::now().fixed_offset();
            let since = parse_time(&since, now)?;
            let until = parse_time(&until, now)?;
            // Unindexed files are searched directly; no live state is needed.
            let store = open_store(cli.config.as_deref(), false).await?;

            let mut stdout = std::io::stdout().lock();
            let mut count = 0usize;
            for record in store.open_log(since, until).await? {
                writeln!(stdout, "{record}")?;
                count += 1;
            }
            tracing::info!(records = count, %since, %until, "Scan complete");
            store.close().await?;
        }

        Commands::Config { output } => write_default_config(output.as_deref())?,
    }

    Ok(())
}

/// Load config, install logging, then open the store read-only.
///
/// Inspecting a log never creates, rotates or appends to it.
async fn open_store(config_path: Option<&Path>, restore: bool) -> anyhow::Result<Store> {
    let config = match config_path {
        Some(path) => Config::load_with_env(path)?,
        None => Config::load_default(),
    };
    init_tracing(&config.logging);
    tracing::debug!(version = env!("CARGO_PKG_VERSION"), "statuslog starting");

    let store = Store::new(config.store.to_store_config().read_only(), Box::new(std::io::stderr()))
        .await
        .context("failed to open status log")?;
    if restore {
        store.restore().await.context("failed to restore status log")?;
    }
    Ok(store)
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("statuslog={}", logging.level)));
    let registry = tracing_subscriber::registry().with(filter);

    if logging.format == "json" {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

fn write_default_config(output: Option<&Path>) -> anyhow::Result<()> {
    let content = generate_default_config();
    match output {
        Some(path) => {
            std::fs::write(path, content)
                .with_context(|| format!("failed to write {}", path.display()))?;
            eprintln!("Wrote default config to {}", path.display());
        }
        None => print!("{content}"),
    }
    Ok(())
}

/// Parse an absolute RFC 3339 time, "now", or a duration before `now`.
fn parse_time(s: &str, now: DateTime<FixedOffset>) -> anyhow::Result<DateTime<FixedOffset>> {
    let s = s.trim();
    if s == "now" {
        return Ok(now);
    }
    if let Ok(t) = DateTime::parse_from_rfc3339(s) {
        return Ok(t);
    }
    Ok(now - parse_duration(s)?)
}

fn parse_duration(s: &str) -> anyhow::Result<Duration> {
    let s = s.to_lowercase();

    if let Some(minutes) = s.strip_suffix('m') {
        Ok(Duration::minutes(minutes.parse()?))
    } else if let Some(hours) = s.strip_suffix('h') {
        Ok(Duration::hours(hours.parse()?))
    } else if let Some(days) = s.strip_suffix('d') {
        Ok(Duration::days(days.parse()?))
    } else if let Some(weeks) = s.strip_suffix('w') {
        Ok(Duration::weeks(weeks.parse()?))
    } else {
        anyhow::bail!("invalid time {s:?}: use RFC 3339, \"now\", or 30m, 6h, 7d, 2w")
    }
}
