//! offsite: replicate finished backup archives to every configured backend.
//!
//! Backends are enabled through environment variables (or a `.env` file):
//! BACKUP_ARCHIVE for a local directory, AWS_S3_BUCKET_NAME for S3 and
//! WEBDAV_URL for WebDAV.

use anyhow::Context;
use clap::{Parser, Subcommand};
use offsite_cli::{init_tracing, Retention, RunReport, Runner};
use offsite_core::Config;
use serde::Serialize;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "offsite", about = "Replicate backup archives to storage backends")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Copy archives to every configured backend
    Copy {
        /// Archive files to replicate
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// List stored archives per backend
    List {
        /// Only list archives whose name starts with this prefix
        #[arg(long)]
        prefix: Option<String>,
        /// Print the listing as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete archives older than the retention period
    Prune {
        /// Only consider archives whose name starts with this prefix
        #[arg(long)]
        prefix: Option<String>,
        /// Retention period in days (overrides BACKUP_RETENTION_DAYS)
        #[arg(long)]
        retention_days: Option<u32>,
        /// Report stale archives without deleting them
        #[arg(long)]
        dry_run: bool,
    },
}

fn print_json(value: &impl Serialize) -> anyhow::Result<()> {
    let out = serde_json::to_string_pretty(value).context("Serialize listing")?;
    println!("{}", out);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = Config::from_env().context("Failed to load configuration")?;
    let runner = Runner::from_config(&config).await;

    let report: RunReport = match cli.command {
        Commands::Copy { files } => runner.copy(&files).await,
        Commands::List { prefix, json } => {
            let prefix = prefix.unwrap_or_else(|| config.prune.prefix.clone());
            let (report, listings) = runner.list(&prefix).await;

            if json {
                print_json(&listings)?;
            } else {
                for listing in &listings {
                    for archive in &listing.archives {
                        println!(
                            "{}\t{}\t{}",
                            listing.backend,
                            archive.modified_at.to_rfc3339(),
                            archive.filename
                        );
                    }
                }
            }
            report
        }
        Commands::Prune {
            prefix,
            retention_days,
            dry_run,
        } => {
            let days = retention_days
                .or(config.prune.retention_days)
                .context("No retention period given. Set BACKUP_RETENTION_DAYS or pass --retention-days")?;
            let prefix = prefix.unwrap_or_else(|| config.prune.prefix.clone());
            let retention = Retention {
                days,
                leeway_secs: config.prune.leeway_secs,
            };
            runner.prune(&prefix, retention, dry_run).await
        }
    };

    if !report.is_success() {
        anyhow::bail!(
            "{} operation(s) failed ({} succeeded, {} skipped)",
            report.failures,
            report.successes,
            report.skipped
        );
    }

    Ok(())
}
