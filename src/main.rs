//! gphotos-backup-rs: back up a Google Photos library to local storage.
//!
//! Lists the library through the Photos Library API, then downloads every
//! item under bounded concurrency into `<dest>/<YYYY>/<MM>/`, re-issuing
//! expired download links and never overwriting or duplicating a file.
//! Re-running over an existing backup only fetches what is missing.

#![warn(clippy::all)]

mod auth;
mod backup;
mod cli;
mod config;
mod gphotos;
mod retry;
mod shutdown;
#[cfg(test)]
mod test_support;
mod types;

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use backup::BackupRun;
use gphotos::{LibraryStats, PhotosClient};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = cli::Cli::parse();

    // stdout is reserved for --json and --list-only output.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(cli.log_level.as_filter())),
        )
        .init();

    let config = config::Config::from_cli(cli)?;
    tracing::debug!(?config, "Starting gphotos-backup-rs");

    let token = auth::load_token(config.access_token.as_deref(), &config.credentials_dir)?;
    let client =
        PhotosClient::new(token, config.timeout).context("Failed to build catalog client")?;

    if config.auth_only {
        client
            .verify()
            .await
            .context("Access token was not accepted")?;
        tracing::info!("Authentication completed successfully");
        return Ok(());
    }

    let shutdown_token = shutdown::install_signal_handler()?;

    tracing::info!("Fetching media items from Google Photos...");
    let items = tokio::select! {
        listed = client.list_all() => listed.context("Failed to list media items")?,
        _ = shutdown_token.cancelled() => {
            tracing::info!("Shutdown requested, exiting...");
            return Ok(());
        }
    };
    tracing::info!("Found {} photos/videos", items.len());

    let stats = LibraryStats::from_items(&items);
    if config.list_only {
        stats.print()?;
        return Ok(());
    }
    for (year, count) in stats.by_year() {
        tracing::debug!(year, count, "library items");
    }
    if items.is_empty() {
        tracing::info!("Nothing to back up");
        return Ok(());
    }

    let run = BackupRun::new(config.backup_config(), Arc::new(client))?;
    let summary = run.execute(items, shutdown_token).await?;
    summary.log();

    if config.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    }

    if let Some(fatal) = &summary.aborted {
        anyhow::bail!("Backup aborted: {}", fatal);
    }
    if summary.failed > 0 {
        anyhow::bail!("{} of {} items failed", summary.failed, summary.total());
    }
    if !summary.is_complete() {
        tracing::warn!(
            "Backup incomplete: {} items not attempted, run again to continue",
            summary.cancelled
        );
    }
    Ok(())
}
