/// RFCNPJ Loader
///
/// An ETL pipeline that ingests the monthly CNPJ open-data release from the Receita Federal
/// WebDAV server into PostgreSQL, one period per run.
mod cli;
mod config;
mod datasets;
mod dav;
mod db;
mod error;
mod etl;
mod models;
mod notify;
mod pipeline;
mod pool;

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use cli::Cli;
use config::Config;
use dav::DavClient;
use db::{cursor::PgCursorStore, Database};
use etl::load::PgSink;
use pipeline::{Pipeline, RunOutcome};

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    let cli = Cli::parse();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&cli.log_level)).context("Invalid log filter")?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    println!("🚀 Starting RFCNPJ Loader...");

    let config = Config::from_cli(&cli).context("Invalid configuration")?;
    println!("📚 Datasets: {}", config.datasets.iter().map(|d| d.name).collect::<Vec<_>>().join(", "));

    // Initialize database connection
    println!("\n💾 Connecting to PostgreSQL database...");
    let database = Database::new(&cli.database_url, config.database_connections())
        .await
        .context("Failed to connect to PostgreSQL database")?;

    // Test database connection
    database.test_connection().await.context("Database connection test failed")?;
    println!("✅ Database connected successfully!");

    let cursors = PgCursorStore::new(database.pool().clone());
    cursors.ensure().await.context("Failed to create cursor table")?;

    let client = DavClient::new(&config.dav_base_domain, &config.dav_list_url_template)
        .context("Failed to create WebDAV client")?;
    let notifier = notify::build(&config.mail).context("Invalid email configuration")?;

    let cancel = CancellationToken::new();
    spawn_shutdown_listener(cancel.clone());

    tracing::info!("RFCNPJ Loader initialized successfully");

    let pipeline = Pipeline::new(
        config,
        Arc::new(client),
        Arc::new(cursors),
        Arc::new(PgSink::new(database.pool().clone())),
        notifier,
    );

    let outcome = pipeline.run(&cancel).await.context("Pipeline execution failed")?;

    match outcome {
        RunOutcome::UpToDate { period, url } => {
            println!("\n✅ Already up to date. {} is not published yet.", period.human());
            println!("   🔗 Listing: {}", url);
        }
        RunOutcome::Completed(report) => {
            println!("\n✨ Pipeline execution complete!");
            println!("\n📊 Run Statistics:");
            println!("   📅 Period: {} ({})", report.period.human(), report.period);
            println!("   ⏱️  Total time: {}s", (report.finished_at - report.started_at).num_seconds());
            println!("   📦 Archives: {} planned, {} extracted", report.downloads_planned, report.archives_extracted);
            for (dataset, rows) in &report.rows {
                println!("   💾 {}: {} rows", dataset, format_number(*rows));
            }
            println!("   ✅ Total rows: {}", format_number(report.total_rows()));
            if !report.skipped.is_empty() {
                println!("   ⚠️  Skipped (no files): {}", report.skipped.join(", "));
            }
        }
    }

    Ok(())
}

/// Cancel `token` on Ctrl-C or SIGTERM. In-flight work finishes; nothing new starts.
fn spawn_shutdown_listener(token: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!(error = %e, "cannot listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "cannot listen for SIGTERM");
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {}
            _ = terminate => {}
        }

        tracing::warn!("shutdown requested, waiting for in-flight work");
        token.cancel();
    });
}

/// Format a number with thousand separators
fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::new();

    for (count, c) in s.chars().rev().enumerate() {
        if count > 0 && count % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }

    result.chars().rev().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(1234), "1,234");
        assert_eq!(format_number(1234567), "1,234,567");
        assert_eq!(format_number(63821907), "63,821,907");
    }
}
