//! Recibo CLI - Chat assistant for purchase receipts
//!
//! Usage:
//!   recibo init                     Initialize database and upload directory
//!   recibo serve --port 8000        Start web server
//!   recibo chat --file boleta.pdf   Process a receipt locally
//!   recibo insights summary         Show spending summary

mod cli;
mod commands;

#[cfg(test)]
mod tests;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cli::*;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    // Priority: RUST_LOG env var > --verbose flag > default (info)
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).compact())
        .init();

    let config = commands::load_config(cli.db.as_deref(), cli.upload_dir.as_deref())?;

    match cli.command {
        Commands::Init => commands::cmd_init(&config),
        Commands::Serve { port, host } => commands::cmd_serve(&config, &host, port).await,
        Commands::Chat {
            conversation,
            file,
            message,
        } => {
            commands::cmd_chat(
                &config,
                conversation.as_deref(),
                file.as_deref(),
                message.as_deref(),
            )
            .await
        }
        Commands::Receipts { action } => {
            let db = commands::open_db(&config)?;
            match action {
                None => commands::cmd_receipts_list(&db, None, None, None, 20),
                Some(ReceiptsAction::List {
                    vendor,
                    from,
                    to,
                    limit,
                }) => commands::cmd_receipts_list(&db, vendor.as_deref(), from, to, limit),
                Some(ReceiptsAction::Show { id }) => commands::cmd_receipts_show(&db, &id),
            }
        }
        Commands::Insights { report } => {
            let db = commands::open_db(&config)?;
            match report {
                InsightsReport::Summary { range } => commands::cmd_insights_summary(&db, range),
                InsightsReport::Vendors { limit, range } => {
                    commands::cmd_insights_vendors(&db, limit, range)
                }
                InsightsReport::Trend { group_by, range } => {
                    commands::cmd_insights_trend(&db, &group_by, range)
                }
                InsightsReport::Anomalies {
                    factor,
                    limit,
                    range,
                } => commands::cmd_insights_anomalies(&db, factor, limit, range),
            }
        }
    }
}
