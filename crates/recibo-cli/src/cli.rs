//! CLI argument definitions using clap
//!
//! This module contains all the clap structs and enums for parsing CLI arguments.
//! The actual command implementations are in the `commands` module.

use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};

/// Recibo - Chat assistant for purchase receipts
#[derive(Parser)]
#[command(name = "recibo")]
#[command(about = "Receipt extraction, duplicate detection and spending insights", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Database path (overrides RECIBO_DB)
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    /// Directory for uploaded files (overrides RECIBO_UPLOAD_DIR)
    #[arg(long, global = true)]
    pub upload_dir: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize the database and upload directory
    Init,

    /// Start the web server
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "8000")]
        port: u16,

        /// Host to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
    },

    /// Send one chat turn through the local pipeline
    ///
    /// Examples:
    ///   recibo chat --file boleta.pdf
    ///   recibo chat "resumen de gastos"
    ///   recibo chat --conversation <id> "comprobante <receipt-id>"
    Chat {
        /// Continue an existing conversation
        #[arg(short, long)]
        conversation: Option<String>,

        /// Receipt file to upload
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Message text
        message: Option<String>,
    },

    /// Browse stored receipts
    Receipts {
        #[command(subcommand)]
        action: Option<ReceiptsAction>,
    },

    /// Spending insights
    Insights {
        #[command(subcommand)]
        report: InsightsReport,
    },
}

#[derive(Subcommand)]
pub enum ReceiptsAction {
    /// List receipts, newest first
    List {
        /// Vendor name contains (case-insensitive)
        #[arg(long)]
        vendor: Option<String>,

        /// Issued on or after (YYYY-MM-DD)
        #[arg(long)]
        from: Option<NaiveDate>,

        /// Issued on or before (YYYY-MM-DD)
        #[arg(long)]
        to: Option<NaiveDate>,

        /// Maximum number of receipts (1-100)
        #[arg(short, long, default_value = "20")]
        limit: i64,
    },

    /// Show a receipt with its line items
    Show {
        /// Receipt ID
        id: String,
    },
}

/// Date range shared by every insights report
#[derive(clap::Args, Clone, Copy)]
pub struct RangeArgs {
    /// Issued on or after (YYYY-MM-DD)
    #[arg(long)]
    pub from: Option<NaiveDate>,

    /// Issued on or before (YYYY-MM-DD)
    #[arg(long)]
    pub to: Option<NaiveDate>,

    /// Print the raw JSON result
    #[arg(long)]
    pub json: bool,
}

#[derive(Subcommand)]
pub enum InsightsReport {
    /// Totals, average ticket and top vendor
    Summary {
        #[command(flatten)]
        range: RangeArgs,
    },

    /// Vendors ranked by spend
    Vendors {
        /// Number of vendors to show
        #[arg(short, long, default_value = "5")]
        limit: usize,

        #[command(flatten)]
        range: RangeArgs,
    },

    /// Spend per period
    Trend {
        /// Grouping: day or month
        #[arg(short, long, default_value = "month")]
        group_by: String,

        #[command(flatten)]
        range: RangeArgs,
    },

    /// Receipts well above the average ticket
    Anomalies {
        /// Threshold multiplier over the average ticket
        #[arg(short, long, default_value = "1.8")]
        factor: f64,

        /// Maximum number of receipts
        #[arg(short, long, default_value = "10")]
        limit: usize,

        #[command(flatten)]
        range: RangeArgs,
    },
}
