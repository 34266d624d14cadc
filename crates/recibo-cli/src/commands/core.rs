//! Core command implementations and shared utilities
//!
//! This module contains:
//! - `load_config` - Environment configuration with CLI overrides
//! - `open_db` - Shared utility to open the database
//! - `cmd_init` - Initialize the database and upload directory

use std::path::Path;

use anyhow::{Context, Result};
use recibo_core::{Config, Database};

/// Read `RECIBO_*` settings, then apply `--db` / `--upload-dir`
pub fn load_config(db: Option<&Path>, upload_dir: Option<&Path>) -> Result<Config> {
    let mut config = Config::from_env().context("Invalid environment configuration")?;
    if let Some(path) = db {
        config.database_path = path.to_path_buf();
    }
    if let Some(dir) = upload_dir {
        config.upload_dir = dir.to_path_buf();
    }
    Ok(config)
}

/// Open (and migrate) the configured database
pub fn open_db(config: &Config) -> Result<Database> {
    let path = config
        .database_path
        .to_str()
        .context("Database path must be valid UTF-8")?;
    Database::new(path).context("Failed to open database")
}

pub fn cmd_init(config: &Config) -> Result<()> {
    println!(
        "🔧 Initializing database at {}...",
        config.database_path.display()
    );

    open_db(config)?;

    std::fs::create_dir_all(&config.upload_dir).with_context(|| {
        format!(
            "Failed to create upload directory {}",
            config.upload_dir.display()
        )
    })?;
    println!("   Upload directory: {}", config.upload_dir.display());
    println!("   Analyzer: {}", config.analyzer.url);

    println!("✅ Database initialized successfully!");
    println!();
    println!("Next steps:");
    println!("  1. Process a receipt: recibo chat --file boleta.pdf");
    println!("  2. Start web API: recibo serve");

    Ok(())
}
