//! Server command implementation

use anyhow::Result;
use recibo_core::Config;

use super::open_db;

pub async fn cmd_serve(config: &Config, host: &str, port: u16) -> Result<()> {
    println!("🚀 Starting Recibo web server...");
    println!("   Database: {}", config.database_path.display());
    println!("   Uploads: {}", config.upload_dir.display());
    println!("   Analyzer: {}", config.analyzer.url);
    println!("   Listening: http://{}:{}", host, port);
    if config.cors_origins.is_empty() {
        println!("   CORS: same-origin only (set RECIBO_CORS_ORIGINS to allow more)");
    } else {
        println!("   CORS: {}", config.cors_origins.join(", "));
    }
    println!();
    println!("   Press Ctrl+C to stop");

    let db = open_db(config)?;
    recibo_server::serve(db, config, host, port).await
}
