//! CLI command tests

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use recibo_core::{
    AnalysisClient, Database, LocalFileStore, MockTransport, Orchestrator, RetryPolicy,
    UploadPolicy,
};
use tempfile::TempDir;

use crate::cli::RangeArgs;
use crate::commands::{self, truncate};

const RECEIPT: &str = "BODEGA SAN JUAN\nBOLETA: B001-77\nFECHA: 2026-02-14\n\
    SUBTOTAL: 50.00\nIGV: 9.00\nTOTAL: 59.00\nITEM: Arroz | 2 | 29.50";

fn setup_orchestrator(dir: &TempDir) -> Orchestrator {
    Orchestrator::new(
        Database::in_memory().unwrap(),
        AnalysisClient::new(
            MockTransport::new(),
            RetryPolicy {
                retries: 0,
                backoff: Duration::ZERO,
            },
        ),
        Arc::new(LocalFileStore::new(dir.path().join("uploads")).unwrap()),
        UploadPolicy::default(),
    )
}

fn write_receipt(dir: &TempDir, name: &str, content: &str) -> std::path::PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, content).unwrap();
    path
}

fn no_range() -> RangeArgs {
    RangeArgs {
        from: None,
        to: None,
        json: false,
    }
}

// ========== Helpers ==========

#[test]
fn test_truncate() {
    assert_eq!(truncate("short", 10), "short");
    assert_eq!(truncate("a very long vendor name", 10), "a very ...");
    assert_eq!(truncate("ñandú ñandú ñandú", 8), "ñandú...");
}

#[test]
fn test_mime_for_extensions() {
    assert_eq!(commands::mime_for(Path::new("a.PDF")), "application/pdf");
    assert_eq!(commands::mime_for(Path::new("a.jpeg")), "image/jpeg");
    assert_eq!(commands::mime_for(Path::new("a.txt")), "text/plain");
    assert_eq!(
        commands::mime_for(Path::new("noext")),
        "application/octet-stream"
    );
}

#[test]
fn test_read_upload_missing_file() {
    let result = commands::read_upload(Path::new("/nonexistent/boleta.pdf"));
    assert!(result.is_err());
}

#[test]
fn test_load_config_overrides() {
    let config = commands::load_config(
        Some(Path::new("/tmp/custom.db")),
        Some(Path::new("/tmp/custom-uploads")),
    )
    .unwrap();
    assert_eq!(config.database_path, Path::new("/tmp/custom.db"));
    assert_eq!(config.upload_dir, Path::new("/tmp/custom-uploads"));
}

#[test]
fn test_cmd_init_creates_upload_dir() {
    let dir = TempDir::new().unwrap();
    let config = commands::load_config(
        Some(&dir.path().join("recibo.db")),
        Some(&dir.path().join("uploads")),
    )
    .unwrap();

    commands::cmd_init(&config).unwrap();
    assert!(dir.path().join("recibo.db").exists());
    assert!(dir.path().join("uploads").is_dir());
}

// ========== Chat Command Tests ==========

#[tokio::test]
async fn test_run_chat_with_file() {
    let dir = TempDir::new().unwrap();
    let orchestrator = setup_orchestrator(&dir);
    let path = write_receipt(&dir, "boleta.txt", RECEIPT);

    let response = commands::run_chat(&orchestrator, None, Some(&path), None)
        .await
        .unwrap();
    let receipt_id = response.receipt_id.unwrap();
    assert!(response.assistant_message.contains("BODEGA SAN JUAN"));

    let receipt = orchestrator.db().get_receipt(&receipt_id).unwrap().unwrap();
    assert_eq!(receipt.vendor_name, "BODEGA SAN JUAN");

    // Follow-up question in the same conversation
    let reply = commands::run_chat(
        &orchestrator,
        Some(&response.conversation_id),
        None,
        Some("resumen"),
    )
    .await
    .unwrap();
    assert!(reply.assistant_message.starts_with("Resumen: 1 comprobantes"));
}

#[tokio::test]
async fn test_run_chat_requires_input() {
    let dir = TempDir::new().unwrap();
    let orchestrator = setup_orchestrator(&dir);

    let result = commands::run_chat(&orchestrator, None, None, Some("  ")).await;
    assert!(result.is_err());
}

// ========== Receipts and Insights Command Tests ==========

#[tokio::test]
async fn test_receipt_and_insight_commands() {
    let dir = TempDir::new().unwrap();
    let orchestrator = setup_orchestrator(&dir);
    let path = write_receipt(&dir, "boleta.txt", RECEIPT);
    let response = commands::run_chat(&orchestrator, None, Some(&path), None)
        .await
        .unwrap();
    let receipt_id = response.receipt_id.unwrap();
    let db = orchestrator.db();

    assert!(commands::cmd_receipts_list(db, None, None, None, 20).is_ok());
    assert!(commands::cmd_receipts_list(db, Some("bodega"), None, None, 5).is_ok());
    assert!(commands::cmd_receipts_list(db, None, None, None, 0).is_err());
    assert!(commands::cmd_receipts_show(db, &receipt_id).is_ok());
    assert!(commands::cmd_receipts_show(db, "missing").is_err());

    assert!(commands::cmd_insights_summary(db, no_range()).is_ok());
    assert!(commands::cmd_insights_vendors(db, 5, no_range()).is_ok());
    assert!(commands::cmd_insights_trend(db, "day", no_range()).is_ok());
    assert!(commands::cmd_insights_trend(db, "week", no_range()).is_err());
    assert!(commands::cmd_insights_anomalies(db, 1.8, 10, no_range()).is_ok());
    assert!(commands::cmd_insights_anomalies(db, 9.0, 10, no_range()).is_err());

    let json = RangeArgs {
        json: true,
        ..no_range()
    };
    assert!(commands::cmd_insights_summary(db, json).is_ok());
}
