//! Local chat command
//!
//! Runs one chat turn through the same orchestrator the server uses, against
//! the configured database and analyzer.

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use recibo_core::{ChatInput, ChatResponse, Config, Orchestrator, UploadedFile};

use super::open_db;

/// MIME type for an upload, from its extension
pub fn mime_for(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase);
    match extension.as_deref() {
        Some("pdf") => "application/pdf",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("txt") => "text/plain",
        Some("csv") => "text/csv",
        _ => "application/octet-stream",
    }
}

/// Read a file from disk as an upload
pub fn read_upload(path: &Path) -> Result<UploadedFile> {
    if !path.exists() {
        return Err(anyhow!("File not found: {}", path.display()));
    }
    let bytes = std::fs::read(path).context("Failed to read receipt file")?;
    let filename = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("attachment.bin")
        .to_string();

    Ok(UploadedFile {
        filename,
        mime_type: mime_for(path).to_string(),
        bytes,
    })
}

/// Run one turn and return the reply
pub async fn run_chat(
    orchestrator: &Orchestrator,
    conversation: Option<&str>,
    file: Option<&Path>,
    message: Option<&str>,
) -> Result<ChatResponse> {
    let input = ChatInput {
        conversation_id: conversation.map(str::to_string),
        text: message.unwrap_or_default().to_string(),
        file: file.map(read_upload).transpose()?,
    };

    Ok(orchestrator.process_message(input).await?)
}

pub async fn cmd_chat(
    config: &Config,
    conversation: Option<&str>,
    file: Option<&Path>,
    message: Option<&str>,
) -> Result<()> {
    let db = open_db(config)?;
    let orchestrator =
        Orchestrator::from_config(db, config).context("Failed to set up receipt pipeline")?;

    if let Some(path) = file {
        println!("📄 Analyzing {}...", path.display());
    }

    let response = run_chat(&orchestrator, conversation, file, message).await?;

    println!();
    println!("{}", response.assistant_message);
    println!();
    println!("   Conversation: {}", response.conversation_id);
    if let Some(receipt_id) = &response.receipt_id {
        println!("   Receipt: {}", receipt_id);
    }
    if let Some(data) = &response.data {
        if file.is_none() {
            println!();
            println!("{}", serde_json::to_string_pretty(data)?);
        }
    }

    Ok(())
}
