//! CLI command implementations
//!
//! Commands are organized by domain:
//! - `core` - Shared utilities (load_config, open_db) and `init`
//! - `chat` - Local chat turns through the orchestrator
//! - `receipts` - Receipt listing and detail
//! - `insights` - Spending reports
//! - `serve` - Web server command

pub mod chat;
pub mod core;
pub mod insights;
pub mod receipts;
pub mod serve;

// Re-export command functions for main.rs
pub use chat::*;
pub use core::*;
pub use insights::*;
pub use receipts::*;
pub use serve::*;

/// Truncate a string to a maximum number of characters, adding "..." if truncated
pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
