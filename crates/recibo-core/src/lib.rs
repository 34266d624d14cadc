//! Recibo Core Library
//!
//! Receipt processing for the Recibo chat assistant:
//! - Database access and migrations (SQLite)
//! - Raw attachment storage
//! - Remote receipt analysis with retry and failure classification
//! - Validation and normalization of extracted receipts
//! - Content and business duplicate detection
//! - Spending insights (summary, vendors, trend, anomalies)
//! - Rule-based free-text query interpreter
//! - The message-processing orchestrator tying it together

pub mod analysis;
pub mod config;
pub mod db;
pub mod duplicates;
pub mod error;
pub mod files;
pub mod insights;
pub mod models;
pub mod orchestrator;
pub mod payload;
pub mod query;
pub mod validation;

/// Test utilities including a mock JSON-RPC analyzer server
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use analysis::{
    AnalysisClient, AnalysisError, AnalysisErrorCode, AnalysisRequest, AnalysisTransport,
    AttemptFailure, JsonRpcTransport, MockResponse, MockTransport, RetryDecision, RetryPolicy,
};
pub use config::{AnalyzerBackend, AnalyzerConfig, Config, UploadPolicy};
pub use db::Database;
pub use duplicates::{BusinessDuplicate, DuplicateDetector};
pub use error::{Error, Result};
pub use files::{content_hash, FileStore, LocalFileStore, StoredFile};
pub use insights::{
    Anomalies, Anomaly, DateRange, Insights, Summary, TopVendors, Trend, TrendGrouping,
    TrendPoint, VendorTotal,
};
pub use orchestrator::{ChatEvent, ChatInput, ChatResponse, Orchestrator, UploadedFile};
pub use payload::{DuplicateAnnotation, ExtractionPayload, ReceiptPayload, ValidationMetadata};
pub use query::{QueryInterpreter, QueryIntent, QueryReply};
pub use validation::{validate_receipt_payload, Validation, ValidationWarning};
