//! Domain models for Recibo

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::payload::ReceiptPayload;

/// Round a monetary amount to two decimal places, half away from zero
pub fn round_money(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Amount in integer cents, or `None` when it does not fit an `i64`
pub fn money_to_cents(amount: Decimal) -> Option<i64> {
    round_money(amount)
        .checked_mul(Decimal::new(100, 0))?
        .to_i64()
}

/// Rounded amount, or `None` when it is too large to store as cents
pub fn storable_money(amount: Decimal) -> Option<Decimal> {
    money_to_cents(amount).map(|_| round_money(amount))
}

/// A chat conversation. Identity only; messages hang off it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub created_at: DateTime<Utc>,
}

/// Who wrote a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl std::str::FromStr for MessageRole {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            _ => Err(format!("Unknown message role: {}", s)),
        }
    }
}

/// Tag recorded on assistant messages describing which branch produced them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageIntent {
    /// Free-text analytic query
    Query,
    /// Receipt extracted and stored
    AnalyzeReceipt,
    /// Upload matched an earlier file byte for byte
    AnalyzeReceiptDuplicate,
    /// Remote analysis failed
    AnalyzeReceiptError,
}

impl MessageIntent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Query => "query",
            Self::AnalyzeReceipt => "analyze_receipt",
            Self::AnalyzeReceiptDuplicate => "analyze_receipt_duplicate",
            Self::AnalyzeReceiptError => "analyze_receipt_error",
        }
    }
}

impl std::str::FromStr for MessageIntent {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "query" => Ok(Self::Query),
            "analyze_receipt" => Ok(Self::AnalyzeReceipt),
            "analyze_receipt_duplicate" => Ok(Self::AnalyzeReceiptDuplicate),
            "analyze_receipt_error" => Ok(Self::AnalyzeReceiptError),
            _ => Err(format!("Unknown message intent: {}", s)),
        }
    }
}

/// A single chat turn
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub role: MessageRole,
    pub text: String,
    pub intent: Option<MessageIntent>,
    pub created_at: DateTime<Utc>,
}

/// Attachment to be persisted
#[derive(Debug, Clone)]
pub struct NewAttachment {
    pub message_id: String,
    pub filename: String,
    pub mime_type: String,
    pub storage_path: String,
    /// SHA-256 hex digest of the raw bytes
    pub content_hash: String,
}

/// A stored upload belonging to a user message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    pub id: String,
    pub message_id: String,
    pub filename: String,
    pub mime_type: String,
    pub storage_path: String,
    pub content_hash: String,
    pub created_at: DateTime<Utc>,
}

/// Trust and lifecycle status of a receipt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReceiptStatus {
    /// Extracted and passed every validation check
    #[default]
    Processed,
    /// Extracted, but validation raised at least one warning
    ProcessedWithWarnings,
    /// Byte-identical re-upload of an earlier receipt's file
    Duplicate,
    /// Same receipt number, issue date and total as an earlier receipt
    DuplicateCandidate,
    /// Fields edited by a person after extraction
    ManuallyCorrected,
    /// Remote analysis failed
    Error,
}

impl ReceiptStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Processed => "processed",
            Self::ProcessedWithWarnings => "processed_with_warnings",
            Self::Duplicate => "duplicate",
            Self::DuplicateCandidate => "duplicate_candidate",
            Self::ManuallyCorrected => "manually_corrected",
            Self::Error => "error",
        }
    }
}

impl std::str::FromStr for ReceiptStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "processed" => Ok(Self::Processed),
            "processed_with_warnings" => Ok(Self::ProcessedWithWarnings),
            "duplicate" => Ok(Self::Duplicate),
            "duplicate_candidate" => Ok(Self::DuplicateCandidate),
            "manually_corrected" => Ok(Self::ManuallyCorrected),
            "error" => Ok(Self::Error),
            _ => Err(format!("Unknown receipt status: {}", s)),
        }
    }
}

impl std::fmt::Display for ReceiptStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A receipt extracted from an uploaded document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Receipt {
    pub id: String,
    pub attachment_id: Option<String>,
    pub conversation_id: String,
    pub vendor_name: String,
    pub vendor_tax_id: Option<String>,
    pub receipt_number: Option<String>,
    pub issue_date: Option<NaiveDate>,
    pub currency: String,
    pub subtotal: Option<Decimal>,
    pub tax: Option<Decimal>,
    pub total: Option<Decimal>,
    pub payment_method: Option<String>,
    /// Extraction confidence reported by the analyzer (0.0-1.0)
    pub confidence: Option<f64>,
    pub status: ReceiptStatus,
    pub raw_text: Option<String>,
    /// Analyzer response, validation metadata and duplicate annotations
    pub payload: ReceiptPayload,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Receipt to be persisted
#[derive(Debug, Clone, Default)]
pub struct NewReceipt {
    pub attachment_id: Option<String>,
    pub conversation_id: String,
    pub vendor_name: String,
    pub vendor_tax_id: Option<String>,
    pub receipt_number: Option<String>,
    pub issue_date: Option<NaiveDate>,
    pub currency: String,
    pub subtotal: Option<Decimal>,
    pub tax: Option<Decimal>,
    pub total: Option<Decimal>,
    pub payment_method: Option<String>,
    pub confidence: Option<f64>,
    pub status: ReceiptStatus,
    pub raw_text: Option<String>,
    pub payload: ReceiptPayload,
}

/// A line item on a receipt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceiptItem {
    pub id: String,
    pub receipt_id: String,
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Option<Decimal>,
    pub line_total: Option<Decimal>,
}

/// Line item to be persisted alongside its receipt
#[derive(Debug, Clone, PartialEq)]
pub struct NewReceiptItem {
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Option<Decimal>,
    pub line_total: Option<Decimal>,
}

impl From<&ReceiptItem> for NewReceiptItem {
    fn from(item: &ReceiptItem) -> Self {
        Self {
            description: item.description.clone(),
            quantity: item.quantity,
            unit_price: item.unit_price,
            line_total: item.line_total,
        }
    }
}

/// Receipt together with its line items, the shape returned to callers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceiptWithItems {
    #[serde(flatten)]
    pub receipt: Receipt,
    pub items: Vec<ReceiptItem>,
}

/// Audit record of one analysis attempt (or a synthetic dedupe entry)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionRun {
    pub id: String,
    pub receipt_id: String,
    pub provider: String,
    pub model: Option<String>,
    pub success: bool,
    pub latency_ms: Option<i64>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Extraction run to be persisted
#[derive(Debug, Clone)]
pub struct NewExtractionRun {
    pub provider: String,
    pub model: Option<String>,
    pub success: bool,
    pub latency_ms: Option<i64>,
    pub error: Option<String>,
}

/// Filters for listing receipts
#[derive(Debug, Clone, Default)]
pub struct ReceiptFilter {
    /// Case-insensitive substring of the vendor name
    pub vendor: Option<String>,
    pub min_total: Option<Decimal>,
    pub max_total: Option<Decimal>,
    /// Inclusive issue-date lower bound
    pub from: Option<NaiveDate>,
    /// Inclusive issue-date upper bound
    pub to: Option<NaiveDate>,
    pub limit: Option<i64>,
}

/// Manual correction of a receipt. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReceiptPatch {
    pub vendor_name: Option<String>,
    pub vendor_tax_id: Option<String>,
    pub receipt_number: Option<String>,
    pub issue_date: Option<NaiveDate>,
    pub currency: Option<String>,
    pub subtotal: Option<Decimal>,
    pub tax: Option<Decimal>,
    pub total: Option<Decimal>,
    pub payment_method: Option<String>,
    pub status: Option<ReceiptStatus>,
}

impl ReceiptPatch {
    pub fn is_empty(&self) -> bool {
        self.vendor_name.is_none()
            && self.vendor_tax_id.is_none()
            && self.receipt_number.is_none()
            && self.issue_date.is_none()
            && self.currency.is_none()
            && self.subtotal.is_none()
            && self.tax.is_none()
            && self.total.is_none()
            && self.payment_method.is_none()
            && self.status.is_none()
    }
}
