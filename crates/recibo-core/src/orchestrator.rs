//! Message processing pipeline
//!
//! One call handles one chat turn:
//!
//! 1. Reject empty requests and disallowed uploads before touching storage
//! 2. Resolve the conversation and record the user message
//! 3. Text only: answer through the [`QueryInterpreter`]
//! 4. With a file: store it, short-circuit on a content duplicate, otherwise
//!    analyze, validate, persist and run the business-duplicate check
//!
//! Every failure after the user message is recorded still leaves an assistant
//! message behind, so a conversation never ends on an unanswered user turn.

use std::sync::Arc;
use std::time::Instant;

use chrono::{Local, NaiveDate};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::analysis::{AnalysisClient, AnalysisError, MOCK_MODEL, MOCK_PROVIDER};
use crate::config::{Config, UploadPolicy};
use crate::db::Database;
use crate::duplicates::DuplicateDetector;
use crate::error::{Error, Result};
use crate::files::{content_hash, FileStore, LocalFileStore};
use crate::models::{
    Attachment, Conversation, Message, MessageIntent, MessageRole, NewAttachment,
    NewExtractionRun, NewReceipt, ReceiptStatus, ReceiptWithItems,
};
use crate::payload::{ExtractionPayload, ReceiptPayload, ValidationMetadata};
use crate::query::{display_total, QueryInterpreter};
use crate::validation::{
    validate_receipt_payload, validate_upload, ExtractedFields, DEFAULT_CURRENCY, UNKNOWN_VENDOR,
};

/// Characters per streamed delta
pub const STREAM_CHUNK_CHARS: usize = 24;
const STREAM_CHUNK_DELAY: std::time::Duration = std::time::Duration::from_millis(15);

/// Vendor recorded on receipts whose analysis failed
pub const FAILED_VENDOR: &str = "Procesamiento fallido";
const FAILED_RUN_MODEL: &str = "unknown";

const EMPTY_REQUEST_MESSAGE: &str = "Debes enviar texto y/o archivo";
const INTERNAL_FAILURE_REPLY: &str =
    "Ocurrio un error inesperado al procesar tu mensaje. Intenta nuevamente.";

/// A file attached to a chat message
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub filename: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

/// One incoming chat turn
#[derive(Debug, Clone, Default)]
pub struct ChatInput {
    pub conversation_id: Option<String>,
    pub text: String,
    pub file: Option<UploadedFile>,
}

/// Reply to a chat turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatResponse {
    pub conversation_id: String,
    pub assistant_message: String,
    pub receipt_id: Option<String>,
    pub data: Option<Value>,
}

/// Events of a streamed reply, in emission order
#[derive(Debug)]
pub enum ChatEvent {
    /// Processing has begun
    Start,
    /// Next chunk of the assistant text
    Delta(String),
    /// Complete reply
    Final(ChatResponse),
    /// Processing failed; no `Final` follows
    Failed(Error),
}

/// Composes storage, analysis, validation, duplicate detection and queries
#[derive(Clone)]
pub struct Orchestrator {
    db: Database,
    analyzer: AnalysisClient,
    files: Arc<dyn FileStore>,
    uploads: UploadPolicy,
    duplicates: DuplicateDetector,
    queries: QueryInterpreter,
}

impl Orchestrator {
    pub fn new(
        db: Database,
        analyzer: AnalysisClient,
        files: Arc<dyn FileStore>,
        uploads: UploadPolicy,
    ) -> Self {
        Self {
            duplicates: DuplicateDetector::new(db.clone()),
            queries: QueryInterpreter::new(db.clone()),
            db,
            analyzer,
            files,
            uploads,
        }
    }

    /// Wire up the configured analyzer and a local file store
    pub fn from_config(db: Database, config: &Config) -> Result<Self> {
        let analyzer = AnalysisClient::from_config(&config.analyzer)?;
        let files = LocalFileStore::new(&config.upload_dir)?;
        Ok(Self::new(db, analyzer, Arc::new(files), config.uploads.clone()))
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    /// Process one chat turn
    pub async fn process_message(&self, input: ChatInput) -> Result<ChatResponse> {
        let text = input.text.trim();
        if text.is_empty() && input.file.is_none() {
            return Err(Error::invalid_input("empty_request", EMPTY_REQUEST_MESSAGE));
        }
        if let Some(file) = &input.file {
            validate_upload(&file.filename, &file.mime_type, file.bytes.len(), &self.uploads)?;
        }

        let conversation = self
            .db
            .get_or_create_conversation(input.conversation_id.as_deref())?;
        let user_text = match &input.file {
            Some(file) if text.is_empty() => format!("[file] {}", file.filename),
            _ => text.to_string(),
        };
        let user_message = self
            .db
            .create_message(&conversation.id, MessageRole::User, &user_text, None)?;

        let outcome = match &input.file {
            None => self.answer_query(&conversation, text),
            Some(file) => {
                self.process_upload(&conversation, &user_message, text, file)
                    .await
            }
        };

        outcome.inspect_err(|e| {
            error!(conversation_id = %conversation.id, error = %e, "Message processing failed");
            if let Err(e) = self.db.create_message(
                &conversation.id,
                MessageRole::Assistant,
                INTERNAL_FAILURE_REPLY,
                None,
            ) {
                error!(error = %e, "Failed to record failure reply");
            }
        })
    }

    /// Process one chat turn, emitting the reply as events
    ///
    /// `Start` is sent before any work begins. The assistant text is then
    /// sent in [`STREAM_CHUNK_CHARS`]-character deltas followed by `Final`,
    /// or `Failed` on error. Stops early if the receiver goes away.
    pub async fn process_message_streaming(&self, input: ChatInput, tx: mpsc::Sender<ChatEvent>) {
        if tx.send(ChatEvent::Start).await.is_err() {
            return;
        }

        let response = match self.process_message(input).await {
            Ok(response) => response,
            Err(e) => {
                let _ = tx.send(ChatEvent::Failed(e)).await;
                return;
            }
        };

        for chunk in chunk_text(&response.assistant_message, STREAM_CHUNK_CHARS) {
            if tx.send(ChatEvent::Delta(chunk)).await.is_err() {
                debug!("Stream receiver dropped");
                return;
            }
            tokio::time::sleep(STREAM_CHUNK_DELAY).await;
        }

        let _ = tx.send(ChatEvent::Final(response)).await;
    }

    /// Messages of a known conversation, oldest first
    pub fn list_messages(&self, conversation_id: &str) -> Result<Vec<Message>> {
        if self.db.get_conversation(conversation_id)?.is_none() {
            return Err(Error::NotFound("Conversation no encontrada".to_string()));
        }
        self.db.list_messages(conversation_id)
    }

    fn reply(
        &self,
        conversation: &Conversation,
        text: String,
        intent: MessageIntent,
        receipt_id: Option<String>,
        data: Option<Value>,
    ) -> Result<ChatResponse> {
        self.db
            .create_message(&conversation.id, MessageRole::Assistant, &text, Some(intent))?;

        Ok(ChatResponse {
            conversation_id: conversation.id.clone(),
            assistant_message: text,
            receipt_id,
            data,
        })
    }

    fn answer_query(&self, conversation: &Conversation, text: &str) -> Result<ChatResponse> {
        let reply = self.queries.handle(text)?;
        self.reply(
            conversation,
            reply.message,
            MessageIntent::Query,
            None,
            reply.data,
        )
    }

    async fn process_upload(
        &self,
        conversation: &Conversation,
        user_message: &Message,
        text: &str,
        file: &UploadedFile,
    ) -> Result<ChatResponse> {
        let attachment = self.store_attachment(conversation, user_message, file)?;

        if let Some(source) = self.duplicates.find_content_duplicate(&attachment)? {
            let copy = self
                .duplicates
                .record_content_duplicate(&conversation.id, &attachment, &source)?;

            let mut data = serde_json::to_value(&copy)?;
            data["duplicate_of_receipt_id"] = json!(source.id);

            let text = format!(
                "Archivo duplicado detectado por hash. Se registro el comprobante {} enlazado al original {}.",
                copy.receipt.id, source.id
            );
            return self.reply(
                conversation,
                text,
                MessageIntent::AnalyzeReceiptDuplicate,
                Some(copy.receipt.id),
                Some(data),
            );
        }

        let hint = Some(text).filter(|t| !t.is_empty());
        let start = Instant::now();
        let analyzed = self
            .analyzer
            .analyze(&file.bytes, &attachment.filename, &attachment.mime_type, hint)
            .await;
        let latency_ms = start.elapsed().as_millis() as i64;

        match analyzed {
            Ok(extraction) => self.record_extraction(conversation, &attachment, extraction, latency_ms),
            Err(e) => self.record_failure(conversation, &attachment, e, latency_ms),
        }
    }

    fn store_attachment(
        &self,
        conversation: &Conversation,
        user_message: &Message,
        file: &UploadedFile,
    ) -> Result<Attachment> {
        let stored = self
            .files
            .store(&conversation.id, &file.filename, &file.bytes)?;
        debug!(
            store = self.files.name(),
            reference = %stored.reference,
            size = stored.size,
            "Stored upload"
        );

        self.db.create_attachment(&NewAttachment {
            message_id: user_message.id.clone(),
            filename: file.filename.clone(),
            mime_type: file.mime_type.clone(),
            storage_path: stored.reference,
            content_hash: content_hash(&file.bytes),
        })
    }

    fn record_extraction(
        &self,
        conversation: &Conversation,
        attachment: &Attachment,
        extraction: ExtractionPayload,
        latency_ms: i64,
    ) -> Result<ChatResponse> {
        let today = today();
        let validation = validate_receipt_payload(&extraction.receipt, today);
        let fields = ExtractedFields::from_payload(&validation.payload);

        let run = NewExtractionRun {
            provider: extraction
                .provider
                .clone()
                .unwrap_or_else(|| MOCK_PROVIDER.to_string()),
            model: Some(
                extraction
                    .model
                    .clone()
                    .unwrap_or_else(|| MOCK_MODEL.to_string()),
            ),
            success: true,
            latency_ms: Some(latency_ms),
            error: None,
        };

        let warning_count = validation.warnings.len();
        let new = NewReceipt {
            attachment_id: Some(attachment.id.clone()),
            conversation_id: conversation.id.clone(),
            vendor_name: fields
                .vendor_name
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| UNKNOWN_VENDOR.to_string()),
            vendor_tax_id: fields.vendor_tax_id,
            receipt_number: fields.receipt_number,
            issue_date: fields.issue_date,
            currency: fields
                .currency
                .unwrap_or_else(|| DEFAULT_CURRENCY.to_string()),
            subtotal: fields.subtotal,
            tax: fields.tax,
            total: fields.total,
            payment_method: fields.payment_method,
            confidence: fields.confidence,
            status: validation.status,
            raw_text: fields.raw_text,
            payload: ReceiptPayload {
                extraction: Some(extraction),
                validation: Some(ValidationMetadata {
                    warnings: validation.warnings,
                    validated_at: today,
                }),
                ..Default::default()
            },
        };

        let mut receipt = self.db.create_receipt(&new, &fields.items, &run)?;
        info!(
            receipt_id = %receipt.id,
            status = %receipt.status,
            warnings = warning_count,
            latency_ms,
            "Receipt extracted"
        );

        let candidate = match self.duplicates.flag_business_duplicate(&receipt)? {
            Some(flagged) => {
                warn!(
                    receipt_id = %receipt.id,
                    candidate_id = %flagged.candidate_id,
                    "Possible business duplicate"
                );
                receipt = flagged.receipt;
                Some(flagged.candidate_id)
            }
            None => None,
        };

        let mut text = format!(
            "Comprobante procesado. ID: {}. Proveedor: {}. Total: {} {}.",
            receipt.id,
            receipt.vendor_name,
            display_total(&receipt),
            receipt.currency
        );
        if warning_count > 0 {
            text.push_str(&format!(" Validaciones: {} alerta(s).", warning_count));
        }
        if let Some(candidate_id) = &candidate {
            text.push_str(&format!(" Posible duplicado de negocio: {}.", candidate_id));
        }

        let items = self.db.list_receipt_items(&receipt.id)?;
        let receipt_id = receipt.id.clone();
        let mut data = serde_json::to_value(ReceiptWithItems { receipt, items })?;
        if let Some(candidate_id) = candidate {
            data["duplicate_candidate_of_receipt_id"] = json!(candidate_id);
        }

        self.reply(
            conversation,
            text,
            MessageIntent::AnalyzeReceipt,
            Some(receipt_id),
            Some(data),
        )
    }

    fn record_failure(
        &self,
        conversation: &Conversation,
        attachment: &Attachment,
        failure: AnalysisError,
        latency_ms: i64,
    ) -> Result<ChatResponse> {
        let new = NewReceipt {
            attachment_id: Some(attachment.id.clone()),
            conversation_id: conversation.id.clone(),
            vendor_name: FAILED_VENDOR.to_string(),
            currency: DEFAULT_CURRENCY.to_string(),
            status: ReceiptStatus::Error,
            payload: ReceiptPayload::failed(failure.code, &failure.message, failure.retriable),
            ..Default::default()
        };
        let run = NewExtractionRun {
            provider: MOCK_PROVIDER.to_string(),
            model: Some(FAILED_RUN_MODEL.to_string()),
            success: false,
            latency_ms: Some(latency_ms),
            error: Some(failure.to_string()),
        };

        let receipt = self.db.create_receipt(&new, &[], &run)?;
        warn!(
            receipt_id = %receipt.id,
            code = %failure.code,
            retriable = failure.retriable,
            "Receipt analysis failed"
        );

        let text = format!(
            "No pude procesar el comprobante en este momento. Codigo: {}. Detalle: {}",
            failure.code, failure.message
        );
        self.reply(
            conversation,
            text,
            MessageIntent::AnalyzeReceiptError,
            Some(receipt.id),
            Some(json!({
                "error_code": failure.code,
                "retriable": failure.retriable,
            })),
        )
    }
}

fn today() -> NaiveDate {
    Local::now().date_naive()
}

/// Split text into chunks of at most `size` characters
pub fn chunk_text(text: &str, size: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(size.max(1))
        .map(|chunk| chunk.iter().collect())
        .collect()
}
