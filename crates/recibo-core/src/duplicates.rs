//! Duplicate detection
//!
//! Two independent checks run at different pipeline stages:
//!
//! 1. **Content-identical** (before analysis): the upload hashes to the same
//!    digest as an earlier attachment that has a receipt. The earlier
//!    receipt is copied into a new `duplicate` receipt and the analyzer is
//!    never called.
//! 2. **Business-identical** (after the receipt is stored): another receipt
//!    shares receipt number, issue date and total. The new receipt keeps its
//!    extracted data and is flagged `duplicate_candidate`.

use tracing::info;

use crate::db::Database;
use crate::error::Result;
use crate::models::{
    Attachment, NewExtractionRun, NewReceipt, NewReceiptItem, Receipt, ReceiptStatus,
    ReceiptWithItems,
};
use crate::payload::ReceiptPayload;

/// Audit identity recorded for content duplicates
pub const DEDUPE_PROVIDER: &str = "dedupe";
pub const DEDUPE_MODEL: &str = "sha256-v1";

/// Outcome of the business-identical check
#[derive(Debug, Clone)]
pub struct BusinessDuplicate {
    /// The checked receipt after flagging
    pub receipt: Receipt,
    pub candidate_id: String,
}

/// Duplicate detector over the receipt store
#[derive(Clone)]
pub struct DuplicateDetector {
    db: Database,
}

impl DuplicateDetector {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Earliest receipt whose file is byte-identical to `attachment`
    pub fn find_content_duplicate(&self, attachment: &Attachment) -> Result<Option<Receipt>> {
        self.db
            .find_content_duplicate_source(&attachment.content_hash, &attachment.id)
    }

    /// Record `attachment` as a copy of `source`
    ///
    /// Fields and line items are cloned; the audit entry is a zero-latency
    /// synthetic run.
    pub fn record_content_duplicate(
        &self,
        conversation_id: &str,
        attachment: &Attachment,
        source: &Receipt,
    ) -> Result<ReceiptWithItems> {
        let new = NewReceipt {
            attachment_id: Some(attachment.id.clone()),
            conversation_id: conversation_id.to_string(),
            vendor_name: source.vendor_name.clone(),
            vendor_tax_id: source.vendor_tax_id.clone(),
            receipt_number: source.receipt_number.clone(),
            issue_date: source.issue_date,
            currency: source.currency.clone(),
            subtotal: source.subtotal,
            tax: source.tax,
            total: source.total,
            payment_method: source.payment_method.clone(),
            confidence: source.confidence,
            status: ReceiptStatus::Duplicate,
            raw_text: source.raw_text.clone(),
            payload: ReceiptPayload::content_duplicate(&source.id),
        };

        let items: Vec<NewReceiptItem> = self
            .db
            .list_receipt_items(&source.id)?
            .iter()
            .map(NewReceiptItem::from)
            .collect();

        let run = NewExtractionRun {
            provider: DEDUPE_PROVIDER.to_string(),
            model: Some(DEDUPE_MODEL.to_string()),
            success: true,
            latency_ms: Some(0),
            error: None,
        };

        let receipt = self.db.create_receipt(&new, &items, &run)?;
        info!(
            receipt_id = %receipt.id,
            original_id = %source.id,
            "Content duplicate recorded, analysis skipped"
        );

        let items = self.db.list_receipt_items(&receipt.id)?;
        Ok(ReceiptWithItems { receipt, items })
    }

    /// Flag `receipt` if an earlier receipt shares its business key
    ///
    /// Needs receipt number, issue date and total; otherwise nothing happens.
    pub fn flag_business_duplicate(&self, receipt: &Receipt) -> Result<Option<BusinessDuplicate>> {
        let Some(candidate) = self.db.find_business_duplicate(receipt)? else {
            return Ok(None);
        };

        let updated = self.db.mark_duplicate_candidate(&receipt.id, &candidate.id)?;
        Ok(Some(BusinessDuplicate {
            receipt: updated,
            candidate_id: candidate.id,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MessageRole, NewAttachment};
    use chrono::NaiveDate;
    use rust_decimal::Decimal;

    fn attach(db: &Database, conversation_id: &str, hash: &str) -> Attachment {
        let message = db
            .create_message(conversation_id, MessageRole::User, "[file] f.txt", None)
            .unwrap();
        db.create_attachment(&NewAttachment {
            message_id: message.id,
            filename: "f.txt".to_string(),
            mime_type: "text/plain".to_string(),
            storage_path: "/tmp/f.txt".to_string(),
            content_hash: hash.to_string(),
        })
        .unwrap()
    }

    fn run() -> NewExtractionRun {
        NewExtractionRun {
            provider: "mock-agent".to_string(),
            model: None,
            success: true,
            latency_ms: Some(5),
            error: None,
        }
    }

    #[test]
    fn test_content_duplicate_copies_fields_and_items() {
        let db = Database::in_memory().unwrap();
        let detector = DuplicateDetector::new(db.clone());
        let conversation = db.create_conversation(None).unwrap();

        let first = attach(&db, &conversation.id, "abc");
        let original = db
            .create_receipt(
                &NewReceipt {
                    attachment_id: Some(first.id.clone()),
                    conversation_id: conversation.id.clone(),
                    vendor_name: "TIENDA QA SAC".to_string(),
                    currency: "PEN".to_string(),
                    total: Some(Decimal::new(48075, 2)),
                    ..Default::default()
                },
                &[NewReceiptItem {
                    description: "Cafe".to_string(),
                    quantity: Decimal::TWO,
                    unit_price: Some(Decimal::new(450, 2)),
                    line_total: Some(Decimal::new(900, 2)),
                }],
                &run(),
            )
            .unwrap();

        let second = attach(&db, &conversation.id, "abc");
        let source = detector.find_content_duplicate(&second).unwrap().unwrap();
        assert_eq!(source.id, original.id);

        let copy = detector
            .record_content_duplicate(&conversation.id, &second, &source)
            .unwrap();
        assert_eq!(copy.receipt.status, ReceiptStatus::Duplicate);
        assert_eq!(copy.receipt.payload.duplicate_of(), Some(original.id.as_str()));
        assert_eq!(copy.receipt.total, original.total);
        assert_eq!(copy.receipt.attachment_id.as_deref(), Some(second.id.as_str()));

        let original_items = db.list_receipt_items(&original.id).unwrap();
        assert_eq!(copy.items.len(), 1);
        assert_eq!(
            NewReceiptItem::from(&copy.items[0]),
            NewReceiptItem::from(&original_items[0])
        );

        let runs = db.list_extraction_runs(&copy.receipt.id).unwrap();
        assert_eq!(runs[0].provider, DEDUPE_PROVIDER);
        assert_eq!(runs[0].model.as_deref(), Some(DEDUPE_MODEL));
        assert_eq!(runs[0].latency_ms, Some(0));
    }

    #[test]
    fn test_business_duplicate_is_flagged_not_replaced() {
        let db = Database::in_memory().unwrap();
        let detector = DuplicateDetector::new(db.clone());
        let conversation = db.create_conversation(None).unwrap();

        let keyed = |hash: &str, vendor: &str| NewReceipt {
            attachment_id: Some(attach(&db, &conversation.id, hash).id),
            conversation_id: conversation.id.clone(),
            vendor_name: vendor.to_string(),
            currency: "PEN".to_string(),
            receipt_number: Some("F001-77".to_string()),
            issue_date: NaiveDate::from_ymd_opt(2026, 2, 23),
            total: Some(Decimal::new(12050, 2)),
            ..Default::default()
        };

        let first = db.create_receipt(&keyed("a", "Scan 1"), &[], &run()).unwrap();
        assert!(detector.flag_business_duplicate(&first).unwrap().is_none());

        let second = db.create_receipt(&keyed("b", "Scan 2"), &[], &run()).unwrap();
        let flagged = detector.flag_business_duplicate(&second).unwrap().unwrap();

        assert_eq!(flagged.candidate_id, first.id);
        assert_eq!(flagged.receipt.id, second.id);
        assert_eq!(flagged.receipt.vendor_name, "Scan 2");
        assert_eq!(flagged.receipt.status, ReceiptStatus::DuplicateCandidate);
        assert_eq!(
            flagged.receipt.payload.duplicate_candidate_of(),
            Some(first.id.as_str())
        );
    }

    #[test]
    fn test_business_check_skips_incomplete_keys() {
        let db = Database::in_memory().unwrap();
        let detector = DuplicateDetector::new(db.clone());
        let conversation = db.create_conversation(None).unwrap();

        for _ in 0..2 {
            let receipt = db
                .create_receipt(
                    &NewReceipt {
                        conversation_id: conversation.id.clone(),
                        vendor_name: "Sin fecha".to_string(),
                        currency: "PEN".to_string(),
                        receipt_number: Some("B-1".to_string()),
                        total: Some(Decimal::TEN),
                        ..Default::default()
                    },
                    &[],
                    &run(),
                )
                .unwrap();
            assert!(detector.flag_business_duplicate(&receipt).unwrap().is_none());
        }
    }
}
