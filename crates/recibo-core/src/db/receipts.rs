//! Receipt operations

use chrono::NaiveDate;
use rusqlite::{params, params_from_iter, OptionalExtension};
use rust_decimal::Decimal;
use tracing::{debug, info};
use uuid::Uuid;

use super::{from_cents, now_timestamp, parse_datetime, to_cents, Database};
use crate::error::{Error, Result};
use crate::models::*;
use crate::payload::{DuplicateAnnotation, ReceiptPayload};

/// Upper bound on receipts returned by a listing
pub const MAX_LIST_LIMIT: i64 = 100;
/// Upper bound on receipts returned by a search
pub const MAX_SEARCH_LIMIT: i64 = 20;

const RECEIPT_COLUMNS: &str = "r.id, r.attachment_id, r.conversation_id, r.vendor_name,
     r.vendor_tax_id, r.receipt_number, r.issue_date, r.currency, r.subtotal_cents,
     r.tax_cents, r.total_cents, r.payment_method, r.confidence, r.status, r.raw_text,
     r.payload, r.created_at, r.updated_at";

impl Database {
    /// Create a receipt together with its line items and audit record
    ///
    /// All three are written in one transaction.
    pub fn create_receipt(
        &self,
        receipt: &NewReceipt,
        items: &[NewReceiptItem],
        run: &NewExtractionRun,
    ) -> Result<Receipt> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let id = Uuid::new_v4().to_string();
        let now = now_timestamp();
        let payload = serde_json::to_string(&receipt.payload)?;

        tx.execute(
            "INSERT INTO receipts (id, attachment_id, conversation_id, vendor_name, vendor_tax_id,
             receipt_number, issue_date, currency, subtotal_cents, tax_cents, total_cents,
             payment_method, confidence, status, raw_text, payload, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                id,
                receipt.attachment_id,
                receipt.conversation_id,
                receipt.vendor_name,
                receipt.vendor_tax_id,
                receipt.receipt_number,
                receipt.issue_date.map(|d| d.to_string()),
                receipt.currency,
                receipt.subtotal.map(to_cents).transpose()?,
                receipt.tax.map(to_cents).transpose()?,
                receipt.total.map(to_cents).transpose()?,
                receipt.payment_method,
                receipt.confidence,
                receipt.status.as_str(),
                receipt.raw_text,
                payload,
                now,
                now,
            ],
        )?;

        for (position, item) in items.iter().enumerate() {
            tx.execute(
                "INSERT INTO receipt_items
                 (id, receipt_id, position, description, quantity, unit_price_cents, line_total_cents)
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
                params![
                    Uuid::new_v4().to_string(),
                    id,
                    position as i64,
                    item.description,
                    item.quantity.to_string(),
                    item.unit_price.map(to_cents).transpose()?,
                    item.line_total.map(to_cents).transpose()?,
                ],
            )?;
        }

        tx.execute(
            "INSERT INTO extraction_runs
             (id, receipt_id, provider, model, success, latency_ms, error, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                Uuid::new_v4().to_string(),
                id,
                run.provider,
                run.model,
                run.success,
                run.latency_ms,
                run.error,
                now,
            ],
        )?;

        tx.commit()?;
        drop(conn);

        debug!(
            receipt_id = %id,
            status = %receipt.status,
            items = items.len(),
            "Created receipt"
        );

        self.get_receipt(&id)?
            .ok_or_else(|| Error::NotFound(format!("Receipt {}", id)))
    }

    /// Get a receipt by id
    pub fn get_receipt(&self, id: &str) -> Result<Option<Receipt>> {
        let conn = self.conn()?;
        let sql = format!("SELECT {} FROM receipts r WHERE r.id = ?", RECEIPT_COLUMNS);

        let receipt = conn
            .query_row(&sql, params![id], |row| Self::row_to_receipt(row))
            .optional()?;

        Ok(receipt)
    }

    /// Get a receipt with its line items
    pub fn get_receipt_with_items(&self, id: &str) -> Result<Option<ReceiptWithItems>> {
        match self.get_receipt(id)? {
            Some(receipt) => {
                let items = self.list_receipt_items(&receipt.id)?;
                Ok(Some(ReceiptWithItems { receipt, items }))
            }
            None => Ok(None),
        }
    }

    /// Line items of a receipt in their original order
    pub fn list_receipt_items(&self, receipt_id: &str) -> Result<Vec<ReceiptItem>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, receipt_id, description, quantity, unit_price_cents, line_total_cents
             FROM receipt_items
             WHERE receipt_id = ?
             ORDER BY position ASC",
        )?;

        let items = stmt
            .query_map(params![receipt_id], |row| {
                let quantity: String = row.get(3)?;
                let unit_price: Option<i64> = row.get(4)?;
                let line_total: Option<i64> = row.get(5)?;
                Ok(ReceiptItem {
                    id: row.get(0)?,
                    receipt_id: row.get(1)?,
                    description: row.get(2)?,
                    quantity: quantity.parse().unwrap_or(Decimal::ONE),
                    unit_price: unit_price.map(from_cents),
                    line_total: line_total.map(from_cents),
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(items)
    }

    /// List receipts (newest first) with their items
    pub fn list_receipts(&self, filter: &ReceiptFilter) -> Result<Vec<ReceiptWithItems>> {
        let limit = filter
            .limit
            .unwrap_or(MAX_LIST_LIMIT)
            .clamp(1, MAX_LIST_LIMIT);

        self.query_receipts(filter, limit)?
            .into_iter()
            .map(|receipt| {
                let items = self.list_receipt_items(&receipt.id)?;
                Ok(ReceiptWithItems { receipt, items })
            })
            .collect()
    }

    /// Receipts with total >= `min_total`, optionally by vendor substring
    pub fn search_receipts(&self, min_total: Decimal, vendor: Option<&str>) -> Result<Vec<Receipt>> {
        let filter = ReceiptFilter {
            vendor: vendor.map(str::to_string),
            min_total: Some(min_total),
            ..Default::default()
        };
        self.query_receipts(&filter, MAX_SEARCH_LIMIT)
    }

    fn query_receipts(&self, filter: &ReceiptFilter, limit: i64) -> Result<Vec<Receipt>> {
        let mut conditions: Vec<&str> = Vec::new();
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(vendor) = filter.vendor.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
            conditions.push("instr(lower(r.vendor_name), ?) > 0");
            params.push(Box::new(vendor.to_lowercase()));
        }
        if let Some(min) = filter.min_total {
            conditions.push("r.total_cents >= ?");
            params.push(Box::new(to_cents(min)?));
        }
        if let Some(max) = filter.max_total {
            conditions.push("r.total_cents <= ?");
            params.push(Box::new(to_cents(max)?));
        }
        if let Some(from) = filter.from {
            conditions.push("r.issue_date >= ?");
            params.push(Box::new(from.to_string()));
        }
        if let Some(to) = filter.to {
            conditions.push("r.issue_date <= ?");
            params.push(Box::new(to.to_string()));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };
        let sql = format!(
            "SELECT {} FROM receipts r {} ORDER BY r.created_at DESC, r.rowid DESC LIMIT ?",
            RECEIPT_COLUMNS, where_clause
        );
        params.push(Box::new(limit));

        let conn = self.conn()?;
        let mut stmt = conn.prepare(&sql)?;
        let receipts = stmt
            .query_map(params_from_iter(params.iter().map(|p| p.as_ref())), |row| {
                Self::row_to_receipt(row)
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(receipts)
    }

    /// Earliest receipt whose attachment has the same content hash
    ///
    /// `exclude_attachment_id` is the new upload itself.
    pub fn find_content_duplicate_source(
        &self,
        content_hash: &str,
        exclude_attachment_id: &str,
    ) -> Result<Option<Receipt>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM receipts r
             JOIN attachments a ON a.id = r.attachment_id
             WHERE a.content_hash = ? AND a.id != ?
             ORDER BY r.created_at ASC, r.rowid ASC
             LIMIT 1",
            RECEIPT_COLUMNS
        );

        let receipt = conn
            .query_row(&sql, params![content_hash, exclude_attachment_id], |row| {
                Self::row_to_receipt(row)
            })
            .optional()?;

        Ok(receipt)
    }

    /// Earliest other receipt with the same receipt number, issue date and total
    ///
    /// Returns `None` without querying when any of the three is missing.
    pub fn find_business_duplicate(&self, receipt: &Receipt) -> Result<Option<Receipt>> {
        let (Some(number), Some(date), Some(total)) = (
            receipt.receipt_number.as_deref(),
            receipt.issue_date,
            receipt.total,
        ) else {
            return Ok(None);
        };
        if number.is_empty() {
            return Ok(None);
        }

        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM receipts r
             WHERE r.id != ? AND r.receipt_number = ? AND r.issue_date = ? AND r.total_cents = ?
             ORDER BY r.created_at ASC, r.rowid ASC
             LIMIT 1",
            RECEIPT_COLUMNS
        );

        let candidate = conn
            .query_row(
                &sql,
                params![receipt.id, number, date.to_string(), to_cents(total)?],
                |row| Self::row_to_receipt(row),
            )
            .optional()?;

        Ok(candidate)
    }

    /// Flag a receipt as a business-duplicate candidate of another
    pub fn mark_duplicate_candidate(&self, receipt_id: &str, candidate_id: &str) -> Result<Receipt> {
        let mut receipt = self
            .get_receipt(receipt_id)?
            .ok_or_else(|| Error::NotFound(format!("Receipt {}", receipt_id)))?;

        receipt.status = ReceiptStatus::DuplicateCandidate;
        receipt.payload.duplicate = Some(DuplicateAnnotation::BusinessCandidate {
            duplicate_candidate_of_receipt_id: candidate_id.to_string(),
        });

        let conn = self.conn()?;
        conn.execute(
            "UPDATE receipts SET status = ?, payload = ?, updated_at = ? WHERE id = ?",
            params![
                receipt.status.as_str(),
                serde_json::to_string(&receipt.payload)?,
                now_timestamp(),
                receipt_id,
            ],
        )?;
        drop(conn);

        info!(receipt_id, candidate_id, "Marked business duplicate candidate");

        self.get_receipt(receipt_id)?
            .ok_or_else(|| Error::NotFound(format!("Receipt {}", receipt_id)))
    }

    /// Apply a manual correction
    ///
    /// Without an explicit status the receipt becomes `manually_corrected`.
    pub fn patch_receipt(&self, id: &str, patch: &ReceiptPatch) -> Result<ReceiptWithItems> {
        for (field, value) in [
            ("subtotal", patch.subtotal),
            ("tax", patch.tax),
            ("total", patch.total),
        ] {
            if value.is_some_and(|v| v.is_sign_negative() && !v.is_zero()) {
                return Err(Error::invalid_input(
                    "invalid_amount",
                    format!("El campo {} no puede ser negativo", field),
                ));
            }
            if value.is_some_and(|v| money_to_cents(v).is_none()) {
                return Err(Error::invalid_input(
                    "invalid_amount",
                    format!("El campo {} esta fuera de rango", field),
                ));
            }
        }

        let mut receipt = self
            .get_receipt(id)?
            .ok_or_else(|| Error::NotFound(format!("Receipt {}", id)))?;

        if let Some(vendor_name) = &patch.vendor_name {
            receipt.vendor_name = vendor_name.trim().to_string();
        }
        if let Some(vendor_tax_id) = &patch.vendor_tax_id {
            receipt.vendor_tax_id = Some(vendor_tax_id.clone());
        }
        if let Some(receipt_number) = &patch.receipt_number {
            receipt.receipt_number = Some(receipt_number.clone());
        }
        if let Some(issue_date) = patch.issue_date {
            receipt.issue_date = Some(issue_date);
        }
        if let Some(currency) = &patch.currency {
            receipt.currency = currency.trim().to_uppercase();
        }
        if let Some(subtotal) = patch.subtotal {
            receipt.subtotal = Some(round_money(subtotal));
        }
        if let Some(tax) = patch.tax {
            receipt.tax = Some(round_money(tax));
        }
        if let Some(total) = patch.total {
            receipt.total = Some(round_money(total));
        }
        if let Some(payment_method) = &patch.payment_method {
            receipt.payment_method = Some(payment_method.clone());
        }
        receipt.status = patch.status.unwrap_or(ReceiptStatus::ManuallyCorrected);

        let conn = self.conn()?;
        conn.execute(
            "UPDATE receipts SET vendor_name = ?, vendor_tax_id = ?, receipt_number = ?,
             issue_date = ?, currency = ?, subtotal_cents = ?, tax_cents = ?, total_cents = ?,
             payment_method = ?, status = ?, updated_at = ?
             WHERE id = ?",
            params![
                receipt.vendor_name,
                receipt.vendor_tax_id,
                receipt.receipt_number,
                receipt.issue_date.map(|d| d.to_string()),
                receipt.currency,
                receipt.subtotal.map(to_cents).transpose()?,
                receipt.tax.map(to_cents).transpose()?,
                receipt.total.map(to_cents).transpose()?,
                receipt.payment_method,
                receipt.status.as_str(),
                now_timestamp(),
                id,
            ],
        )?;
        drop(conn);

        info!(receipt_id = id, status = %receipt.status, "Patched receipt");

        self.get_receipt_with_items(id)?
            .ok_or_else(|| Error::NotFound(format!("Receipt {}", id)))
    }

    /// Receipts with a total, optionally within an inclusive issue-date range
    pub fn list_receipts_for_insights(
        &self,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> Result<Vec<Receipt>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM receipts r
             WHERE r.total_cents IS NOT NULL
               AND (?1 IS NULL OR r.issue_date >= ?1)
               AND (?2 IS NULL OR r.issue_date <= ?2)
             ORDER BY r.created_at ASC, r.rowid ASC",
            RECEIPT_COLUMNS
        );

        let mut stmt = conn.prepare(&sql)?;
        let receipts = stmt
            .query_map(
                params![from.map(|d| d.to_string()), to.map(|d| d.to_string())],
                |row| Self::row_to_receipt(row),
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(receipts)
    }

    /// Audit records for a receipt, oldest first
    pub fn list_extraction_runs(&self, receipt_id: &str) -> Result<Vec<ExtractionRun>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, receipt_id, provider, model, success, latency_ms, error, created_at
             FROM extraction_runs
             WHERE receipt_id = ?
             ORDER BY created_at ASC, rowid ASC",
        )?;

        let runs = stmt
            .query_map(params![receipt_id], |row| {
                let created_at: String = row.get(7)?;
                Ok(ExtractionRun {
                    id: row.get(0)?,
                    receipt_id: row.get(1)?,
                    provider: row.get(2)?,
                    model: row.get(3)?,
                    success: row.get(4)?,
                    latency_ms: row.get(5)?,
                    error: row.get(6)?,
                    created_at: parse_datetime(&created_at),
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(runs)
    }

    fn row_to_receipt(row: &rusqlite::Row) -> rusqlite::Result<Receipt> {
        let issue_date: Option<String> = row.get(6)?;
        let subtotal: Option<i64> = row.get(8)?;
        let tax: Option<i64> = row.get(9)?;
        let total: Option<i64> = row.get(10)?;
        let status_str: String = row.get(13)?;
        let payload_str: String = row.get(15)?;
        let created_at: String = row.get(16)?;
        let updated_at: String = row.get(17)?;

        Ok(Receipt {
            id: row.get(0)?,
            attachment_id: row.get(1)?,
            conversation_id: row.get(2)?,
            vendor_name: row.get(3)?,
            vendor_tax_id: row.get(4)?,
            receipt_number: row.get(5)?,
            issue_date: issue_date.and_then(|d| NaiveDate::parse_from_str(&d, "%Y-%m-%d").ok()),
            currency: row.get(7)?,
            subtotal: subtotal.map(from_cents),
            tax: tax.map(from_cents),
            total: total.map(from_cents),
            payment_method: row.get(11)?,
            confidence: row.get(12)?,
            status: status_str.parse().unwrap_or(ReceiptStatus::Processed),
            raw_text: row.get(14)?,
            payload: serde_json::from_str::<ReceiptPayload>(&payload_str).unwrap_or_default(),
            created_at: parse_datetime(&created_at),
            updated_at: parse_datetime(&updated_at),
        })
    }
}
