//! Receipt browsing commands

use anyhow::{anyhow, Result};
use chrono::NaiveDate;
use recibo_core::db::{Database, MAX_LIST_LIMIT};
use recibo_core::models::{ReceiptFilter, ReceiptStatus};
use recibo_core::query::display_total;

use super::truncate;

fn status_label(status: ReceiptStatus) -> &'static str {
    match status {
        ReceiptStatus::Processed => "✓",
        ReceiptStatus::ProcessedWithWarnings => "⚠️ ",
        ReceiptStatus::Duplicate => "👯",
        ReceiptStatus::DuplicateCandidate => "❓",
        ReceiptStatus::ManuallyCorrected => "✏️ ",
        ReceiptStatus::Error => "❌",
    }
}

/// List receipts, newest first
pub fn cmd_receipts_list(
    db: &Database,
    vendor: Option<&str>,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
    limit: i64,
) -> Result<()> {
    if !(1..=MAX_LIST_LIMIT).contains(&limit) {
        return Err(anyhow!("--limit must be between 1 and {}", MAX_LIST_LIMIT));
    }

    let filter = ReceiptFilter {
        vendor: vendor.map(str::to_string),
        from,
        to,
        limit: Some(limit),
        ..Default::default()
    };
    let receipts = db.list_receipts(&filter)?;

    if receipts.is_empty() {
        println!("No receipts found");
        return Ok(());
    }

    println!("\n🧾 Receipts ({})", receipts.len());
    println!("{}", "─".repeat(90));

    for entry in &receipts {
        let receipt = &entry.receipt;
        let date = receipt
            .issue_date
            .map(|d| d.to_string())
            .unwrap_or_else(|| "----------".to_string());
        println!(
            "  {} {}  {:<30} {:>10} {}  {}",
            status_label(receipt.status),
            date,
            truncate(&receipt.vendor_name, 30),
            display_total(receipt),
            receipt.currency,
            receipt.id
        );
    }

    println!();
    Ok(())
}

/// Show one receipt with its items and extraction history
pub fn cmd_receipts_show(db: &Database, id: &str) -> Result<()> {
    let entry = db
        .get_receipt_with_items(id)?
        .ok_or_else(|| anyhow!("Receipt not found: {}", id))?;
    let receipt = &entry.receipt;

    println!("\n🧾 {}", receipt.vendor_name);
    println!("{}", "─".repeat(60));
    println!("   ID:        {}", receipt.id);
    println!(
        "   Status:    {} {}",
        status_label(receipt.status),
        receipt.status
    );
    if let Some(tax_id) = &receipt.vendor_tax_id {
        println!("   Tax ID:    {}", tax_id);
    }
    if let Some(number) = &receipt.receipt_number {
        println!("   Number:    {}", number);
    }
    if let Some(date) = receipt.issue_date {
        println!("   Date:      {}", date);
    }
    if let Some(subtotal) = receipt.subtotal {
        println!("   Subtotal:  {:.2}", subtotal);
    }
    if let Some(tax) = receipt.tax {
        println!("   Tax:       {:.2}", tax);
    }
    println!(
        "   Total:     {} {}",
        display_total(receipt),
        receipt.currency
    );
    if let Some(method) = &receipt.payment_method {
        println!("   Payment:   {}", method);
    }
    if let Some(original) = receipt.payload.duplicate_of() {
        println!("   👯 Duplicate of {}", original);
    }
    if let Some(candidate) = receipt.payload.duplicate_candidate_of() {
        println!("   ❓ Possible duplicate of {}", candidate);
    }
    if let Some(validation) = &receipt.payload.validation {
        for warning in &validation.warnings {
            println!("   ⚠️  {}", warning);
        }
    }

    if !entry.items.is_empty() {
        println!();
        println!("   Items:");
        for item in &entry.items {
            let line_total = item
                .line_total
                .map(|t| format!("{:.2}", t))
                .unwrap_or_else(|| "N/D".to_string());
            println!(
                "     {:>6} × {:<36} {:>10}",
                item.quantity.normalize(),
                truncate(&item.description, 36),
                line_total
            );
        }
    }

    let runs = db.list_extraction_runs(&receipt.id)?;
    if !runs.is_empty() {
        println!();
        println!("   Extraction runs:");
        for run in &runs {
            let outcome = if run.success { "ok" } else { "failed" };
            let latency = run
                .latency_ms
                .map(|ms| format!("{} ms", ms))
                .unwrap_or_else(|| "-".to_string());
            println!(
                "     {} {} ({}) {}",
                run.created_at.format("%Y-%m-%d %H:%M:%S"),
                run.provider,
                outcome,
                latency
            );
            if let Some(error) = &run.error {
                println!("       {}", error);
            }
        }
    }

    println!();
    Ok(())
}
