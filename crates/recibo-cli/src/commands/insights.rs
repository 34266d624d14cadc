//! Spending report commands

use anyhow::{anyhow, Result};
use recibo_core::db::Database;
use recibo_core::{DateRange, Insights, TrendGrouping};
use serde::Serialize;

use super::truncate;
use crate::cli::RangeArgs;

fn range(args: RangeArgs) -> DateRange {
    DateRange {
        from: args.from,
        to: args.to,
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Bar of `width` cells scaled against `max`
fn bar(value: f64, max: f64, width: usize) -> String {
    if max <= 0.0 {
        return String::new();
    }
    let filled = ((value / max) * width as f64).round() as usize;
    "█".repeat(filled.min(width))
}

pub fn cmd_insights_summary(db: &Database, args: RangeArgs) -> Result<()> {
    let summary = Insights::new(db.clone()).summary(range(args))?;
    if args.json {
        return print_json(&summary);
    }

    println!();
    println!("📊 Spending Summary");
    println!("   ─────────────────────────────");
    println!("   Receipts:       {}", summary.total_receipts);
    println!("   Total spent:    {:.2}", summary.total_spent);
    println!("   Average ticket: {:.2}", summary.average_ticket);
    match (&summary.top_vendor, summary.top_vendor_total) {
        (Some(vendor), Some(total)) => println!("   Top vendor:     {} ({:.2})", vendor, total),
        _ => println!("   Top vendor:     -"),
    }
    println!();

    Ok(())
}

pub fn cmd_insights_vendors(db: &Database, limit: usize, args: RangeArgs) -> Result<()> {
    if limit == 0 {
        return Err(anyhow!("--limit must be at least 1"));
    }
    let vendors = Insights::new(db.clone()).top_vendors(range(args), limit)?;
    if args.json {
        return print_json(&vendors);
    }

    if vendors.items.is_empty() {
        println!("No receipts with a total yet");
        return Ok(());
    }

    println!();
    println!("🏪 Top Vendors");
    println!("{}", "─".repeat(60));
    for (i, vendor) in vendors.items.iter().enumerate() {
        println!(
            "  {:>2}. {:<32} {:>10.2}  ({} receipts)",
            i + 1,
            truncate(&vendor.vendor_name, 32),
            vendor.total_spent,
            vendor.receipts_count
        );
    }
    println!();

    Ok(())
}

pub fn cmd_insights_trend(db: &Database, group_by: &str, args: RangeArgs) -> Result<()> {
    let group: TrendGrouping = group_by
        .parse()
        .map_err(|_| anyhow!("--group-by must be day or month"))?;
    let trend = Insights::new(db.clone()).trend(range(args), group)?;
    if args.json {
        return print_json(&trend);
    }

    if trend.items.is_empty() {
        println!("No dated receipts with a total yet");
        return Ok(());
    }

    let max = trend
        .items
        .iter()
        .map(|p| f64::try_from(p.total_spent).unwrap_or(0.0))
        .fold(0.0, f64::max);

    println!();
    println!("📈 Spending Trend (by {})", trend.group_by.as_str());
    println!("{}", "─".repeat(60));
    for point in &trend.items {
        let value = f64::try_from(point.total_spent).unwrap_or(0.0);
        println!(
            "  {:<10} {:>10.2}  {}",
            point.period,
            point.total_spent,
            bar(value, max, 30)
        );
    }
    println!();

    Ok(())
}

pub fn cmd_insights_anomalies(
    db: &Database,
    factor: f64,
    limit: usize,
    args: RangeArgs,
) -> Result<()> {
    if !(1.0..=4.0).contains(&factor) {
        return Err(anyhow!("--factor must be between 1.0 and 4.0"));
    }
    if limit == 0 {
        return Err(anyhow!("--limit must be at least 1"));
    }
    let anomalies = Insights::new(db.clone()).anomalies(range(args), factor, limit)?;
    if args.json {
        return print_json(&anomalies);
    }

    println!();
    println!(
        "🚨 Anomalies (average {:.2}, threshold {:.2})",
        anomalies.average_ticket, anomalies.threshold
    );
    println!("{}", "─".repeat(70));
    if anomalies.items.is_empty() {
        println!("  ✅ Nothing above the threshold");
    }
    for item in &anomalies.items {
        let date = item
            .issue_date
            .map(|d| d.to_string())
            .unwrap_or_else(|| "----------".to_string());
        println!(
            "  {}  {:<30} {:>10.2}  {}",
            date,
            truncate(&item.vendor_name, 30),
            item.total,
            item.receipt_id
        );
    }
    println!();

    Ok(())
}
