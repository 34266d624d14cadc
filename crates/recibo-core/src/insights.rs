//! Spending insights over stored receipts
//!
//! The aggregations are pure functions over a slice of receipts so they can be
//! tested without a database; [`Insights`] loads the receipts (non-null
//! total, optional inclusive issue-date range) and applies them.
//!
//! All arithmetic is exact decimal arithmetic. Orderings are deterministic:
//! vendors tie-break on name, anomalies on creation order.

use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::db::Database;
use crate::error::{Error, Result};
use crate::models::{round_money, Receipt};

/// Reason attached to every anomaly
pub const ANOMALY_REASON: &str = "total_above_dynamic_threshold";
pub const DEFAULT_ANOMALY_FACTOR: f64 = 1.8;
pub const DEFAULT_ANOMALY_LIMIT: usize = 10;
pub const DEFAULT_TOP_VENDORS: usize = 5;

/// Inclusive issue-date range; open ends are unbounded
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct DateRange {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Summary {
    pub total_receipts: usize,
    pub total_spent: Decimal,
    pub average_ticket: Decimal,
    pub top_vendor: Option<String>,
    pub top_vendor_total: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VendorTotal {
    pub vendor_name: String,
    pub total_spent: Decimal,
    pub receipts_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TopVendors {
    pub items: Vec<VendorTotal>,
}

/// Trend bucket size
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendGrouping {
    Day,
    #[default]
    Month,
}

impl TrendGrouping {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Day => "day",
            Self::Month => "month",
        }
    }

    fn label(&self, date: NaiveDate) -> String {
        match self {
            Self::Day => date.format("%Y-%m-%d").to_string(),
            Self::Month => date.format("%Y-%m").to_string(),
        }
    }
}

impl FromStr for TrendGrouping {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "day" => Ok(Self::Day),
            "month" => Ok(Self::Month),
            _ => Err(Error::invalid_input(
                "request_validation_error",
                format!("group_by debe ser day o month, no {}", s),
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendPoint {
    pub period: String,
    pub total_spent: Decimal,
    pub receipts_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Trend {
    pub group_by: TrendGrouping,
    pub items: Vec<TrendPoint>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Anomaly {
    pub receipt_id: String,
    pub vendor_name: String,
    pub issue_date: Option<NaiveDate>,
    pub total: Decimal,
    pub threshold: Decimal,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Anomalies {
    pub average_ticket: Decimal,
    pub threshold: Decimal,
    pub items: Vec<Anomaly>,
}

fn totals(receipts: &[Receipt]) -> impl Iterator<Item = (&Receipt, Decimal)> {
    receipts.iter().filter_map(|r| r.total.map(|t| (r, t)))
}

fn exact_average(receipts: &[Receipt]) -> Decimal {
    let (count, sum) = totals(receipts).fold((0u64, Decimal::ZERO), |(n, s), (_, t)| (n + 1, s + t));
    if count == 0 {
        Decimal::ZERO
    } else {
        sum / Decimal::from(count)
    }
}

/// Vendor totals, highest first, ties by vendor name
fn vendor_totals(receipts: &[Receipt]) -> Vec<VendorTotal> {
    let mut by_vendor: HashMap<&str, (Decimal, usize)> = HashMap::new();
    for (receipt, total) in totals(receipts) {
        let entry = by_vendor
            .entry(receipt.vendor_name.as_str())
            .or_insert((Decimal::ZERO, 0));
        entry.0 += total;
        entry.1 += 1;
    }

    let mut vendors: Vec<VendorTotal> = by_vendor
        .into_iter()
        .map(|(vendor_name, (total_spent, receipts_count))| VendorTotal {
            vendor_name: vendor_name.to_string(),
            total_spent,
            receipts_count,
        })
        .collect();
    vendors.sort_by(|a, b| {
        b.total_spent
            .cmp(&a.total_spent)
            .then_with(|| a.vendor_name.cmp(&b.vendor_name))
    });
    vendors
}

/// Count, sum and average of totals plus the biggest vendor
pub fn summarize(receipts: &[Receipt]) -> Summary {
    let total_receipts = totals(receipts).count();
    let total_spent: Decimal = totals(receipts).map(|(_, t)| t).sum();
    let top = vendor_totals(receipts).into_iter().next();

    Summary {
        total_receipts,
        total_spent,
        average_ticket: round_money(exact_average(receipts)),
        top_vendor: top.as_ref().map(|v| v.vendor_name.clone()),
        top_vendor_total: top.map(|v| v.total_spent),
    }
}

/// Vendors by summed total, truncated to `limit`
pub fn top_vendors(receipts: &[Receipt], limit: usize) -> TopVendors {
    let mut items = vendor_totals(receipts);
    items.truncate(limit);
    TopVendors { items }
}

/// Totals bucketed by day or month, ascending; undated receipts are skipped
pub fn trend(receipts: &[Receipt], group_by: TrendGrouping) -> Trend {
    let mut buckets: BTreeMap<String, (Decimal, usize)> = BTreeMap::new();
    for (receipt, total) in totals(receipts) {
        let Some(date) = receipt.issue_date else {
            continue;
        };
        let entry = buckets
            .entry(group_by.label(date))
            .or_insert((Decimal::ZERO, 0));
        entry.0 += total;
        entry.1 += 1;
    }

    Trend {
        group_by,
        items: buckets
            .into_iter()
            .map(|(period, (total_spent, receipts_count))| TrendPoint {
                period,
                total_spent,
                receipts_count,
            })
            .collect(),
    }
}

/// Receipts whose total reaches `average * factor`
///
/// An empty result is returned whenever the threshold is not positive.
pub fn anomalies(receipts: &[Receipt], factor: f64, limit: usize) -> Anomalies {
    let average = exact_average(receipts);
    let factor = Decimal::try_from(factor).unwrap_or(Decimal::ZERO);
    let threshold = average * factor;

    let mut items = Vec::new();
    if threshold > Decimal::ZERO {
        let mut above: Vec<(&Receipt, Decimal)> =
            totals(receipts).filter(|(_, t)| *t >= threshold).collect();
        // Stable sort keeps creation order among equal totals
        above.sort_by(|a, b| b.1.cmp(&a.1));

        let reported_threshold = round_money(threshold);
        items = above
            .into_iter()
            .take(limit)
            .map(|(receipt, total)| Anomaly {
                receipt_id: receipt.id.clone(),
                vendor_name: receipt.vendor_name.clone(),
                issue_date: receipt.issue_date,
                total,
                threshold: reported_threshold,
                reason: ANOMALY_REASON.to_string(),
            })
            .collect();
    }

    Anomalies {
        average_ticket: round_money(average),
        threshold: round_money(threshold),
        items,
    }
}

/// Insights computed from the receipt store on demand
#[derive(Clone)]
pub struct Insights {
    db: Database,
}

impl Insights {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    fn load(&self, range: DateRange) -> Result<Vec<Receipt>> {
        self.db.list_receipts_for_insights(range.from, range.to)
    }

    pub fn summary(&self, range: DateRange) -> Result<Summary> {
        Ok(summarize(&self.load(range)?))
    }

    pub fn top_vendors(&self, range: DateRange, limit: usize) -> Result<TopVendors> {
        Ok(top_vendors(&self.load(range)?, limit))
    }

    pub fn trend(&self, range: DateRange, group_by: TrendGrouping) -> Result<Trend> {
        Ok(trend(&self.load(range)?, group_by))
    }

    pub fn anomalies(&self, range: DateRange, factor: f64, limit: usize) -> Result<Anomalies> {
        Ok(anomalies(&self.load(range)?, factor, limit))
    }
}
