//! Free-text query interpreter
//!
//! Text messages without a file are routed through an ordered table of
//! keyword rules over the lower-cased, trimmed text. The first matching rule
//! wins; text matching nothing gets the help message. Keywords are Spanish
//! (with a few English aliases) because that is what users type.

use std::sync::LazyLock;

use chrono::Local;
use regex::Regex;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use tracing::debug;

use crate::db::Database;
use crate::error::Result;
use crate::insights::{
    DateRange, Insights, TrendGrouping, DEFAULT_ANOMALY_FACTOR, DEFAULT_ANOMALY_LIMIT,
    DEFAULT_TOP_VENDORS,
};
use crate::models::{money_to_cents, Receipt, ReceiptWithItems};

pub const HELP_TEXT: &str = "Puedo ayudarte con:\n\
1) 'comprobante <id>' para ver un comprobante\n\
2) 'buscar comprobantes mayor a 500' para filtrar por monto\n\
3) 'resumen' para ver insights simples\n\
4) 'top proveedores', 'tendencia mensual' o 'anomalias'";

pub const EMPTY_TEXT_REPLY: &str = "Envia un mensaje o un archivo para continuar.";

const OUT_OF_RANGE_REPLY: &str = "El monto indicado esta fuera de rango.";

static UUID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([0-9a-fA-F]{8}-[0-9a-fA-F-]{27})").expect("valid regex"));
static SIMPLE_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"comprobante\s+([A-Za-z0-9-]+)").expect("valid regex"));
static AMOUNT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+[\.,]?\d*)").expect("valid regex"));
static VENDOR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)proveedor\s+([a-zA-Z0-9\s]+)").expect("valid regex"));

/// What a text message asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryIntent {
    Empty,
    Summary,
    TopVendors,
    Trend,
    Anomalies,
    ReceiptLookup,
    Search,
    Help,
}

/// One routing rule: an intent and its keyword predicate
struct QueryRule {
    intent: QueryIntent,
    matches: fn(&str) -> bool,
}

/// Evaluated top to bottom
const RULES: &[QueryRule] = &[
    QueryRule {
        intent: QueryIntent::Summary,
        matches: |t| t.contains("resumen") || t.contains("insight"),
    },
    QueryRule {
        intent: QueryIntent::TopVendors,
        matches: |t| t.contains("top") && (t.contains("proveedor") || t.contains("vendor")),
    },
    QueryRule {
        intent: QueryIntent::Trend,
        matches: |t| t.contains("tendencia") || t.contains("trend"),
    },
    QueryRule {
        intent: QueryIntent::Anomalies,
        matches: |t| t.contains("anomal"),
    },
    QueryRule {
        intent: QueryIntent::ReceiptLookup,
        matches: |t| t.contains("comprobante") && !t.contains("buscar"),
    },
    QueryRule {
        intent: QueryIntent::Search,
        matches: |t| t.contains("buscar") || t.contains("mayor") || t.contains('>'),
    },
];

fn normalize(text: &str) -> String {
    text.trim().to_lowercase()
}

/// Route a message to an intent
pub fn route(text: &str) -> QueryIntent {
    let normalized = normalize(text);
    if normalized.is_empty() {
        return QueryIntent::Empty;
    }
    RULES
        .iter()
        .find(|rule| (rule.matches)(&normalized))
        .map(|rule| rule.intent)
        .unwrap_or(QueryIntent::Help)
}

/// Receipt id mentioned in a lookup message (original casing preserved)
pub fn parse_receipt_id(text: &str) -> Option<String> {
    UUID_RE
        .captures(text)
        .or_else(|| SIMPLE_ID_RE.captures(text))
        .map(|caps| caps[1].to_string())
}

/// First number in the text, comma accepted as decimal separator
pub fn parse_amount(text: &str) -> Option<Decimal> {
    let caps = AMOUNT_RE.captures(text)?;
    let normalized = caps[1].replace(',', ".");
    normalized.trim_end_matches('.').parse().ok()
}

/// Vendor name following "proveedor", if any
pub fn parse_vendor(text: &str) -> Option<String> {
    VENDOR_RE
        .captures(text)
        .map(|caps| caps[1].trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Reply to a text query
#[derive(Debug, Clone, PartialEq)]
pub struct QueryReply {
    pub message: String,
    pub data: Option<Value>,
}

impl QueryReply {
    fn text(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            data: None,
        }
    }

    fn with_data(message: impl Into<String>, data: Value) -> Self {
        Self {
            message: message.into(),
            data: Some(data),
        }
    }
}

/// Answers text queries from stored receipts
#[derive(Clone)]
pub struct QueryInterpreter {
    db: Database,
    insights: Insights,
}

impl QueryInterpreter {
    pub fn new(db: Database) -> Self {
        Self {
            insights: Insights::new(db.clone()),
            db,
        }
    }

    pub fn handle(&self, text: &str) -> Result<QueryReply> {
        let intent = route(text);
        debug!(?intent, "Routed text query");

        match intent {
            QueryIntent::Empty => Ok(QueryReply::text(EMPTY_TEXT_REPLY)),
            QueryIntent::Summary => self.summary(),
            QueryIntent::TopVendors => self.top_vendors(),
            QueryIntent::Trend => self.trend(&normalize(text)),
            QueryIntent::Anomalies => self.anomalies(),
            QueryIntent::ReceiptLookup => self.lookup(text),
            QueryIntent::Search => self.search(text),
            QueryIntent::Help => Ok(QueryReply::text(HELP_TEXT)),
        }
    }

    fn summary(&self) -> Result<QueryReply> {
        let summary = self.insights.summary(DateRange::default())?;

        let mut message = format!(
            "Resumen: {} comprobantes, gasto total {:.2}, ticket promedio {:.2}.",
            summary.total_receipts, summary.total_spent, summary.average_ticket
        );
        if let Some(vendor) = &summary.top_vendor {
            message.push_str(&format!(
                " Proveedor con mayor gasto: {} ({:.2}).",
                vendor,
                summary.top_vendor_total.unwrap_or_default()
            ));
        }

        let mut data = serde_json::to_value(&summary)?;
        data["generated_at"] = json!(Local::now().date_naive());
        Ok(QueryReply::with_data(message, data))
    }

    fn top_vendors(&self) -> Result<QueryReply> {
        let top = self
            .insights
            .top_vendors(DateRange::default(), DEFAULT_TOP_VENDORS)?;

        let message = match top.items.first() {
            Some(first) => format!(
                "Top proveedores listo. #1 {} con {:.2}.",
                first.vendor_name, first.total_spent
            ),
            None => "No hay suficientes datos para top proveedores.".to_string(),
        };
        Ok(QueryReply::with_data(message, serde_json::to_value(&top)?))
    }

    fn trend(&self, normalized: &str) -> Result<QueryReply> {
        let group_by = if normalized.contains("dia") {
            TrendGrouping::Day
        } else {
            TrendGrouping::Month
        };
        let trend = self.insights.trend(DateRange::default(), group_by)?;

        let message = if trend.items.is_empty() {
            "No hay suficientes datos para tendencia.".to_string()
        } else {
            format!(
                "Tendencia {} generada con {} puntos.",
                group_by.as_str(),
                trend.items.len()
            )
        };
        Ok(QueryReply::with_data(message, serde_json::to_value(&trend)?))
    }

    fn anomalies(&self) -> Result<QueryReply> {
        let anomalies = self.insights.anomalies(
            DateRange::default(),
            DEFAULT_ANOMALY_FACTOR,
            DEFAULT_ANOMALY_LIMIT,
        )?;

        let message = if anomalies.items.is_empty() {
            "No detecte anomalias con el umbral actual.".to_string()
        } else {
            format!(
                "Detecte {} anomalias sobre umbral {:.2}.",
                anomalies.items.len(),
                anomalies.threshold
            )
        };
        Ok(QueryReply::with_data(message, serde_json::to_value(&anomalies)?))
    }

    fn lookup(&self, text: &str) -> Result<QueryReply> {
        let Some(receipt_id) = parse_receipt_id(text) else {
            return Ok(QueryReply::text(
                "No pude detectar un ID. Usa: comprobante <id>",
            ));
        };

        let Some(found) = self.db.get_receipt_with_items(&receipt_id)? else {
            return Ok(QueryReply::text(format!(
                "No encontre el comprobante {}.",
                receipt_id
            )));
        };

        let message = format!(
            "Encontre el comprobante {} por {} {}.",
            found.receipt.id,
            display_total(&found.receipt),
            found.receipt.currency
        );
        Ok(QueryReply::with_data(message, serde_json::to_value(&found)?))
    }

    fn search(&self, text: &str) -> Result<QueryReply> {
        let normalized = normalize(text);
        let amount = parse_amount(&normalized);
        let in_range = amount.map_or(!AMOUNT_RE.is_match(&normalized), |a| {
            money_to_cents(a).is_some()
        });
        if !in_range {
            return Ok(QueryReply::text(OUT_OF_RANGE_REPLY));
        }
        let amount = amount.unwrap_or(Decimal::ZERO);
        let vendor = parse_vendor(text);

        let receipts = self.db.search_receipts(amount, vendor.as_deref())?;
        if receipts.is_empty() {
            return Ok(QueryReply::text(format!(
                "No encontre comprobantes con total >= {:.2}.",
                amount
            )));
        }

        let results = receipts
            .into_iter()
            .map(|receipt| {
                let items = self.db.list_receipt_items(&receipt.id)?;
                Ok(ReceiptWithItems { receipt, items })
            })
            .collect::<Result<Vec<_>>>()?;

        let message = format!(
            "Encontre {} comprobantes con total >= {:.2}.",
            results.len(),
            amount
        );
        Ok(QueryReply::with_data(message, serde_json::to_value(&results)?))
    }
}

/// Total as shown in chat replies; "N/D" when unknown
pub fn display_total(receipt: &Receipt) -> String {
    receipt
        .total
        .map(|t| format!("{:.2}", t))
        .unwrap_or_else(|| "N/D".to_string())
}
