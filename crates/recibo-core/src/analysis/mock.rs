//! In-process analyzer for development and tests
//!
//! Extracts receipt fields from plain text with simple line rules, and can be
//! scripted to fail in specific ways so retry behaviour can be exercised
//! without a network.

use std::collections::VecDeque;
use std::str::FromStr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::{json, Map, Number, Value};

use super::{AnalysisRequest, AnalysisTransport, AttemptFailure};

pub const MOCK_PROVIDER: &str = "mock-agent";
pub const MOCK_MODEL: &str = "mock-rules-v1";

/// What the mock answers on one attempt
#[derive(Debug, Clone, PartialEq)]
pub enum MockResponse {
    /// Rule-based extraction of the request
    Extract,
    /// A JSON-RPC error object with this message
    RpcError(String),
    /// This exact response document
    Body(Value),
    /// Fail the attempt
    Fail(AttemptFailure),
}

/// Scriptable mock analyzer
///
/// Scripted responses are consumed in order; once exhausted every attempt
/// gets the fallback response.
#[derive(Clone)]
pub struct MockTransport {
    script: Arc<Mutex<VecDeque<MockResponse>>>,
    fallback: MockResponse,
    attempts: Arc<AtomicU32>,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    /// Always extract
    pub fn new() -> Self {
        Self::always(MockResponse::Extract)
    }

    /// Answer every attempt with `response`
    pub fn always(response: MockResponse) -> Self {
        Self {
            script: Arc::new(Mutex::new(VecDeque::new())),
            fallback: response,
            attempts: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Answer with `responses` in order, then extract
    pub fn scripted(responses: Vec<MockResponse>) -> Self {
        Self {
            script: Arc::new(Mutex::new(responses.into())),
            fallback: MockResponse::Extract,
            attempts: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Attempts made so far (shared between clones)
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    fn next_response(&self) -> MockResponse {
        let scripted = self
            .script
            .lock()
            .ok()
            .and_then(|mut script| script.pop_front());
        scripted.unwrap_or_else(|| self.fallback.clone())
    }
}

#[async_trait]
impl AnalysisTransport for MockTransport {
    async fn call(&self, request: &AnalysisRequest) -> Result<Value, AttemptFailure> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        match self.next_response() {
            MockResponse::Extract => Ok(json!({
                "jsonrpc": "2.0",
                "result": mock_extraction(request),
            })),
            MockResponse::RpcError(message) => Ok(json!({
                "jsonrpc": "2.0",
                "error": {"code": -32000, "message": message},
            })),
            MockResponse::Body(body) => Ok(body),
            MockResponse::Fail(failure) => Err(failure),
        }
    }

    fn endpoint(&self) -> &str {
        "mock"
    }
}

/// Rule-based extraction result for a request
///
/// Reads the text hint, or the document itself when it is UTF-8 text. The
/// first non-empty line is taken as the vendor; `LABEL: value` lines fill the
/// other fields (`RUC`, `FACTURA`/`BOLETA`, `FECHA`, `MONEDA`, `SUBTOTAL`,
/// `IGV`/`IMPUESTO`, `TOTAL`, `METODO`, `ITEM: desc | qty | price`).
pub fn mock_extraction(request: &AnalysisRequest) -> Value {
    let text = request
        .text_hint
        .clone()
        .filter(|t| !t.trim().is_empty())
        .or_else(|| {
            request
                .content()
                .and_then(|bytes| String::from_utf8(bytes).ok())
        })
        .unwrap_or_default();

    let mut receipt = Map::new();
    let mut items = Vec::new();

    let mut lines = text.lines().map(str::trim).filter(|l| !l.is_empty());
    if let Some(first) = lines.clone().next() {
        if !first.contains(':') {
            receipt.insert("vendor_name".to_string(), json!(first));
            lines.next();
        }
    }

    for line in lines {
        let Some((label, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        match label.trim().to_uppercase().as_str() {
            "RUC" => {
                receipt.insert("vendor_tax_id".to_string(), json!(value));
            }
            "FACTURA" | "BOLETA" | "NUMERO" => {
                receipt.insert("receipt_number".to_string(), json!(value));
            }
            "FECHA" => {
                receipt.insert("issue_date".to_string(), json!(value));
            }
            "MONEDA" => {
                receipt.insert("currency".to_string(), json!(value));
            }
            "SUBTOTAL" => insert_amount(&mut receipt, "subtotal", value),
            "IGV" | "IMPUESTO" => insert_amount(&mut receipt, "tax", value),
            "TOTAL" => insert_amount(&mut receipt, "total", value),
            "METODO" | "PAGO" => {
                receipt.insert("payment_method".to_string(), json!(value));
            }
            "ITEM" => items.push(parse_item_line(value)),
            _ => {}
        }
    }

    let confidence = if receipt.contains_key("total") { 0.9 } else { 0.4 };
    receipt.insert("confidence".to_string(), json!(confidence));
    receipt.insert("items".to_string(), Value::Array(items));
    if !text.is_empty() {
        receipt.insert("raw_text".to_string(), json!(text));
    }

    json!({
        "provider": MOCK_PROVIDER,
        "model": MOCK_MODEL,
        "receipt": receipt,
        "source": {"filename": request.filename, "mime_type": request.mime_type},
    })
}

fn insert_amount(receipt: &mut Map<String, Value>, key: &str, value: &str) {
    if let Some(number) = amount(value) {
        receipt.insert(key.to_string(), Value::Number(number));
    }
}

fn decimal(value: &str) -> Option<Decimal> {
    let cleaned: String = value
        .replace(',', ".")
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
        .collect();
    Decimal::from_str(&cleaned).ok()
}

/// Decimal as a JSON number
fn number(value: Decimal) -> Option<Number> {
    serde_json::from_str(&value.to_string()).ok()
}

fn amount(value: &str) -> Option<Number> {
    decimal(value).and_then(number)
}

fn parse_item_line(value: &str) -> Value {
    let mut parts = value.split('|').map(str::trim);
    let description = parts.next().unwrap_or_default();
    let quantity = parts.next().and_then(decimal);
    let unit_price = parts.next().and_then(decimal);
    let line_total = quantity
        .zip(unit_price)
        .and_then(|(q, p)| number((q * p).round_dp(2)));

    json!({
        "description": description,
        "quantity": quantity.and_then(number),
        "unit_price": unit_price.and_then(number),
        "line_total": line_total,
    })
}
