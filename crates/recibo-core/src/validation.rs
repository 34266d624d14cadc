//! Validation engine
//!
//! Normalizes an analyzer's receipt payload, flags anything suspicious and
//! decides the receipt's trust status. Checks never abort processing: an
//! invalid receipt is still stored, with its warnings kept for review.
//!
//! Also home to the upload policy check, which runs before any state exists.

use std::path::Path;
use std::str::FromStr;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::UploadPolicy;
use crate::error::{Error, Result};
use crate::models::{storable_money, NewReceiptItem, ReceiptStatus};

/// Currency codes accepted without a warning
pub const VALID_CURRENCIES: &[&str] = &["PEN", "USD", "EUR", "COP", "MXN", "CLP", "ARS", "BRL"];

/// Currency assumed when the analyzer omits one
pub const DEFAULT_CURRENCY: &str = "PEN";

/// Vendor name stored when the analyzer found none
pub const UNKNOWN_VENDOR: &str = "Proveedor desconocido";

const MIN_VENDOR_NAME_LEN: usize = 3;

/// Largest accepted gap between subtotal + tax and total
const AMOUNT_TOLERANCE: Decimal = Decimal::ONE;

/// A validation finding. Serialized as its stable snake_case code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationWarning {
    VendorNameTooShort,
    CurrencyOutsideAllowlist,
    /// An amount too large to store; it is dropped from the receipt
    AmountOutOfRange,
    TotalMissingOrNonPositive,
    AmountInconsistencySubtotalTaxTotal,
    IssueDateInvalid,
    IssueDateInFuture,
}

impl ValidationWarning {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::VendorNameTooShort => "vendor_name_too_short",
            Self::CurrencyOutsideAllowlist => "currency_outside_allowlist",
            Self::AmountOutOfRange => "amount_out_of_range",
            Self::TotalMissingOrNonPositive => "total_missing_or_non_positive",
            Self::AmountInconsistencySubtotalTaxTotal => "amount_inconsistency_subtotal_tax_total",
            Self::IssueDateInvalid => "issue_date_invalid",
            Self::IssueDateInFuture => "issue_date_in_future",
        }
    }
}

impl std::fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Result of validating one extracted payload
#[derive(Debug, Clone, PartialEq)]
pub struct Validation {
    /// The normalized payload (currency upper-cased and defaulted)
    pub payload: Map<String, Value>,
    pub warnings: Vec<ValidationWarning>,
    pub status: ReceiptStatus,
}

/// Validate and normalize an extracted receipt payload.
///
/// `today` is the processing date used for the future-date check.
/// Re-validating the returned payload yields the same warnings and status.
pub fn validate_receipt_payload(raw: &Map<String, Value>, today: NaiveDate) -> Validation {
    let mut payload = raw.clone();
    let mut warnings = Vec::new();

    let vendor_name = string_field(&payload, "vendor_name").unwrap_or_default();
    if vendor_name.chars().count() < MIN_VENDOR_NAME_LEN {
        warnings.push(ValidationWarning::VendorNameTooShort);
    }

    let currency = string_field(&payload, "currency")
        .map(|c| c.to_uppercase())
        .unwrap_or_else(|| DEFAULT_CURRENCY.to_string());
    if !VALID_CURRENCIES.contains(&currency.as_str()) {
        warnings.push(ValidationWarning::CurrencyOutsideAllowlist);
    }
    payload.insert("currency".to_string(), Value::String(currency));

    let [subtotal, tax, total] =
        ["subtotal", "tax", "total"].map(|key| payload.get(key).and_then(decimal_from_value));
    let item_amounts = payload
        .get("items")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(Value::as_object)
        .flat_map(|item| ["unit_price", "line_total"].map(|key| item.get(key)))
        .flatten()
        .filter_map(decimal_from_value);
    if [subtotal, tax, total]
        .into_iter()
        .flatten()
        .chain(item_amounts)
        .any(|amount| storable_money(amount).is_none())
    {
        warnings.push(ValidationWarning::AmountOutOfRange);
    }
    let [subtotal, tax, total] = [subtotal, tax, total].map(|a| a.and_then(storable_money));

    match total {
        Some(t) if t > Decimal::ZERO => {}
        _ => warnings.push(ValidationWarning::TotalMissingOrNonPositive),
    }

    if let (Some(subtotal), Some(tax), Some(total)) = (subtotal, tax, total) {
        let gap = subtotal
            .checked_add(tax)
            .and_then(|sum| sum.checked_sub(total));
        if gap.map_or(true, |gap| gap.abs() > AMOUNT_TOLERANCE) {
            warnings.push(ValidationWarning::AmountInconsistencySubtotalTaxTotal);
        }
    }

    match parse_issue_date(payload.get("issue_date")) {
        DateField::Absent => {}
        DateField::Invalid => warnings.push(ValidationWarning::IssueDateInvalid),
        DateField::Valid(date) if date > today => {
            warnings.push(ValidationWarning::IssueDateInFuture)
        }
        DateField::Valid(_) => {}
    }

    let status = if warnings.is_empty() {
        ReceiptStatus::Processed
    } else {
        ReceiptStatus::ProcessedWithWarnings
    };

    Validation {
        payload,
        warnings,
        status,
    }
}

/// Typed view of a (normalized) receipt payload, ready to persist
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractedFields {
    pub vendor_name: Option<String>,
    pub vendor_tax_id: Option<String>,
    pub receipt_number: Option<String>,
    pub issue_date: Option<NaiveDate>,
    pub currency: Option<String>,
    pub subtotal: Option<Decimal>,
    pub tax: Option<Decimal>,
    pub total: Option<Decimal>,
    pub payment_method: Option<String>,
    pub confidence: Option<f64>,
    pub raw_text: Option<String>,
    pub items: Vec<NewReceiptItem>,
}

impl ExtractedFields {
    /// Read the known fields out of a payload, ignoring malformed values
    pub fn from_payload(payload: &Map<String, Value>) -> Self {
        let issue_date = match parse_issue_date(payload.get("issue_date")) {
            DateField::Valid(date) => Some(date),
            _ => None,
        };

        let items = payload
            .get("items")
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(parse_item).collect())
            .unwrap_or_default();

        Self {
            vendor_name: string_field(payload, "vendor_name"),
            vendor_tax_id: string_field(payload, "vendor_tax_id"),
            receipt_number: string_field(payload, "receipt_number"),
            issue_date,
            currency: string_field(payload, "currency"),
            subtotal: money_field(payload, "subtotal"),
            tax: money_field(payload, "tax"),
            total: money_field(payload, "total"),
            payment_method: string_field(payload, "payment_method"),
            confidence: payload.get("confidence").and_then(float_from_value),
            raw_text: string_field(payload, "raw_text"),
            items,
        }
    }
}

fn parse_item(value: &Value) -> Option<NewReceiptItem> {
    let item = value.as_object()?;
    let quantity = item
        .get("quantity")
        .and_then(decimal_from_value)
        .filter(|q| !q.is_zero())
        .unwrap_or(Decimal::ONE);

    Some(NewReceiptItem {
        description: string_field(item, "description").unwrap_or_else(|| "Item".to_string()),
        quantity,
        unit_price: money_field(item, "unit_price"),
        line_total: money_field(item, "line_total"),
    })
}

/// Check an upload against the configured limits
pub fn validate_upload(
    filename: &str,
    mime_type: &str,
    size_bytes: usize,
    policy: &UploadPolicy,
) -> Result<()> {
    if size_bytes == 0 {
        return Err(Error::invalid_input("file_empty", "El archivo esta vacio"));
    }

    if size_bytes > policy.max_bytes {
        return Err(Error::invalid_input(
            "file_too_large",
            format!("Archivo excede limite de {} bytes", policy.max_bytes),
        ));
    }

    let extension = Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{}", e.to_lowercase()));
    match extension {
        Some(ref ext) if policy.allowed_extensions.iter().any(|a| a == ext) => {}
        Some(ext) => {
            return Err(Error::invalid_input(
                "extension_not_allowed",
                format!("Extension no permitida: {}", ext),
            ))
        }
        None => {
            return Err(Error::invalid_input(
                "extension_not_allowed",
                "Extension no permitida: sin extension",
            ))
        }
    }

    let mime = mime_type.trim().to_lowercase();
    if !mime.is_empty() && !policy.allowed_mime_types.contains(&mime) {
        return Err(Error::invalid_input(
            "mime_not_allowed",
            format!("MIME no permitido: {}", mime),
        ));
    }

    Ok(())
}

enum DateField {
    Absent,
    Invalid,
    Valid(NaiveDate),
}

fn parse_issue_date(value: Option<&Value>) -> DateField {
    match value {
        None | Some(Value::Null) | Some(Value::Bool(false)) => DateField::Absent,
        Some(Value::String(s)) if s.trim().is_empty() => DateField::Absent,
        Some(Value::String(s)) => NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
            .map(DateField::Valid)
            .unwrap_or(DateField::Invalid),
        Some(_) => DateField::Invalid,
    }
}

/// Non-empty trimmed string value of `key`
fn string_field(map: &Map<String, Value>, key: &str) -> Option<String> {
    match map.get(key)? {
        Value::String(s) => {
            let s = s.trim();
            (!s.is_empty()).then(|| s.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Rounded amount of `key`; absent when it cannot be stored
fn money_field(map: &Map<String, Value>, key: &str) -> Option<Decimal> {
    map.get(key)
        .and_then(decimal_from_value)
        .and_then(storable_money)
}

/// Parse a JSON number or numeric string into an exact decimal.
///
/// Numbers are read from their textual form so `480.75` stays `480.75`.
/// A comma is accepted as the decimal separator in strings.
pub fn decimal_from_value(value: &Value) -> Option<Decimal> {
    let text = match value {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.trim().replace(',', "."),
        _ => return None,
    };
    if text.is_empty() {
        return None;
    }
    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .ok()
}

fn float_from_value(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
