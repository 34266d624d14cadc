//! Receipt handlers

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, rejection::QueryRejection, Path, Query, State},
    Json,
};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{AppError, AppState};
use recibo_core::db::MAX_LIST_LIMIT;
use recibo_core::models::{money_to_cents, ReceiptFilter, ReceiptPatch, ReceiptWithItems};

/// Query parameters for listing receipts
#[derive(Debug, Deserialize)]
pub struct ReceiptListQuery {
    /// Case-insensitive vendor substring
    pub vendor: Option<String>,
    pub min_total: Option<f64>,
    pub max_total: Option<f64>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct ReceiptListResponse {
    pub total: usize,
    pub items: Vec<ReceiptWithItems>,
}

fn amount_param(name: &str, value: Option<f64>) -> Result<Option<Decimal>, AppError> {
    match value {
        None => Ok(None),
        Some(v) if v < 0.0 => Err(AppError::validation(&format!(
            "{} must be greater than or equal to 0",
            name
        ))),
        Some(v) => Decimal::try_from(v)
            .ok()
            .filter(|d| money_to_cents(*d).is_some())
            .map(Some)
            .ok_or_else(|| AppError::validation(&format!("{} is not a valid amount", name))),
    }
}

/// GET /api/v1/receipts - List receipts, newest first
pub async fn list_receipts(
    State(state): State<Arc<AppState>>,
    params: Result<Query<ReceiptListQuery>, QueryRejection>,
) -> Result<Json<ReceiptListResponse>, AppError> {
    let Query(params) = params.map_err(|e| AppError::validation(&e.body_text()))?;

    if let Some(limit) = params.limit {
        if !(1..=MAX_LIST_LIMIT).contains(&limit) {
            return Err(AppError::validation(&format!(
                "limit must be between 1 and {}",
                MAX_LIST_LIMIT
            )));
        }
    }

    let filter = ReceiptFilter {
        vendor: params.vendor,
        min_total: amount_param("min_total", params.min_total)?,
        max_total: amount_param("max_total", params.max_total)?,
        from: params.from,
        to: params.to,
        limit: params.limit,
    };

    let items = state.db.list_receipts(&filter)?;
    Ok(Json(ReceiptListResponse {
        total: items.len(),
        items,
    }))
}

/// GET /api/v1/receipts/:id - Get a receipt with its items
pub async fn get_receipt(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ReceiptWithItems>, AppError> {
    let receipt = state
        .db
        .get_receipt_with_items(&id)?
        .ok_or_else(|| AppError::not_found("Comprobante no encontrado"))?;

    Ok(Json(receipt))
}

/// PATCH /api/v1/receipts/:id - Correct receipt fields
///
/// Unset fields are left untouched. Without an explicit `status` the receipt
/// becomes `manually_corrected`.
pub async fn patch_receipt(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Result<Json<ReceiptPatch>, JsonRejection>,
) -> Result<Json<ReceiptWithItems>, AppError> {
    let Json(patch) = body.map_err(|e| AppError::validation(&e.body_text()))?;

    if state.db.get_receipt(&id)?.is_none() {
        return Err(AppError::not_found("Comprobante no encontrado"));
    }

    let updated = state.db.patch_receipt(&id, &patch)?;
    Ok(Json(updated))
}
