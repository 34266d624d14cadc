//! Insight handlers
//!
//! Every endpoint takes an optional inclusive `from`/`to` issue-date range.
//! Out-of-range parameters are rejected rather than clamped.

use std::sync::Arc;

use axum::{
    extract::{rejection::QueryRejection, Query, State},
    Json,
};
use chrono::NaiveDate;
use serde::Deserialize;

use crate::{AppError, AppState};
use recibo_core::insights::{
    Anomalies, DateRange, Summary, TopVendors, Trend, TrendGrouping, DEFAULT_ANOMALY_FACTOR,
    DEFAULT_ANOMALY_LIMIT, DEFAULT_TOP_VENDORS,
};

const MAX_TOP_VENDORS: usize = 20;
const MAX_ANOMALIES: usize = 50;
const MIN_FACTOR: f64 = 1.0;
const MAX_FACTOR: f64 = 4.0;

#[derive(Debug, Deserialize)]
pub struct VendorsQuery {
    #[serde(default = "default_vendor_limit")]
    pub limit: usize,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

fn default_vendor_limit() -> usize {
    DEFAULT_TOP_VENDORS
}

#[derive(Debug, Deserialize)]
pub struct TrendQuery {
    #[serde(default)]
    pub group_by: Option<String>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

#[derive(Debug, Deserialize)]
pub struct AnomaliesQuery {
    #[serde(default = "default_factor")]
    pub factor: f64,
    #[serde(default = "default_anomaly_limit")]
    pub limit: usize,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

fn default_factor() -> f64 {
    DEFAULT_ANOMALY_FACTOR
}

fn default_anomaly_limit() -> usize {
    DEFAULT_ANOMALY_LIMIT
}

fn range(from: Option<NaiveDate>, to: Option<NaiveDate>) -> DateRange {
    DateRange { from, to }
}

fn query_params<T>(params: Result<Query<T>, QueryRejection>) -> Result<T, AppError> {
    params
        .map(|Query(p)| p)
        .map_err(|e| AppError::validation(&e.body_text()))
}

/// GET /api/v1/insights/summary
pub async fn get_summary(
    State(state): State<Arc<AppState>>,
    params: Result<Query<DateRange>, QueryRejection>,
) -> Result<Json<Summary>, AppError> {
    let range = query_params(params)?;
    Ok(Json(state.insights.summary(range)?))
}

/// GET /api/v1/insights/vendors - Top vendors by spend (limit 1-20)
pub async fn get_top_vendors(
    State(state): State<Arc<AppState>>,
    params: Result<Query<VendorsQuery>, QueryRejection>,
) -> Result<Json<TopVendors>, AppError> {
    let params = query_params(params)?;
    if !(1..=MAX_TOP_VENDORS).contains(&params.limit) {
        return Err(AppError::validation(&format!(
            "limit must be between 1 and {}",
            MAX_TOP_VENDORS
        )));
    }

    let range = range(params.from, params.to);
    Ok(Json(state.insights.top_vendors(range, params.limit)?))
}

/// GET /api/v1/insights/trend - Spend per day or month
pub async fn get_trend(
    State(state): State<Arc<AppState>>,
    params: Result<Query<TrendQuery>, QueryRejection>,
) -> Result<Json<Trend>, AppError> {
    let params = query_params(params)?;
    let group_by = match params.group_by.as_deref() {
        None => TrendGrouping::default(),
        Some(value) => value
            .parse::<TrendGrouping>()
            .map_err(|_| AppError::validation("group_by must be day or month"))?,
    };

    let range = range(params.from, params.to);
    Ok(Json(state.insights.trend(range, group_by)?))
}

/// GET /api/v1/insights/anomalies - Receipts above `average * factor`
pub async fn get_anomalies(
    State(state): State<Arc<AppState>>,
    params: Result<Query<AnomaliesQuery>, QueryRejection>,
) -> Result<Json<Anomalies>, AppError> {
    let params = query_params(params)?;
    if !(MIN_FACTOR..=MAX_FACTOR).contains(&params.factor) {
        return Err(AppError::validation(&format!(
            "factor must be between {} and {}",
            MIN_FACTOR, MAX_FACTOR
        )));
    }
    if !(1..=MAX_ANOMALIES).contains(&params.limit) {
        return Err(AppError::validation(&format!(
            "limit must be between 1 and {}",
            MAX_ANOMALIES
        )));
    }

    let range = range(params.from, params.to);
    Ok(Json(state.insights.anomalies(
        range,
        params.factor,
        params.limit,
    )?))
}
