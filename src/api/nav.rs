use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::api::AppState;
use crate::domain::{Decimal, NavRecord, TimeMs};
use crate::error::AppError;

const MAX_HISTORY: i64 = 365;

#[derive(Debug, Deserialize)]
pub struct NavQuery {
    /// Also return up to this many past calculations, newest first.
    pub history: Option<i64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NavDto {
    pub nav_per_token: String,
    pub total_fund_value: String,
    pub total_tokens_outstanding: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custody_balance: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pool_usdc_reserve: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pool_token_reserve: Option<String>,
    pub calculated_at: i64,
}

impl From<&NavRecord> for NavDto {
    fn from(n: &NavRecord) -> Self {
        Self {
            nav_per_token: n.nav_per_token.to_canonical_string(),
            total_fund_value: n.total_fund_value.to_canonical_string(),
            total_tokens_outstanding: n.total_tokens_outstanding.to_canonical_string(),
            custody_balance: n.custody_balance.map(|d| d.to_canonical_string()),
            pool_usdc_reserve: n.pool_usdc_reserve.map(|d| d.to_canonical_string()),
            pool_token_reserve: n.pool_token_reserve.map(|d| d.to_canonical_string()),
            calculated_at: n.calculated_at.as_ms(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NavResponse {
    pub nav_per_token: String,
    /// Absent until the first calculation is recorded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest: Option<NavDto>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub history: Vec<NavDto>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordNavRequest {
    pub total_fund_value: Decimal,
    pub total_tokens_outstanding: Decimal,
    pub custody_balance: Option<Decimal>,
    pub pool_usdc_reserve: Option<Decimal>,
    pub pool_token_reserve: Option<Decimal>,
}

/// Latest NAV per token, or the initial 1.0 before any calculation.
pub(crate) async fn current_nav(state: &AppState) -> Result<Decimal, AppError> {
    Ok(state
        .repo
        .latest_nav()
        .await?
        .map(|n| n.nav_per_token)
        .unwrap_or_else(NavRecord::initial_nav))
}

pub async fn get_nav(
    Query(params): Query<NavQuery>,
    State(state): State<AppState>,
) -> Result<Json<NavResponse>, AppError> {
    let latest = state.repo.latest_nav().await?;
    let history = match params.history {
        Some(limit) if !(1..=MAX_HISTORY).contains(&limit) => {
            return Err(AppError::BadRequest(format!(
                "history must be between 1 and {}",
                MAX_HISTORY
            )))
        }
        Some(limit) => state.repo.nav_history(limit).await?,
        None => Vec::new(),
    };

    Ok(Json(NavResponse {
        nav_per_token: latest
            .as_ref()
            .map(|n| n.nav_per_token)
            .unwrap_or_else(NavRecord::initial_nav)
            .to_canonical_string(),
        latest: latest.as_ref().map(NavDto::from),
        history: history.iter().map(NavDto::from).collect(),
    }))
}

pub async fn record_nav(
    State(state): State<AppState>,
    Json(req): Json<RecordNavRequest>,
) -> Result<Json<NavDto>, AppError> {
    if !req.total_tokens_outstanding.is_positive() {
        return Err(AppError::BadRequest(
            "totalTokensOutstanding must be positive".into(),
        ));
    }
    if req.total_fund_value < Decimal::zero() {
        return Err(AppError::BadRequest("totalFundValue must not be negative".into()));
    }
    let nav_per_token = req
        .total_fund_value
        .checked_div(req.total_tokens_outstanding)
        .ok_or_else(|| AppError::BadRequest("NAV per token is out of range".into()))?
        .round_significant(15);

    let record = state
        .repo
        .record_nav(&NavRecord {
            id: 0,
            nav_per_token,
            total_fund_value: req.total_fund_value,
            total_tokens_outstanding: req.total_tokens_outstanding,
            custody_balance: req.custody_balance,
            pool_usdc_reserve: req.pool_usdc_reserve,
            pool_token_reserve: req.pool_token_reserve,
            calculated_at: TimeMs::now(),
        })
        .await?;

    info!(nav_per_token = %record.nav_per_token, id = record.id, "NAV recorded");
    Ok(Json(NavDto::from(&record)))
}
