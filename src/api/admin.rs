use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::api::purchases::PurchaseDto;
use crate::api::AppState;
use crate::db::{IPO_PHASE_KEY, POOL_CREATED_KEY};
use crate::domain::Decimal;
use crate::error::AppError;
use crate::orchestration::UnrecordedPayout;

#[derive(Debug, Deserialize, Serialize)]
pub struct ConfigEntry {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettleRedemptionsRequest {
    pub nav_price: Option<Decimal>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SettleRedemptionsResponse {
    pub nav_price: String,
    pub completed: Vec<String>,
    pub failed: Vec<String>,
    pub unrecorded: Vec<UnrecordedPayout>,
    pub usdc_paid: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IncompletePurchasesResponse {
    pub count: usize,
    pub purchases: Vec<PurchaseDto>,
}

fn allowed_values(key: &str) -> Option<&'static [&'static str]> {
    match key {
        IPO_PHASE_KEY => Some(&["active", "closed"][..]),
        POOL_CREATED_KEY => Some(&["true", "false"][..]),
        _ => None,
    }
}

pub async fn set_config(
    State(state): State<AppState>,
    Json(entry): Json<ConfigEntry>,
) -> Result<Json<ConfigEntry>, AppError> {
    let allowed = allowed_values(&entry.key)
        .ok_or_else(|| AppError::BadRequest(format!("Unknown config key: {}", entry.key)))?;
    let value = entry.value.trim().to_lowercase();
    if !allowed.contains(&value.as_str()) {
        return Err(AppError::BadRequest(format!(
            "{} must be one of: {}",
            entry.key,
            allowed.join(", ")
        )));
    }

    state.repo.set_config_value(&entry.key, &value).await?;
    info!(key = %entry.key, value = %value, "System config updated");
    Ok(Json(ConfigEntry {
        key: entry.key,
        value,
    }))
}

/// Purchases whose deposit was recorded but never reached `completed`:
/// stuck in `forwarded`, or `failed` and waiting on an operator.
pub async fn get_incomplete_purchases(
    State(state): State<AppState>,
) -> Result<Json<IncompletePurchasesResponse>, AppError> {
    let purchases: Vec<PurchaseDto> = state
        .repo
        .list_incomplete_purchases()
        .await?
        .into_iter()
        .map(PurchaseDto::from)
        .collect();
    Ok(Json(IncompletePurchasesResponse {
        count: purchases.len(),
        purchases,
    }))
}

pub async fn settle_redemptions(
    State(state): State<AppState>,
    Json(req): Json<SettleRedemptionsRequest>,
) -> Result<Json<SettleRedemptionsResponse>, AppError> {
    if let Some(nav) = req.nav_price {
        if !nav.is_positive() {
            return Err(AppError::BadRequest("navPrice must be positive".into()));
        }
    }

    let report = state.redemption_settler().settle_queue(req.nav_price).await?;
    info!(
        nav_price = %report.nav_price,
        completed = report.completed.len(),
        failed = report.failed.len(),
        unrecorded = report.unrecorded.len(),
        usdc_paid = %report.usdc_paid,
        "Redemption batch settled"
    );

    Ok(Json(SettleRedemptionsResponse {
        nav_price: report.nav_price.to_canonical_string(),
        completed: report.completed,
        failed: report.failed,
        unrecorded: report.unrecorded,
        usdc_paid: report.usdc_paid.to_canonical_string(),
    }))
}
