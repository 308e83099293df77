use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::api::investors::load_investor;
use crate::api::stats::token_balance;
use crate::api::AppState;
use crate::domain::{Decimal, Redemption};
use crate::error::AppError;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedeemRequest {
    pub investor_id: String,
    pub token_amount: Decimal,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RedemptionDto {
    pub id: String,
    pub investor_id: String,
    pub token_amount: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nav_price: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usdc_amount: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redemption_tx_id: Option<String>,
    pub requested_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settled_at: Option<i64>,
}

impl From<Redemption> for RedemptionDto {
    fn from(r: Redemption) -> Self {
        Self {
            id: r.id,
            investor_id: r.investor_id,
            token_amount: r.token_amount.to_canonical_string(),
            status: r.status.as_str().to_string(),
            nav_price: r.nav_price.map(|d| d.to_canonical_string()),
            usdc_amount: r.usdc_amount.map(|d| d.to_canonical_string()),
            redemption_tx_id: r.redemption_tx_id,
            requested_at: r.requested_at.as_ms(),
            settled_at: r.settled_at.map(|t| t.as_ms()),
        }
    }
}

/// Queue a redemption for end-of-day settlement. The amount may not exceed the
/// investor's balance less what is already queued.
pub async fn request_redemption(
    State(state): State<AppState>,
    Json(req): Json<RedeemRequest>,
) -> Result<Json<RedemptionDto>, AppError> {
    if !req.token_amount.is_positive() {
        return Err(AppError::BadRequest("tokenAmount must be positive".into()));
    }
    let investor = load_investor(&state, &req.investor_id).await?;

    let (balance, _) = token_balance(&state, &investor).await?;
    let (_, queued) = state.repo.redeemed_and_queued_tokens(&investor.id).await?;
    let available = balance - queued;
    if req.token_amount > available {
        return Err(AppError::BadRequest(format!(
            "Insufficient token balance: {} available for redemption",
            available.max(Decimal::zero())
        )));
    }

    let redemption = state
        .repo
        .create_redemption(&investor.id, req.token_amount)
        .await?;
    info!(
        redemption_id = %redemption.id,
        investor_id = %investor.id,
        tokens = %redemption.token_amount,
        "Redemption queued"
    );
    Ok(Json(redemption.into()))
}

pub async fn get_redemption_status(
    Path(redemption_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<RedemptionDto>, AppError> {
    let redemption = state
        .repo
        .get_redemption(&redemption_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Redemption {} not found", redemption_id)))?;
    Ok(Json(redemption.into()))
}
