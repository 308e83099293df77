use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::api::AppState;
use crate::domain::Decimal;
use crate::engine::{quote_swap, spot_price, SwapDirection};
use crate::error::AppError;
use crate::ledger::AmmPool;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolInfoResponse {
    pub created: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pool: Option<PoolDto>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolDto {
    pub account: String,
    pub token_reserve: String,
    pub xrp_reserve: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price_xrp_per_token: Option<String>,
    pub trading_fee_percent: String,
}

impl From<&AmmPool> for PoolDto {
    fn from(pool: &AmmPool) -> Self {
        Self {
            account: pool.account.0.clone(),
            token_reserve: pool.token_reserve.to_canonical_string(),
            xrp_reserve: pool.native_reserve.to_canonical_string(),
            price_xrp_per_token: spot_price(pool).map(|p| p.to_canonical_string()),
            trading_fee_percent: pool.fee_percent().to_canonical_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct QuoteQuery {
    pub direction: SwapDirection,
    pub amount: Decimal,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteResponse {
    pub direction: SwapDirection,
    pub amount_in: String,
    pub estimated_out: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub effective_price: Option<String>,
    pub fee_percent: String,
}

async fn live_pool(state: &AppState) -> Result<Option<AmmPool>, AppError> {
    if !state.repo.is_pool_created().await? {
        return Ok(None);
    }
    Ok(state.ledger.amm_pool(&state.config.token_asset()).await?)
}

pub async fn get_pool_info(
    State(state): State<AppState>,
) -> Result<Json<PoolInfoResponse>, AppError> {
    let response = match live_pool(&state).await? {
        Some(pool) => PoolInfoResponse {
            created: true,
            message: None,
            pool: Some(PoolDto::from(&pool)),
        },
        None => PoolInfoResponse {
            created: false,
            message: Some("AMM pool not created yet".to_string()),
            pool: None,
        },
    };
    Ok(Json(response))
}

pub async fn get_quote(
    Query(params): Query<QuoteQuery>,
    State(state): State<AppState>,
) -> Result<Json<QuoteResponse>, AppError> {
    if !params.amount.is_positive() {
        return Err(AppError::BadRequest("amount must be positive".into()));
    }
    let pool = live_pool(&state)
        .await?
        .ok_or_else(|| AppError::NotFound("AMM pool not created yet".into()))?;

    let quote = quote_swap(&pool, params.direction, params.amount)
        .ok_or_else(|| AppError::BadRequest("Pool cannot quote this swap".into()))?;

    Ok(Json(QuoteResponse {
        direction: quote.direction,
        amount_in: quote.amount_in.to_canonical_string(),
        estimated_out: quote.estimated_out.to_canonical_string(),
        effective_price: quote.effective_price.map(|p| p.to_canonical_string()),
        fee_percent: quote.fee_percent.to_canonical_string(),
    }))
}
