use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::api::investors::load_investor;
use crate::api::AppState;
use crate::domain::{Decimal, Purchase};
use crate::error::AppError;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitiatePurchaseRequest {
    pub investor_id: String,
    pub usdc_amount: Decimal,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DepositInstructions {
    pub purchase_id: String,
    pub deposit_address: String,
    pub destination_tag: u32,
    pub usdc_amount: String,
    pub usdc_currency: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usdc_issuer: Option<String>,
    pub expected_tokens: String,
    pub token_currency: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseDto {
    pub id: String,
    pub investor_id: String,
    pub usdc_amount: String,
    pub destination_tag: u32,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deposit_tx_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub forward_tx_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issue_tx_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_amount: Option<String>,
    pub created_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<i64>,
}

impl From<Purchase> for PurchaseDto {
    fn from(p: Purchase) -> Self {
        Self {
            id: p.id,
            investor_id: p.investor_id,
            usdc_amount: p.usdc_amount.to_canonical_string(),
            destination_tag: p.destination_tag.value(),
            status: p.status.to_string(),
            deposit_tx_id: p.deposit_tx_id,
            forward_tx_id: p.forward_tx_id,
            issue_tx_id: p.issue_tx_id,
            token_amount: p.token_amount.map(|t| t.to_canonical_string()),
            created_at: p.created_at.as_ms(),
            completed_at: p.completed_at.map(|t| t.as_ms()),
        }
    }
}

pub async fn initiate_purchase(
    State(state): State<AppState>,
    Json(req): Json<InitiatePurchaseRequest>,
) -> Result<Json<DepositInstructions>, AppError> {
    if !req.usdc_amount.is_positive() {
        return Err(AppError::BadRequest("usdcAmount must be positive".into()));
    }
    if !state.repo.is_ipo_active().await? {
        return Err(AppError::Forbidden("The primary offering is closed".into()));
    }

    let investor = load_investor(&state, &req.investor_id).await?;
    if !investor.kyc_approved {
        return Err(AppError::Forbidden("KYC approval required".into()));
    }
    if !investor.trust_line_created {
        return Err(AppError::BadRequest(
            "Token trust line must be confirmed before buying".into(),
        ));
    }

    let purchase = state
        .repo
        .create_purchase(&investor.id, req.usdc_amount)
        .await?;
    info!(
        purchase_id = %purchase.id,
        investor_id = %investor.id,
        destination_tag = %purchase.destination_tag,
        usdc = %purchase.usdc_amount,
        "Purchase initiated"
    );

    // 1:1 during the primary offering.
    let expected_tokens = purchase.usdc_amount;
    Ok(Json(DepositInstructions {
        purchase_id: purchase.id,
        deposit_address: state.config.deposit_wallet_address.0.clone(),
        destination_tag: purchase.destination_tag.value(),
        usdc_amount: purchase.usdc_amount.to_canonical_string(),
        usdc_currency: state.config.usdc_currency.clone(),
        usdc_issuer: state.config.usdc_issuer.as_ref().map(|a| a.0.clone()),
        expected_tokens: expected_tokens.to_canonical_string(),
        token_currency: state.config.token_currency.clone(),
    }))
}

pub async fn get_purchase_status(
    Path(purchase_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<PurchaseDto>, AppError> {
    let purchase = state
        .repo
        .get_purchase(&purchase_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Purchase {} not found", purchase_id)))?;
    Ok(Json(purchase.into()))
}
