use axum::extract::{Path, State};
use axum::Json;
use serde::Serialize;
use std::str::FromStr;
use tracing::warn;

use crate::api::nav::current_nav;
use crate::api::AppState;
use crate::db::IPO_PHASE_KEY;
use crate::domain::{Address, Decimal, Investor, RedemptionStatus};
use crate::error::AppError;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsResponse {
    pub total_investors: i64,
    pub total_raised: String,
    pub total_tokens_issued: String,
    pub total_tokens_redeemed: String,
    pub pending_purchases: i64,
    pub queued_redemptions: i64,
    pub current_nav: String,
    pub ipo_phase: String,
    pub pool_created: bool,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BalanceSource {
    Ledger,
    Records,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedRedemptionDto {
    pub redemption_id: String,
    pub token_amount: String,
    pub requested_at: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardResponse {
    pub xrpl_address: String,
    pub email: String,
    pub kyc_approved: bool,
    pub trust_line_created: bool,
    pub token_balance: String,
    pub balance_source: BalanceSource,
    pub nav_per_token: String,
    pub estimated_value_usd: String,
    pub pending_redemptions: Vec<QueuedRedemptionDto>,
}

pub async fn get_stats(State(state): State<AppState>) -> Result<Json<StatsResponse>, AppError> {
    let stats = state.repo.fund_stats().await?;
    let nav = current_nav(&state).await?;
    let ipo_phase = state
        .repo
        .get_config_value(IPO_PHASE_KEY)
        .await?
        .unwrap_or_else(|| "active".to_string());
    let pool_created = state.repo.is_pool_created().await?;

    Ok(Json(StatsResponse {
        total_investors: stats.approved_investors,
        total_raised: stats.total_raised.to_canonical_string(),
        total_tokens_issued: stats.tokens_issued.to_canonical_string(),
        total_tokens_redeemed: stats.tokens_redeemed.to_canonical_string(),
        pending_purchases: stats.pending_purchases,
        queued_redemptions: stats.queued_redemptions,
        current_nav: nav.to_canonical_string(),
        ipo_phase,
        pool_created,
    }))
}

/// Token balance from the ledger trust line. When the ledger shows nothing
/// (or cannot be reached) the balance is rebuilt from settled purchases less
/// completed redemptions.
pub(crate) async fn token_balance(
    state: &AppState,
    investor: &Investor,
) -> Result<(Decimal, BalanceSource), AppError> {
    match state
        .ledger
        .trust_line(&investor.xrpl_address, &state.config.token_asset())
        .await
    {
        Ok(Some(line)) if line.balance.is_positive() => {
            return Ok((line.balance, BalanceSource::Ledger))
        }
        Ok(_) => {}
        Err(e) => warn!(
            address = %investor.xrpl_address,
            error = %e,
            "Ledger balance unavailable, using recorded balance"
        ),
    }

    let issued = state.repo.sum_tokens_issued_to(&investor.id).await?;
    let (redeemed, _) = state.repo.redeemed_and_queued_tokens(&investor.id).await?;
    Ok((issued - redeemed, BalanceSource::Records))
}

pub async fn get_dashboard(
    Path(address): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<DashboardResponse>, AppError> {
    let address = Address::from_str(&address)
        .map_err(|e| AppError::BadRequest(format!("Invalid XRPL address: {}", e)))?;
    let investor = state
        .repo
        .get_investor_by_address(&address)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("No investor for {}", address)))?;

    let (balance, balance_source) = token_balance(&state, &investor).await?;
    let nav = current_nav(&state).await?;
    let pending_redemptions = state
        .repo
        .list_redemptions_by_investor(&investor.id)
        .await?
        .into_iter()
        .filter(|r| r.status == RedemptionStatus::Queued)
        .map(|r| QueuedRedemptionDto {
            redemption_id: r.id,
            token_amount: r.token_amount.to_canonical_string(),
            requested_at: r.requested_at.as_ms(),
        })
        .collect();

    Ok(Json(DashboardResponse {
        xrpl_address: investor.xrpl_address.0.clone(),
        email: investor.email.clone(),
        kyc_approved: investor.kyc_approved,
        trust_line_created: investor.trust_line_created,
        token_balance: balance.to_canonical_string(),
        balance_source,
        nav_per_token: nav.to_canonical_string(),
        estimated_value_usd: (balance * nav).round_significant(15).to_canonical_string(),
        pending_redemptions,
    }))
}
