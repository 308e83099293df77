use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::info;

use crate::api::AppState;
use crate::db::is_unique_violation;
use crate::domain::{Address, Investor};
use crate::error::AppError;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnboardRequest {
    pub email: String,
    pub xrpl_address: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvestorIdRequest {
    pub investor_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvestorDto {
    pub id: String,
    pub email: String,
    pub xrpl_address: String,
    pub kyc_approved: bool,
    pub trust_line_created: bool,
    pub created_at: i64,
}

impl From<Investor> for InvestorDto {
    fn from(investor: Investor) -> Self {
        Self {
            id: investor.id,
            email: investor.email,
            xrpl_address: investor.xrpl_address.0,
            kyc_approved: investor.kyc_approved,
            trust_line_created: investor.trust_line_created,
            created_at: investor.created_at.as_ms(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrustLineConfirmResponse {
    pub investor: InvestorDto,
    /// Authorization transaction, absent when the line was already authorized.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authorization_tx_id: Option<String>,
}

/// Minimal shape check: one `@`, a non-empty local part, a dotted domain.
fn is_valid_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !email.chars().any(char::is_whitespace)
}

pub(crate) async fn load_investor(state: &AppState, id: &str) -> Result<Investor, AppError> {
    state
        .repo
        .get_investor(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Investor {} not found", id)))
}

pub async fn onboard(
    State(state): State<AppState>,
    Json(req): Json<OnboardRequest>,
) -> Result<Json<InvestorDto>, AppError> {
    let address = Address::from_str(&req.xrpl_address)
        .map_err(|e| AppError::BadRequest(format!("Invalid XRPL address: {}", e)))?;
    let email = req.email.trim().to_lowercase();
    if !is_valid_email(&email) {
        return Err(AppError::BadRequest("Invalid email address".into()));
    }

    let investor = match state.repo.create_investor(&email, &address).await {
        Ok(investor) => investor,
        Err(e) if is_unique_violation(&e) => {
            return Err(AppError::BadRequest(
                "Email or XRPL address already registered".into(),
            ))
        }
        Err(e) => return Err(e.into()),
    };

    info!(investor_id = %investor.id, address = %investor.xrpl_address, "Investor onboarded");
    Ok(Json(investor.into()))
}

pub async fn approve_kyc(
    State(state): State<AppState>,
    Json(req): Json<InvestorIdRequest>,
) -> Result<Json<InvestorDto>, AppError> {
    load_investor(&state, &req.investor_id).await?;
    state.repo.approve_kyc(&req.investor_id).await?;
    info!(investor_id = %req.investor_id, "KYC approved");
    Ok(Json(load_investor(&state, &req.investor_id).await?.into()))
}

pub async fn confirm_trust_line(
    State(state): State<AppState>,
    Json(req): Json<InvestorIdRequest>,
) -> Result<Json<TrustLineConfirmResponse>, AppError> {
    let investor = load_investor(&state, &req.investor_id).await?;
    if !investor.kyc_approved {
        return Err(AppError::Forbidden("KYC approval required".into()));
    }

    let token = state.config.token_asset();
    let line = state
        .ledger
        .trust_line(&investor.xrpl_address, &token)
        .await?
        .ok_or_else(|| {
            AppError::BadRequest(format!(
                "No {} trust line from {} found on the ledger",
                token.currency, investor.xrpl_address
            ))
        })?;

    let authorization_tx_id = if line.authorized {
        None
    } else {
        let result = state
            .ledger
            .authorize_trust_line(&investor.xrpl_address, &token)
            .await?;
        if !result.is_success() {
            return Err(AppError::Ledger(format!(
                "Trust line authorization rejected: {}",
                result.result_code
            )));
        }
        Some(result.tx_id)
    };

    state.repo.mark_trust_line_created(&investor.id).await?;
    info!(
        investor_id = %investor.id,
        tx_id = authorization_tx_id.as_deref().unwrap_or(""),
        "Trust line authorized"
    );

    Ok(Json(TrustLineConfirmResponse {
        investor: load_investor(&state, &investor.id).await?.into(),
        authorization_tx_id,
    }))
}

pub async fn get_investor(
    Path(address): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<InvestorDto>, AppError> {
    let address = Address::from_str(&address)
        .map_err(|e| AppError::BadRequest(format!("Invalid XRPL address: {}", e)))?;
    let investor = state
        .repo
        .get_investor_by_address(&address)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("No investor for {}", address)))?;
    Ok(Json(investor.into()))
}
