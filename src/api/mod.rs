pub mod admin;
pub mod health;
pub mod investors;
pub mod nav;
pub mod pool;
pub mod purchases;
pub mod redemptions;
pub mod stats;

use crate::config::Config;
use crate::db::Repository;
use crate::ledger::LedgerGateway;
use crate::orchestration::RedemptionSettler;
use axum::{
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<Repository>,
    pub ledger: Arc<dyn LedgerGateway>,
    pub config: Config,
}

impl AppState {
    pub fn new(repo: Arc<Repository>, ledger: Arc<dyn LedgerGateway>, config: Config) -> Self {
        Self {
            repo,
            ledger,
            config,
        }
    }

    pub(crate) fn redemption_settler(&self) -> RedemptionSettler {
        RedemptionSettler::new(
            self.repo.clone(),
            self.ledger.clone(),
            self.config.usdc_asset(),
        )
    }
}

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health::health))
        .route("/ready", get(health::ready))
        .route("/api/health", get(health::api_health))
        .route("/api/onboard", post(investors::onboard))
        .route("/api/kyc/approve", post(investors::approve_kyc))
        .route("/api/trustline/confirm", post(investors::confirm_trust_line))
        .route("/api/investor/:address", get(investors::get_investor))
        .route("/api/buy/initiate", post(purchases::initiate_purchase))
        .route("/api/buy/status/:purchase_id", get(purchases::get_purchase_status))
        .route("/api/pool/info", get(pool::get_pool_info))
        .route("/api/pool/quote", get(pool::get_quote))
        .route("/api/nav", get(nav::get_nav))
        .route("/api/stats", get(stats::get_stats))
        .route("/api/dashboard/:address", get(stats::get_dashboard))
        .route("/api/redeem", post(redemptions::request_redemption))
        .route("/api/redeem/status/:redemption_id", get(redemptions::get_redemption_status))
        .route("/api/admin/nav", post(nav::record_nav))
        .route("/api/admin/config", put(admin::set_config))
        .route(
            "/api/admin/purchases/incomplete",
            get(admin::get_incomplete_purchases),
        )
        .route(
            "/api/admin/redemptions/settle",
            post(admin::settle_redemptions),
        )
        .layer(cors)
        .with_state(state)
}
