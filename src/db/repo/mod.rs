//! Repository layer for database operations.
//!
//! This module provides the `Repository` struct for all database operations.
//! Methods are organized across submodules by record:
//! - `purchases.rs` - Purchase lifecycle, including the atomic deposit claim
//! - `investors.rs` - Investor onboarding
//! - `redemptions.rs` - Redemption queue
//! - `nav.rs` - NAV history
//! - `system_config.rs` - Key/value operational flags

mod investors;
mod nav;
mod purchases;
mod redemptions;
mod system_config;

pub use redemptions::QueuedRedemption;
pub use system_config::{IPO_PHASE_KEY, POOL_CREATED_KEY};

use crate::domain::Decimal;
use serde::Serialize;
use sqlx::sqlite::SqlitePool;
use sqlx::Row;
use tracing::warn;

/// Fund-wide figures for the stats endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FundStats {
    pub approved_investors: i64,
    /// USDC requested by completed purchases.
    pub total_raised: Decimal,
    pub tokens_issued: Decimal,
    pub tokens_redeemed: Decimal,
    pub pending_purchases: i64,
    pub queued_redemptions: i64,
}

/// Repository for database operations.
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    /// Create a new repository with the given connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Repository { pool }
    }

    /// Aggregate figures across purchases, redemptions and investors.
    ///
    /// Amounts are summed in Rust; SQLite's SUM would go through REAL.
    pub async fn fund_stats(&self) -> Result<FundStats, sqlx::Error> {
        let approved_investors: i64 =
            sqlx::query("SELECT COUNT(*) AS n FROM investors WHERE kyc_approved = 1")
                .fetch_one(&self.pool)
                .await?
                .get("n");

        let pending_purchases: i64 =
            sqlx::query("SELECT COUNT(*) AS n FROM purchases WHERE status = 'pending'")
                .fetch_one(&self.pool)
                .await?
                .get("n");

        let queued_redemptions: i64 =
            sqlx::query("SELECT COUNT(*) AS n FROM redemptions WHERE status = 'queued'")
                .fetch_one(&self.pool)
                .await?
                .get("n");

        let completed = sqlx::query(
            "SELECT id, usdc_amount, token_amount FROM purchases WHERE status = 'completed'",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut total_raised = Decimal::zero();
        let mut tokens_issued = Decimal::zero();
        for row in completed {
            let id: String = row.get("id");
            let usdc: String = row.get("usdc_amount");
            total_raised = total_raised + parse_decimal("usdc_amount", &id, &usdc);
            if let Some(tokens) = row.get::<Option<String>, _>("token_amount") {
                tokens_issued = tokens_issued + parse_decimal("token_amount", &id, &tokens);
            }
        }

        let redeemed =
            sqlx::query("SELECT id, token_amount FROM redemptions WHERE status = 'completed'")
                .fetch_all(&self.pool)
                .await?;
        let tokens_redeemed = redeemed
            .iter()
            .map(|row| {
                let id: String = row.get("id");
                let tokens: String = row.get("token_amount");
                parse_decimal("token_amount", &id, &tokens)
            })
            .sum();

        Ok(FundStats {
            approved_investors,
            total_raised,
            tokens_issued,
            tokens_redeemed,
            pending_purchases,
            queued_redemptions,
        })
    }
}

/// Parse a stored decimal, logging and falling back to zero on corruption.
fn parse_decimal(field: &'static str, record_id: &str, raw: &str) -> Decimal {
    Decimal::from_str_canonical(raw).unwrap_or_else(|e| {
        warn!(
            record_id = %record_id,
            field,
            value = %raw,
            error = %e,
            "Failed to parse stored decimal, using default"
        );
        Decimal::default()
    })
}

fn parse_optional_decimal(field: &'static str, record_id: &str, raw: Option<String>) -> Option<Decimal> {
    raw.map(|s| parse_decimal(field, record_id, &s))
}

/// True for a UNIQUE constraint violation.
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.is_unique_violation())
}
