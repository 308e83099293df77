//! Net asset value snapshots.

use crate::domain::{Decimal, TimeMs};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NavRecord {
    pub id: i64,
    pub nav_per_token: Decimal,
    pub total_fund_value: Decimal,
    pub total_tokens_outstanding: Decimal,
    pub custody_balance: Option<Decimal>,
    pub pool_usdc_reserve: Option<Decimal>,
    pub pool_token_reserve: Option<Decimal>,
    pub calculated_at: TimeMs,
}

impl NavRecord {
    /// NAV per token before the first calculation is recorded.
    pub fn initial_nav() -> Decimal {
        Decimal::one()
    }
}
