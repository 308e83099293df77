//! Redemption requests, settled at end-of-day NAV.

use crate::domain::{Decimal, TimeMs};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RedemptionStatus {
    Queued,
    Completed,
    Failed,
}

impl RedemptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RedemptionStatus::Queued => "queued",
            RedemptionStatus::Completed => "completed",
            RedemptionStatus::Failed => "failed",
        }
    }
}

impl FromStr for RedemptionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(RedemptionStatus::Queued),
            "completed" => Ok(RedemptionStatus::Completed),
            "failed" => Ok(RedemptionStatus::Failed),
            other => Err(format!("unknown redemption status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Redemption {
    pub id: String,
    pub investor_id: String,
    pub token_amount: Decimal,
    pub status: RedemptionStatus,
    pub nav_price: Option<Decimal>,
    pub usdc_amount: Option<Decimal>,
    pub redemption_tx_id: Option<String>,
    pub requested_at: TimeMs,
    pub settled_at: Option<TimeMs>,
}
