//! Purchase record and its settlement state machine.

use crate::domain::{Decimal, DestinationTag, TimeMs};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Purchase lifecycle.
///
/// `Pending -> Forwarded -> Completed | Failed`. Nothing moves back to `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PurchaseStatus {
    /// Waiting for the investor's deposit.
    Pending,
    /// Deposit matched and recorded; settlement in progress.
    Forwarded,
    Completed,
    /// Needs operator remediation.
    Failed,
}

impl PurchaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PurchaseStatus::Pending => "pending",
            PurchaseStatus::Forwarded => "forwarded",
            PurchaseStatus::Completed => "completed",
            PurchaseStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PurchaseStatus::Completed | PurchaseStatus::Failed)
    }
}

impl FromStr for PurchaseStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PurchaseStatus::Pending),
            "forwarded" => Ok(PurchaseStatus::Forwarded),
            "completed" => Ok(PurchaseStatus::Completed),
            "failed" => Ok(PurchaseStatus::Failed),
            other => Err(format!("unknown purchase status: {}", other)),
        }
    }
}

impl std::fmt::Display for PurchaseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One investor's intent to buy fund tokens with USDC.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Purchase {
    pub id: String,
    pub investor_id: String,
    /// Requested USDC amount.
    pub usdc_amount: Decimal,
    pub destination_tag: DestinationTag,
    pub status: PurchaseStatus,
    pub deposit_tx_id: Option<String>,
    pub forward_tx_id: Option<String>,
    pub issue_tx_id: Option<String>,
    /// Tokens delivered; set together with `issue_tx_id`.
    pub token_amount: Option<Decimal>,
    pub created_at: TimeMs,
    pub completed_at: Option<TimeMs>,
}
