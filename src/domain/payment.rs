//! Observed incoming payment, as seen on the ledger.

use crate::domain::{Address, DestinationTag, LedgerAmount};
use serde::{Deserialize, Serialize};

/// Engine result code of a successfully applied transaction.
pub const TX_SUCCESS: &str = "tesSUCCESS";

/// A payment observed on the ledger, either from the live stream or from history replay.
///
/// Never persisted; the deposit matcher consumes it and records `tx_id` on the
/// purchase it settles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservedPayment {
    pub tx_id: String,
    pub source: Address,
    pub destination: Address,
    pub amount: LedgerAmount,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination_tag: Option<DestinationTag>,
    /// True once the transaction is in a validated (final) ledger.
    pub validated: bool,
    pub result_code: String,
}

impl ObservedPayment {
    pub fn is_success(&self) -> bool {
        self.result_code == TX_SUCCESS
    }

    /// Validated and applied successfully.
    pub fn is_final_success(&self) -> bool {
        self.validated && self.is_success()
    }
}
