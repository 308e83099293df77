//! Investor onboarding record.

use crate::domain::{Address, TimeMs};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Investor {
    pub id: String,
    pub email: String,
    pub xrpl_address: Address,
    pub kyc_approved: bool,
    /// Trust line exists on the ledger and has been authorized by the issuer.
    pub trust_line_created: bool,
    pub created_at: TimeMs,
    pub updated_at: TimeMs,
}

impl Investor {
    /// KYC approved and able to receive the fund token.
    pub fn is_ready(&self) -> bool {
        self.kyc_approved && self.trust_line_created
    }
}
