//! Deposit reconciliation: matching observed payments to pending purchases,
//! settling them, replaying missed history and supervising the live stream.
//!
//! Components are plain structs wired with `Arc`s; nothing here is global.

use crate::config::Config;
use crate::domain::{Address, DestinationTag, IssuedAsset};
use crate::engine::AmountTolerance;
use crate::ledger::LedgerError;
use std::time::Duration;
use thiserror::Error;

pub mod catchup;
pub mod matcher;
pub mod monitor;
pub mod redemptions;
pub mod settlement;
pub mod subscriber;

pub use catchup::{CatchUpReport, CatchUpScanner};
pub use matcher::{DepositMatcher, MatchOutcome, UnattributableReason};
pub use monitor::Monitor;
pub use redemptions::{RedemptionBatchReport, RedemptionSettler, UnrecordedPayout};
pub use settlement::{SettlementDriver, SettlementFailure, SettlementOutcome};
pub use subscriber::{LiveSubscriber, SessionEnd};

/// Settings shared by the reconciliation components.
#[derive(Debug, Clone)]
pub struct ReconcileSettings {
    /// Account investors pay into.
    pub deposit_address: Address,
    /// The fund token issued on settlement.
    pub token: IssuedAsset,
    /// Expected USDC issuer; deposits from other issuers are flagged, not rejected.
    pub usdc_issuer: Option<Address>,
    /// Forward destination. `None` skips the forward step.
    pub custody_address: Option<Address>,
    pub custody_destination_tag: Option<DestinationTag>,
    pub catchup_history_limit: u32,
    pub reconnect_delay: Duration,
    pub tolerance: AmountTolerance,
}

impl ReconcileSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            deposit_address: config.deposit_wallet_address.clone(),
            token: config.token_asset(),
            usdc_issuer: config.usdc_issuer.clone(),
            custody_address: config.custody_address.clone(),
            custody_destination_tag: config.custody_destination_tag,
            catchup_history_limit: config.catchup_history_limit,
            reconnect_delay: config.reconnect_delay,
            tolerance: AmountTolerance::default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum OrchestrationError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Db(#[from] sqlx::Error),
    #[error("Not configured: {0}")]
    NotConfigured(&'static str),
}
