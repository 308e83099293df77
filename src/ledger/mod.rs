//! Ledger gateway abstraction: account history, payments, trust lines, AMM pools
//! and the payment subscription stream.

use crate::config::Secret;
use crate::domain::{
    Address, Decimal, DestinationTag, IssuedAsset, LedgerAmount, ObservedPayment, TX_SUCCESS,
};
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::fmt;
use thiserror::Error;

pub mod mock;
pub mod xrpl;

pub use mock::MockLedger;
pub use xrpl::XrplGateway;

/// Stream of validated transactions touching an account, in ledger order.
pub type TransactionStream = BoxStream<'static, Result<LedgerTransaction, LedgerError>>;

/// Ledger gateway used by the reconciliation core and the API.
///
/// Implementations own the signing keys for the fund's wallets; callers only name
/// the [`WalletRole`] a payment is sent from.
#[async_trait]
pub trait LedgerGateway: Send + Sync + fmt::Debug {
    /// Most recent transactions of `address`, newest first, at most `limit`.
    async fn account_payment_history(
        &self,
        address: &Address,
        limit: u32,
    ) -> Result<Vec<LedgerTransaction>, LedgerError>;

    /// Sign, submit and wait for the payment to reach a validated ledger.
    async fn submit_payment(&self, request: &PaymentRequest) -> Result<SubmitResult, LedgerError>;

    /// The trust line `holder` has to `asset`'s issuer, if any.
    async fn trust_line(
        &self,
        holder: &Address,
        asset: &IssuedAsset,
    ) -> Result<Option<TrustLine>, LedgerError>;

    /// True if `holder` has a trust line for `asset` that the issuer has authorized.
    async fn has_authorized_trust_line(
        &self,
        holder: &Address,
        asset: &IssuedAsset,
    ) -> Result<bool, LedgerError> {
        Ok(self
            .trust_line(holder, asset)
            .await?
            .map(|line| line.authorized)
            .unwrap_or(false))
    }

    /// Issuer-side authorization of `holder`'s trust line.
    async fn authorize_trust_line(
        &self,
        holder: &Address,
        asset: &IssuedAsset,
    ) -> Result<SubmitResult, LedgerError>;

    /// AMM pool pairing `asset` with the native currency.
    async fn amm_pool(&self, asset: &IssuedAsset) -> Result<Option<AmmPool>, LedgerError>;

    /// Start streaming new validated transactions of `address`.
    async fn subscribe_payments(&self, address: &Address) -> Result<TransactionStream, LedgerError>;
}

/// Which of the fund's wallets signs a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WalletRole {
    /// Cold wallet; issues the fund token and authorizes trust lines.
    Issuer,
    /// Hot wallet; holds the token float and pays investors.
    Operational,
    /// Collects investor deposits.
    Deposit,
}

impl fmt::Display for WalletRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WalletRole::Issuer => write!(f, "issuer"),
            WalletRole::Operational => write!(f, "operational"),
            WalletRole::Deposit => write!(f, "deposit"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WalletKeys {
    pub address: Address,
    pub seed: Secret,
}

#[derive(Debug, Clone)]
pub struct LedgerWallets {
    pub issuer: WalletKeys,
    pub operational: WalletKeys,
    pub deposit: WalletKeys,
}

impl LedgerWallets {
    pub fn get(&self, role: WalletRole) -> &WalletKeys {
        match role {
            WalletRole::Issuer => &self.issuer,
            WalletRole::Operational => &self.operational,
            WalletRole::Deposit => &self.deposit,
        }
    }
}

/// Outbound payment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentRequest {
    pub from: WalletRole,
    pub destination: Address,
    pub amount: LedgerAmount,
    pub destination_tag: Option<DestinationTag>,
}

/// Final outcome of a submitted transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitResult {
    pub result_code: String,
    pub tx_id: String,
}

impl SubmitResult {
    pub fn is_success(&self) -> bool {
        self.result_code == TX_SUCCESS
    }
}

/// A transaction as returned by account history or the subscription stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerTransaction {
    pub tx_id: String,
    pub tx_type: String,
    pub source: Address,
    pub destination: Option<Address>,
    /// Delivered amount when the ledger reports it, else the requested amount.
    pub amount: Option<LedgerAmount>,
    pub destination_tag: Option<DestinationTag>,
    pub validated: bool,
    pub result_code: String,
}

impl LedgerTransaction {
    pub fn is_payment(&self) -> bool {
        self.tx_type == "Payment"
    }

    /// View a payment transaction as an observed payment. `None` for other types.
    pub fn to_observed_payment(&self) -> Option<ObservedPayment> {
        if !self.is_payment() {
            return None;
        }
        Some(ObservedPayment {
            tx_id: self.tx_id.clone(),
            source: self.source.clone(),
            destination: self.destination.clone()?,
            amount: self.amount.clone()?,
            destination_tag: self.destination_tag,
            validated: self.validated,
            result_code: self.result_code.clone(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustLine {
    pub issuer: Address,
    pub currency: String,
    pub balance: Decimal,
    /// Issuer has authorized the line.
    pub authorized: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AmmPool {
    pub account: Address,
    pub token_reserve: Decimal,
    /// Native-currency side, in display units.
    pub native_reserve: Decimal,
    /// Fee in units of 1/100,000 (500 = 0.5%).
    pub trading_fee: u32,
}

impl AmmPool {
    pub fn fee_percent(&self) -> Decimal {
        Decimal::from_parts(self.trading_fee as i64, 3)
    }
}

#[derive(Debug, Clone, Error)]
pub enum LedgerError {
    #[error("Network error: {0}")]
    Network(String),
    #[error("HTTP error {status}: {message}")]
    Http { status: u16, message: String },
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("RPC error {error}: {message}")]
    Rpc { error: String, message: String },
    #[error("Rate limited")]
    RateLimited,
    /// Submitted, but not seen in a validated ledger before the wait ended.
    #[error("Transaction {tx_id} not validated within the confirmation window")]
    ConfirmationTimeout { tx_id: String },
    /// The node may have applied the transaction but its answer was lost.
    #[error("Submission outcome unknown: {0}")]
    SubmissionUnknown(String),
    #[error("Subscription closed: {0}")]
    Subscription(String),
}

impl LedgerError {
    /// Worth retrying for a read-only request.
    pub fn is_transient(&self) -> bool {
        match self {
            LedgerError::Network(_) | LedgerError::RateLimited => true,
            LedgerError::Http { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payment_tx(tx_type: &str) -> LedgerTransaction {
        LedgerTransaction {
            tx_id: "TX1".to_string(),
            tx_type: tx_type.to_string(),
            source: Address::new("rSender".to_string()),
            destination: Some(Address::new("rDeposit".to_string())),
            amount: Some(LedgerAmount::Native { drops: 5_000_000 }),
            destination_tag: Some(DestinationTag::new(99)),
            validated: true,
            result_code: TX_SUCCESS.to_string(),
        }
    }

    #[test]
    fn test_to_observed_payment_only_for_payments() {
        let observed = payment_tx("Payment").to_observed_payment().unwrap();
        assert_eq!(observed.tx_id, "TX1");
        assert_eq!(observed.destination_tag, Some(DestinationTag::new(99)));
        assert!(observed.is_final_success());

        assert!(payment_tx("TrustSet").to_observed_payment().is_none());
    }

    #[test]
    fn test_amm_fee_percent() {
        let pool = AmmPool {
            account: Address::new("rPool".to_string()),
            token_reserve: Decimal::from(1000u64),
            native_reserve: Decimal::from(1000u64),
            trading_fee: 500,
        };
        assert_eq!(pool.fee_percent().to_string(), "0.5");
    }

    #[test]
    fn test_ledger_error_display() {
        let err = LedgerError::Http {
            status: 503,
            message: "Server error".to_string(),
        };
        assert_eq!(err.to_string(), "HTTP error 503: Server error");
        assert_eq!(LedgerError::RateLimited.to_string(), "Rate limited");
    }

    #[test]
    fn test_transient_classification() {
        assert!(LedgerError::Network("reset".to_string()).is_transient());
        assert!(LedgerError::RateLimited.is_transient());
        assert!(LedgerError::Http { status: 503, message: String::new() }.is_transient());
        assert!(!LedgerError::Http { status: 400, message: String::new() }.is_transient());
        assert!(!LedgerError::SubmissionUnknown("lost".to_string()).is_transient());
        assert!(!LedgerError::ConfirmationTimeout { tx_id: "H".to_string() }.is_transient());
    }
}
