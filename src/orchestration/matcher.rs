//! Deposit matcher: attributes an observed payment to the pending purchase
//! carrying its destination tag and hands it to settlement.
//!
//! Exactly-once rests on the store, not on the in-memory set: the claim is a
//! conditional update that only one writer can win, and a deposit tx id can be
//! recorded on one purchase only. The processed set just short-circuits
//! re-deliveries within one process lifetime.

use super::settlement::{SettlementDriver, SettlementOutcome};
use super::ReconcileSettings;
use crate::db::Repository;
use crate::domain::{Decimal, DestinationTag, LedgerAmount, ObservedPayment};
use crate::engine::AmountCheck;
use crate::ledger::LedgerGateway;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchOutcome {
    /// Payment was not sent to the deposit address.
    NotForDepositAddress,
    /// Payment is not validated or did not succeed.
    NotFinal,
    /// Needs manual intervention: the payment cannot be tied to a purchase.
    Unattributable(UnattributableReason),
    /// Already settled, by this process or recorded in the store.
    AlreadyProcessed,
    /// Another writer recorded a deposit for the purchase first.
    ClaimLost { purchase_id: String },
    InvestorMissing { purchase_id: String },
    /// Store unavailable; nothing was changed and the payment may be retried.
    StoreError(String),
    Settled {
        purchase_id: String,
        amount_check: AmountCheck,
        settlement: SettlementOutcome,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnattributableReason {
    MissingDestinationTag,
    NoPendingPurchase(DestinationTag),
}

pub struct DepositMatcher {
    repo: Arc<Repository>,
    settlement: SettlementDriver,
    settings: ReconcileSettings,
    processed: Mutex<HashSet<String>>,
}

impl DepositMatcher {
    pub fn new(
        repo: Arc<Repository>,
        ledger: Arc<dyn LedgerGateway>,
        settings: ReconcileSettings,
    ) -> Self {
        Self {
            settlement: SettlementDriver::new(repo.clone(), ledger, settings.clone()),
            repo,
            settings,
            processed: Mutex::new(HashSet::new()),
        }
    }

    /// Process one observed payment. Never fails; every branch is logged and
    /// reported in the returned outcome.
    pub async fn process(&self, event: &ObservedPayment) -> MatchOutcome {
        if event.destination != self.settings.deposit_address {
            debug!(tx_id = %event.tx_id, destination = %event.destination, "Payment not for deposit address");
            return MatchOutcome::NotForDepositAddress;
        }

        if !event.is_final_success() {
            debug!(tx_id = %event.tx_id, result_code = %event.result_code, validated = event.validated, "Payment not final");
            return MatchOutcome::NotFinal;
        }

        let Some(tag) = event.destination_tag else {
            warn!(
                tx_id = %event.tx_id,
                source = %event.source,
                amount = %event.amount,
                "Unattributable deposit: no destination tag, manual intervention required"
            );
            return MatchOutcome::Unattributable(UnattributableReason::MissingDestinationTag);
        };

        if self.processed.lock().await.contains(&event.tx_id) {
            debug!(tx_id = %event.tx_id, "Payment already processed");
            return MatchOutcome::AlreadyProcessed;
        }

        let purchase = match self.repo.find_pending_by_tag(tag).await {
            Ok(Some(purchase)) => purchase,
            Ok(None) => {
                // Re-delivery after a restart: the processed set is empty but
                // the store already holds this deposit.
                match self.repo.find_by_deposit_tx(&event.tx_id).await {
                    Ok(Some(owner)) => {
                        debug!(tx_id = %event.tx_id, purchase_id = %owner.id, "Deposit already recorded");
                        self.processed.lock().await.insert(event.tx_id.clone());
                        return MatchOutcome::AlreadyProcessed;
                    }
                    Ok(None) => {}
                    Err(e) => {
                        error!(tx_id = %event.tx_id, error = %e, "Deposit lookup failed");
                        return MatchOutcome::StoreError(e.to_string());
                    }
                }
                warn!(
                    tx_id = %event.tx_id,
                    destination_tag = %tag,
                    source = %event.source,
                    amount = %event.amount,
                    "Unattributable deposit: no pending purchase for tag, manual intervention required"
                );
                return MatchOutcome::Unattributable(UnattributableReason::NoPendingPurchase(tag));
            }
            Err(e) => {
                error!(tx_id = %event.tx_id, destination_tag = %tag, error = %e, "Pending purchase lookup failed");
                return MatchOutcome::StoreError(e.to_string());
            }
        };

        let received = self.normalize_received(event);
        let amount_check = self.settings.tolerance.check(purchase.usdc_amount, received);
        if let AmountCheck::Outside { deviation } = amount_check {
            warn!(
                tx_id = %event.tx_id,
                purchase_id = %purchase.id,
                requested = %purchase.usdc_amount,
                received = %received,
                deviation = %deviation,
                "Deposit amount outside tolerance, continuing with requested amount"
            );
        }

        let investor = match self.repo.get_investor(&purchase.investor_id).await {
            Ok(Some(investor)) => investor,
            Ok(None) => {
                error!(purchase_id = %purchase.id, investor_id = %purchase.investor_id, "Investor not found for purchase");
                return MatchOutcome::InvestorMissing {
                    purchase_id: purchase.id,
                };
            }
            Err(e) => {
                error!(purchase_id = %purchase.id, error = %e, "Investor lookup failed");
                return MatchOutcome::StoreError(e.to_string());
            }
        };

        match self.repo.claim_deposit(&purchase.id, &event.tx_id).await {
            Ok(true) => {
                info!(
                    tx_id = %event.tx_id,
                    purchase_id = %purchase.id,
                    destination_tag = %tag,
                    amount = %event.amount,
                    "Deposit matched to purchase"
                );
            }
            Ok(false) => {
                info!(tx_id = %event.tx_id, purchase_id = %purchase.id, "Deposit already claimed by another writer");
                return MatchOutcome::ClaimLost {
                    purchase_id: purchase.id,
                };
            }
            Err(e) => {
                error!(tx_id = %event.tx_id, purchase_id = %purchase.id, error = %e, "Deposit claim failed");
                return MatchOutcome::StoreError(e.to_string());
            }
        }

        let settlement = self
            .settlement
            .settle(&purchase, &investor, &event.amount)
            .await;
        self.processed.lock().await.insert(event.tx_id.clone());

        MatchOutcome::Settled {
            purchase_id: purchase.id,
            amount_check,
            settlement,
        }
    }

    /// Display-unit value of the payment. Flags USDC from an unexpected issuer.
    fn normalize_received(&self, event: &ObservedPayment) -> Decimal {
        if let (Some(expected), LedgerAmount::Issued { issuer, currency, .. }) =
            (&self.settings.usdc_issuer, &event.amount)
        {
            if issuer != expected {
                warn!(
                    tx_id = %event.tx_id,
                    issuer = %issuer,
                    currency = %currency,
                    expected_issuer = %expected,
                    "Deposit from unexpected issuer"
                );
            }
        }
        event.amount.normalize()
    }
}
