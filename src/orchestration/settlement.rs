//! Settlement of a matched purchase: forward the deposit to custody, then
//! issue fund tokens to the investor.

use super::ReconcileSettings;
use crate::db::Repository;
use crate::domain::{Investor, LedgerAmount, Purchase, TimeMs};
use crate::ledger::{LedgerError, LedgerGateway, PaymentRequest, WalletRole};
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettlementOutcome {
    Completed {
        forward_tx_id: Option<String>,
        issue_tx_id: String,
    },
    Failed {
        forward_tx_id: Option<String>,
        reason: SettlementFailure,
    },
    /// Tokens were delivered but the store did not take the completion. The
    /// purchase stays `forwarded` and shows up in the stuck report.
    IssuedButUnrecorded {
        forward_tx_id: Option<String>,
        issue_tx_id: String,
        error: String,
    },
    /// The issuance request may have reached the ledger but no tx id came
    /// back. The purchase stays `forwarded` for operator review.
    IssuanceOutcomeUnknown {
        forward_tx_id: Option<String>,
        error: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettlementFailure {
    /// Investor has no trust line for the token, or the issuer has not authorized it.
    TrustLineNotAuthorized,
    TrustLineCheck(String),
    IssuanceRejected { result_code: String, tx_id: String },
    /// Submitted, but not seen in a validated ledger in time. The tx id is
    /// recorded on the purchase.
    IssuanceUnconfirmed { tx_id: String },
    IssuanceError(String),
}

impl std::fmt::Display for SettlementFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SettlementFailure::TrustLineNotAuthorized => write!(f, "trust line not authorized"),
            SettlementFailure::TrustLineCheck(e) => write!(f, "trust line check failed: {}", e),
            SettlementFailure::IssuanceRejected { result_code, tx_id } => {
                write!(f, "issuance {} rejected with {}", tx_id, result_code)
            }
            SettlementFailure::IssuanceUnconfirmed { tx_id } => {
                write!(f, "issuance {} not confirmed", tx_id)
            }
            SettlementFailure::IssuanceError(e) => write!(f, "issuance failed: {}", e),
        }
    }
}

/// Drives a `forwarded` purchase to `completed` or `failed`.
///
/// Each ledger step is attempted once. Whatever was achieved before a failure
/// (the forward tx id in particular) stays on the record for operators.
pub struct SettlementDriver {
    repo: Arc<Repository>,
    ledger: Arc<dyn LedgerGateway>,
    settings: ReconcileSettings,
}

impl SettlementDriver {
    pub fn new(
        repo: Arc<Repository>,
        ledger: Arc<dyn LedgerGateway>,
        settings: ReconcileSettings,
    ) -> Self {
        Self {
            repo,
            ledger,
            settings,
        }
    }

    pub async fn settle(
        &self,
        purchase: &Purchase,
        investor: &Investor,
        received: &LedgerAmount,
    ) -> SettlementOutcome {
        let forward_tx_id = self.forward_to_custody(purchase, received).await;

        match self
            .ledger
            .has_authorized_trust_line(&investor.xrpl_address, &self.settings.token)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                return self
                    .fail(purchase, forward_tx_id, SettlementFailure::TrustLineNotAuthorized)
                    .await
            }
            Err(e) => {
                return self
                    .fail(purchase, forward_tx_id, SettlementFailure::TrustLineCheck(e.to_string()))
                    .await
            }
        }

        let request = PaymentRequest {
            from: WalletRole::Operational,
            destination: investor.xrpl_address.clone(),
            amount: self.settings.token.amount(purchase.usdc_amount),
            destination_tag: None,
        };

        let result = match self.ledger.submit_payment(&request).await {
            Ok(result) => result,
            Err(LedgerError::ConfirmationTimeout { tx_id }) => {
                return self.fail_unconfirmed(purchase, forward_tx_id, tx_id).await
            }
            Err(e @ LedgerError::SubmissionUnknown(_)) => {
                error!(
                    purchase_id = %purchase.id,
                    error = %e,
                    "Issuance may have been submitted, leaving purchase forwarded for review"
                );
                return SettlementOutcome::IssuanceOutcomeUnknown {
                    forward_tx_id,
                    error: e.to_string(),
                };
            }
            Err(e) => {
                return self
                    .fail(purchase, forward_tx_id, SettlementFailure::IssuanceError(e.to_string()))
                    .await
            }
        };

        if !result.is_success() {
            return self
                .fail(
                    purchase,
                    forward_tx_id,
                    SettlementFailure::IssuanceRejected {
                        result_code: result.result_code,
                        tx_id: result.tx_id,
                    },
                )
                .await;
        }

        match self
            .repo
            .mark_purchase_completed(&purchase.id, &result.tx_id, purchase.usdc_amount, TimeMs::now())
            .await
        {
            Ok(true) => {
                info!(
                    purchase_id = %purchase.id,
                    issue_tx_id = %result.tx_id,
                    tokens = %purchase.usdc_amount,
                    investor = %investor.xrpl_address,
                    "Purchase completed"
                );
                SettlementOutcome::Completed {
                    forward_tx_id,
                    issue_tx_id: result.tx_id,
                }
            }
            Ok(false) => {
                error!(
                    purchase_id = %purchase.id,
                    issue_tx_id = %result.tx_id,
                    "Tokens issued but purchase was no longer forwarded"
                );
                SettlementOutcome::IssuedButUnrecorded {
                    forward_tx_id,
                    issue_tx_id: result.tx_id,
                    error: "purchase no longer forwarded".to_string(),
                }
            }
            Err(e) => {
                error!(
                    purchase_id = %purchase.id,
                    issue_tx_id = %result.tx_id,
                    error = %e,
                    "Tokens issued but completion was not recorded"
                );
                SettlementOutcome::IssuedButUnrecorded {
                    forward_tx_id,
                    issue_tx_id: result.tx_id,
                    error: e.to_string(),
                }
            }
        }
    }

    /// Pay the received amount from the deposit wallet to custody. Failures are
    /// logged and do not stop settlement.
    async fn forward_to_custody(&self, purchase: &Purchase, received: &LedgerAmount) -> Option<String> {
        let Some(custody) = &self.settings.custody_address else {
            info!(purchase_id = %purchase.id, "No custody address configured, skipping forward");
            return None;
        };

        let request = PaymentRequest {
            from: WalletRole::Deposit,
            destination: custody.clone(),
            amount: received.clone(),
            destination_tag: self.settings.custody_destination_tag,
        };

        match self.ledger.submit_payment(&request).await {
            Ok(result) if result.is_success() => {
                info!(purchase_id = %purchase.id, forward_tx_id = %result.tx_id, amount = %received, "Deposit forwarded to custody");
                match self.repo.record_forward_tx(&purchase.id, &result.tx_id).await {
                    Ok(true) => {}
                    Ok(false) => warn!(
                        purchase_id = %purchase.id,
                        forward_tx_id = %result.tx_id,
                        "Forward tx not recorded, purchase no longer forwarded"
                    ),
                    Err(e) => error!(
                        purchase_id = %purchase.id,
                        forward_tx_id = %result.tx_id,
                        error = %e,
                        "Failed to record forward tx"
                    ),
                }
                Some(result.tx_id)
            }
            Ok(result) => {
                warn!(
                    purchase_id = %purchase.id,
                    tx_id = %result.tx_id,
                    result_code = %result.result_code,
                    "Forward to custody rejected, continuing with issuance"
                );
                None
            }
            Err(e) => {
                error!(purchase_id = %purchase.id, error = %e, "Forward to custody failed, continuing with issuance");
                None
            }
        }
    }

    /// Mark the purchase `failed` with the unconfirmed issuance tx on record.
    async fn fail_unconfirmed(
        &self,
        purchase: &Purchase,
        forward_tx_id: Option<String>,
        tx_id: String,
    ) -> SettlementOutcome {
        error!(
            purchase_id = %purchase.id,
            issue_tx_id = %tx_id,
            "Issuance not confirmed, check the ledger before any remediation"
        );
        match self.repo.mark_issuance_unconfirmed(&purchase.id, &tx_id).await {
            Ok(true) => {}
            Ok(false) => warn!(purchase_id = %purchase.id, "Purchase was not forwarded when marking failed"),
            Err(e) => error!(
                purchase_id = %purchase.id,
                issue_tx_id = %tx_id,
                error = %e,
                "Failed to record unconfirmed issuance"
            ),
        }
        SettlementOutcome::Failed {
            forward_tx_id,
            reason: SettlementFailure::IssuanceUnconfirmed { tx_id },
        }
    }

    async fn fail(
        &self,
        purchase: &Purchase,
        forward_tx_id: Option<String>,
        reason: SettlementFailure,
    ) -> SettlementOutcome {
        error!(purchase_id = %purchase.id, reason = %reason, "Purchase settlement failed");
        match self.repo.mark_purchase_failed(&purchase.id).await {
            Ok(true) => {}
            Ok(false) => warn!(purchase_id = %purchase.id, "Purchase was not forwarded when marking failed"),
            Err(e) => error!(purchase_id = %purchase.id, error = %e, "Failed to mark purchase failed"),
        }
        SettlementOutcome::Failed {
            forward_tx_id,
            reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::domain::{Decimal, PurchaseStatus};
    use crate::ledger::MockLedger;

    async fn claimed_purchase(repo: &Repository, investor: &Investor) -> Purchase {
        let purchase = repo
            .create_purchase(&investor.id, Decimal::from(100u64))
            .await
            .unwrap();
        assert!(repo.claim_deposit(&purchase.id, "DEPOSIT_TX").await.unwrap());
        repo.get_purchase(&purchase.id).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_forward_then_issue() {
        let (repo, _temp) = setup_repo().await;
        let investor = ready_investor(&repo).await;
        let ledger = MockLedger::new().with_trust_line(&investor.xrpl_address, &token(), true);
        let driver = SettlementDriver::new(repo.clone(), Arc::new(ledger.clone()), settings());
        let purchase = claimed_purchase(&repo, &investor).await;

        let outcome = driver.settle(&purchase, &investor, &usdc("100")).await;
        assert_eq!(
            outcome,
            SettlementOutcome::Completed {
                forward_tx_id: Some("MOCKTX0001".to_string()),
                issue_tx_id: "MOCKTX0002".to_string(),
            }
        );

        let submitted = ledger.submitted();
        assert_eq!(submitted.len(), 2);
        assert_eq!(submitted[0].from, WalletRole::Deposit);
        assert_eq!(submitted[0].destination, addr(CUSTODY));
        assert_eq!(submitted[0].amount, usdc("100"));
        assert_eq!(submitted[1].from, WalletRole::Operational);
        assert_eq!(submitted[1].amount, token().amount(Decimal::from(100u64)));

        let stored = repo.get_purchase(&purchase.id).await.unwrap().unwrap();
        assert_eq!(stored.status, PurchaseStatus::Completed);
        assert_eq!(stored.forward_tx_id.as_deref(), Some("MOCKTX0001"));
        assert_eq!(stored.issue_tx_id.as_deref(), Some("MOCKTX0002"));
        assert_eq!(stored.token_amount, Some(Decimal::from(100u64)));
        assert!(stored.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_no_custody_skips_forward() {
        let (repo, _temp) = setup_repo().await;
        let investor = ready_investor(&repo).await;
        let ledger = MockLedger::new().with_trust_line(&investor.xrpl_address, &token(), true);
        let mut settings = settings();
        settings.custody_address = None;
        let driver = SettlementDriver::new(repo.clone(), Arc::new(ledger.clone()), settings);
        let purchase = claimed_purchase(&repo, &investor).await;

        let outcome = driver.settle(&purchase, &investor, &usdc("100")).await;
        assert!(matches!(
            outcome,
            SettlementOutcome::Completed {
                forward_tx_id: None,
                ..
            }
        ));
        assert_eq!(ledger.submitted().len(), 1);
    }

    #[tokio::test]
    async fn test_unauthorized_trust_line_fails_without_issuing() {
        let (repo, _temp) = setup_repo().await;
        let investor = ready_investor(&repo).await;
        let ledger = MockLedger::new().with_trust_line(&investor.xrpl_address, &token(), false);
        let driver = SettlementDriver::new(repo.clone(), Arc::new(ledger.clone()), settings());
        let purchase = claimed_purchase(&repo, &investor).await;

        let outcome = driver.settle(&purchase, &investor, &usdc("100")).await;
        assert_eq!(
            outcome,
            SettlementOutcome::Failed {
                forward_tx_id: Some("MOCKTX0001".to_string()),
                reason: SettlementFailure::TrustLineNotAuthorized,
            }
        );
        assert!(ledger
            .submitted()
            .iter()
            .all(|p| p.from != WalletRole::Operational));

        let stored = repo.get_purchase(&purchase.id).await.unwrap().unwrap();
        assert_eq!(stored.status, PurchaseStatus::Failed);
        assert_eq!(stored.forward_tx_id.as_deref(), Some("MOCKTX0001"));
        assert!(stored.issue_tx_id.is_none());
    }

    #[tokio::test]
    async fn test_trust_line_check_error_fails() {
        let (repo, _temp) = setup_repo().await;
        let investor = ready_investor(&repo).await;
        let ledger = MockLedger::new().with_trust_line_error();
        let driver = SettlementDriver::new(repo.clone(), Arc::new(ledger), settings());
        let purchase = claimed_purchase(&repo, &investor).await;

        let outcome = driver.settle(&purchase, &investor, &usdc("100")).await;
        assert!(matches!(
            outcome,
            SettlementOutcome::Failed {
                reason: SettlementFailure::TrustLineCheck(_),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_forward_failure_still_issues() {
        let (repo, _temp) = setup_repo().await;
        let investor = ready_investor(&repo).await;
        let ledger = MockLedger::new()
            .with_trust_line(&investor.xrpl_address, &token(), true)
            .with_failing_role(WalletRole::Deposit, "tecUNFUNDED_PAYMENT");
        let driver = SettlementDriver::new(repo.clone(), Arc::new(ledger), settings());
        let purchase = claimed_purchase(&repo, &investor).await;

        let outcome = driver.settle(&purchase, &investor, &usdc("100")).await;
        assert!(matches!(
            outcome,
            SettlementOutcome::Completed {
                forward_tx_id: None,
                ..
            }
        ));
        let stored = repo.get_purchase(&purchase.id).await.unwrap().unwrap();
        assert_eq!(stored.status, PurchaseStatus::Completed);
        assert!(stored.forward_tx_id.is_none());
    }

    #[tokio::test]
    async fn test_rejected_issuance_keeps_forward_id() {
        let (repo, _temp) = setup_repo().await;
        let investor = ready_investor(&repo).await;
        let ledger = MockLedger::new()
            .with_trust_line(&investor.xrpl_address, &token(), true)
            .with_failing_role(WalletRole::Operational, "tecPATH_DRY");
        let driver = SettlementDriver::new(repo.clone(), Arc::new(ledger), settings());
        let purchase = claimed_purchase(&repo, &investor).await;

        let outcome = driver.settle(&purchase, &investor, &usdc("100")).await;
        assert_eq!(
            outcome,
            SettlementOutcome::Failed {
                forward_tx_id: Some("MOCKTX0001".to_string()),
                reason: SettlementFailure::IssuanceRejected {
                    result_code: "tecPATH_DRY".to_string(),
                    tx_id: "MOCKTX0002".to_string(),
                },
            }
        );
        let stored = repo.get_purchase(&purchase.id).await.unwrap().unwrap();
        assert_eq!(stored.status, PurchaseStatus::Failed);
        assert_eq!(stored.forward_tx_id.as_deref(), Some("MOCKTX0001"));
    }

    #[tokio::test]
    async fn test_issuance_transport_error_fails() {
        let (repo, _temp) = setup_repo().await;
        let investor = ready_investor(&repo).await;
        let ledger = MockLedger::new()
            .with_trust_line(&investor.xrpl_address, &token(), true)
            .with_erroring_role(WalletRole::Operational);
        let driver = SettlementDriver::new(repo.clone(), Arc::new(ledger), settings());
        let purchase = claimed_purchase(&repo, &investor).await;

        let outcome = driver.settle(&purchase, &investor, &usdc("100")).await;
        assert!(matches!(
            outcome,
            SettlementOutcome::Failed {
                reason: SettlementFailure::IssuanceError(_),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_unconfirmed_issuance_records_tx_id() {
        let (repo, _temp) = setup_repo().await;
        let investor = ready_investor(&repo).await;
        let ledger = MockLedger::new()
            .with_trust_line(&investor.xrpl_address, &token(), true)
            .with_unconfirmed_role(WalletRole::Operational);
        let driver = SettlementDriver::new(repo.clone(), Arc::new(ledger.clone()), settings());
        let purchase = claimed_purchase(&repo, &investor).await;

        let outcome = driver.settle(&purchase, &investor, &usdc("100")).await;
        assert_eq!(
            outcome,
            SettlementOutcome::Failed {
                forward_tx_id: Some("MOCKTX0001".to_string()),
                reason: SettlementFailure::IssuanceUnconfirmed {
                    tx_id: "MOCKTX0002".to_string(),
                },
            }
        );
        // The payment did go out, so the record must say which one.
        assert_eq!(ledger.submitted().len(), 2);
        let stored = repo.get_purchase(&purchase.id).await.unwrap().unwrap();
        assert_eq!(stored.status, PurchaseStatus::Failed);
        assert_eq!(stored.issue_tx_id.as_deref(), Some("MOCKTX0002"));
        assert!(stored.token_amount.is_none());
    }

    #[tokio::test]
    async fn test_unknown_submission_leaves_purchase_forwarded() {
        let (repo, _temp) = setup_repo().await;
        let investor = ready_investor(&repo).await;
        let ledger = MockLedger::new()
            .with_trust_line(&investor.xrpl_address, &token(), true)
            .with_unanswered_role(WalletRole::Operational);
        let driver = SettlementDriver::new(repo.clone(), Arc::new(ledger), settings());
        let purchase = claimed_purchase(&repo, &investor).await;

        let outcome = driver.settle(&purchase, &investor, &usdc("100")).await;
        assert!(matches!(
            outcome,
            SettlementOutcome::IssuanceOutcomeUnknown {
                forward_tx_id: Some(_),
                ..
            }
        ));
        let stored = repo.get_purchase(&purchase.id).await.unwrap().unwrap();
        assert_eq!(stored.status, PurchaseStatus::Forwarded);
        assert!(repo
            .list_incomplete_purchases()
            .await
            .unwrap()
            .iter()
            .any(|p| p.id == purchase.id));
    }
}
