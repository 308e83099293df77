//! Catch-up scan: replays recent deposit-account history against pending
//! purchases, for payments that arrived while the live stream was down.

use super::matcher::{DepositMatcher, MatchOutcome};
use super::{OrchestrationError, ReconcileSettings};
use crate::db::Repository;
use crate::domain::{Purchase, PurchaseStatus};
use crate::ledger::{LedgerGateway, LedgerTransaction};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Result of one catch-up pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CatchUpReport {
    pub pending_checked: usize,
    pub history_scanned: usize,
    /// The history page was full, so older deposits may be out of reach.
    pub history_truncated: bool,
    /// Payments handed to the matcher.
    pub replayed: usize,
    /// Replayed payments that the matcher settled.
    pub settled: usize,
    /// Candidate payments already recorded on some purchase.
    pub already_recorded: usize,
    pub no_payment_found: usize,
    /// Purchases skipped because a store call failed for them.
    pub errors: usize,
    /// Purchases with a recorded deposit whose settlement never finished.
    pub stuck_forwarded: Vec<String>,
}

pub struct CatchUpScanner {
    repo: Arc<Repository>,
    ledger: Arc<dyn LedgerGateway>,
    matcher: Arc<DepositMatcher>,
    settings: ReconcileSettings,
}

impl CatchUpScanner {
    pub fn new(
        repo: Arc<Repository>,
        ledger: Arc<dyn LedgerGateway>,
        matcher: Arc<DepositMatcher>,
        settings: ReconcileSettings,
    ) -> Self {
        Self {
            repo,
            ledger,
            matcher,
            settings,
        }
    }

    /// Feed the most recent matching payment for each pending purchase to the
    /// matcher, then report purchases stuck in `forwarded`.
    ///
    /// Only listing pending purchases and fetching history can fail the pass;
    /// a failure for one purchase is logged, counted, and skipped.
    pub async fn scan_for_missed_payments(&self) -> Result<CatchUpReport, OrchestrationError> {
        let mut report = CatchUpReport::default();
        let pending = self.repo.list_pending_purchases().await?;
        report.pending_checked = pending.len();

        if !pending.is_empty() {
            let limit = self.settings.catchup_history_limit;
            let history = self
                .ledger
                .account_payment_history(&self.settings.deposit_address, limit)
                .await?;
            report.history_scanned = history.len();
            report.history_truncated = history.len() >= limit as usize;
            if report.history_truncated {
                warn!(
                    limit,
                    "Catch-up history page is full; deposits older than the page will not be replayed"
                );
            }

            for purchase in &pending {
                if let Err(e) = self.replay_for(purchase, &history, &mut report).await {
                    error!(purchase_id = %purchase.id, error = %e, "Catch-up failed for purchase, continuing");
                    report.errors += 1;
                }
            }
        }

        let stuck = match self
            .repo
            .list_purchases_by_status(PurchaseStatus::Forwarded)
            .await
        {
            Ok(stuck) => stuck,
            Err(e) => {
                error!(error = %e, "Could not list purchases stuck in forwarded");
                report.errors += 1;
                Vec::new()
            }
        };
        for purchase in &stuck {
            warn!(
                purchase_id = %purchase.id,
                deposit_tx_id = purchase.deposit_tx_id.as_deref().unwrap_or(""),
                forward_tx_id = purchase.forward_tx_id.as_deref().unwrap_or(""),
                "Purchase stuck in forwarded, operator review required"
            );
        }
        report.stuck_forwarded = stuck.into_iter().map(|p| p.id).collect();

        info!(
            pending = report.pending_checked,
            scanned = report.history_scanned,
            replayed = report.replayed,
            settled = report.settled,
            errors = report.errors,
            stuck = report.stuck_forwarded.len(),
            "Catch-up scan finished"
        );
        Ok(report)
    }

    async fn replay_for(
        &self,
        purchase: &Purchase,
        history: &[LedgerTransaction],
        report: &mut CatchUpReport,
    ) -> Result<(), OrchestrationError> {
        let mut candidates = history.iter().filter(|tx| {
            tx.is_payment()
                && tx.validated
                && tx.result_code == crate::domain::TX_SUCCESS
                && tx.destination.as_ref() == Some(&self.settings.deposit_address)
                && tx.destination_tag == Some(purchase.destination_tag)
        });

        // History is newest first.
        let Some(tx) = candidates.next() else {
            report.no_payment_found += 1;
            return Ok(());
        };
        let others = candidates.count();
        if others > 0 {
            warn!(
                purchase_id = %purchase.id,
                destination_tag = %purchase.destination_tag,
                chosen_tx_id = %tx.tx_id,
                other_candidates = others,
                "Several payments carry this purchase's tag; replaying the most recent"
            );
        }

        if let Some(owner) = self.repo.find_by_deposit_tx(&tx.tx_id).await? {
            info!(
                tx_id = %tx.tx_id,
                purchase_id = %owner.id,
                "Payment already recorded, skipping"
            );
            report.already_recorded += 1;
            return Ok(());
        }

        let Some(event) = tx.to_observed_payment() else {
            report.no_payment_found += 1;
            return Ok(());
        };

        info!(tx_id = %tx.tx_id, purchase_id = %purchase.id, "Replaying missed payment");
        report.replayed += 1;
        match self.matcher.process(&event).await {
            MatchOutcome::Settled { .. } => report.settled += 1,
            MatchOutcome::StoreError(_) => report.errors += 1,
            _ => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::domain::{Decimal, DestinationTag};
    use crate::ledger::MockLedger;

    fn scanner(repo: &Arc<Repository>, ledger: &MockLedger, history_limit: u32) -> CatchUpScanner {
        let mut settings = settings();
        settings.catchup_history_limit = history_limit;
        let ledger: Arc<dyn LedgerGateway> = Arc::new(ledger.clone());
        let matcher = Arc::new(DepositMatcher::new(
            repo.clone(),
            ledger.clone(),
            settings.clone(),
        ));
        CatchUpScanner::new(repo.clone(), ledger, matcher, settings)
    }

    fn deposit(tx_id: &str, tag: DestinationTag, value: &str) -> LedgerTransaction {
        MockLedger::validated_payment(tx_id, &addr(INVESTOR), &addr(DEPOSIT), usdc(value), Some(tag))
    }

    #[tokio::test]
    async fn test_replays_missed_deposit() {
        let (repo, _temp) = setup_repo().await;
        let investor = ready_investor(&repo).await;
        let purchase = repo
            .create_purchase(&investor.id, Decimal::from(50u64))
            .await
            .unwrap();
        let ledger = MockLedger::new()
            .with_trust_line(&investor.xrpl_address, &token(), true)
            .with_history_tx(deposit("MISSED", purchase.destination_tag, "50"));

        let report = scanner(&repo, &ledger, 400)
            .scan_for_missed_payments()
            .await
            .unwrap();
        assert_eq!(report.pending_checked, 1);
        assert_eq!(report.replayed, 1);
        assert_eq!(report.settled, 1);
        assert!(!report.history_truncated);

        let stored = repo.get_purchase(&purchase.id).await.unwrap().unwrap();
        assert_eq!(stored.status, PurchaseStatus::Completed);
        assert_eq!(stored.deposit_tx_id.as_deref(), Some("MISSED"));
    }

    #[tokio::test]
    async fn test_skips_deposit_recorded_elsewhere() {
        let (repo, _temp) = setup_repo().await;
        let investor = ready_investor(&repo).await;
        let settled = repo.create_purchase(&investor.id, Decimal::from(1u64)).await.unwrap();
        repo.claim_deposit(&settled.id, "SHARED").await.unwrap();
        let pending = repo.create_purchase(&investor.id, Decimal::from(1u64)).await.unwrap();

        // Same tx id shows up under the pending purchase's tag.
        let ledger = MockLedger::new().with_history_tx(deposit("SHARED", pending.destination_tag, "1"));

        let report = scanner(&repo, &ledger, 400)
            .scan_for_missed_payments()
            .await
            .unwrap();
        assert_eq!(report.already_recorded, 1);
        assert_eq!(report.replayed, 0);
        assert!(ledger.submitted().is_empty());
        assert_eq!(report.stuck_forwarded, vec![settled.id]);
    }

    #[tokio::test]
    async fn test_ignores_failed_and_foreign_payments() {
        let (repo, _temp) = setup_repo().await;
        let investor = ready_investor(&repo).await;
        let purchase = repo.create_purchase(&investor.id, Decimal::from(5u64)).await.unwrap();

        let mut failed = deposit("FAILED", purchase.destination_tag, "5");
        failed.result_code = "tecPATH_DRY".to_string();
        let mut outgoing = deposit("OUTGOING", purchase.destination_tag, "5");
        outgoing.destination = Some(addr(CUSTODY));

        let ledger = MockLedger::new().with_history_tx(failed).with_history_tx(outgoing);
        let report = scanner(&repo, &ledger, 400)
            .scan_for_missed_payments()
            .await
            .unwrap();
        assert_eq!(report.no_payment_found, 1);
        assert_eq!(report.replayed, 0);
    }

    #[tokio::test]
    async fn test_full_page_flags_truncation() {
        let (repo, _temp) = setup_repo().await;
        let investor = ready_investor(&repo).await;
        let purchase = repo.create_purchase(&investor.id, Decimal::from(5u64)).await.unwrap();

        let ledger = MockLedger::new()
            .with_history_tx(deposit("OLD", purchase.destination_tag, "5"))
            .with_history_tx(deposit("NOISE1", DestinationTag::new(1), "1"))
            .with_history_tx(deposit("NOISE2", DestinationTag::new(2), "1"));

        let report = scanner(&repo, &ledger, 2)
            .scan_for_missed_payments()
            .await
            .unwrap();
        assert!(report.history_truncated);
        assert_eq!(report.history_scanned, 2);
        assert_eq!(report.no_payment_found, 1);
    }

    #[tokio::test]
    async fn test_nothing_pending_skips_history() {
        let (repo, _temp) = setup_repo().await;
        let ledger = MockLedger::new();
        let report = scanner(&repo, &ledger, 400)
            .scan_for_missed_payments()
            .await
            .unwrap();
        assert_eq!(report, CatchUpReport::default());
    }

    #[tokio::test]
    async fn test_store_error_on_one_purchase_does_not_stop_the_pass() {
        let (repo, temp) = setup_repo().await;
        let investor = ready_investor(&repo).await;
        let blocked = repo.create_purchase(&investor.id, Decimal::from(5u64)).await.unwrap();
        let missed = repo.create_purchase(&investor.id, Decimal::from(7u64)).await.unwrap();

        // A record the repository cannot decode owns the first candidate tx.
        let raw = open_raw(&temp).await;
        sqlx::query(
            "INSERT INTO purchases (id, investor_id, usdc_amount, destination_tag, status, deposit_tx_id, created_at) \
             VALUES ('unreadable', ?, '5', -1, 'completed', 'BROKEN', 0)",
        )
        .bind(&investor.id)
        .execute(&raw)
        .await
        .unwrap();

        let ledger = MockLedger::new()
            .with_trust_line(&investor.xrpl_address, &token(), true)
            .with_history_tx(deposit("BROKEN", blocked.destination_tag, "5"))
            .with_history_tx(deposit("MISSED", missed.destination_tag, "7"));

        let report = scanner(&repo, &ledger, 400)
            .scan_for_missed_payments()
            .await
            .unwrap();
        assert_eq!(report.pending_checked, 2);
        assert_eq!(report.errors, 1);
        assert_eq!(report.settled, 1);

        let stored = repo.get_purchase(&missed.id).await.unwrap().unwrap();
        assert_eq!(stored.status, PurchaseStatus::Completed);
        let stored = repo.get_purchase(&blocked.id).await.unwrap().unwrap();
        assert_eq!(stored.status, PurchaseStatus::Pending);
    }
}
