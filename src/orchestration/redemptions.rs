//! End-of-day redemption settlement at NAV.

use super::OrchestrationError;
use crate::db::Repository;
use crate::domain::{Decimal, IssuedAsset, NavRecord, TimeMs};
use crate::ledger::{LedgerError, LedgerGateway, PaymentRequest, WalletRole};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RedemptionBatchReport {
    pub nav_price: Decimal,
    pub completed: Vec<String>,
    pub failed: Vec<String>,
    /// Paid on the ledger, but the completion was not stored. These stay
    /// `queued` and must be reconciled by hand before the next run.
    pub unrecorded: Vec<UnrecordedPayout>,
    pub usdc_paid: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnrecordedPayout {
    pub redemption_id: String,
    pub tx_id: String,
}

pub struct RedemptionSettler {
    repo: Arc<Repository>,
    ledger: Arc<dyn LedgerGateway>,
    usdc: Option<IssuedAsset>,
}

impl RedemptionSettler {
    pub fn new(
        repo: Arc<Repository>,
        ledger: Arc<dyn LedgerGateway>,
        usdc: Option<IssuedAsset>,
    ) -> Self {
        Self { repo, ledger, usdc }
    }

    /// Pay out every queued redemption at `nav_price`, or at the latest recorded
    /// NAV when none is given. Each redemption is attempted once, and a failure
    /// on one never stops the rest of the queue.
    pub async fn settle_queue(
        &self,
        nav_price: Option<Decimal>,
    ) -> Result<RedemptionBatchReport, OrchestrationError> {
        let usdc = self
            .usdc
            .as_ref()
            .ok_or(OrchestrationError::NotConfigured("USDC_ISSUER_ADDRESS"))?;

        let nav_price = match nav_price {
            Some(nav) => nav,
            None => self
                .repo
                .latest_nav()
                .await?
                .map(|n| n.nav_per_token)
                .unwrap_or_else(NavRecord::initial_nav),
        };

        let mut report = RedemptionBatchReport {
            nav_price,
            ..Default::default()
        };

        for queued in self.repo.list_queued_redemptions().await? {
            let redemption = queued.redemption;
            let Some(usdc_amount) = redemption
                .token_amount
                .checked_mul(nav_price)
                .map(|v| v.round_significant(15))
            else {
                error!(
                    redemption_id = %redemption.id,
                    tokens = %redemption.token_amount,
                    nav_price = %nav_price,
                    "Redemption value out of range, not paid"
                );
                self.record_failure(&redemption.id, None).await;
                report.failed.push(redemption.id);
                continue;
            };

            let request = PaymentRequest {
                from: WalletRole::Operational,
                destination: queued.xrpl_address.clone(),
                amount: usdc.amount(usdc_amount),
                destination_tag: None,
            };

            match self.ledger.submit_payment(&request).await {
                Ok(result) if result.is_success() => {
                    match self
                        .repo
                        .complete_redemption(&redemption.id, nav_price, usdc_amount, &result.tx_id, TimeMs::now())
                        .await
                    {
                        Ok(_) => {
                            info!(
                                redemption_id = %redemption.id,
                                tx_id = %result.tx_id,
                                tokens = %redemption.token_amount,
                                usdc = %usdc_amount,
                                "Redemption settled"
                            );
                            report.completed.push(redemption.id);
                        }
                        Err(e) => {
                            error!(
                                redemption_id = %redemption.id,
                                tx_id = %result.tx_id,
                                usdc = %usdc_amount,
                                error = %e,
                                "Redemption paid but not recorded, reconcile before the next run"
                            );
                            report.unrecorded.push(UnrecordedPayout {
                                redemption_id: redemption.id,
                                tx_id: result.tx_id,
                            });
                        }
                    }
                    report.usdc_paid = report.usdc_paid + usdc_amount;
                }
                Ok(result) => {
                    warn!(
                        redemption_id = %redemption.id,
                        tx_id = %result.tx_id,
                        result_code = %result.result_code,
                        "Redemption payout rejected"
                    );
                    self.record_failure(&redemption.id, Some(&result.tx_id)).await;
                    report.failed.push(redemption.id);
                }
                Err(LedgerError::ConfirmationTimeout { tx_id }) => {
                    error!(redemption_id = %redemption.id, tx_id = %tx_id, "Redemption payout not confirmed");
                    self.record_failure(&redemption.id, Some(&tx_id)).await;
                    report.failed.push(redemption.id);
                }
                Err(e) => {
                    error!(redemption_id = %redemption.id, error = %e, "Redemption payout failed");
                    self.record_failure(&redemption.id, None).await;
                    report.failed.push(redemption.id);
                }
            }
        }

        Ok(report)
    }

    async fn record_failure(&self, redemption_id: &str, tx_id: Option<&str>) {
        if let Err(e) = self
            .repo
            .fail_redemption(redemption_id, tx_id, TimeMs::now())
            .await
        {
            error!(
                redemption_id = %redemption_id,
                tx_id = tx_id.unwrap_or(""),
                error = %e,
                "Failed to mark redemption failed"
            );
        }
    }
}
