//! Live subscriber: feeds validated deposit-account payments to the matcher as
//! they arrive.

use super::matcher::DepositMatcher;
use super::ReconcileSettings;
use crate::ledger::{LedgerError, LedgerGateway};
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Why a subscription session ended.
#[derive(Debug, Clone)]
pub enum SessionEnd {
    Shutdown,
    StreamClosed,
    Error(LedgerError),
}

pub struct LiveSubscriber {
    ledger: Arc<dyn LedgerGateway>,
    matcher: Arc<DepositMatcher>,
    settings: ReconcileSettings,
}

impl LiveSubscriber {
    pub fn new(
        ledger: Arc<dyn LedgerGateway>,
        matcher: Arc<DepositMatcher>,
        settings: ReconcileSettings,
    ) -> Self {
        Self {
            ledger,
            matcher,
            settings,
        }
    }

    /// Subscribe and process events one at a time, in delivery order, until the
    /// stream ends, errors, or shutdown is signalled. An event already being
    /// processed is finished before shutdown is honoured.
    pub async fn run_session(&self, shutdown: &mut watch::Receiver<bool>) -> SessionEnd {
        let mut stream = match self
            .ledger
            .subscribe_payments(&self.settings.deposit_address)
            .await
        {
            Ok(stream) => stream,
            Err(e) => return SessionEnd::Error(e),
        };
        info!(account = %self.settings.deposit_address, "Listening for deposits");

        loop {
            if *shutdown.borrow() {
                return SessionEnd::Shutdown;
            }

            let next = tokio::select! {
                next = stream.next() => next,
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return SessionEnd::Shutdown;
                    }
                    continue;
                }
            };

            let tx = match next {
                Some(Ok(tx)) => tx,
                Some(Err(e)) => {
                    warn!(error = %e, "Subscription stream error");
                    return SessionEnd::Error(e);
                }
                None => return SessionEnd::StreamClosed,
            };

            if !tx.validated || tx.result_code != crate::domain::TX_SUCCESS {
                debug!(tx_id = %tx.tx_id, result_code = %tx.result_code, "Skipping non-final transaction");
                continue;
            }
            let Some(event) = tx.to_observed_payment() else {
                debug!(tx_id = %tx.tx_id, tx_type = %tx.tx_type, "Skipping non-payment transaction");
                continue;
            };

            let outcome = self.matcher.process(&event).await;
            debug!(tx_id = %event.tx_id, outcome = ?outcome, "Live event processed");
        }
    }
}
