//! Supervisor: catch-up, then live subscription, reconnecting on failure.

use super::catchup::CatchUpScanner;
use super::matcher::DepositMatcher;
use super::subscriber::{LiveSubscriber, SessionEnd};
use super::ReconcileSettings;
use crate::db::Repository;
use crate::ledger::LedgerGateway;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

pub struct Monitor {
    scanner: CatchUpScanner,
    subscriber: LiveSubscriber,
    reconnect_delay: Duration,
}

impl Monitor {
    /// Wire matcher, scanner and subscriber around one shared matcher, so the
    /// processed set spans catch-up and live events.
    pub fn new(
        repo: Arc<Repository>,
        ledger: Arc<dyn LedgerGateway>,
        settings: ReconcileSettings,
    ) -> Self {
        let matcher = Arc::new(DepositMatcher::new(
            repo.clone(),
            ledger.clone(),
            settings.clone(),
        ));
        Self {
            scanner: CatchUpScanner::new(repo, ledger.clone(), matcher.clone(), settings.clone()),
            subscriber: LiveSubscriber::new(ledger, matcher, settings.clone()),
            reconnect_delay: settings.reconnect_delay,
        }
    }

    /// Run until `shutdown` turns true (or its sender is dropped).
    ///
    /// Every (re)connect is preceded by a catch-up pass, which covers the gap
    /// while the stream was down. Catch-up failures are logged and do not keep
    /// the subscriber from starting.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!("Deposit monitor started");
        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.scanner.scan_for_missed_payments().await {
                Ok(report) if !report.stuck_forwarded.is_empty() => warn!(
                    stuck = report.stuck_forwarded.len(),
                    "Purchases awaiting operator review"
                ),
                Ok(_) => {}
                Err(e) => error!(error = %e, "Catch-up scan failed"),
            }

            match self.subscriber.run_session(&mut shutdown).await {
                SessionEnd::Shutdown => break,
                SessionEnd::StreamClosed => warn!("Subscription closed, reconnecting"),
                SessionEnd::Error(e) => warn!(error = %e, "Subscription failed, reconnecting"),
            }

            tokio::select! {
                _ = tokio::time::sleep(self.reconnect_delay) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        info!("Deposit monitor stopped");
    }
}
