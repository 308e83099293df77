//! In-memory ledger for tests and local runs without a node.

use super::{
    AmmPool, LedgerError, LedgerGateway, LedgerTransaction, PaymentRequest, SubmitResult,
    TransactionStream, TrustLine, WalletRole,
};
use crate::domain::{Address, Decimal, DestinationTag, IssuedAsset, LedgerAmount, TX_SUCCESS};
use async_trait::async_trait;
use futures::StreamExt;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Default)]
struct MockState {
    /// Account history, newest first.
    history: Vec<LedgerTransaction>,
    trust_lines: HashMap<(Address, String), TrustLine>,
    submitted: Vec<PaymentRequest>,
    failing_roles: HashMap<WalletRole, String>,
    erroring_roles: HashSet<WalletRole>,
    unconfirmed_roles: HashSet<WalletRole>,
    unanswered_roles: HashSet<WalletRole>,
    trust_line_error: bool,
    live_sessions: VecDeque<Vec<LedgerTransaction>>,
    subscriptions: usize,
    amm_pool: Option<AmmPool>,
    next_tx: u64,
}

/// Mock ledger with scripted history, trust lines and subscription sessions.
///
/// Clones share state, so a test can keep a handle after passing one to the code
/// under test.
#[derive(Debug, Clone, Default)]
pub struct MockLedger {
    state: Arc<Mutex<MockState>>,
}

impl MockLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Add a transaction to the account history (becomes the newest entry).
    pub fn with_history_tx(self, tx: LedgerTransaction) -> Self {
        self.push_history(tx);
        self
    }

    pub fn push_history(&self, tx: LedgerTransaction) {
        self.lock().history.insert(0, tx);
    }

    pub fn with_trust_line(self, holder: &Address, asset: &IssuedAsset, authorized: bool) -> Self {
        self.set_trust_line(holder, asset, Decimal::zero(), authorized);
        self
    }

    pub fn set_trust_line(
        &self,
        holder: &Address,
        asset: &IssuedAsset,
        balance: Decimal,
        authorized: bool,
    ) {
        self.lock().trust_lines.insert(
            (holder.clone(), asset.currency.clone()),
            TrustLine {
                issuer: asset.issuer.clone(),
                currency: asset.currency.clone(),
                balance,
                authorized,
            },
        );
    }

    /// Payments from `role` validate with `result_code` instead of `tesSUCCESS`.
    pub fn with_failing_role(self, role: WalletRole, result_code: &str) -> Self {
        self.lock()
            .failing_roles
            .insert(role, result_code.to_string());
        self
    }

    /// Payments from `role` fail at the transport level.
    pub fn with_erroring_role(self, role: WalletRole) -> Self {
        self.lock().erroring_roles.insert(role);
        self
    }

    /// Payments from `role` are submitted but never confirmed.
    pub fn with_unconfirmed_role(self, role: WalletRole) -> Self {
        self.lock().unconfirmed_roles.insert(role);
        self
    }

    /// Payments from `role` are submitted but the node's answer is lost.
    pub fn with_unanswered_role(self, role: WalletRole) -> Self {
        self.lock().unanswered_roles.insert(role);
        self
    }

    /// Trust line lookups fail at the transport level.
    pub fn with_trust_line_error(self) -> Self {
        self.lock().trust_line_error = true;
        self
    }

    /// Queue one subscription session. Each `subscribe_payments` call consumes one
    /// session, delivers its transactions and then ends. Once the queue is empty
    /// subscriptions stay open without delivering anything.
    pub fn with_live_session(self, txs: Vec<LedgerTransaction>) -> Self {
        self.lock().live_sessions.push_back(txs);
        self
    }

    pub fn with_amm_pool(self, pool: AmmPool) -> Self {
        self.lock().amm_pool = Some(pool);
        self
    }

    /// Payments submitted so far, in submission order.
    pub fn submitted(&self) -> Vec<PaymentRequest> {
        self.lock().submitted.clone()
    }

    pub fn subscription_count(&self) -> usize {
        self.lock().subscriptions
    }

    /// A validated, successful payment transaction.
    pub fn validated_payment(
        tx_id: &str,
        source: &Address,
        destination: &Address,
        amount: LedgerAmount,
        destination_tag: Option<DestinationTag>,
    ) -> LedgerTransaction {
        LedgerTransaction {
            tx_id: tx_id.to_string(),
            tx_type: "Payment".to_string(),
            source: source.clone(),
            destination: Some(destination.clone()),
            amount: Some(amount),
            destination_tag,
            validated: true,
            result_code: TX_SUCCESS.to_string(),
        }
    }

    fn next_tx_id(state: &mut MockState) -> String {
        state.next_tx += 1;
        format!("MOCKTX{:04}", state.next_tx)
    }
}

#[async_trait]
impl LedgerGateway for MockLedger {
    async fn account_payment_history(
        &self,
        _address: &Address,
        limit: u32,
    ) -> Result<Vec<LedgerTransaction>, LedgerError> {
        Ok(self
            .lock()
            .history
            .iter()
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn submit_payment(&self, request: &PaymentRequest) -> Result<SubmitResult, LedgerError> {
        let mut state = self.lock();
        if state.erroring_roles.contains(&request.from) {
            return Err(LedgerError::Network(format!(
                "{} wallet unreachable",
                request.from
            )));
        }
        state.submitted.push(request.clone());
        if state.unanswered_roles.contains(&request.from) {
            return Err(LedgerError::SubmissionUnknown(
                "connection reset after request was sent".to_string(),
            ));
        }
        if state.unconfirmed_roles.contains(&request.from) {
            let tx_id = Self::next_tx_id(&mut state);
            return Err(LedgerError::ConfirmationTimeout { tx_id });
        }
        let result_code = state
            .failing_roles
            .get(&request.from)
            .cloned()
            .unwrap_or_else(|| TX_SUCCESS.to_string());
        let tx_id = Self::next_tx_id(&mut state);
        Ok(SubmitResult { result_code, tx_id })
    }

    async fn trust_line(
        &self,
        holder: &Address,
        asset: &IssuedAsset,
    ) -> Result<Option<TrustLine>, LedgerError> {
        let state = self.lock();
        if state.trust_line_error {
            return Err(LedgerError::Network("account_lines unavailable".to_string()));
        }
        Ok(state
            .trust_lines
            .get(&(holder.clone(), asset.currency.clone()))
            .filter(|line| line.issuer == asset.issuer)
            .cloned())
    }

    async fn authorize_trust_line(
        &self,
        holder: &Address,
        asset: &IssuedAsset,
    ) -> Result<SubmitResult, LedgerError> {
        let mut state = self.lock();
        if state.erroring_roles.contains(&WalletRole::Issuer) {
            return Err(LedgerError::Network("issuer wallet unreachable".to_string()));
        }
        if let Some(code) = state.failing_roles.get(&WalletRole::Issuer).cloned() {
            let tx_id = Self::next_tx_id(&mut state);
            return Ok(SubmitResult {
                result_code: code,
                tx_id,
            });
        }
        if let Some(line) = state
            .trust_lines
            .get_mut(&(holder.clone(), asset.currency.clone()))
        {
            line.authorized = true;
        }
        let tx_id = Self::next_tx_id(&mut state);
        Ok(SubmitResult {
            result_code: TX_SUCCESS.to_string(),
            tx_id,
        })
    }

    async fn amm_pool(&self, _asset: &IssuedAsset) -> Result<Option<AmmPool>, LedgerError> {
        Ok(self.lock().amm_pool.clone())
    }

    async fn subscribe_payments(&self, _address: &Address) -> Result<TransactionStream, LedgerError> {
        let mut state = self.lock();
        state.subscriptions += 1;
        match state.live_sessions.pop_front() {
            Some(txs) => Ok(futures::stream::iter(txs.into_iter().map(Ok)).boxed()),
            None => Ok(futures::stream::pending().boxed()),
        }
    }
}
