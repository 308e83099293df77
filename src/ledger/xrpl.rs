//! XRP Ledger JSON-RPC gateway.
//!
//! Talks to a rippled node over JSON-RPC. Transactions are signed by the node
//! (`submit` with `secret`), so the node must be trusted with the fund's seeds.
//! The payment subscription is a cursor over `account_tx` polled at a fixed
//! interval, which yields only transactions from validated ledgers.

use super::{
    AmmPool, LedgerError, LedgerGateway, LedgerTransaction, LedgerWallets, PaymentRequest,
    SubmitResult, TransactionStream, TrustLine, WalletRole,
};
use crate::domain::{Address, Decimal, DestinationTag, IssuedAsset, LedgerAmount};
use async_trait::async_trait;
use backoff::future::retry;
use backoff::ExponentialBackoff;
use futures::StreamExt;
use reqwest::Client;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// `tfSetfAuth` flag on TrustSet.
const TF_SET_AUTH: u32 = 0x0001_0000;
/// Page size used while following the subscription cursor.
const POLL_PAGE_SIZE: u32 = 200;
/// Ledgers a submitted transaction may take to validate before it expires.
const LAST_LEDGER_OFFSET: i64 = 20;
/// Result reported for a transaction that passed its `LastLedgerSequence`.
const TX_EXPIRED: &str = "tefMAX_LEDGER";

#[derive(Debug, Clone)]
pub struct XrplGateway {
    client: Client,
    rpc_url: String,
    wallets: LedgerWallets,
    poll_interval: Duration,
    confirmation_timeout: Duration,
    confirmation_poll: Duration,
}

impl XrplGateway {
    pub fn new(rpc_url: String, wallets: LedgerWallets, poll_interval: Duration) -> Self {
        Self {
            client: Client::new(),
            rpc_url,
            wallets,
            poll_interval,
            confirmation_timeout: Duration::from_secs(120),
            confirmation_poll: Duration::from_secs(1),
        }
    }

    pub fn with_confirmation_timeout(mut self, timeout: Duration) -> Self {
        self.confirmation_timeout = timeout;
        self
    }

    pub fn with_confirmation_poll(mut self, interval: Duration) -> Self {
        self.confirmation_poll = interval;
        self
    }

    /// POST a read-only JSON-RPC request and return its `result` object.
    ///
    /// Transport errors, 429 and 5xx are retried with exponential backoff.
    async fn rpc(&self, method: &str, params: Value) -> Result<Value, LedgerError> {
        check_result(self.rpc_raw(method, params).await?)
    }

    /// Like [`Self::rpc`], but an RPC-level error comes back as the `result`
    /// object so callers can read its extra fields.
    async fn rpc_raw(&self, method: &str, params: Value) -> Result<Value, LedgerError> {
        let payload = json!({ "method": method, "params": [params] });
        let backoff = ExponentialBackoff {
            max_elapsed_time: Some(Duration::from_secs(30)),
            ..Default::default()
        };

        let body = retry(backoff, || async {
            self.post(&payload).await.map_err(|e| {
                if e.is_transient() {
                    backoff::Error::transient(e)
                } else {
                    backoff::Error::permanent(e)
                }
            })
        })
        .await?;

        body.get("result")
            .cloned()
            .ok_or_else(|| LedgerError::Parse("missing result".to_string()))
    }

    async fn post(&self, payload: &Value) -> Result<Value, LedgerError> {
        let response = self
            .client
            .post(&self.rpc_url)
            .json(payload)
            .send()
            .await
            .map_err(|e| LedgerError::Network(e.to_string()))?;

        let status = response.status();
        if status == 429 {
            return Err(LedgerError::RateLimited);
        }
        if status.is_server_error() {
            return Err(LedgerError::Http {
                status: status.as_u16(),
                message: "Server error".to_string(),
            });
        }
        if !status.is_success() {
            return Err(LedgerError::Http {
                status: status.as_u16(),
                message: "Client error".to_string(),
            });
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| LedgerError::Parse(e.to_string()))
    }

    /// Send `submit` exactly once.
    ///
    /// The node signs with a fresh Sequence on every call, so a resent request
    /// is a second payment. Anything that leaves open whether the node took the
    /// first one is reported as [`LedgerError::SubmissionUnknown`].
    async fn submit_once(&self, params: Value) -> Result<Value, LedgerError> {
        let payload = json!({ "method": "submit", "params": [params] });
        let response = match self.client.post(&self.rpc_url).json(&payload).send().await {
            Ok(response) => response,
            Err(e) if e.is_connect() => return Err(LedgerError::Network(e.to_string())),
            Err(e) => return Err(LedgerError::SubmissionUnknown(e.to_string())),
        };

        let status = response.status();
        if status == 429 {
            return Err(LedgerError::RateLimited);
        }
        if status.is_server_error() {
            return Err(LedgerError::SubmissionUnknown(format!(
                "node answered HTTP {}",
                status.as_u16()
            )));
        }
        if !status.is_success() {
            return Err(LedgerError::Http {
                status: status.as_u16(),
                message: "Client error".to_string(),
            });
        }

        let body = response
            .json::<Value>()
            .await
            .map_err(|e| LedgerError::SubmissionUnknown(e.to_string()))?;
        let result = body
            .get("result")
            .cloned()
            .ok_or_else(|| LedgerError::SubmissionUnknown("missing result".to_string()))?;
        check_result(result)
    }

    /// One `account_tx` call. Returns the parsed transactions, the highest ledger
    /// the node searched, and the pagination marker.
    async fn account_tx(
        &self,
        address: &Address,
        ledger_index_min: i64,
        limit: u32,
        forward: bool,
        marker: Option<Value>,
    ) -> Result<(Vec<LedgerTransaction>, i64, Option<Value>), LedgerError> {
        let mut params = json!({
            "account": address.as_str(),
            "ledger_index_min": ledger_index_min,
            "ledger_index_max": -1,
            "limit": limit,
            "forward": forward,
        });
        if let Some(marker) = marker {
            params["marker"] = marker;
        }

        let result = self.rpc("account_tx", params).await?;
        let ledger_index_max = result
            .get("ledger_index_max")
            .and_then(Value::as_i64)
            .unwrap_or(ledger_index_min);
        let entries = result
            .get("transactions")
            .and_then(Value::as_array)
            .ok_or_else(|| LedgerError::Parse("Expected transactions array".to_string()))?;

        let mut txs = Vec::with_capacity(entries.len());
        for entry in entries {
            match parse_account_tx_entry(entry) {
                Ok(tx) => txs.push(tx),
                Err(e) => warn!("Failed to parse account_tx entry: {}", e),
            }
        }

        Ok((txs, ledger_index_max, result.get("marker").cloned()))
    }

    /// All validated transactions of `address` from `ledger_index_min` onward,
    /// oldest first. Follows markers.
    async fn account_tx_since(
        &self,
        address: &Address,
        ledger_index_min: i64,
    ) -> Result<(Vec<LedgerTransaction>, i64), LedgerError> {
        let mut all = Vec::new();
        let mut marker = None;
        let mut max_seen = ledger_index_min - 1;
        loop {
            let (txs, ledger_index_max, next) = self
                .account_tx(address, ledger_index_min, POLL_PAGE_SIZE, true, marker)
                .await?;
            all.extend(txs);
            max_seen = max_seen.max(ledger_index_max);
            match next {
                Some(m) => marker = Some(m),
                None => break,
            }
        }
        Ok((all, max_seen))
    }

    /// Sign with `role`'s seed, submit, and wait for a validated result.
    async fn sign_and_submit(
        &self,
        role: WalletRole,
        mut tx_json: Value,
    ) -> Result<SubmitResult, LedgerError> {
        let keys = self.wallets.get(role);
        let current = self
            .rpc("ledger_current", json!({}))
            .await?
            .get("ledger_current_index")
            .and_then(Value::as_i64)
            .ok_or_else(|| LedgerError::Parse("missing ledger_current_index".to_string()))?;
        let last_ledger = current + LAST_LEDGER_OFFSET;
        tx_json["Account"] = json!(keys.address.as_str());
        tx_json["LastLedgerSequence"] = json!(last_ledger);

        let result = self
            .submit_once(json!({
                "tx_json": tx_json,
                "secret": keys.seed.expose(),
                "fee_mult_max": 1000,
            }))
            .await?;

        let engine_result = str_field(&result, "engine_result")
            .ok_or_else(|| LedgerError::SubmissionUnknown("missing engine_result".to_string()))?
            .to_string();
        let tx_id = result
            .get("tx_json")
            .and_then(|t| str_field(t, "hash"))
            .ok_or_else(|| LedgerError::SubmissionUnknown("missing tx_json.hash".to_string()))?
            .to_string();

        debug!(tx_id = %tx_id, engine_result = %engine_result, wallet = %role, last_ledger, "Submitted transaction");

        // tem/tef/tel results never reach a ledger.
        if ["tem", "tef", "tel"]
            .iter()
            .any(|prefix| engine_result.starts_with(prefix))
        {
            return Ok(SubmitResult {
                result_code: engine_result,
                tx_id,
            });
        }

        self.wait_for_validation(&tx_id, current, last_ledger).await
    }

    /// Poll `tx` until the transaction is validated or can no longer be.
    ///
    /// Once every ledger up to `last_ledger` is validated and searched without
    /// finding it, the transaction has expired and the result is `tefMAX_LEDGER`.
    async fn wait_for_validation(
        &self,
        tx_id: &str,
        first_ledger: i64,
        last_ledger: i64,
    ) -> Result<SubmitResult, LedgerError> {
        let started = Instant::now();
        while started.elapsed() < self.confirmation_timeout {
            tokio::time::sleep(self.confirmation_poll).await;
            let params = json!({
                "transaction": tx_id,
                "min_ledger": first_ledger,
                "max_ledger": last_ledger,
            });
            let result = match self.rpc_raw("tx", params).await {
                Ok(result) => result,
                Err(e) => {
                    warn!(tx_id = %tx_id, error = %e, "Transaction lookup failed, still waiting");
                    continue;
                }
            };

            if result.get("validated").and_then(Value::as_bool) == Some(true) {
                let code = result
                    .get("meta")
                    .and_then(|m| str_field(m, "TransactionResult"))
                    .ok_or_else(|| LedgerError::ConfirmationTimeout {
                        tx_id: tx_id.to_string(),
                    })?;
                return Ok(SubmitResult {
                    result_code: code.to_string(),
                    tx_id: tx_id.to_string(),
                });
            }
            if str_field(&result, "error") == Some("txnNotFound")
                && result.get("searched_all").and_then(Value::as_bool) == Some(true)
            {
                warn!(tx_id = %tx_id, last_ledger, "Transaction expired without validating");
                return Ok(SubmitResult {
                    result_code: TX_EXPIRED.to_string(),
                    tx_id: tx_id.to_string(),
                });
            }
        }
        Err(LedgerError::ConfirmationTimeout {
            tx_id: tx_id.to_string(),
        })
    }
}

#[async_trait]
impl LedgerGateway for XrplGateway {
    async fn account_payment_history(
        &self,
        address: &Address,
        limit: u32,
    ) -> Result<Vec<LedgerTransaction>, LedgerError> {
        debug!(account = %address, limit, "Fetching account history");
        let (txs, _, _) = self.account_tx(address, -1, limit, false, None).await?;
        Ok(txs)
    }

    async fn submit_payment(&self, request: &PaymentRequest) -> Result<SubmitResult, LedgerError> {
        let mut tx_json = json!({
            "TransactionType": "Payment",
            "Destination": request.destination.as_str(),
            "Amount": request.amount.to_json(),
        });
        if let Some(tag) = request.destination_tag {
            tx_json["DestinationTag"] = json!(tag.value());
        }
        self.sign_and_submit(request.from, tx_json).await
    }

    async fn trust_line(
        &self,
        holder: &Address,
        asset: &IssuedAsset,
    ) -> Result<Option<TrustLine>, LedgerError> {
        let result = self
            .rpc(
                "account_lines",
                json!({
                    "account": holder.as_str(),
                    "peer": asset.issuer.as_str(),
                    "ledger_index": "validated",
                }),
            )
            .await?;

        let lines = result
            .get("lines")
            .and_then(Value::as_array)
            .ok_or_else(|| LedgerError::Parse("Expected lines array".to_string()))?;

        for line in lines {
            if str_field(line, "account") == Some(asset.issuer.as_str())
                && str_field(line, "currency") == Some(asset.currency.as_str())
            {
                let balance = str_field(line, "balance")
                    .and_then(|b| Decimal::from_str_canonical(b).ok())
                    .unwrap_or_default();
                return Ok(Some(TrustLine {
                    issuer: asset.issuer.clone(),
                    currency: asset.currency.clone(),
                    balance,
                    authorized: line
                        .get("peer_authorized")
                        .and_then(Value::as_bool)
                        .unwrap_or(false),
                }));
            }
        }
        Ok(None)
    }

    async fn authorize_trust_line(
        &self,
        holder: &Address,
        asset: &IssuedAsset,
    ) -> Result<SubmitResult, LedgerError> {
        let tx_json = json!({
            "TransactionType": "TrustSet",
            "LimitAmount": {
                "currency": asset.currency,
                "issuer": holder.as_str(),
                "value": "0",
            },
            "Flags": TF_SET_AUTH,
        });
        self.sign_and_submit(WalletRole::Issuer, tx_json).await
    }

    async fn amm_pool(&self, asset: &IssuedAsset) -> Result<Option<AmmPool>, LedgerError> {
        let result = match self
            .rpc(
                "amm_info",
                json!({
                    "asset": { "currency": asset.currency, "issuer": asset.issuer.as_str() },
                    "asset2": { "currency": "XRP" },
                    "ledger_index": "validated",
                }),
            )
            .await
        {
            Ok(result) => result,
            Err(LedgerError::Rpc { ref error, .. }) if error == "actNotFound" => return Ok(None),
            Err(e) => return Err(e),
        };

        let Some(amm) = result.get("amm") else {
            return Ok(None);
        };
        parse_amm(amm, asset).map(Some)
    }

    async fn subscribe_payments(&self, address: &Address) -> Result<TransactionStream, LedgerError> {
        // Start after the latest validated ledger; earlier history is the catch-up scan's job.
        let (_, cursor, _) = self.account_tx(address, -1, 1, false, None).await?;
        info!(account = %address, from_ledger = cursor + 1, "Payment subscription started");

        let state = PollState {
            gateway: self.clone(),
            account: address.clone(),
            cursor,
            buffer: VecDeque::new(),
            first_poll: true,
        };

        let stream = futures::stream::unfold(state, |mut st| async move {
            loop {
                if let Some(tx) = st.buffer.pop_front() {
                    return Some((Ok(tx), st));
                }
                if !st.first_poll {
                    tokio::time::sleep(st.gateway.poll_interval).await;
                }
                st.first_poll = false;
                match st.gateway.account_tx_since(&st.account, st.cursor + 1).await {
                    Ok((txs, max_seen)) => {
                        st.cursor = st.cursor.max(max_seen);
                        st.buffer.extend(txs);
                    }
                    Err(e) => return Some((Err(e), st)),
                }
            }
        });

        Ok(stream.boxed())
    }
}

struct PollState {
    gateway: XrplGateway,
    account: Address,
    cursor: i64,
    buffer: VecDeque<LedgerTransaction>,
    first_poll: bool,
}

/// Turn an RPC-level `"status": "error"` result into [`LedgerError::Rpc`].
fn check_result(result: Value) -> Result<Value, LedgerError> {
    if result.get("status").and_then(Value::as_str) == Some("error") {
        return Err(LedgerError::Rpc {
            error: str_field(&result, "error").unwrap_or("unknown").to_string(),
            message: str_field(&result, "error_message")
                .unwrap_or_default()
                .to_string(),
        });
    }
    Ok(result)
}

fn str_field<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(Value::as_str)
}

/// Parse one `account_tx` entry. Handles both the `tx` (API v1) and `tx_json`
/// (API v2) layouts.
fn parse_account_tx_entry(entry: &Value) -> Result<LedgerTransaction, LedgerError> {
    let tx = entry
        .get("tx_json")
        .or_else(|| entry.get("tx"))
        .ok_or_else(|| LedgerError::Parse("Missing tx field".to_string()))?;
    let meta = entry.get("meta").cloned().unwrap_or(Value::Null);

    let tx_id = str_field(entry, "hash")
        .or_else(|| str_field(tx, "hash"))
        .ok_or_else(|| LedgerError::Parse("Missing hash field".to_string()))?
        .to_string();
    let tx_type = str_field(tx, "TransactionType")
        .ok_or_else(|| LedgerError::Parse("Missing TransactionType field".to_string()))?
        .to_string();
    let source = str_field(tx, "Account")
        .map(|s| Address::new(s.to_string()))
        .ok_or_else(|| LedgerError::Parse("Missing Account field".to_string()))?;

    // Prefer what was actually delivered; partial payments can deliver less than Amount.
    let amount = meta
        .get("delivered_amount")
        .and_then(LedgerAmount::from_json)
        .or_else(|| tx.get("DeliverMax").and_then(LedgerAmount::from_json))
        .or_else(|| tx.get("Amount").and_then(LedgerAmount::from_json));

    let destination_tag = tx
        .get("DestinationTag")
        .and_then(Value::as_u64)
        .and_then(|t| u32::try_from(t).ok())
        .map(DestinationTag::new);

    Ok(LedgerTransaction {
        tx_id,
        tx_type,
        source,
        destination: str_field(tx, "Destination").map(|s| Address::new(s.to_string())),
        amount,
        destination_tag,
        validated: entry.get("validated").and_then(Value::as_bool).unwrap_or(false),
        result_code: str_field(&meta, "TransactionResult")
            .unwrap_or_default()
            .to_string(),
    })
}

fn parse_amm(amm: &Value, asset: &IssuedAsset) -> Result<AmmPool, LedgerError> {
    let account = str_field(amm, "account")
        .map(|s| Address::new(s.to_string()))
        .ok_or_else(|| LedgerError::Parse("Missing amm.account".to_string()))?;
    let first = amm
        .get("amount")
        .and_then(LedgerAmount::from_json)
        .ok_or_else(|| LedgerError::Parse("Invalid amm.amount".to_string()))?;
    let second = amm
        .get("amount2")
        .and_then(LedgerAmount::from_json)
        .ok_or_else(|| LedgerError::Parse("Invalid amm.amount2".to_string()))?;

    let is_token = |a: &LedgerAmount| {
        matches!(a, LedgerAmount::Issued { currency, .. } if *currency == asset.currency)
    };
    let (token, native) = if is_token(&first) {
        (first, second)
    } else {
        (second, first)
    };

    Ok(AmmPool {
        account,
        token_reserve: token.normalize(),
        native_reserve: native.normalize(),
        trading_fee: amm
            .get("trading_fee")
            .and_then(Value::as_u64)
            .and_then(|f| u32::try_from(f).ok())
            .unwrap_or(0),
    })
}
