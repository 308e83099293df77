//! Purchase operations for the repository.
//!
//! Status transitions are conditional updates: each statement names the status
//! it expects to move from, so a stale writer changes nothing.

use crate::domain::{Decimal, DestinationTag, Purchase, PurchaseStatus, TimeMs};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tracing::{debug, warn};

use super::{is_unique_violation, parse_decimal, parse_optional_decimal, Repository};

/// Tag draws per purchase before giving up.
const MAX_TAG_ATTEMPTS: u32 = 8;

const PURCHASE_COLUMNS: &str = r#"
    id, investor_id, usdc_amount, destination_tag, status, deposit_tx_id,
    forward_tx_id, issue_tx_id, token_amount, created_at, completed_at
"#;

impl Repository {
    /// Create a `pending` purchase with a fresh destination tag.
    ///
    /// The tag is derived from the new purchase id. If it collides with a live
    /// purchase the next attempt's tag is tried.
    pub async fn create_purchase(
        &self,
        investor_id: &str,
        usdc_amount: Decimal,
    ) -> Result<Purchase, sqlx::Error> {
        let id = uuid::Uuid::new_v4().to_string();
        let mut attempt = 0;
        loop {
            let purchase = Purchase {
                id: id.clone(),
                investor_id: investor_id.to_string(),
                usdc_amount,
                destination_tag: DestinationTag::derive(&id, attempt),
                status: PurchaseStatus::Pending,
                deposit_tx_id: None,
                forward_tx_id: None,
                issue_tx_id: None,
                token_amount: None,
                created_at: TimeMs::now(),
                completed_at: None,
            };

            match self.insert_purchase(&purchase).await {
                Ok(()) => return Ok(purchase),
                Err(e) if is_unique_violation(&e) && attempt + 1 < MAX_TAG_ATTEMPTS => {
                    warn!(
                        purchase_id = %id,
                        destination_tag = %purchase.destination_tag,
                        attempt,
                        "Destination tag collision, drawing another"
                    );
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Insert a purchase as given. Fails if its tag is held by a live purchase.
    pub async fn insert_purchase(&self, purchase: &Purchase) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO purchases (
                id, investor_id, usdc_amount, destination_tag, status, deposit_tx_id,
                forward_tx_id, issue_tx_id, token_amount, created_at, completed_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&purchase.id)
        .bind(&purchase.investor_id)
        .bind(purchase.usdc_amount.to_canonical_string())
        .bind(i64::from(purchase.destination_tag.value()))
        .bind(purchase.status.as_str())
        .bind(purchase.deposit_tx_id.as_deref())
        .bind(purchase.forward_tx_id.as_deref())
        .bind(purchase.issue_tx_id.as_deref())
        .bind(purchase.token_amount.map(|d| d.to_canonical_string()))
        .bind(purchase.created_at.as_ms())
        .bind(purchase.completed_at.map(|t| t.as_ms()))
        .execute(&self.pool)
        .await?;

        debug!(purchase_id = %purchase.id, destination_tag = %purchase.destination_tag, "Purchase created");
        Ok(())
    }

    pub async fn get_purchase(&self, id: &str) -> Result<Option<Purchase>, sqlx::Error> {
        let row = sqlx::query(&format!("SELECT {} FROM purchases WHERE id = ?", PURCHASE_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(purchase_from_row).transpose()
    }

    /// The `pending` purchase holding `tag`, if any.
    pub async fn find_pending_by_tag(
        &self,
        tag: DestinationTag,
    ) -> Result<Option<Purchase>, sqlx::Error> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM purchases WHERE destination_tag = ? AND status = 'pending' LIMIT 1",
            PURCHASE_COLUMNS
        ))
        .bind(i64::from(tag.value()))
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(purchase_from_row).transpose()
    }

    /// The purchase (any status) that recorded `tx_id` as its deposit.
    pub async fn find_by_deposit_tx(&self, tx_id: &str) -> Result<Option<Purchase>, sqlx::Error> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM purchases WHERE deposit_tx_id = ? LIMIT 1",
            PURCHASE_COLUMNS
        ))
        .bind(tx_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(purchase_from_row).transpose()
    }

    pub async fn list_purchases_by_status(
        &self,
        status: PurchaseStatus,
    ) -> Result<Vec<Purchase>, sqlx::Error> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM purchases WHERE status = ? ORDER BY created_at ASC, id ASC",
            PURCHASE_COLUMNS
        ))
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(purchase_from_row).collect()
    }

    pub async fn list_pending_purchases(&self) -> Result<Vec<Purchase>, sqlx::Error> {
        self.list_purchases_by_status(PurchaseStatus::Pending).await
    }

    /// Purchases whose deposit was recorded but that never completed.
    pub async fn list_incomplete_purchases(&self) -> Result<Vec<Purchase>, sqlx::Error> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {} FROM purchases
            WHERE deposit_tx_id IS NOT NULL AND status != 'completed'
            ORDER BY created_at ASC, id ASC
            "#,
            PURCHASE_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(purchase_from_row).collect()
    }

    pub async fn list_purchases_by_investor(
        &self,
        investor_id: &str,
    ) -> Result<Vec<Purchase>, sqlx::Error> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM purchases WHERE investor_id = ? ORDER BY created_at DESC, id ASC",
            PURCHASE_COLUMNS
        ))
        .bind(investor_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(purchase_from_row).collect()
    }

    /// Atomically record `tx_id` as the deposit of a `pending` purchase and move
    /// it to `forwarded`.
    ///
    /// Returns `false` when another writer got there first: the purchase is no
    /// longer pending, already has a deposit, or `tx_id` is recorded elsewhere.
    pub async fn claim_deposit(&self, purchase_id: &str, tx_id: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE purchases
            SET status = 'forwarded', deposit_tx_id = ?
            WHERE id = ? AND status = 'pending' AND deposit_tx_id IS NULL
            "#,
        )
        .bind(tx_id)
        .bind(purchase_id)
        .execute(&self.pool)
        .await;

        match result {
            Ok(done) => Ok(done.rows_affected() == 1),
            Err(e) if is_unique_violation(&e) => {
                warn!(purchase_id = %purchase_id, tx_id = %tx_id, "Deposit already recorded on another purchase");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Record the custody forward. Only while the purchase is `forwarded`.
    pub async fn record_forward_tx(
        &self,
        purchase_id: &str,
        forward_tx_id: &str,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE purchases SET forward_tx_id = ? WHERE id = ? AND status = 'forwarded'",
        )
        .bind(forward_tx_id)
        .bind(purchase_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn mark_purchase_completed(
        &self,
        purchase_id: &str,
        issue_tx_id: &str,
        token_amount: Decimal,
        completed_at: TimeMs,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE purchases
            SET status = 'completed', issue_tx_id = ?, token_amount = ?, completed_at = ?
            WHERE id = ? AND status = 'forwarded'
            "#,
        )
        .bind(issue_tx_id)
        .bind(token_amount.to_canonical_string())
        .bind(completed_at.as_ms())
        .bind(purchase_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Move a `forwarded` purchase to `failed`, keeping every recorded tx id.
    pub async fn mark_purchase_failed(&self, purchase_id: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE purchases SET status = 'failed' WHERE id = ? AND status = 'forwarded'",
        )
        .bind(purchase_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Move a `forwarded` purchase to `failed` with the issuance tx that was
    /// submitted but never confirmed, so operators can look it up on the ledger.
    pub async fn mark_issuance_unconfirmed(
        &self,
        purchase_id: &str,
        issue_tx_id: &str,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE purchases SET status = 'failed', issue_tx_id = ?
            WHERE id = ? AND status = 'forwarded'
            "#,
        )
        .bind(issue_tx_id)
        .bind(purchase_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Tokens delivered to an investor by completed purchases.
    pub async fn sum_tokens_issued_to(&self, investor_id: &str) -> Result<Decimal, sqlx::Error> {
        let rows = sqlx::query(
            "SELECT id, token_amount FROM purchases WHERE investor_id = ? AND status = 'completed'",
        )
        .bind(investor_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .filter_map(|row| {
                let id: String = row.get("id");
                parse_optional_decimal("token_amount", &id, row.get("token_amount"))
            })
            .sum())
    }
}

fn purchase_from_row(row: &SqliteRow) -> Result<Purchase, sqlx::Error> {
    let id: String = row.get("id");
    let usdc_amount: String = row.get("usdc_amount");
    let raw_tag: i64 = row.get("destination_tag");
    let raw_status: String = row.get("status");

    let destination_tag = u32::try_from(raw_tag)
        .map(DestinationTag::new)
        .map_err(|e| sqlx::Error::Decode(Box::new(e)))?;
    let status = raw_status
        .parse::<PurchaseStatus>()
        .map_err(|e| sqlx::Error::Decode(e.into()))?;

    Ok(Purchase {
        usdc_amount: parse_decimal("usdc_amount", &id, &usdc_amount),
        token_amount: parse_optional_decimal("token_amount", &id, row.get("token_amount")),
        investor_id: row.get("investor_id"),
        destination_tag,
        status,
        deposit_tx_id: row.get("deposit_tx_id"),
        forward_tx_id: row.get("forward_tx_id"),
        issue_tx_id: row.get("issue_tx_id"),
        created_at: TimeMs::new(row.get("created_at")),
        completed_at: row.get::<Option<i64>, _>("completed_at").map(TimeMs::new),
        id,
    })
}
