//! Redemption queue operations for the repository.

use crate::domain::{Address, Decimal, Redemption, RedemptionStatus, TimeMs};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use super::{parse_decimal, parse_optional_decimal, Repository};

/// A queued redemption joined with the investor's payout address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedRedemption {
    pub redemption: Redemption,
    pub xrpl_address: Address,
}

impl Repository {
    pub async fn create_redemption(
        &self,
        investor_id: &str,
        token_amount: Decimal,
    ) -> Result<Redemption, sqlx::Error> {
        let redemption = Redemption {
            id: uuid::Uuid::new_v4().to_string(),
            investor_id: investor_id.to_string(),
            token_amount,
            status: RedemptionStatus::Queued,
            nav_price: None,
            usdc_amount: None,
            redemption_tx_id: None,
            requested_at: TimeMs::now(),
            settled_at: None,
        };

        sqlx::query(
            r#"
            INSERT INTO redemptions (id, investor_id, token_amount, status, requested_at)
            VALUES (?, ?, ?, 'queued', ?)
            "#,
        )
        .bind(&redemption.id)
        .bind(&redemption.investor_id)
        .bind(token_amount.to_canonical_string())
        .bind(redemption.requested_at.as_ms())
        .execute(&self.pool)
        .await?;

        Ok(redemption)
    }

    pub async fn get_redemption(&self, id: &str) -> Result<Option<Redemption>, sqlx::Error> {
        let row = sqlx::query("SELECT * FROM redemptions WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(redemption_from_row).transpose()
    }

    /// Queued redemptions, oldest request first.
    pub async fn list_queued_redemptions(&self) -> Result<Vec<QueuedRedemption>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT r.*, i.xrpl_address
            FROM redemptions r
            JOIN investors i ON r.investor_id = i.id
            WHERE r.status = 'queued'
            ORDER BY r.requested_at ASC, r.id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(QueuedRedemption {
                    redemption: redemption_from_row(row)?,
                    xrpl_address: Address::new(row.get("xrpl_address")),
                })
            })
            .collect()
    }

    pub async fn list_redemptions_by_investor(
        &self,
        investor_id: &str,
    ) -> Result<Vec<Redemption>, sqlx::Error> {
        let rows = sqlx::query(
            "SELECT * FROM redemptions WHERE investor_id = ? ORDER BY requested_at DESC, id ASC",
        )
        .bind(investor_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(redemption_from_row).collect()
    }

    /// Settle a queued redemption. Returns `false` if it was not queued.
    pub async fn complete_redemption(
        &self,
        id: &str,
        nav_price: Decimal,
        usdc_amount: Decimal,
        redemption_tx_id: &str,
        settled_at: TimeMs,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE redemptions
            SET status = 'completed', nav_price = ?, usdc_amount = ?,
                redemption_tx_id = ?, settled_at = ?
            WHERE id = ? AND status = 'queued'
            "#,
        )
        .bind(nav_price.to_canonical_string())
        .bind(usdc_amount.to_canonical_string())
        .bind(redemption_tx_id)
        .bind(settled_at.as_ms())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Mark a queued redemption failed. The attempted tx id is kept when there is one.
    pub async fn fail_redemption(
        &self,
        id: &str,
        redemption_tx_id: Option<&str>,
        settled_at: TimeMs,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE redemptions
            SET status = 'failed', redemption_tx_id = ?, settled_at = ?
            WHERE id = ? AND status = 'queued'
            "#,
        )
        .bind(redemption_tx_id)
        .bind(settled_at.as_ms())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Tokens an investor has redeemed (completed) and has waiting in the queue.
    pub async fn redeemed_and_queued_tokens(
        &self,
        investor_id: &str,
    ) -> Result<(Decimal, Decimal), sqlx::Error> {
        let mut redeemed = Decimal::zero();
        let mut queued = Decimal::zero();
        for redemption in self.list_redemptions_by_investor(investor_id).await? {
            match redemption.status {
                RedemptionStatus::Completed => redeemed = redeemed + redemption.token_amount,
                RedemptionStatus::Queued => queued = queued + redemption.token_amount,
                RedemptionStatus::Failed => {}
            }
        }
        Ok((redeemed, queued))
    }
}

fn redemption_from_row(row: &SqliteRow) -> Result<Redemption, sqlx::Error> {
    let id: String = row.get("id");
    let token_amount: String = row.get("token_amount");
    let raw_status: String = row.get("status");
    let status = raw_status
        .parse::<RedemptionStatus>()
        .map_err(|e| sqlx::Error::Decode(e.into()))?;

    Ok(Redemption {
        token_amount: parse_decimal("token_amount", &id, &token_amount),
        nav_price: parse_optional_decimal("nav_price", &id, row.get("nav_price")),
        usdc_amount: parse_optional_decimal("usdc_amount", &id, row.get("usdc_amount")),
        investor_id: row.get("investor_id"),
        status,
        redemption_tx_id: row.get("redemption_tx_id"),
        requested_at: TimeMs::new(row.get("requested_at")),
        settled_at: row.get::<Option<i64>, _>("settled_at").map(TimeMs::new),
        id,
    })
}
