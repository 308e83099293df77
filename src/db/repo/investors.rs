//! Investor operations for the repository.

use crate::domain::{Address, Investor, TimeMs};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use super::Repository;

impl Repository {
    /// Register an investor. Fails with a unique violation if the email or the
    /// address is already registered.
    pub async fn create_investor(
        &self,
        email: &str,
        xrpl_address: &Address,
    ) -> Result<Investor, sqlx::Error> {
        let now = TimeMs::now();
        let investor = Investor {
            id: uuid::Uuid::new_v4().to_string(),
            email: email.to_string(),
            xrpl_address: xrpl_address.clone(),
            kyc_approved: false,
            trust_line_created: false,
            created_at: now,
            updated_at: now,
        };

        sqlx::query(
            r#"
            INSERT INTO investors (id, email, xrpl_address, kyc_approved, trust_line_created, created_at, updated_at)
            VALUES (?, ?, ?, 0, 0, ?, ?)
            "#,
        )
        .bind(&investor.id)
        .bind(&investor.email)
        .bind(investor.xrpl_address.as_str())
        .bind(now.as_ms())
        .bind(now.as_ms())
        .execute(&self.pool)
        .await?;

        Ok(investor)
    }

    pub async fn get_investor(&self, id: &str) -> Result<Option<Investor>, sqlx::Error> {
        let row = sqlx::query("SELECT * FROM investors WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(investor_from_row))
    }

    pub async fn get_investor_by_email(&self, email: &str) -> Result<Option<Investor>, sqlx::Error> {
        let row = sqlx::query("SELECT * FROM investors WHERE email = ?")
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(investor_from_row))
    }

    pub async fn get_investor_by_address(
        &self,
        address: &Address,
    ) -> Result<Option<Investor>, sqlx::Error> {
        let row = sqlx::query("SELECT * FROM investors WHERE xrpl_address = ?")
            .bind(address.as_str())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(investor_from_row))
    }

    /// Approve KYC. Returns `false` if the investor does not exist.
    pub async fn approve_kyc(&self, id: &str) -> Result<bool, sqlx::Error> {
        let result =
            sqlx::query("UPDATE investors SET kyc_approved = 1, updated_at = ? WHERE id = ?")
                .bind(TimeMs::now().as_ms())
                .bind(id)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn mark_trust_line_created(&self, id: &str) -> Result<bool, sqlx::Error> {
        let result =
            sqlx::query("UPDATE investors SET trust_line_created = 1, updated_at = ? WHERE id = ?")
                .bind(TimeMs::now().as_ms())
                .bind(id)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() == 1)
    }
}

fn investor_from_row(row: &SqliteRow) -> Investor {
    Investor {
        id: row.get("id"),
        email: row.get("email"),
        xrpl_address: Address::new(row.get("xrpl_address")),
        kyc_approved: row.get("kyc_approved"),
        trust_line_created: row.get("trust_line_created"),
        created_at: TimeMs::new(row.get("created_at")),
        updated_at: TimeMs::new(row.get("updated_at")),
    }
}
