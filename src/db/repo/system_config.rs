//! Operational flags stored as key/value pairs.

use crate::domain::TimeMs;
use sqlx::Row;

use super::Repository;

pub const IPO_PHASE_KEY: &str = "ipo_phase";
pub const POOL_CREATED_KEY: &str = "pool_created";

impl Repository {
    pub async fn get_config_value(&self, key: &str) -> Result<Option<String>, sqlx::Error> {
        let row = sqlx::query("SELECT value FROM system_config WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get("value")))
    }

    pub async fn set_config_value(&self, key: &str, value: &str) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO system_config (key, value, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(TimeMs::now().as_ms())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Purchases are accepted while the IPO phase is active. Unset means active.
    pub async fn is_ipo_active(&self) -> Result<bool, sqlx::Error> {
        Ok(self
            .get_config_value(IPO_PHASE_KEY)
            .await?
            .map(|v| v == "active")
            .unwrap_or(true))
    }

    pub async fn is_pool_created(&self) -> Result<bool, sqlx::Error> {
        Ok(self.get_config_value(POOL_CREATED_KEY).await?.as_deref() == Some("true"))
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::setup_test_db;
    use super::*;

    #[tokio::test]
    async fn test_flags_and_upsert() {
        let (repo, _temp) = setup_test_db().await;
        assert!(repo.is_ipo_active().await.unwrap());
        assert!(!repo.is_pool_created().await.unwrap());

        repo.set_config_value(IPO_PHASE_KEY, "closed").await.unwrap();
        repo.set_config_value(POOL_CREATED_KEY, "true").await.unwrap();
        assert!(!repo.is_ipo_active().await.unwrap());
        assert!(repo.is_pool_created().await.unwrap());

        repo.set_config_value(IPO_PHASE_KEY, "active").await.unwrap();
        assert_eq!(
            repo.get_config_value(IPO_PHASE_KEY).await.unwrap().as_deref(),
            Some("active")
        );
    }
}
