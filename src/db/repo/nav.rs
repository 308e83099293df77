//! NAV history operations for the repository.

use crate::domain::{NavRecord, TimeMs};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use super::{parse_decimal, parse_optional_decimal, Repository};

impl Repository {
    /// Append a NAV calculation. `record.id` is ignored; the stored id is returned
    /// in the result.
    pub async fn record_nav(&self, record: &NavRecord) -> Result<NavRecord, sqlx::Error> {
        let result = sqlx::query(
            r#"
            INSERT INTO nav_history (
                nav_per_token, total_fund_value, total_tokens_outstanding,
                custody_balance, pool_usdc_reserve, pool_token_reserve, calculated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.nav_per_token.to_canonical_string())
        .bind(record.total_fund_value.to_canonical_string())
        .bind(record.total_tokens_outstanding.to_canonical_string())
        .bind(record.custody_balance.map(|d| d.to_canonical_string()))
        .bind(record.pool_usdc_reserve.map(|d| d.to_canonical_string()))
        .bind(record.pool_token_reserve.map(|d| d.to_canonical_string()))
        .bind(record.calculated_at.as_ms())
        .execute(&self.pool)
        .await?;

        Ok(NavRecord {
            id: result.last_insert_rowid(),
            ..record.clone()
        })
    }

    pub async fn latest_nav(&self) -> Result<Option<NavRecord>, sqlx::Error> {
        let row = sqlx::query(
            "SELECT * FROM nav_history ORDER BY calculated_at DESC, id DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(nav_from_row))
    }

    pub async fn nav_history(&self, limit: i64) -> Result<Vec<NavRecord>, sqlx::Error> {
        let rows = sqlx::query(
            "SELECT * FROM nav_history ORDER BY calculated_at DESC, id DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(nav_from_row).collect())
    }
}

fn nav_from_row(row: &SqliteRow) -> NavRecord {
    let id: i64 = row.get("id");
    let key = id.to_string();
    let required = |field: &'static str| {
        let raw: String = row.get(field);
        parse_decimal(field, &key, &raw)
    };
    NavRecord {
        id,
        nav_per_token: required("nav_per_token"),
        total_fund_value: required("total_fund_value"),
        total_tokens_outstanding: required("total_tokens_outstanding"),
        custody_balance: parse_optional_decimal("custody_balance", &key, row.get("custody_balance")),
        pool_usdc_reserve: parse_optional_decimal(
            "pool_usdc_reserve",
            &key,
            row.get("pool_usdc_reserve"),
        ),
        pool_token_reserve: parse_optional_decimal(
            "pool_token_reserve",
            &key,
            row.get("pool_token_reserve"),
        ),
        calculated_at: TimeMs::new(row.get("calculated_at")),
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::setup_test_db;
    use super::*;
    use crate::domain::Decimal;
    use std::str::FromStr;

    fn nav(per_token: &str, at: i64) -> NavRecord {
        NavRecord {
            id: 0,
            nav_per_token: Decimal::from_str(per_token).unwrap(),
            total_fund_value: Decimal::from(1000u64),
            total_tokens_outstanding: Decimal::from(1000u64),
            custody_balance: None,
            pool_usdc_reserve: Some(Decimal::from(500u64)),
            pool_token_reserve: None,
            calculated_at: TimeMs::new(at),
        }
    }

    #[tokio::test]
    async fn test_latest_nav_by_calculation_time() {
        let (repo, _temp) = setup_test_db().await;
        assert!(repo.latest_nav().await.unwrap().is_none());

        repo.record_nav(&nav("1.10", 2000)).await.unwrap();
        let first = repo.record_nav(&nav("1.02", 1000)).await.unwrap();
        assert!(first.id > 0);

        let latest = repo.latest_nav().await.unwrap().unwrap();
        assert_eq!(latest.nav_per_token, Decimal::from_str("1.1").unwrap());
        assert_eq!(latest.pool_usdc_reserve, Some(Decimal::from(500u64)));
        assert_eq!(repo.nav_history(10).await.unwrap().len(), 2);
    }
}
