//! Store initialization: pool, pragmas and the embedded schema.

use sqlx::sqlite::{SqliteConnection, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use tracing::{debug, info};

/// Open (or create) the SQLite store at `db_path` and apply the schema.
pub async fn init_db(db_path: &str) -> Result<SqlitePool, sqlx::Error> {
    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).ok();
        }
    }

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .after_connect(|conn, _meta| Box::pin(async move { configure_pragmas_conn(conn).await }))
        .connect(&format!("sqlite:{}?mode=rwc", db_path))
        .await?;

    run_migrations(&pool).await?;

    info!(path = %db_path, "Store initialized");
    Ok(pool)
}

/// Apply `schema.sql`. Every statement is `IF NOT EXISTS`, so reruns are no-ops.
async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    let schema_sql = include_str!("schema.sql");

    let mut applied = 0usize;
    for statement in schema_sql.split(';') {
        let trimmed = statement.trim();
        if !trimmed.is_empty() {
            sqlx::query(trimmed).execute(pool).await?;
            applied += 1;
        }
    }

    debug!(statements = applied, "Schema applied");
    Ok(())
}

async fn configure_pragmas_conn(conn: &mut SqliteConnection) -> Result<(), sqlx::Error> {
    use sqlx::Row;

    sqlx::query("PRAGMA foreign_keys = ON")
        .execute(&mut *conn)
        .await?;

    // journal_mode returns the mode actually set
    let row = sqlx::query("PRAGMA journal_mode = WAL")
        .fetch_one(&mut *conn)
        .await?;
    let journal_mode: String = row.get(0);
    debug!(journal_mode = %journal_mode, "SQLite connection configured");

    sqlx::query("PRAGMA busy_timeout = 5000")
        .execute(&mut *conn)
        .await?;
    sqlx::query("PRAGMA synchronous = NORMAL")
        .execute(&mut *conn)
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn temp_pool() -> (SqlitePool, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir
            .path()
            .join("nested/fund.db")
            .to_string_lossy()
            .to_string();
        let pool = init_db(&db_path).await.expect("init_db failed");
        (pool, temp_dir)
    }

    #[tokio::test]
    async fn test_init_db_creates_tables() {
        let (pool, _temp) = temp_pool().await;

        let tables: Vec<(String,)> = sqlx::query_as(
            "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )
        .fetch_all(&pool)
        .await
        .expect("query failed");
        let names: Vec<&str> = tables.iter().map(|t| t.0.as_str()).collect();
        assert_eq!(
            names,
            vec!["investors", "nav_history", "purchases", "redemptions", "system_config"]
        );
    }

    #[tokio::test]
    async fn test_migrations_idempotent() {
        let (pool, _temp) = temp_pool().await;
        run_migrations(&pool)
            .await
            .expect("second migration run failed");
    }

    #[tokio::test]
    async fn test_live_tag_index_is_partial() {
        let (pool, _temp) = temp_pool().await;

        sqlx::query(
            "INSERT INTO investors (id, email, xrpl_address, created_at, updated_at) VALUES ('inv', 'a@b.co', 'rA', 0, 0)",
        )
        .execute(&pool)
        .await
        .unwrap();

        let insert = |id: &'static str, status: &'static str| {
            sqlx::query(
                "INSERT INTO purchases (id, investor_id, usdc_amount, destination_tag, status, created_at) VALUES (?, 'inv', '1', 42, ?, 0)",
            )
            .bind(id)
            .bind(status)
        };

        insert("p1", "completed").execute(&pool).await.unwrap();
        insert("p2", "pending").execute(&pool).await.unwrap();
        assert!(insert("p3", "forwarded").execute(&pool).await.is_err());
    }

    #[tokio::test]
    async fn test_pragmas_configured() {
        let (pool, _temp) = temp_pool().await;

        let result: (i64,) = sqlx::query_as("PRAGMA foreign_keys")
            .fetch_one(&pool)
            .await
            .expect("query failed");
        assert_eq!(result.0, 1);

        let result: (String,) = sqlx::query_as("PRAGMA journal_mode")
            .fetch_one(&pool)
            .await
            .expect("query failed");
        assert!(
            matches!(result.0.as_str(), "wal" | "delete"),
            "unexpected journal_mode: {}",
            result.0
        );
    }
}
