//! collaborators/suppression.rs
//! Lista de supresión guardada en SQLite.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Pool, Sqlite, SqliteConnection};

use super::SuppressionOracle;
use crate::models::ts;

pub const REASON_UNSUBSCRIBED: &str = "unsubscribed";
pub const REASON_HARD_BOUNCE: &str = "hard_bounce";

#[derive(Debug, Clone)]
pub struct DbSuppressionOracle {
    db_pool: Pool<Sqlite>,
}

impl DbSuppressionOracle {
    pub fn new(db_pool: Pool<Sqlite>) -> Self {
        Self { db_pool }
    }
}

#[async_trait]
impl SuppressionOracle for DbSuppressionOracle {
    async fn is_suppressed(&self, address: &str) -> Result<bool> {
        let found: Option<(String,)> =
            sqlx::query_as("SELECT address FROM suppressions WHERE address = ?1")
                .bind(normalize_address(address))
                .fetch_optional(&self.db_pool)
                .await
                .context("Failed to query suppression list")?;
        Ok(found.is_some())
    }
}

/// Registra una supresión (idempotente: la primera razón se conserva).
pub async fn record_suppression(
    conn: &mut SqliteConnection,
    address: &str,
    reason: &str,
    now: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO suppressions (address, reason, created_at)
        VALUES (?1, ?2, ?3)
        ON CONFLICT(address) DO NOTHING
        "#,
    )
    .bind(normalize_address(address))
    .bind(reason)
    .bind(ts(now))
    .execute(conn)
    .await
    .context("Failed to record suppression")?;
    Ok(())
}

pub fn normalize_address(address: &str) -> String {
    address.trim().to_ascii_lowercase()
}
