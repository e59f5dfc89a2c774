//! Persisted per-alert run state, so the scheduler can resume interval
//! tracking across restarts instead of firing every alert immediately on
//! startup.
//!
//! Grounded on `dwctl::probes::db::ProbeManager`'s `sqlx::query_as` CRUD
//! style against a SQLite-backed store; the embedded `alerts.db` filename and
//! single `alert_runtime` table mirror the source's `RunLedger` persistence.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;

use crate::errors::Result;

/// Tracks when each alert last ran, so the scheduler can compute "is this
/// alert due" across process restarts.
#[async_trait]
pub trait RunLedger: Send + Sync {
    async fn last_run(&self, alert_name: &str) -> Result<Option<DateTime<Utc>>>;
    async fn update_last_run(&self, alert_name: &str, at: DateTime<Utc>) -> Result<()>;
}

pub struct SqliteRunLedger {
    pool: SqlitePool,
}

impl SqliteRunLedger {
    /// Open (creating if absent) the SQLite database at `path`.
    pub async fn open(path: &str) -> Result<Self> {
        let url = format!("sqlite://{path}?mode=rwc");
        let pool = SqlitePoolOptions::new().max_connections(5).connect(&url).await?;
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS alert_runtime (
                alert_name TEXT PRIMARY KEY,
                last_run TEXT NOT NULL
            )",
        )
        .execute(&pool)
        .await?;
        Ok(Self { pool })
    }

    #[cfg(test)]
    pub async fn in_memory() -> Result<Self> {
        Self::open(":memory:").await
    }
}

#[async_trait]
impl RunLedger for SqliteRunLedger {
    async fn last_run(&self, alert_name: &str) -> Result<Option<DateTime<Utc>>> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT last_run FROM alert_runtime WHERE alert_name = ?")
                .bind(alert_name)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.and_then(|(raw,)| DateTime::parse_from_rfc3339(&raw).ok().map(|dt| dt.with_timezone(&Utc))))
    }

    async fn update_last_run(&self, alert_name: &str, at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            "INSERT INTO alert_runtime (alert_name, last_run) VALUES (?, ?)
             ON CONFLICT(alert_name) DO UPDATE SET last_run = excluded.last_run",
        )
        .bind(alert_name)
        .bind(at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_and_reads_back_last_run() {
        let ledger = SqliteRunLedger::in_memory().await.unwrap();
        assert!(ledger.last_run("cpu_high").await.unwrap().is_none());

        let now = Utc::now();
        ledger.update_last_run("cpu_high", now).await.unwrap();
        let read_back = ledger.last_run("cpu_high").await.unwrap().unwrap();
        assert_eq!(read_back.timestamp(), now.timestamp());
    }

    #[tokio::test]
    async fn update_overwrites_previous_value() {
        let ledger = SqliteRunLedger::in_memory().await.unwrap();
        let first = Utc::now();
        let second = first + chrono::Duration::seconds(60);
        ledger.update_last_run("cpu_high", first).await.unwrap();
        ledger.update_last_run("cpu_high", second).await.unwrap();
        let read_back = ledger.last_run("cpu_high").await.unwrap().unwrap();
        assert_eq!(read_back.timestamp(), second.timestamp());
    }
}
