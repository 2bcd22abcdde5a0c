use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
    Pool, Sqlite, Transaction,
};

use crate::{Error, Result};

const INIT_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS workflows (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL,
    name TEXT NOT NULL,
    trigger_subject TEXT NOT NULL,
    trigger_sender TEXT,
    recheck_interval_minutes INTEGER NOT NULL,
    is_active INTEGER NOT NULL DEFAULT 1,
    last_run_status TEXT,
    last_run_at TEXT,
    last_processed_email_id TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_workflows_user ON workflows(user_id);
CREATE INDEX IF NOT EXISTS idx_workflows_active ON workflows(is_active);

CREATE TABLE IF NOT EXISTS workflow_logs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    workflow_id INTEGER NOT NULL,
    user_id INTEGER NOT NULL,
    run_id TEXT NOT NULL,
    logged_at TEXT NOT NULL,
    status TEXT NOT NULL,
    source_filename TEXT,
    rows_inserted INTEGER NOT NULL DEFAULT 0,
    message TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_logs_workflow ON workflow_logs(workflow_id);
CREATE INDEX IF NOT EXISTS idx_logs_user ON workflow_logs(user_id, logged_at);
"#;

/// Handle to the shared SQLite database.
///
/// Cloning is cheap; every clone shares the same connection pool.
#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
}

impl Storage {
    pub async fn open(path: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(&format!("sqlite:{path}"))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        sqlx::query(INIT_SQL).execute(&pool).await?;

        Ok(Self { pool })
    }

    pub async fn open_memory() -> Result<Self> {
        // A single connection that never recycles, otherwise the database vanishes.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;

        sqlx::query(INIT_SQL).execute(&pool).await?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    /// Starts a write transaction holding the write lock from the first statement.
    ///
    /// A deferred transaction that reads first cannot wait for the lock when it
    /// later writes; SQLite fails the upgrade without consulting the busy timeout.
    pub async fn begin(&self) -> Result<Transaction<'static, Sqlite>> {
        Ok(self.pool.begin_with("BEGIN IMMEDIATE").await?)
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

pub(crate) fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| Error::InvalidTimestamp(value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_memory_creates_schema() {
        let storage = Storage::open_memory().await.unwrap();

        let tables: Vec<(String,)> = sqlx::query_as(
            "SELECT name FROM sqlite_master \
             WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )
        .fetch_all(storage.pool())
        .await
        .unwrap();

        let names: Vec<&str> = tables.iter().map(|(n,)| n.as_str()).collect();
        assert_eq!(names, vec!["workflow_logs", "workflows"]);
    }

    #[tokio::test]
    async fn test_open_file_is_reentrant() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("otiflow.db");
        let path = path.to_string_lossy().to_string();

        let first = Storage::open(&path).await.unwrap();
        first.close().await;

        let second = Storage::open(&path).await.unwrap();
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM workflows")
            .fetch_one(second.pool())
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    const INSERT_LOG: &str = "INSERT INTO workflow_logs \
        (workflow_id, user_id, run_id, logged_at, status, message) \
        VALUES (1, 1, 'run', '2025-10-14T08:30:00+00:00', 'INFO', 'm')";

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_write_transactions_wait_for_the_lock() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("otiflow.db");
        let storage = Storage::open(&path.to_string_lossy()).await.unwrap();

        let mut first = storage.begin().await.unwrap();
        sqlx::query(INSERT_LOG).execute(&mut *first).await.unwrap();

        let second = tokio::spawn({
            let storage = storage.clone();
            async move {
                let mut tx = storage.begin().await?;
                let (seen,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM workflow_logs")
                    .fetch_one(&mut *tx)
                    .await?;
                sqlx::query(INSERT_LOG).execute(&mut *tx).await?;
                tx.commit().await?;
                Ok::<i64, Error>(seen)
            }
        });

        tokio::time::sleep(Duration::from_millis(200)).await;
        first.commit().await.unwrap();

        assert_eq!(second.await.unwrap().unwrap(), 1);
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM workflow_logs")
            .fetch_one(storage.pool())
            .await
            .unwrap();
        assert_eq!(count, 2);
    }

    #[test]
    fn test_parse_timestamp() {
        let ts = parse_timestamp("2025-10-14T08:30:00+00:00").unwrap();
        assert_eq!(ts.to_rfc3339(), "2025-10-14T08:30:00+00:00");
        assert!(parse_timestamp("yesterday").is_err());
    }
}
