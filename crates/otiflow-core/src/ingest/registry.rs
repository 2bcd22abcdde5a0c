use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sqlx::{Pool, Sqlite, SqliteConnection};

use super::sales::SalesRecord;
use crate::{storage::Storage, Error, Result};

pub const RELATION_PREFIX: &str = "sales_wf_";
pub const DEFAULT_ROW_LIMIT: i64 = 500;

type SalesRow = (i64, i64, String, String, String, i64, i64, String, bool, bool);

/// Names the isolated relation that holds one workflow's ingested rows.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RelationHandle {
    name: String,
}

impl RelationHandle {
    #[must_use]
    pub fn for_workflow(workflow_id: i64) -> Self {
        Self {
            name: format!("{RELATION_PREFIX}{workflow_id}"),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Identifier safe to splice into SQL text.
    #[must_use]
    pub fn quoted(&self) -> String {
        format!("\"{}\"", self.name)
    }
}

impl std::fmt::Display for RelationHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name)
    }
}

/// A stored row together with its insertion id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredSale {
    pub id: i64,
    #[serde(flatten)]
    pub record: SalesRecord,
}

/// Creates and reads per-workflow relations.
#[derive(Clone)]
pub struct TableRegistry {
    pool: Pool<Sqlite>,
}

impl TableRegistry {
    #[must_use]
    pub fn new(storage: &Storage) -> Self {
        Self {
            pool: storage.pool().clone(),
        }
    }

    /// Idempotent; safe to call before every read and write.
    pub async fn ensure_relation(
        conn: &mut SqliteConnection,
        workflow_id: i64,
    ) -> Result<RelationHandle> {
        let handle = RelationHandle::for_workflow(workflow_id);
        let table = handle.quoted();
        let index = format!("\"idx_{}_tenant\"", handle.name());

        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {table} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                tenant_id INTEGER NOT NULL,
                order_id TEXT NOT NULL,
                product_id TEXT NOT NULL,
                customer_id TEXT NOT NULL,
                order_qty INTEGER NOT NULL,
                delivery_qty INTEGER NOT NULL,
                delivery_date TEXT NOT NULL,
                on_time INTEGER NOT NULL,
                in_full INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS {index} ON {table}(tenant_id);
            "#
        ))
        .execute(&mut *conn)
        .await?;

        Ok(handle)
    }

    pub async fn ensure(&self, workflow_id: i64) -> Result<RelationHandle> {
        let mut conn = self.pool.acquire().await?;
        Self::ensure_relation(&mut conn, workflow_id).await
    }

    pub async fn ensure_all(&self, workflow_ids: &[i64]) -> Result<Vec<RelationHandle>> {
        let mut conn = self.pool.acquire().await?;
        let mut handles = Vec::with_capacity(workflow_ids.len());
        for id in workflow_ids {
            handles.push(Self::ensure_relation(&mut conn, *id).await?);
        }
        Ok(handles)
    }


    /// Rows in insertion order, creating the relation first if needed.
    pub async fn fetch_rows(&self, workflow_id: i64, limit: i64) -> Result<Vec<StoredSale>> {
        let handle = self.ensure(workflow_id).await?;
        let rows: Vec<SalesRow> = sqlx::query_as(&format!(
            "SELECT id, tenant_id, order_id, product_id, customer_id, order_qty, delivery_qty, \
             delivery_date, on_time, in_full FROM {} ORDER BY id LIMIT ?",
            handle.quoted()
        ))
        .bind(limit.max(1))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(parse_sales_row).collect()
    }

    pub async fn count_rows(&self, workflow_id: i64) -> Result<i64> {
        let handle = self.ensure(workflow_id).await?;
        let (count,): (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM {}", handle.quoted()))
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

fn parse_sales_row(row: SalesRow) -> Result<StoredSale> {
    let (
        id,
        tenant_id,
        order_id,
        product_id,
        customer_id,
        order_qty,
        delivery_qty,
        delivery_date,
        on_time,
        in_full,
    ) = row;

    let delivery_date = NaiveDate::parse_from_str(&delivery_date, "%Y-%m-%d")
        .map_err(|_| Error::InvalidTimestamp(delivery_date.clone()))?;

    Ok(StoredSale {
        id,
        record: SalesRecord {
            tenant_id,
            order_id,
            product_id,
            customer_id,
            order_qty,
            delivery_qty,
            delivery_date,
            on_time,
            in_full,
        },
    })
}
