use serde::{Deserialize, Serialize};
use sqlx::SqliteConnection;

use super::normalizer::ORDER_ID;
use super::record::{FieldValue, Record};
use super::registry::{RelationHandle, TableRegistry};
use super::sales::SalesRecord;
use crate::{storage::Storage, Result};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadReport {
    pub inserted: usize,
    pub skipped: usize,
}

/// Loads validated rows into a workflow relation.
///
/// Rows that fail validation are logged and left out; the rest are written
/// on the caller's connection so they commit or roll back with the run.
pub struct IngestionEngine;

impl IngestionEngine {
    /// Validates every record up front. Failures never stop the batch.
    #[must_use]
    pub fn stage(records: &[Record], tenant_id: i64) -> (Vec<SalesRecord>, usize) {
        let mut staged = Vec::with_capacity(records.len());
        let mut skipped = 0;

        for (index, record) in records.iter().enumerate() {
            match SalesRecord::from_record(tenant_id, record) {
                Ok(sale) => staged.push(sale),
                Err(e) => {
                    skipped += 1;
                    let order_id = record
                        .get(ORDER_ID)
                        .and_then(FieldValue::as_text)
                        .unwrap_or_default();
                    tracing::warn!(
                        row = index,
                        order_id = %order_id,
                        reason = %e,
                        "skipping invalid record"
                    );
                }
            }
        }

        (staged, skipped)
    }

    pub async fn load(
        conn: &mut SqliteConnection,
        records: &[Record],
        tenant_id: i64,
        relation: &RelationHandle,
    ) -> Result<LoadReport> {
        let (staged, skipped) = Self::stage(records, tenant_id);

        let sql = format!(
            "INSERT INTO {} (tenant_id, order_id, product_id, customer_id, order_qty, \
             delivery_qty, delivery_date, on_time, in_full) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            relation.quoted()
        );

        for sale in &staged {
            sqlx::query(&sql)
                .bind(sale.tenant_id)
                .bind(&sale.order_id)
                .bind(&sale.product_id)
                .bind(&sale.customer_id)
                .bind(sale.order_qty)
                .bind(sale.delivery_qty)
                .bind(sale.delivery_date.format("%Y-%m-%d").to_string())
                .bind(sale.on_time)
                .bind(sale.in_full)
                .execute(&mut *conn)
                .await?;
        }

        tracing::debug!(
            relation = %relation,
            tenant_id,
            inserted = staged.len(),
            skipped,
            "batch staged"
        );

        Ok(LoadReport {
            inserted: staged.len(),
            skipped,
        })
    }

    /// Ensures the relation and loads the batch in a transaction of its own.
    pub async fn load_batch(
        storage: &Storage,
        records: &[Record],
        tenant_id: i64,
        workflow_id: i64,
    ) -> Result<LoadReport> {
        let mut tx = storage.begin().await?;
        let relation = TableRegistry::ensure_relation(&mut tx, workflow_id).await?;
        let report = Self::load(&mut tx, records, tenant_id, &relation).await?;
        tx.commit().await?;
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::sample_records;

    #[tokio::test]
    async fn test_invalid_rows_are_skipped_not_fatal() {
        let storage = Storage::open_memory().await.unwrap();
        let mut records = sample_records();
        records[1].remove("customer_id");

        let report = IngestionEngine::load_batch(&storage, &records, 4, 1).await.unwrap();
        assert_eq!(report, LoadReport { inserted: 2, skipped: 1 });

        let rows = TableRegistry::new(&storage).fetch_rows(1, 10).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.record.tenant_id == 4));
        assert_eq!(rows[1].record.order_id, "ORD003");
    }

    #[tokio::test]
    async fn test_rollback_discards_staged_rows() {
        let storage = Storage::open_memory().await.unwrap();

        let mut tx = storage.begin().await.unwrap();
        let relation = TableRegistry::ensure_relation(&mut tx, 2).await.unwrap();
        let report = IngestionEngine::load(&mut tx, &sample_records(), 1, &relation)
            .await
            .unwrap();
        assert_eq!(report.inserted, 3);
        tx.rollback().await.unwrap();

        assert_eq!(TableRegistry::new(&storage).count_rows(2).await.unwrap(), 0);
    }

    #[test]
    fn test_stage_reports_skips() {
        let mut records = sample_records();
        records[0].insert("on_time".into(), FieldValue::text("maybe"));

        let (staged, skipped) = IngestionEngine::stage(&records, 1);
        assert_eq!(staged.len(), 2);
        assert_eq!(skipped, 1);
    }
}
