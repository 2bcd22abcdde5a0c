use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use sqlx::{Pool, Sqlite};

use crate::ingest::RelationHandle;
use crate::Result;

pub const OTIF_TARGET: f64 = 0.90;
pub const TOP_N: usize = 3;

/// Compound SELECTs are capped at 500 terms by default.
const RELATIONS_PER_QUERY: usize = 100;

/// Raw counts behind the delivery rates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryCounts {
    pub total: i64,
    pub on_time: i64,
    pub in_full: i64,
    pub otif: i64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DeliveryPerformance {
    pub on_time_rate: f64,
    pub in_full_rate: f64,
    pub otif_rate: f64,
    pub total_orders: i64,
}

impl DeliveryPerformance {
    /// Rates are rounded to three decimals and are 0.0 when there are no orders.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn from_counts(counts: DeliveryCounts) -> Self {
        let rate = |count: i64| {
            if counts.total == 0 {
                0.0
            } else {
                round3(count as f64 / counts.total as f64)
            }
        };

        Self {
            on_time_rate: rate(counts.on_time),
            in_full_rate: rate(counts.in_full),
            otif_rate: rate(counts.otif),
            total_orders: counts.total,
        }
    }
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductVolume {
    pub product_id: String,
    pub total_qty: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerOrders {
    pub customer_id: String,
    pub order_count: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KpiSnapshot {
    pub delivery_performance: DeliveryPerformance,
    pub top_ordered_products: Vec<ProductVolume>,
    pub top_ordering_customers: Vec<CustomerOrders>,
}

/// Aggregates over the union of the given relations.
///
/// Callers ensure the relations exist first. An empty slice yields the
/// zero snapshot. Relations are read in chunks so a single statement stays
/// under SQLite's compound-select limit; partial aggregates are summed here.
pub async fn compute_kpis(
    pool: &Pool<Sqlite>,
    relations: &[RelationHandle],
) -> Result<KpiSnapshot> {
    let mut counts = DeliveryCounts::default();
    let mut products: HashMap<String, i64> = HashMap::new();
    let mut customers: HashMap<String, i64> = HashMap::new();

    for chunk in relations.chunks(RELATIONS_PER_QUERY) {
        let source = union_source(chunk);

        let (total, on_time, in_full, otif): (i64, i64, i64, i64) = sqlx::query_as(&format!(
            r#"
            SELECT COUNT(*),
                   COALESCE(SUM(on_time = 1), 0),
                   COALESCE(SUM(in_full = 1), 0),
                   COALESCE(SUM(on_time = 1 AND in_full = 1), 0)
            FROM ({source})
            "#
        ))
        .fetch_one(pool)
        .await?;
        counts.total += total;
        counts.on_time += on_time;
        counts.in_full += in_full;
        counts.otif += otif;

        let rows: Vec<(String, i64)> = sqlx::query_as(&format!(
            "SELECT product_id, SUM(order_qty) FROM ({source}) GROUP BY product_id"
        ))
        .fetch_all(pool)
        .await?;
        for (product_id, qty) in rows {
            *products.entry(product_id).or_default() += qty;
        }

        let rows: Vec<(String, i64)> = sqlx::query_as(&format!(
            "SELECT customer_id, COUNT(order_id) FROM ({source}) GROUP BY customer_id"
        ))
        .fetch_all(pool)
        .await?;
        for (customer_id, orders) in rows {
            *customers.entry(customer_id).or_default() += orders;
        }
    }

    Ok(KpiSnapshot {
        delivery_performance: DeliveryPerformance::from_counts(counts),
        top_ordered_products: top_n(products)
            .into_iter()
            .map(|(product_id, total_qty)| ProductVolume { product_id, total_qty })
            .collect(),
        top_ordering_customers: top_n(customers)
            .into_iter()
            .map(|(customer_id, order_count)| CustomerOrders {
                customer_id,
                order_count,
            })
            .collect(),
    })
}

fn union_source(relations: &[RelationHandle]) -> String {
    relations
        .iter()
        .map(|r| {
            format!(
                "SELECT order_id, product_id, customer_id, order_qty, on_time, in_full FROM {}",
                r.quoted()
            )
        })
        .collect::<Vec<_>>()
        .join(" UNION ALL ")
}

/// Highest totals first, ties broken by id ascending.
fn top_n(totals: HashMap<String, i64>) -> Vec<(String, i64)> {
    let mut ranked: Vec<(String, i64)> = totals.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked.truncate(TOP_N);
    ranked
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnomalyKind {
    OtifDrop,
    Normal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyReport {
    pub flagged: bool,
    #[serde(rename = "type")]
    pub kind: AnomalyKind,
    pub metric: String,
    pub data_point: f64,
    pub message: String,
}

/// Threshold rule over the current snapshot only; no history, no side effects.
#[must_use]
pub fn detect_anomaly(snapshot: &KpiSnapshot) -> AnomalyReport {
    let otif = snapshot.delivery_performance.otif_rate;

    if otif < OTIF_TARGET {
        AnomalyReport {
            flagged: true,
            kind: AnomalyKind::OtifDrop,
            metric: "otif_rate".to_string(),
            data_point: otif,
            message: format!(
                "The overall OTIF Rate is currently {:.1}%, \
                 which is below the target threshold of {:.0}%.",
                otif * 100.0,
                OTIF_TARGET * 100.0
            ),
        }
    } else {
        AnomalyReport {
            flagged: false,
            kind: AnomalyKind::Normal,
            metric: "otif_rate".to_string(),
            data_point: otif,
            message: "All key performance indicators are currently within historical norms."
                .to_string(),
        }
    }
}
