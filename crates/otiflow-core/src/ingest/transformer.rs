use chrono::NaiveDate;

use super::normalizer::{
    self, NormalizationStats, CUSTOMER_ID, DELIVERY_DATE, DELIVERY_QTY, IN_FULL, ON_TIME,
    ORDER_ID, ORDER_QTY, PRODUCT_ID,
};
use super::parser::{CompositeDecoder, Decoder, FileFormat, TransformResult};
use super::record::{FieldValue, Record};

/// Records produced from one attachment.
#[derive(Debug, Clone, Default)]
pub struct TransformOutput {
    pub records: Vec<Record>,
    pub stats: NormalizationStats,
    pub used_sample: bool,
}

impl TransformOutput {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Raw attachment bytes in, cleaned records out.
pub struct Transformer {
    decoder: Box<dyn Decoder>,
}

impl Transformer {
    #[must_use]
    pub fn new() -> Self {
        Self {
            decoder: Box::new(CompositeDecoder::default()),
        }
    }

    #[must_use]
    pub fn with_decoder(mut self, decoder: Box<dyn Decoder>) -> Self {
        self.decoder = decoder;
        self
    }

    /// Empty `data` stands for the built-in sample dataset rather than an error.
    pub fn transform(&self, data: &[u8], filename: &str) -> TransformResult<TransformOutput> {
        if data.is_empty() {
            tracing::info!(filename, "no attachment bytes supplied, using sample dataset");
            let sample = sample_records();
            let rows_read = sample.len();
            let records: Vec<Record> = sample
                .into_iter()
                .filter_map(normalizer::normalize_record)
                .collect();
            return Ok(TransformOutput {
                stats: NormalizationStats {
                    rows_read,
                    rows_dropped: rows_read - records.len(),
                },
                records,
                used_sample: true,
            });
        }

        let format = FileFormat::from_filename(filename)?;
        let table = self.decoder.decode(data, format)?;
        let (records, stats) = normalizer::normalize_table(table);

        tracing::debug!(
            filename,
            %format,
            rows_read = stats.rows_read,
            rows_dropped = stats.rows_dropped,
            "attachment decoded"
        );

        Ok(TransformOutput {
            records,
            stats,
            used_sample: false,
        })
    }
}

impl Default for Transformer {
    fn default() -> Self {
        Self::new()
    }
}

/// Fixed three-order dataset used for demos and tests.
#[must_use]
pub fn sample_records() -> Vec<Record> {
    const ROWS: [(&str, &str, &str, i64, i64, (i32, u32, u32), bool, bool); 3] = [
        ("ORD001", "PROD_A", "CUST_X", 100, 100, (2025, 10, 14), true, true),
        ("ORD002", "PROD_B", "CUST_Y", 50, 48, (2025, 10, 14), false, false),
        ("ORD003", "PROD_A", "CUST_X", 25, 25, (2025, 10, 13), true, true),
    ];

    ROWS.iter()
        .map(|&(order, product, customer, ordered, delivered, (y, m, d), on_time, in_full)| {
            let date = NaiveDate::from_ymd_opt(y, m, d).map_or(FieldValue::Null, FieldValue::Date);
            Record::from([
                (ORDER_ID.to_string(), FieldValue::text(order)),
                (PRODUCT_ID.to_string(), FieldValue::text(product)),
                (CUSTOMER_ID.to_string(), FieldValue::text(customer)),
                (ORDER_QTY.to_string(), FieldValue::Int(ordered)),
                (DELIVERY_QTY.to_string(), FieldValue::Int(delivered)),
                (DELIVERY_DATE.to_string(), date),
                (ON_TIME.to_string(), FieldValue::Int(i64::from(on_time))),
                (IN_FULL.to_string(), FieldValue::Int(i64::from(in_full))),
            ])
        })
        .collect()
}
