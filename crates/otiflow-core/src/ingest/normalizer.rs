use chrono::{DateTime, NaiveDate, NaiveDateTime};

use super::parser::RawTable;
use super::record::{FieldValue, Record};

pub const ORDER_ID: &str = "order_id";
pub const PRODUCT_ID: &str = "product_id";
pub const CUSTOMER_ID: &str = "customer_id";
pub const ORDER_QTY: &str = "order_qty";
pub const DELIVERY_QTY: &str = "delivery_qty";
pub const DELIVERY_DATE: &str = "delivery_date";
pub const ON_TIME: &str = "on_time";
pub const IN_FULL: &str = "in_full";

/// Rows without these never reach the caller.
pub const IDENTITY_FIELDS: [&str; 2] = [ORDER_ID, PRODUCT_ID];

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%m/%d/%Y",
    "%m-%d-%Y",
    "%d.%m.%Y",
    "%Y%m%d",
    "%d %b %Y",
    "%d %B %Y",
    "%b %d, %Y",
    "%B %d, %Y",
    "%b %d %Y",
];

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
];

/// Lower-cases and swaps spaces for underscores. Applying it twice is a no-op.
#[must_use]
pub fn normalize_field_name(name: &str) -> String {
    name.to_lowercase().replace(' ', "_")
}

#[must_use]
pub fn parse_date_lenient(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.date_naive());
    }

    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(value, fmt).ok())
        .or_else(|| {
            DATETIME_FORMATS
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
                .map(|dt| dt.date())
        })
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NormalizationStats {
    pub rows_read: usize,
    pub rows_dropped: usize,
}

/// Turns a decoded table into cleaned records.
#[must_use]
pub fn normalize_table(table: RawTable) -> (Vec<Record>, NormalizationStats) {
    let headers: Vec<String> = table.headers.iter().map(|h| normalize_field_name(h)).collect();
    let mut stats = NormalizationStats {
        rows_read: table.rows.len(),
        rows_dropped: 0,
    };

    let mut records = Vec::with_capacity(table.rows.len());
    for row in table.rows {
        let mut record = Record::new();
        let mut cells = row.into_iter();
        for header in &headers {
            let value = cells.next().unwrap_or(FieldValue::Null);
            if !header.is_empty() {
                record.insert(header.clone(), value);
            }
        }

        match normalize_record(record) {
            Some(record) => records.push(record),
            None => stats.rows_dropped += 1,
        }
    }

    (records, stats)
}

/// Coerces known fields in place; `None` when an identity field is missing.
#[must_use]
pub fn normalize_record(record: Record) -> Option<Record> {
    let mut record: Record = record
        .into_iter()
        .map(|(name, value)| (normalize_field_name(&name), value))
        .collect();

    if let Some(value) = record.get_mut(DELIVERY_DATE) {
        *value = value.as_date().map_or(FieldValue::Null, FieldValue::Date);
    }

    if let Some(value) = record.get_mut(ORDER_QTY) {
        if value.is_null() {
            *value = FieldValue::Int(0);
        } else if let Some(qty) = value.as_int() {
            *value = FieldValue::Int(qty);
        }
    }

    for field in [ORDER_ID, PRODUCT_ID, CUSTOMER_ID] {
        if let Some(value) = record.get_mut(field) {
            *value = value.as_text().map_or(FieldValue::Null, FieldValue::Text);
        }
    }

    let has_identity = IDENTITY_FIELDS
        .iter()
        .all(|field| record.get(*field).is_some_and(|v| !v.is_null()));

    has_identity.then_some(record)
}
