use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::normalizer::{
    CUSTOMER_ID, DELIVERY_DATE, DELIVERY_QTY, IN_FULL, ON_TIME, ORDER_ID, ORDER_QTY, PRODUCT_ID,
};
use super::record::{FieldValue, Record};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordError {
    #[error("missing field `{0}`")]
    MissingField(&'static str),
    #[error("invalid value for `{field}`: {value}")]
    InvalidField { field: &'static str, value: String },
}

/// A validated delivery row, tagged with the tenant that owns it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SalesRecord {
    pub tenant_id: i64,
    pub order_id: String,
    pub product_id: String,
    pub customer_id: String,
    pub order_qty: i64,
    pub delivery_qty: i64,
    pub delivery_date: NaiveDate,
    pub on_time: bool,
    pub in_full: bool,
}

impl SalesRecord {
    /// OTIF holds only when both flags hold.
    #[must_use]
    pub const fn is_otif(&self) -> bool {
        self.on_time && self.in_full
    }

    pub fn from_record(tenant_id: i64, record: &Record) -> Result<Self, RecordError> {
        Ok(Self {
            tenant_id,
            order_id: text_field(record, ORDER_ID)?,
            product_id: text_field(record, PRODUCT_ID)?,
            customer_id: text_field(record, CUSTOMER_ID)?,
            order_qty: quantity_field(record, ORDER_QTY)?,
            delivery_qty: quantity_field(record, DELIVERY_QTY)?,
            delivery_date: convert(record, DELIVERY_DATE, FieldValue::as_date)?,
            on_time: convert(record, ON_TIME, FieldValue::as_bool)?,
            in_full: convert(record, IN_FULL, FieldValue::as_bool)?,
        })
    }
}

fn present<'a>(record: &'a Record, field: &'static str) -> Result<&'a FieldValue, RecordError> {
    record
        .get(field)
        .filter(|v| !v.is_null())
        .ok_or(RecordError::MissingField(field))
}

fn convert<T>(
    record: &Record,
    field: &'static str,
    f: impl Fn(&FieldValue) -> Option<T>,
) -> Result<T, RecordError> {
    let value = present(record, field)?;
    f(value).ok_or_else(|| RecordError::InvalidField {
        field,
        value: value.to_string(),
    })
}

fn text_field(record: &Record, field: &'static str) -> Result<String, RecordError> {
    convert(record, field, FieldValue::as_text)
}

fn quantity_field(record: &Record, field: &'static str) -> Result<i64, RecordError> {
    let qty = convert(record, field, FieldValue::as_int)?;
    if qty < 0 {
        return Err(RecordError::InvalidField {
            field,
            value: qty.to_string(),
        });
    }
    Ok(qty)
}
