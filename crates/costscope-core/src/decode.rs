//! Typed decoding of result rows
//!
//! Each column is read according to the data type of the output field at the
//! same position. Doubles are rounded to cents and opaque ids are resolved to
//! display names through the [`EntityNameCache`].

use chrono::{DateTime, Utc};

use crate::cache::EntityNameCache;
use crate::error::{Error, Result};
use crate::models::EntityRef;
use crate::schema::{BillingField, DataType};

/// Raw column value as returned by an executor
#[derive(Debug, Clone, PartialEq)]
pub enum ScalarValue {
    /// SQL NULL
    Null,
    /// Text
    Text(String),
    /// 64-bit integer
    Integer(i64),
    /// Double precision
    Double(f64),
    /// Timestamp in UTC
    Timestamp(DateTime<Utc>),
}

impl ScalarValue {
    fn kind(&self) -> &'static str {
        match self {
            Self::Null => "NULL",
            Self::Text(_) => "STRING",
            Self::Integer(_) => "INTEGER",
            Self::Double(_) => "DOUBLE",
            Self::Timestamp(_) => "TIMESTAMP",
        }
    }
}

/// One raw row, columns in select order
pub type ScalarRow = Vec<ScalarValue>;

/// Decoded column value
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// SQL NULL
    Null,
    /// Dimension value with its display name
    Reference(EntityRef),
    /// Count
    Integer(i64),
    /// Amount rounded to cents
    Double(f64),
    /// Epoch millis
    Timestamp(i64),
}

/// Round half up to two decimals; negative halves move toward zero
pub fn round_cents(value: f64) -> f64 {
    (value * 100.0 + 0.5).floor() / 100.0
}

/// Decoded row
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DecodedRow {
    values: Vec<(BillingField, FieldValue)>,
}

impl DecodedRow {
    /// Row from already decoded values
    pub fn new(values: Vec<(BillingField, FieldValue)>) -> Self {
        Self { values }
    }

    /// Fields and values in select order
    pub fn iter(&self) -> impl Iterator<Item = &(BillingField, FieldValue)> {
        self.values.iter()
    }

    /// First value of `field`
    pub fn get(&self, field: BillingField) -> Option<&FieldValue> {
        self.values.iter().find(|(f, _)| *f == field).map(|(_, v)| v)
    }

    /// Double value of `field`, `None` when absent or null
    pub fn double(&self, field: BillingField) -> Option<f64> {
        match self.get(field) {
            Some(FieldValue::Double(v)) => Some(*v),
            _ => None,
        }
    }

    /// Integer value of `field`
    pub fn integer(&self, field: BillingField) -> Option<i64> {
        match self.get(field) {
            Some(FieldValue::Integer(v)) => Some(*v),
            _ => None,
        }
    }

    /// Timestamp of `field` in epoch millis
    pub fn timestamp(&self, field: BillingField) -> Option<i64> {
        match self.get(field) {
            Some(FieldValue::Timestamp(v)) => Some(*v),
            _ => None,
        }
    }

    /// Entity reference of `field`
    pub fn reference(&self, field: BillingField) -> Option<&EntityRef> {
        match self.get(field) {
            Some(FieldValue::Reference(r)) => Some(r),
            _ => None,
        }
    }
}

/// Decodes rows for one compiled query
#[derive(Debug, Clone, Copy)]
pub struct RowDecoder<'a> {
    fields: &'a [BillingField],
    names: &'a EntityNameCache,
}

impl<'a> RowDecoder<'a> {
    /// Decoder for rows selecting `fields`
    pub fn new(fields: &'a [BillingField], names: &'a EntityNameCache) -> Self {
        Self { fields, names }
    }

    /// Decode one row
    pub async fn decode(&self, row: ScalarRow) -> Result<DecodedRow> {
        if row.len() != self.fields.len() {
            return Err(Error::decode(
                "row",
                format!("{} columns", self.fields.len()),
                format!("{} columns", row.len()),
            ));
        }

        let mut values = Vec::with_capacity(row.len());
        for (&field, scalar) in self.fields.iter().zip(row) {
            let value = self.decode_value(field, scalar).await?;
            values.push((field, value));
        }
        Ok(DecodedRow { values })
    }

    async fn decode_value(&self, field: BillingField, scalar: ScalarValue) -> Result<FieldValue> {
        let expected = field.data_type();
        let value = match (expected, scalar) {
            (_, ScalarValue::Null) => FieldValue::Null,
            (DataType::Double, ScalarValue::Double(v)) => FieldValue::Double(round_cents(v)),
            (DataType::Double, ScalarValue::Integer(v)) => FieldValue::Double(round_cents(v as f64)),
            (DataType::Integer, ScalarValue::Integer(v)) => FieldValue::Integer(v),
            (DataType::Timestamp, ScalarValue::Timestamp(t)) => {
                FieldValue::Timestamp(t.timestamp_millis())
            }
            (DataType::String, ScalarValue::Text(id)) => {
                let name = self.names.resolve(field, &id).await;
                FieldValue::Reference(EntityRef::new(id, name, field.entity_type()))
            }
            (_, other) => {
                return Err(Error::decode(
                    field.alias(),
                    expected.to_string(),
                    other.kind(),
                ))
            }
        };
        Ok(value)
    }
}

/// Finite, non-restartable sequence of decoded rows
pub struct DecodedRows<'a> {
    rows: std::vec::IntoIter<ScalarRow>,
    decoder: RowDecoder<'a>,
}

impl<'a> DecodedRows<'a> {
    /// Sequence over `rows`
    pub fn new(rows: Vec<ScalarRow>, decoder: RowDecoder<'a>) -> Self {
        Self {
            rows: rows.into_iter(),
            decoder,
        }
    }

    /// Number of rows not yet decoded
    pub fn remaining(&self) -> usize {
        self.rows.len()
    }

    /// Decode the next row
    pub async fn next_row(&mut self) -> Option<Result<DecodedRow>> {
        let row = self.rows.next()?;
        Some(self.decoder.decode(row).await)
    }

    /// Decode every remaining row, stopping at the first error
    pub async fn try_collect(mut self) -> Result<Vec<DecodedRow>> {
        let mut decoded = Vec::with_capacity(self.remaining());
        while let Some(row) = self.next_row().await {
            decoded.push(row?);
        }
        Ok(decoded)
    }
}
