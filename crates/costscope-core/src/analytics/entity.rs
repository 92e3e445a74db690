//! Flat entity tables and filter values

use std::collections::HashSet;

use crate::decode::{DecodedRow, FieldValue};
use crate::models::{EntityRef, EntityRow, EntityTable, FilterValueColumn, FilterValues};
use crate::schema::{BillingField, UNALLOCATED};

fn entity_row(row: &DecodedRow) -> EntityRow {
    let mut entity = EntityRow::default();
    for (field, value) in row.iter() {
        let key = field.alias().to_string();
        match value {
            FieldValue::Reference(r) => {
                entity.keys.entry(key).or_insert_with(|| r.clone());
            }
            FieldValue::Double(v) => {
                entity.metrics.insert(key, *v);
            }
            FieldValue::Integer(v) => {
                entity.counts.insert(key, *v);
            }
            FieldValue::Timestamp(v) => {
                entity.times.insert(key, *v);
            }
            FieldValue::Null => {}
        }
    }
    entity
}

/// One row per decoded row, keyed by field alias, in database order
pub fn assemble_table(rows: &[DecodedRow], fields: &[BillingField]) -> EntityTable {
    EntityTable {
        fields: fields.to_vec(),
        rows: rows.iter().map(entity_row).collect(),
    }
}

/// Rows of the unallocated-cost query labelled `Unallocated` on every
/// drill-down dimension they were not grouped by
pub fn unallocated_rows(rows: &[DecodedRow], drilldown: &[BillingField]) -> Vec<EntityRow> {
    rows.iter()
        .map(|row| {
            let mut entity = entity_row(row);
            for field in drilldown {
                entity
                    .keys
                    .entry(field.alias().to_string())
                    .or_insert_with(|| EntityRef::raw(*field, UNALLOCATED));
            }
            entity
        })
        .collect()
}

/// Distinct values per dimension column, in first-seen order
pub fn assemble_filter_values(rows: &[DecodedRow], fields: &[BillingField], total: i64) -> FilterValues {
    let columns = fields
        .iter()
        .map(|field| {
            let mut seen = HashSet::new();
            let values = rows
                .iter()
                .filter_map(|row| row.reference(*field))
                .filter(|r| seen.insert(r.id.clone()))
                .cloned()
                .collect();
            FilterValueColumn {
                field: *field,
                values,
            }
        })
        .collect();
    FilterValues { columns, total }
}

/// Count returned by the total-count query
pub fn total_count(rows: &[DecodedRow]) -> i64 {
    rows.first()
        .and_then(|row| row.integer(BillingField::Count))
        .unwrap_or(0)
}
