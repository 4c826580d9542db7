//! Input validation: turns a raw `Dataset` into a `ValidDataset`.
//!
//! Downstream components only accept `ValidDataset`, so the checks below run
//! exactly once per submission.

use std::collections::BTreeSet;
use std::sync::Arc;

use super::{Dataset, DatasetSchema, Record};
use crate::error::ValidationError;

/// A dataset that passed `validate`. Cloning is cheap (inner `Arc`).
#[derive(Debug, Clone)]
pub struct ValidDataset {
    records: Arc<Vec<Record>>,
    columns: Arc<Vec<String>>,
}

impl ValidDataset {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Always false: validation rejects empty datasets.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn record(&self, index: usize) -> Option<&Record> {
        self.records.get(index)
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    /// Column names shared by every record, in sorted order.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c == name)
    }

    /// Numeric values of a column, skipping nulls. `None` if the column holds
    /// any non-numeric, non-null value.
    pub fn numeric_values(&self, column: &str) -> Option<Vec<f64>> {
        let mut values = Vec::with_capacity(self.records.len());
        for record in self.records.iter() {
            match record.get(column) {
                Some(value) if value.is_null() => continue,
                Some(value) => values.push(value.as_f64()?),
                None => return None,
            }
        }
        Some(values)
    }
}

/// Checks a dataset against a schema and returns the first violation found.
pub fn validate(dataset: Dataset, schema: &DatasetSchema) -> Result<ValidDataset, ValidationError> {
    if dataset.is_empty() {
        return Err(ValidationError::Empty);
    }

    let records = dataset.into_records();
    let expected: BTreeSet<&String> = records[0].keys().collect();

    for (row, record) in records.iter().enumerate().skip(1) {
        let found: BTreeSet<&String> = record.keys().collect();
        if found != expected {
            return Err(ValidationError::ColumnSetMismatch {
                row,
                expected: expected.iter().map(|c| c.to_string()).collect(),
                found: found.iter().map(|c| c.to_string()).collect(),
            });
        }
    }

    for spec in &schema.columns {
        if spec.required && !expected.contains(&spec.name) {
            return Err(ValidationError::MissingColumn {
                column: spec.name.clone(),
            });
        }
    }

    for (row, record) in records.iter().enumerate() {
        for spec in &schema.columns {
            let Some(value) = record.get(&spec.name) else {
                continue;
            };
            if value.is_null() {
                if !spec.nullable {
                    return Err(ValidationError::NullValue {
                        row,
                        column: spec.name.clone(),
                    });
                }
                continue;
            }
            if !spec.column_type.accepts(value) {
                return Err(ValidationError::TypeMismatch {
                    row,
                    column: spec.name.clone(),
                    expected: spec.column_type,
                    found: value.kind(),
                });
            }
        }
    }

    let columns: Vec<String> = expected.into_iter().cloned().collect();
    log::debug!(
        "Validated dataset: {} records, {} columns",
        records.len(),
        columns.len()
    );

    Ok(ValidDataset {
        records: Arc::new(records),
        columns: Arc::new(columns),
    })
}
