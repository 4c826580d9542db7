//! Tabular input model: records of scalar values keyed by column name.

pub mod validator;

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ValidationError};

pub use validator::{validate, ValidDataset};

/// One cell of a record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScalarValue {
    Null,
    Bool(bool),
    Integer(i64),
    Number(f64),
    Text(String),
}

impl ScalarValue {
    /// Short name of the value's kind, used in validation messages.
    pub fn kind(&self) -> &'static str {
        match self {
            ScalarValue::Null => "null",
            ScalarValue::Bool(_) => "boolean",
            ScalarValue::Integer(_) => "integer",
            ScalarValue::Number(_) => "number",
            ScalarValue::Text(_) => "text",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, ScalarValue::Null)
    }

    /// Numeric view of the value. Text is never coerced.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ScalarValue::Integer(i) => Some(*i as f64),
            ScalarValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Null => Some(ScalarValue::Null),
            serde_json::Value::Bool(b) => Some(ScalarValue::Bool(*b)),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Some(ScalarValue::Integer(i)),
                None => n.as_f64().map(ScalarValue::Number),
            },
            serde_json::Value::String(s) => Some(ScalarValue::Text(s.clone())),
            serde_json::Value::Array(_) | serde_json::Value::Object(_) => None,
        }
    }
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalarValue::Null => Ok(()),
            ScalarValue::Bool(b) => write!(f, "{}", b),
            ScalarValue::Integer(i) => write!(f, "{}", i),
            ScalarValue::Number(n) => write!(f, "{}", n),
            ScalarValue::Text(s) => f.write_str(s),
        }
    }
}

pub type Record = BTreeMap<String, ScalarValue>;

/// Expected type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Text,
    Integer,
    Number,
    Boolean,
    Any,
}

impl ColumnType {
    /// Whether a non-null value fits this column type. `Number` accepts integers.
    pub fn accepts(&self, value: &ScalarValue) -> bool {
        match (self, value) {
            (ColumnType::Any, _) => true,
            (ColumnType::Text, ScalarValue::Text(_)) => true,
            (ColumnType::Integer, ScalarValue::Integer(_)) => true,
            (ColumnType::Number, ScalarValue::Integer(_) | ScalarValue::Number(_)) => true,
            (ColumnType::Boolean, ScalarValue::Bool(_)) => true,
            _ => false,
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ColumnType::Text => "text",
            ColumnType::Integer => "integer",
            ColumnType::Number => "number",
            ColumnType::Boolean => "boolean",
            ColumnType::Any => "any",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    #[serde(rename = "type", default = "default_column_type")]
    pub column_type: ColumnType,
    #[serde(default = "default_true")]
    pub required: bool,
    #[serde(default)]
    pub nullable: bool,
}

fn default_column_type() -> ColumnType {
    ColumnType::Any
}

fn default_true() -> bool {
    true
}

impl ColumnSpec {
    pub fn new(name: &str, column_type: ColumnType) -> Self {
        Self {
            name: name.to_string(),
            column_type,
            required: true,
            nullable: false,
        }
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }
}

/// Columns the engine expects. Columns not listed are accepted as `any`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatasetSchema {
    pub columns: Vec<ColumnSpec>,
}

impl DatasetSchema {
    pub fn new(columns: Vec<ColumnSpec>) -> Self {
        Self { columns }
    }

    pub fn column(&self, name: &str) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| c.name == name)
    }
}

/// Raw, unvalidated rows as handed over by the record-retrieval collaborator.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    records: Vec<Record>,
}

impl Dataset {
    pub fn from_records(records: Vec<Record>) -> Self {
        Self { records }
    }

    /// Parses a JSON array of flat objects.
    pub fn from_json_str(content: &str) -> Result<Self, ValidationError> {
        let value: serde_json::Value =
            serde_json::from_str(content).map_err(|e| ValidationError::InvalidJson {
                reason: e.to_string(),
            })?;

        let rows = match value {
            serde_json::Value::Array(rows) => rows,
            _ => {
                return Err(ValidationError::InvalidJson {
                    reason: "top-level value must be an array of records".to_string(),
                })
            }
        };

        let mut records = Vec::with_capacity(rows.len());
        for (row, item) in rows.iter().enumerate() {
            let object = item
                .as_object()
                .ok_or(ValidationError::NotAnObject { row })?;
            let mut record = Record::new();
            for (column, raw) in object {
                let value =
                    ScalarValue::from_json(raw).ok_or_else(|| ValidationError::NonScalarValue {
                        row,
                        column: column.clone(),
                    })?;
                record.insert(column.clone(), value);
            }
            records.push(record);
        }

        Ok(Self { records })
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, crate::error::SmartBatchError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
            path: path.to_path_buf(),
            source: e,
        })?;
        Ok(Self::from_json_str(&content)?)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub(crate) fn into_records(self) -> Vec<Record> {
        self.records
    }
}

impl From<Vec<Record>> for Dataset {
    fn from(records: Vec<Record>) -> Self {
        Self::from_records(records)
    }
}
