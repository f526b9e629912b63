//! Typed engine values and column definitions
//!
//! Rows are stored as a positional `Vec<Value>` matching the table's column
//! list. Every write is checked against the column types first.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};

/// A single engine value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Boolean(bool),
    BigInt(i64),
    Double(f64),
    Float(f32),
    Varchar(String),
    /// JSON document kept as raw text
    Json(String),
    FloatArray(Vec<f32>),
    List(Vec<Value>),
    Struct(Vec<(String, Value)>),
    /// Timezone-naive timestamp (legacy schema)
    Timestamp(NaiveDateTime),
    TimestampTz(DateTime<Utc>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Short type name for error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "NULL",
            Value::Boolean(_) => "BOOLEAN",
            Value::BigInt(_) => "BIGINT",
            Value::Double(_) => "DOUBLE",
            Value::Float(_) => "FLOAT",
            Value::Varchar(_) => "VARCHAR",
            Value::Json(_) => "JSON",
            Value::FloatArray(_) => "FLOAT[]",
            Value::List(_) => "LIST",
            Value::Struct(_) => "STRUCT",
            Value::Timestamp(_) => "TIMESTAMP",
            Value::TimestampTz(_) => "TIMESTAMPTZ",
        }
    }

    /// Timestamp value as UTC, treating naive values as UTC
    pub fn as_utc(&self) -> Option<DateTime<Utc>> {
        match self {
            Value::TimestampTz(ts) => Some(*ts),
            Value::Timestamp(naive) => Some(crate::temporal::assume_utc(*naive)),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Varchar(s) => Some(s),
            _ => None,
        }
    }
}

/// A stored row
pub type Row = Vec<Value>;

/// Column types understood by the engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnType {
    Varchar,
    Text,
    VarcharList,
    FloatArray(usize),
    Timestamp,
    TimestampTz,
    Json,
}

impl std::fmt::Display for ColumnType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ColumnType::Varchar => write!(f, "VARCHAR"),
            ColumnType::Text => write!(f, "TEXT"),
            ColumnType::VarcharList => write!(f, "VARCHAR[]"),
            ColumnType::FloatArray(n) => write!(f, "FLOAT[{n}]"),
            ColumnType::Timestamp => write!(f, "TIMESTAMP"),
            ColumnType::TimestampTz => write!(f, "TIMESTAMPTZ"),
            ColumnType::Json => write!(f, "JSON"),
        }
    }
}

/// One column of a table definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub ty: ColumnType,
    pub nullable: bool,
}

impl ColumnDef {
    pub fn new(name: &str, ty: ColumnType) -> Self {
        Self {
            name: name.to_string(),
            ty,
            nullable: true,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    /// Validate a value before it is written to this column
    pub fn check(&self, value: &Value) -> Result<()> {
        let ok = match (&self.ty, value) {
            (_, Value::Null) => {
                if self.nullable {
                    return Ok(());
                }
                return Err(StoreError::invalid(format!(
                    "column {} must not be NULL",
                    self.name
                )));
            }
            (ColumnType::Varchar | ColumnType::Text, Value::Varchar(_)) => true,
            (ColumnType::VarcharList, Value::List(items)) => {
                items.iter().all(|v| matches!(v, Value::Varchar(_)))
            }
            (ColumnType::FloatArray(dim), Value::FloatArray(v)) => {
                if v.len() != *dim {
                    return Err(StoreError::DimensionMismatch {
                        expected: *dim,
                        actual: v.len(),
                    });
                }
                true
            }
            (ColumnType::Timestamp, Value::Timestamp(_)) => true,
            (ColumnType::TimestampTz, Value::TimestampTz(_)) => true,
            (ColumnType::Json, Value::Json(text)) => {
                serde_json::from_str::<serde_json::Value>(text).map_err(|e| {
                    StoreError::invalid(format!("column {} is not valid JSON: {e}", self.name))
                })?;
                true
            }
            (ColumnType::Json, Value::Struct(_) | Value::List(_)) => true,
            _ => false,
        };

        if ok {
            Ok(())
        } else {
            Err(StoreError::invalid(format!(
                "column {} of type {} cannot hold {}",
                self.name,
                self.ty,
                value.type_name()
            )))
        }
    }
}

/// Validate a full row against a column list
pub fn check_row(columns: &[ColumnDef], row: &[Value]) -> Result<()> {
    if columns.len() != row.len() {
        return Err(StoreError::schema(format!(
            "row has {} values, table has {} columns",
            row.len(),
            columns.len()
        )));
    }
    columns
        .iter()
        .zip(row)
        .try_for_each(|(column, value)| column.check(value))
}
