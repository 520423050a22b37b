//! Table metadata and record types for query results.

use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{DateTime, FixedOffset};

use crate::error::Error;
use crate::value::Value;

/// Data types that can be declared in a `#datatype` annotation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DataType {
    /// String data type.
    String,
    /// 64-bit floating point.
    Double,
    /// Boolean value.
    Bool,
    /// Signed 64-bit integer.
    Long,
    /// Unsigned 64-bit integer.
    UnsignedLong,
    /// Duration in Go syntax, e.g. "1h30m".
    Duration,
    /// Base64-encoded binary data.
    Base64Binary,
    /// RFC3339 timestamp, with or without nanosecond precision.
    DateTime,
}

impl FromStr for DataType {
    type Err = Error;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input {
            "string" => Ok(Self::String),
            "double" => Ok(Self::Double),
            "boolean" | "bool" => Ok(Self::Bool),
            "long" => Ok(Self::Long),
            "unsignedLong" => Ok(Self::UnsignedLong),
            "duration" => Ok(Self::Duration),
            "base64Binary" => Ok(Self::Base64Binary),
            "dateTime:RFC3339" | "dateTime:RFC3339Nano" => Ok(Self::DateTime),
            _ => Err(Error::UnknownDataType(input.to_string())),
        }
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DataType::String => "string",
            DataType::Double => "double",
            DataType::Bool => "boolean",
            DataType::Long => "long",
            DataType::UnsignedLong => "unsignedLong",
            DataType::Duration => "duration",
            DataType::Base64Binary => "base64Binary",
            DataType::DateTime => "dateTime:RFC3339",
        };
        f.write_str(s)
    }
}

/// One column of a query result table.
#[derive(Clone, Debug, PartialEq)]
pub struct FluxColumn {
    /// 0-based position of the column within the table.
    pub index: usize,
    /// Column name, assigned by the header row.
    pub name: String,
    /// Declared data type.
    pub data_type: DataType,
    /// Whether the column is part of the group key.
    pub group: bool,
    /// Default value substituted for empty cells.
    pub default_value: String,
}

impl FluxColumn {
    /// Creates a column at `index` with the given declared type. Name, group
    /// flag and default are filled in by the following annotation rows.
    pub fn new(index: usize, data_type: DataType) -> Self {
        Self {
            index,
            name: String::new(),
            data_type,
            group: false,
            default_value: String::new(),
        }
    }
}

/// Schema of one table within a query response. A new table is introduced by
/// each `#datatype` annotation; its records reference the table by position.
#[derive(Clone, Debug, PartialEq)]
pub struct FluxTableMetadata {
    /// 0-based table index within the response.
    pub position: i64,
    /// Ordered column definitions.
    pub columns: Vec<FluxColumn>,
}

impl FluxTableMetadata {
    /// Creates empty table metadata for the table at `position`.
    pub fn new(position: i64) -> Self {
        Self {
            position,
            columns: Vec::with_capacity(10),
        }
    }

    /// Column at `index`, or `None` when out of bounds.
    pub fn column(&self, index: usize) -> Option<&FluxColumn> {
        self.columns.get(index)
    }

    /// First column with the given name.
    pub fn column_by_name(&self, name: &str) -> Option<&FluxColumn> {
        self.columns.iter().find(|c| c.name == name)
    }
}

/// A single row of a query result table.
#[derive(Clone, Debug, PartialEq)]
pub struct FluxRecord {
    table: i64,
    values: BTreeMap<String, Value>,
}

impl FluxRecord {
    /// Creates a record belonging to the table at `table` position.
    pub fn new(table: i64, values: BTreeMap<String, Value>) -> Self {
        Self { table, values }
    }

    /// Position of the table this record belongs to.
    pub fn table(&self) -> i64 {
        self.table
    }

    /// All values of the record keyed by column name.
    pub fn values(&self) -> &BTreeMap<String, Value> {
        &self.values
    }

    /// Value for the given column name.
    pub fn value_by_key(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Inclusive lower time bound of the records in the current table
    /// (the `_start` column).
    pub fn start(&self) -> Option<&DateTime<FixedOffset>> {
        self.values.get("_start").and_then(Value::as_time)
    }

    /// Exclusive upper time bound of the records in the current table
    /// (the `_stop` column).
    pub fn stop(&self) -> Option<&DateTime<FixedOffset>> {
        self.values.get("_stop").and_then(Value::as_time)
    }

    /// Timestamp of the record (the `_time` column).
    pub fn time(&self) -> Option<&DateTime<FixedOffset>> {
        self.values.get("_time").and_then(Value::as_time)
    }

    /// Field value of the record (the `_value` column).
    pub fn value(&self) -> Option<&Value> {
        self.values.get("_value")
    }

    /// Field name of the record (the `_field` column).
    pub fn field(&self) -> Option<&str> {
        self.values.get("_field").and_then(Value::as_str)
    }

    /// Measurement name of the record (the `_measurement` column).
    pub fn measurement(&self) -> Option<&str> {
        self.values.get("_measurement").and_then(Value::as_str)
    }
}
