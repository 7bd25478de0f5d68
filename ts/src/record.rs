//! Record trait and index/filter types

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

/// Current time as Unix milliseconds
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// A value stored in the index table
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexValue {
    String(String),
    Int(i64),
    Bool(bool),
}

impl IndexValue {
    /// Column this value lives in, plus its SQL-bound form
    pub(crate) fn column(&self) -> (&'static str, rusqlite::types::Value) {
        match self {
            Self::String(s) => ("value_str", rusqlite::types::Value::Text(s.clone())),
            Self::Int(i) => ("value_int", rusqlite::types::Value::Integer(*i)),
            Self::Bool(b) => ("value_int", rusqlite::types::Value::Integer(i64::from(*b))),
        }
    }
}

impl From<&str> for IndexValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for IndexValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<i64> for IndexValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<bool> for IndexValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

/// Comparison operator for a filter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Ne,
    Gt,
    Lt,
    Gte,
    Lte,
}

impl FilterOp {
    pub(crate) fn sql(&self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "!=",
            Self::Gt => ">",
            Self::Lt => "<",
            Self::Gte => ">=",
            Self::Lte => "<=",
        }
    }
}

/// Filter on an indexed field
#[derive(Debug, Clone)]
pub struct Filter {
    pub field: String,
    pub op: FilterOp,
    pub value: IndexValue,
}

impl Filter {
    /// Equality filter
    pub fn eq(field: impl Into<String>, value: impl Into<IndexValue>) -> Self {
        Self {
            field: field.into(),
            op: FilterOp::Eq,
            value: value.into(),
        }
    }

    /// Filter with an arbitrary operator
    pub fn new(field: impl Into<String>, op: FilterOp, value: impl Into<IndexValue>) -> Self {
        Self {
            field: field.into(),
            op,
            value: value.into(),
        }
    }
}

/// A persistable record
///
/// A record with `id() == 0` has not been stored yet; `Store::create`
/// allocates its id.
pub trait Record: Serialize + DeserializeOwned + Clone + Send + 'static {
    fn id(&self) -> i64;

    fn set_id(&mut self, id: i64);

    fn updated_at(&self) -> i64;

    /// Logical table this record type lives in
    fn collection_name() -> &'static str;

    /// Fields written to the index table for filtering
    fn indexed_fields(&self) -> HashMap<String, IndexValue>;
}
