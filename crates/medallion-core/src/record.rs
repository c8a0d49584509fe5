//! The in-flight record representation shared by every extractor and
//! curation operator: an ordered map of column name to scalar value.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// A single scalar cell. Columns are untyped at the record level; the
/// partition writer infers a `sql_type` per column when it materializes
/// the Arrow schema (see `crate::partition`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Timestamp(DateTime<Utc>),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Render as a string for lexicographic comparisons (cursor tracking,
    /// dedupe tie-breaking, `column_mapping` diagnostics).
    pub fn to_comparable_string(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Bool(b) => b.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::Str(s) => s.clone(),
            Value::Timestamp(t) => t.to_rfc3339(),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_comparable_string())
    }
}

/// Total ordering used to tie-break rows within a dedupe/history group:
/// first by `change_timestamp` (the caller sorts on that separately), then
/// lexically across all columns of the record (spec §4.6).
impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.to_comparable_string().cmp(&other.to_comparable_string()))
    }
}

/// An ordered column map. Insertion order is preserved so that output
/// column order matches the source (modulo `column_mapping` renames and
/// projection), matching how the original's Ibis-backed implementation
/// preserves table column order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Record(pub IndexMap<String, Value>);

impl Record {
    pub fn new() -> Self {
        Self(IndexMap::new())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.0.insert(key.into(), value);
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(|s| s.as_str())
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.shift_remove(key)
    }

    /// Lexical comparison across all columns in insertion order, used for
    /// deterministic tie-breaking (spec §4.6: "tie-broken on ... all
    /// columns lexically").
    pub fn lexical_key(&self) -> Vec<String> {
        self.0.values().map(|v| v.to_comparable_string()).collect()
    }

    /// Build the natural-key tuple for grouping, in the order the keys
    /// were declared.
    pub fn key_tuple(&self, keys: &[String]) -> Vec<Value> {
        keys.iter()
            .map(|k| self.0.get(k).cloned().unwrap_or(Value::Null))
            .collect()
    }
}

impl FromIterator<(String, Value)> for Record {
    fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
        Record(IndexMap::from_iter(iter))
    }
}
