//! Records flowing through a run: raw CSV rows, typed mapped rows, and the batch.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Destination column types understood by every warehouse backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Integer,
    Float,
    Date,
    Boolean,
}

impl FieldType {
    pub fn sql_type(&self) -> &'static str {
        match self {
            FieldType::String => "TEXT",
            FieldType::Integer => "BIGINT",
            FieldType::Float => "DOUBLE PRECISION",
            FieldType::Date => "DATE",
            FieldType::Boolean => "BOOLEAN",
        }
    }
}

/// A single cell after mapping.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Text(String),
    Int(i64),
    Float(f64),
    Date(NaiveDate),
    Bool(bool),
}

impl Value {
    /// Text values are trimmed; blank text becomes `Null`.
    pub fn text(s: &str) -> Self {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            Value::Null
        } else {
            Value::Text(trimmed.to_string())
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            Value::Date(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Canonical text used to compare join keys across typed and untyped sources.
    pub fn key_text(&self) -> Option<String> {
        match self {
            Value::Null => None,
            Value::Text(s) => Some(s.trim().to_string()),
            Value::Int(i) => Some(i.to_string()),
            Value::Float(f) if f.fract() == 0.0 => Some(format!("{}", *f as i64)),
            Value::Float(f) => Some(f.to_string()),
            Value::Date(d) => Some(d.format("%Y-%m-%d").to_string()),
            Value::Bool(b) => Some(b.to_string()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Text(s) => write!(f, "{}", s),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(v) => write!(f, "{}", v),
            Value::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
            Value::Bool(b) => write!(f, "{}", b),
        }
    }
}

/// One input row, columns in file order.
#[derive(Debug, Clone)]
pub struct RawRecord {
    /// 1-based data row number (header and skipped lines excluded)
    pub row: usize,
    pub cells: Vec<(String, String)>,
}

impl RawRecord {
    pub fn get(&self, column: &str) -> Option<&str> {
        self.cells
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, v)| v.as_str())
    }

    /// Cell at a 0-based column offset; cells past the end read as blank.
    pub fn at(&self, index: usize) -> &str {
        self.cells.get(index).map(|(_, v)| v.as_str()).unwrap_or("")
    }

    pub fn is_blank_at(&self, index: usize) -> bool {
        self.at(index).trim().is_empty()
    }
}

/// A row keyed by target field names. Field order is insertion order.
#[derive(Debug, Clone, PartialEq)]
pub struct MappedRecord {
    pub row: usize,
    fields: Vec<(String, Value)>,
}

impl MappedRecord {
    pub fn new(row: usize) -> Self {
        Self {
            row,
            fields: Vec::new(),
        }
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.iter().find(|(k, _)| k == field).map(|(_, v)| v)
    }

    /// Missing fields read as `Null`.
    pub fn value(&self, field: &str) -> &Value {
        self.get(field).unwrap_or(&Value::Null)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.fields.iter().any(|(k, _)| k == field)
    }

    pub fn set(&mut self, field: &str, value: Value) {
        match self.fields.iter_mut().find(|(k, _)| k == field) {
            Some((_, slot)) => *slot = value,
            None => self.fields.push((field.to_string(), value)),
        }
    }

    pub fn remove(&mut self, field: &str) -> Option<Value> {
        let idx = self.fields.iter().position(|(k, _)| k == field)?;
        Some(self.fields.remove(idx).1)
    }

    pub fn rename(&mut self, from: &str, to: &str) {
        if self.contains(to) {
            return;
        }
        if let Some((k, _)) = self.fields.iter_mut().find(|(k, _)| k == from) {
            *k = to.to_string();
        }
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Keep only `order`'s fields, in that order, filling absent ones with `Null`.
    pub fn project(&mut self, order: &[&str]) {
        let mut projected = Vec::with_capacity(order.len());
        for name in order {
            let value = self.remove(name).unwrap_or(Value::Null);
            projected.push((name.to_string(), value));
        }
        self.fields = projected;
    }
}

/// The ordered set of records produced by one run.
pub type Batch = Vec<MappedRecord>;
