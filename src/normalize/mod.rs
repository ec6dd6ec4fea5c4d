//! Value normalization: applies a feed's derivations to each mapped row, then
//! coerces destination fields to their declared types.

pub mod dates;
pub mod numbers;
pub mod text;

use crate::error::{PipelineError, Result};
use crate::feed::{Derivation, DestinationSpec, FeedConfig, RunParams};
use crate::normalize::dates::{CalendarConfig, PivotRule};
use crate::record::{FieldType, MappedRecord, Value};
use regex::Regex;
use std::collections::HashMap;

/// Per-run normalizer with the feed's patterns compiled once.
pub struct Normalizer<'a> {
    feed: &'a FeedConfig,
    params: &'a RunParams,
    patterns: HashMap<String, Regex>,
}

impl<'a> Normalizer<'a> {
    pub fn new(feed: &'a FeedConfig, params: &'a RunParams) -> Result<Self> {
        let mut patterns = HashMap::new();
        for derivation in &feed.derive {
            if let Derivation::Extract { pattern, .. } = derivation {
                let re = Regex::new(pattern)
                    .map_err(|e| PipelineError::Config(format!("invalid pattern '{}': {}", pattern, e)))?;
                patterns.insert(pattern.clone(), re);
            }
        }
        Ok(Self {
            feed,
            params,
            patterns,
        })
    }

    fn calendar(&self) -> Result<&CalendarConfig> {
        self.feed.calendar.as_ref().ok_or_else(|| {
            PipelineError::Config(format!("feed '{}' has no calendar", self.feed.name))
        })
    }

    fn pivot(&self) -> Option<&PivotRule> {
        self.feed.calendar.as_ref().map(|c| &c.pivot)
    }

    /// Run every derivation, then coerce the destination fields present on the row.
    pub fn normalize(&self, record: &mut MappedRecord) -> Result<()> {
        for derivation in &self.feed.derive {
            self.apply(derivation, record)?;
        }
        coerce_record(record, &self.feed.destination, self.pivot())
    }

    fn apply(&self, derivation: &Derivation, record: &mut MappedRecord) -> Result<()> {
        match derivation {
            Derivation::Date { field, from } => {
                let value = match record.value(from.as_deref().unwrap_or(field)) {
                    Value::Text(s) => Value::Date(dates::parse_date(s, Some(&self.calendar()?.pivot))?),
                    other => other.clone(),
                };
                record.set(field, value);
            }
            Derivation::Time { field, from } => {
                let value = match record.value(from.as_deref().unwrap_or(field)) {
                    Value::Text(s) => Value::Text(dates::parse_time(s)?),
                    other => other.clone(),
                };
                record.set(field, value);
            }
            Derivation::SchoolYear { field, from } => {
                let calendar = self.calendar()?;
                let value = match self.date_of(record, from)? {
                    Some(date) => Value::Text(dates::school_year(date, calendar)),
                    None => Value::Null,
                };
                record.set(field, value);
            }
            Derivation::Semester { field, from } => {
                let calendar = self.calendar()?;
                let value = match self.date_of(record, from)? {
                    Some(date) => Value::Text(dates::semester(date, calendar).to_string()),
                    None => Value::Null,
                };
                record.set(field, value);
            }
            Derivation::Number { field, from } => {
                let value = match record.value(from.as_deref().unwrap_or(field)) {
                    Value::Text(s) => Value::Float(numbers::parse_number(s)?),
                    other => other.clone(),
                };
                record.set(field, value);
            }
            Derivation::Split { from, into } => {
                let (first, second) = match record.value(from) {
                    Value::Null => (Value::Null, Value::Null),
                    other => {
                        let (a, b) = text::split_composite(&other.to_string())?;
                        (Value::Text(a), Value::Text(b))
                    }
                };
                record.set(&into[0], first);
                record.set(&into[1], second);
            }
            Derivation::Extract { field, from, pattern } => {
                let value = match (record.value(from), self.patterns.get(pattern)) {
                    (Value::Text(s), Some(re)) => {
                        text::extract(re, s).map(Value::Text).unwrap_or(Value::Null)
                    }
                    _ => Value::Null,
                };
                record.set(field, value);
            }
            Derivation::Template { field, template } => {
                let rendered = text::render_template(template, |name| {
                    match record.get(name) {
                        Some(v) if !v.is_null() => Some(v.to_string()),
                        _ => self.params.get(name).map(|s| s.to_string()),
                    }
                });
                record.set(field, rendered.map(|s| Value::text(&s)).unwrap_or(Value::Null));
            }
            Derivation::Param { field, name } => {
                let value = self.params.get(name).map(Value::text).unwrap_or(Value::Null);
                record.set(field, value);
            }
            Derivation::RunDate { field } => {
                record.set(field, Value::Date(self.params.run_date));
            }
            Derivation::Constant { field, value } => {
                record.set(field, Value::text(value));
            }
            Derivation::Ratio {
                field,
                numerator,
                denominator,
                scale,
            } => {
                let mut top = 0.0;
                for name in numerator {
                    top += number_of(record.value(name))?;
                }
                let bottom = number_of(record.value(denominator))?;
                let ratio = if bottom == 0.0 { 0.0 } else { top / bottom * scale };
                record.set(field, Value::Float(ratio));
            }
            Derivation::CharCode { field, from, rules } => {
                let value = match record.value(from) {
                    Value::Text(s) => text::char_code(s, rules).map(Value::Text).unwrap_or(Value::Null),
                    _ => Value::Null,
                };
                record.set(field, value);
            }
            Derivation::Map {
                field,
                from,
                values,
                default,
            } => {
                let value = match record.value(from).key_text() {
                    None => Value::Null,
                    Some(key) => values
                        .get(&key)
                        .or(default.as_ref())
                        .map(|s| Value::text(s))
                        .unwrap_or(Value::Null),
                };
                record.set(field, value);
            }
        }
        Ok(())
    }

    fn date_of(&self, record: &MappedRecord, field: &str) -> Result<Option<chrono::NaiveDate>> {
        match record.value(field) {
            Value::Null => Ok(None),
            Value::Date(d) => Ok(Some(*d)),
            Value::Text(s) => dates::parse_date(s, self.pivot()).map(Some),
            other => Err(PipelineError::InvalidDate(other.to_string())),
        }
    }

    /// Render the feed's extra rows from run params, coerced like mapped rows.
    pub fn extra_rows(&self) -> Result<Vec<MappedRecord>> {
        let mut rows = Vec::with_capacity(self.feed.extra_rows.len());
        for (i, template_row) in self.feed.extra_rows.iter().enumerate() {
            let mut record = MappedRecord::new(0);
            for (field, template) in template_row {
                let rendered = text::render_template(template, |name| {
                    self.params.get(name).map(|s| s.to_string())
                })
                .ok_or_else(|| {
                    PipelineError::Config(format!("extra row {} field '{}' could not be rendered", i + 1, field))
                })?;
                record.set(field, Value::text(&rendered));
            }
            coerce_record(&mut record, &self.feed.destination, self.pivot())?;
            rows.push(record);
        }
        Ok(rows)
    }
}

fn number_of(value: &Value) -> Result<f64> {
    match value {
        Value::Text(s) => numbers::parse_number(s),
        Value::Null => Err(PipelineError::InvalidNumber(String::new())),
        other => other
            .as_f64()
            .ok_or_else(|| PipelineError::InvalidNumber(other.to_string())),
    }
}

/// Coerce one value to a destination type. `Null` is preserved.
pub fn coerce_value(value: Value, field_type: FieldType, pivot: Option<&PivotRule>) -> Result<Value> {
    let coerced = match (field_type, value) {
        (_, Value::Null) => Value::Null,
        (FieldType::String, Value::Text(s)) => Value::Text(s),
        (FieldType::String, other) => Value::Text(other.to_string()),
        (FieldType::Integer, Value::Int(i)) => Value::Int(i),
        (FieldType::Integer, Value::Text(s)) => Value::Int(numbers::parse_integer(&s)?),
        (FieldType::Integer, Value::Float(f)) if f.fract() == 0.0 => Value::Int(f as i64),
        (FieldType::Float, Value::Float(f)) => Value::Float(f),
        (FieldType::Float, Value::Int(i)) => Value::Float(i as f64),
        (FieldType::Float, Value::Text(s)) => Value::Float(numbers::parse_number(&s)?),
        (FieldType::Date, Value::Date(d)) => Value::Date(d),
        (FieldType::Date, Value::Text(s)) => Value::Date(dates::parse_date(&s, pivot)?),
        (FieldType::Boolean, Value::Bool(b)) => Value::Bool(b),
        (FieldType::Boolean, Value::Text(s)) => Value::Bool(numbers::parse_bool(&s)?),
        (FieldType::Boolean, Value::Int(i)) if i == 0 || i == 1 => Value::Bool(i == 1),
        (FieldType::Date, other) => return Err(PipelineError::InvalidDate(other.to_string())),
        (_, other) => return Err(PipelineError::InvalidNumber(other.to_string())),
    };
    Ok(coerced)
}

/// Coerce every destination field the row carries; intermediate fields are untouched.
pub fn coerce_record(
    record: &mut MappedRecord,
    destination: &DestinationSpec,
    pivot: Option<&PivotRule>,
) -> Result<()> {
    for spec in &destination.schema {
        if let Some(value) = record.remove(&spec.name) {
            record.set(&spec.name, coerce_value(value, spec.field_type, pivot)?);
        }
    }
    Ok(())
}

/// Project to the destination schema and enforce nullability.
pub fn finalize(record: &mut MappedRecord, destination: &DestinationSpec) -> Result<()> {
    record.project(&destination.field_names());
    for spec in &destination.schema {
        if !spec.nullable && record.value(&spec.name).is_null() {
            return Err(PipelineError::MissingField(spec.name.clone()));
        }
    }
    Ok(())
}
