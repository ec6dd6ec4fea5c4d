//! Reference resolution: left-joins the batch against reference tables such as
//! the student roster, filling identifiers the export does not carry.

use crate::error::{PipelineError, Result};
use crate::feed::{DestinationSpec, FillMode, ReferenceJoin};
use crate::normalize::coerce_value;
use crate::normalize::dates::PivotRule;
use crate::record::{MappedRecord, Value};
use crate::report::{IssueKind, RowIssue, Stage};
use async_trait::async_trait;
use itertools::Itertools;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info};

/// One reference row: the key as canonical text plus the requested attributes.
pub type ReferenceRow = (String, BTreeMap<String, Value>);

#[async_trait]
pub trait ReferenceStore: Send + Sync {
    /// Rows of `table` whose `key_column` is one of `keys`, with `columns` attached.
    async fn lookup(
        &self,
        table: &str,
        key_column: &str,
        columns: &[String],
        keys: &[String],
    ) -> Result<Vec<ReferenceRow>>;
}

/// A reference table loaded for a single run.
#[derive(Debug, Default)]
pub struct ReferenceTable {
    entries: HashMap<String, BTreeMap<String, Value>>,
}

impl ReferenceTable {
    pub fn from_rows(rows: Vec<ReferenceRow>) -> Self {
        let mut entries = HashMap::with_capacity(rows.len());
        for (key, attrs) in rows {
            entries.entry(key).or_insert(attrs);
        }
        Self { entries }
    }

    pub fn get(&self, key: &str) -> Option<&BTreeMap<String, Value>> {
        self.entries.get(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct ResolveOutcome {
    pub records: Vec<MappedRecord>,
    pub issues: Vec<RowIssue>,
    /// Rows matched by every join
    pub resolved: usize,
}

/// Distinct non-null join keys in batch order.
pub fn distinct_keys(batch: &[MappedRecord], field: &str) -> Vec<String> {
    batch
        .iter()
        .filter_map(|r| r.value(field).key_text())
        .filter(|k| !k.is_empty())
        .unique()
        .collect()
}

/// Load one join's reference table, querying only for keys the batch holds.
pub async fn load_reference(
    store: &dyn ReferenceStore,
    join: &ReferenceJoin,
    batch: &[MappedRecord],
) -> Result<ReferenceTable> {
    let keys = distinct_keys(batch, &join.join_field);
    if keys.is_empty() {
        debug!("No {} keys in batch; skipping lookup on {}", join.join_field, join.table);
        return Ok(ReferenceTable::default());
    }
    let columns: Vec<String> = join.fields.values().unique().cloned().collect();
    let rows = store
        .lookup(&join.table, &join.reference_key, &columns, &keys)
        .await
        .map_err(|e| match e {
            PipelineError::ReferenceLookupFailed { .. } => e,
            other => PipelineError::ReferenceLookupFailed {
                table: join.table.clone(),
                message: other.to_string(),
            },
        })?;
    let table = ReferenceTable::from_rows(rows);
    info!(
        "Loaded {} of {} requested keys from {}",
        table.len(),
        keys.len(),
        join.table
    );
    Ok(table)
}

/// Resolve every join in order. Lookups fail the run; unmatched rows are dropped
/// only for mandatory joins.
pub async fn resolve(
    batch: Vec<MappedRecord>,
    joins: &[ReferenceJoin],
    store: &dyn ReferenceStore,
    destination: &DestinationSpec,
    pivot: Option<&PivotRule>,
) -> Result<ResolveOutcome> {
    let mut outcome = ResolveOutcome::default();
    let mut matched_all = vec![true; batch.len()];
    let mut records = batch;

    for join in joins {
        let table = load_reference(store, join, &records).await?;
        let mut kept = Vec::with_capacity(records.len());
        let mut kept_matched = Vec::with_capacity(records.len());

        for (mut record, matched) in records.into_iter().zip(matched_all) {
            let hit = record
                .value(&join.join_field)
                .key_text()
                .and_then(|k| table.get(&k));
            match hit {
                Some(attrs) => {
                    if let Err(e) = fill(&mut record, join, attrs, destination, pivot) {
                        match RowIssue::from_error(record.row, Stage::Resolving, &e) {
                            Some(issue) => outcome.issues.push(issue),
                            None => return Err(e),
                        }
                        continue;
                    }
                    kept.push(record);
                    kept_matched.push(matched);
                }
                None if join.mandatory => {
                    outcome.issues.push(RowIssue::new(
                        record.row,
                        Stage::Resolving,
                        IssueKind::Unresolved,
                        format!(
                            "{} '{}' not found in {}",
                            join.join_field,
                            record.value(&join.join_field),
                            join.table
                        ),
                    ));
                }
                None => {
                    kept.push(record);
                    kept_matched.push(false);
                }
            }
        }
        records = kept;
        matched_all = kept_matched;
    }

    outcome.resolved = if joins.is_empty() {
        0
    } else {
        matched_all.iter().filter(|m| **m).count()
    };
    outcome.records = records;
    Ok(outcome)
}

fn fill(
    record: &mut MappedRecord,
    join: &ReferenceJoin,
    attrs: &BTreeMap<String, Value>,
    destination: &DestinationSpec,
    pivot: Option<&PivotRule>,
) -> Result<()> {
    for (target, column) in &join.fields {
        if join.fill == FillMode::MissingOnly && !record.value(target).is_null() {
            continue;
        }
        let value = attrs.get(column).cloned().unwrap_or(Value::Null);
        let value = match destination.field(target) {
            Some(spec) => coerce_value(value, spec.field_type, pivot)?,
            None => value,
        };
        record.set(target, value);
    }
    Ok(())
}
