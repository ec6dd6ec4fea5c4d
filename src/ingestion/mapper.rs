//! Maps raw CSV rows onto destination field names.

use crate::feed::{ColumnSpec, FilterOp, RowFilter};
use crate::normalize::numbers;
use crate::record::{MappedRecord, RawRecord, Value};
use crate::report::{IssueKind, RowIssue, Stage};

#[derive(Debug, Default)]
pub struct MapOutcome {
    pub records: Vec<MappedRecord>,
    pub issues: Vec<RowIssue>,
}

/// Apply the blank-row filter, layout selection, positional naming, drop, rename,
/// fill-down and row filters, in that order.
pub fn map_records(raw: Vec<RawRecord>, columns: &ColumnSpec) -> crate::error::Result<MapOutcome> {
    let mut outcome = MapOutcome::default();
    let mut carried: Vec<Option<Value>> = vec![None; columns.fill_down.len()];

    for row in raw {
        if is_blank_row(&row, &columns.required) {
            outcome.issues.push(RowIssue::new(
                row.row,
                Stage::Mapping,
                IssueKind::BlankRow,
                "all examined columns are blank",
            ));
            continue;
        }

        let mut record = MappedRecord::new(row.row);
        for (name, cell) in &row.cells {
            if !record.contains(name) {
                record.set(name, Value::text(cell));
            }
        }

        if let Some(layout) = &columns.layout {
            let branch = layout.select(&row)?;
            for (field, &idx) in &branch.fields {
                record.set(field, Value::text(row.at(idx)));
            }
        }

        for pos in &columns.positions {
            if let Some((name, _)) = row.cells.get(pos.index) {
                if name != &pos.field {
                    record.remove(name);
                }
            }
            record.set(&pos.field, Value::text(row.at(pos.index)));
        }

        for name in &columns.drop {
            record.remove(name);
        }

        for (from, to) in &columns.rename {
            record.rename(from, to);
        }

        for (rule, slot) in columns.fill_down.iter().zip(carried.iter_mut()) {
            let is_marker = record
                .value(&rule.marker_field)
                .as_text()
                .map(|v| v == rule.marker_value.trim())
                .unwrap_or(false);
            if is_marker {
                *slot = Some(record.value(&rule.value_field).clone());
            } else if let Some(value) = slot {
                record.set(&rule.target, value.clone());
            }
        }

        if let Some(failed) = columns.filters.iter().find(|f| !passes(f, &record)) {
            outcome.issues.push(RowIssue::new(
                row.row,
                Stage::Mapping,
                IssueKind::Filtered,
                format!("filtered out by '{}' {:?}", failed.field, failed.op),
            ));
            continue;
        }

        outcome.records.push(record);
    }
    Ok(outcome)
}

fn is_blank_row(row: &RawRecord, required: &[String]) -> bool {
    if required.is_empty() {
        row.cells.iter().all(|(_, v)| v.trim().is_empty())
    } else {
        required
            .iter()
            .all(|col| row.get(col).map(|v| v.trim().is_empty()).unwrap_or(true))
    }
}

fn passes(filter: &RowFilter, record: &MappedRecord) -> bool {
    let value = record.value(&filter.field);
    let text = value.to_string();
    match &filter.op {
        FilterOp::Equals { value: expected } => !value.is_null() && text == expected.trim(),
        FilterOp::NotEquals { value: expected } => text != expected.trim(),
        FilterOp::StartsWith { value: prefix } => text.starts_with(prefix.as_str()),
        FilterOp::NotBlank => !value.is_null(),
        FilterOp::Numeric => !value.is_null() && numbers::parse_number(&text).is_ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::{FillDown, PositionalField};

    fn raw(row: usize, cells: &[(&str, &str)]) -> RawRecord {
        RawRecord {
            row,
            cells: cells.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
        }
    }

    fn columns(json: &str) -> ColumnSpec {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_blank_rows_dropped() {
        let spec = columns(r#"{ "rename": { "Student ID": "id" } }"#);
        let out = map_records(
            vec![raw(1, &[("Student ID", "1001")]), raw(2, &[("Student ID", "  ")])],
            &spec,
        )
        .unwrap();
        assert_eq!(out.records.len(), 1);
        assert_eq!(out.issues[0].row, 2);
        assert_eq!(out.issues[0].kind, IssueKind::BlankRow);
    }

    #[test]
    fn test_required_columns_limit_blank_check() {
        let spec = columns(r#"{ "required": ["id"] }"#);
        let out = map_records(vec![raw(1, &[("id", ""), ("note", "total")])], &spec).unwrap();
        assert!(out.records.is_empty());
    }

    #[test]
    fn test_drop_rename_are_tolerant() {
        let spec = columns(
            r#"{ "drop": ["Junk", "Absent"], "rename": { "Name": "name", "Missing": "x", "Alt": "id" } }"#,
        );
        let out = map_records(
            vec![raw(1, &[("Name", "Ada"), ("Junk", "z"), ("id", "1"), ("Alt", "2")])],
            &spec,
        )
        .unwrap();
        let r = &out.records[0];
        assert_eq!(r.value("name"), &Value::Text("Ada".into()));
        assert!(!r.contains("Junk"));
        assert!(!r.contains("x"));
        // rename never overwrites an existing field
        assert_eq!(r.value("id"), &Value::Text("1".into()));
    }

    #[test]
    fn test_positions_name_by_index() {
        let spec = ColumnSpec {
            positions: vec![PositionalField { index: 1, field: "code".into() }],
            ..Default::default()
        };
        let out = map_records(vec![raw(1, &[("id", "1"), ("Code (Daily)", "A")])], &spec).unwrap();
        assert_eq!(out.records[0].value("code"), &Value::Text("A".into()));
        assert!(!out.records[0].contains("Code (Daily)"));
    }

    #[test]
    fn test_fill_down_from_marker_rows() {
        let spec = ColumnSpec {
            fill_down: vec![FillDown {
                marker_field: "Type".into(),
                marker_value: "Student".into(),
                value_field: "Ref".into(),
                target: "id".into(),
            }],
            filters: serde_json::from_str(r#"[{ "field": "Type", "op": "not_equals", "value": "Student" }]"#)
                .unwrap(),
            ..Default::default()
        };
        let out = map_records(
            vec![
                raw(1, &[("Type", "Student"), ("Ref", "1001"), ("Amount", "")]),
                raw(2, &[("Type", "Charge"), ("Ref", "Lunch"), ("Amount", "3.50")]),
                raw(3, &[("Type", "Student"), ("Ref", "1002"), ("Amount", "")]),
                raw(4, &[("Type", "Charge"), ("Ref", "Trip"), ("Amount", "($12.00)")]),
            ],
            &spec,
        )
        .unwrap();
        assert_eq!(out.records.len(), 2);
        assert_eq!(out.records[0].value("id"), &Value::Text("1001".into()));
        assert_eq!(out.records[1].value("id"), &Value::Text("1002".into()));
        assert!(out.issues.iter().all(|i| i.kind == IssueKind::Filtered));
    }

    #[test]
    fn test_filters() {
        let spec = columns(
            r#"{ "filters": [
                { "field": "orgUnit", "op": "starts_with", "value": "/Students" },
                { "field": "id", "op": "numeric" }
            ] }"#,
        );
        let out = map_records(
            vec![
                raw(1, &[("orgUnit", "/Students/HS"), ("id", "1001")]),
                raw(2, &[("orgUnit", "/Staff"), ("id", "1002")]),
                raw(3, &[("orgUnit", "/Students/MS"), ("id", "Total")]),
            ],
            &spec,
        )
        .unwrap();
        assert_eq!(out.records.len(), 1);
        assert_eq!(out.issues.len(), 2);
    }

    #[test]
    fn test_layout_branches_pick_offsets() {
        let spec = columns(
            r#"{ "layout": { "branches": [
                { "name": "compact", "when": { "non_blank": [1] }, "fields": { "name": 1, "days": 2 } },
                { "name": "wide", "when": { "blank": [1] }, "fields": { "name": 3, "days": 4 } }
            ] } }"#,
        );
        let out = map_records(
            vec![
                raw(1, &[("c0", "1"), ("c1", "Ada"), ("c2", "20")]),
                raw(2, &[("c0", "2"), ("c1", ""), ("c2", ""), ("c3", "Grace"), ("c4", "18")]),
            ],
            &spec,
        )
        .unwrap();
        assert_eq!(out.records[0].value("name"), &Value::Text("Ada".into()));
        assert_eq!(out.records[1].value("name"), &Value::Text("Grace".into()));
        assert_eq!(out.records[1].value("days"), &Value::Text("18".into()));
    }
}
