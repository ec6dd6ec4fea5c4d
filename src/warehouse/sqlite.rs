//! SQLite backend. Dates are stored as ISO text, booleans as 0/1.
//!
//! A dotted table name such as `attendance.at_report` is kept as one quoted
//! identifier, since SQLite has no schemas of its own.

use crate::error::Result;
use crate::feed::FieldSpec;
use crate::record::{FieldType, MappedRecord, Value};
use crate::resolver::{ReferenceRow, ReferenceStore};
use crate::warehouse::{cell_text, quote_ident, ReplaceWindow, Warehouse};
use async_trait::async_trait;
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, Connection};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

/// Keys per lookup statement
const LOOKUP_CHUNK: usize = 500;

pub struct SqliteWarehouse {
    conn: Mutex<Connection>,
}

impl SqliteWarehouse {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        // A poisoned lock only means another caller panicked mid-statement;
        // SQLite itself rolled back, so the connection is still usable.
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Run raw SQL, e.g. to seed a reference table.
    pub fn execute_batch(&self, sql: &str) -> Result<()> {
        self.conn().execute_batch(sql)?;
        Ok(())
    }

    /// Every row of `table`, decoded against `schema`, in insertion order.
    pub fn select_all(&self, table: &str, schema: &[FieldSpec]) -> Result<Vec<MappedRecord>> {
        let columns: Vec<String> = schema.iter().map(|f| quote_ident(&f.name)).collect();
        let sql = format!(
            "SELECT {} FROM {} ORDER BY rowid",
            columns.join(", "),
            quote_ident(table)
        );
        let conn = self.conn();
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query([])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let mut record = MappedRecord::new(out.len() + 1);
            for (i, spec) in schema.iter().enumerate() {
                record.set(&spec.name, decode(row.get_ref(i)?, Some(spec.field_type)));
            }
            out.push(record);
        }
        Ok(out)
    }

    pub fn count_rows(&self, table: &str) -> Result<i64> {
        let sql = format!("SELECT COUNT(*) FROM {}", quote_ident(table));
        Ok(self.conn().query_row(&sql, [], |r| r.get(0))?)
    }
}

fn sqlite_type(field_type: FieldType) -> &'static str {
    match field_type {
        FieldType::String | FieldType::Date => "TEXT",
        FieldType::Integer | FieldType::Boolean => "INTEGER",
        FieldType::Float => "REAL",
    }
}

fn encode(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Int(i) => SqlValue::Integer(*i),
        Value::Float(f) => SqlValue::Real(*f),
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        other => cell_text(other).map(SqlValue::Text).unwrap_or(SqlValue::Null),
    }
}

fn decode(value: ValueRef<'_>, field_type: Option<FieldType>) -> Value {
    match (value, field_type) {
        (ValueRef::Null, _) => Value::Null,
        (ValueRef::Integer(i), Some(FieldType::Boolean)) => Value::Bool(i != 0),
        (ValueRef::Integer(i), _) => Value::Int(i),
        (ValueRef::Real(f), _) => Value::Float(f),
        (ValueRef::Text(t), Some(FieldType::Date)) => {
            let s = String::from_utf8_lossy(t);
            chrono::NaiveDate::parse_from_str(&s, "%Y-%m-%d")
                .map(Value::Date)
                .unwrap_or_else(|_| Value::text(&s))
        }
        (ValueRef::Text(t), _) => Value::text(&String::from_utf8_lossy(t)),
        (ValueRef::Blob(_), _) => Value::Null,
    }
}

#[async_trait]
impl Warehouse for SqliteWarehouse {
    async fn ensure_table(&self, table: &str, schema: &[FieldSpec]) -> Result<()> {
        let columns: Vec<String> = schema
            .iter()
            .map(|f| {
                let null = if f.nullable { "" } else { " NOT NULL" };
                format!("{} {}{}", quote_ident(&f.name), sqlite_type(f.field_type), null)
            })
            .collect();
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            quote_ident(table),
            columns.join(", ")
        );
        self.conn().execute(&sql, [])?;
        Ok(())
    }

    async fn delete_window(&self, table: &str, window: &ReplaceWindow) -> Result<u64> {
        let (sql, params) = match window {
            ReplaceWindow::All => (format!("DELETE FROM {}", quote_ident(table)), Vec::new()),
            ReplaceWindow::DateRange {
                column,
                start,
                end,
                tag_column,
                tags,
            } => {
                let mut sql = format!(
                    "DELETE FROM {} WHERE {} BETWEEN ?1 AND ?2",
                    quote_ident(table),
                    quote_ident(column)
                );
                let mut params = vec![
                    SqlValue::Text(start.format("%Y-%m-%d").to_string()),
                    SqlValue::Text(end.format("%Y-%m-%d").to_string()),
                ];
                if let Some(tag_column) = tag_column {
                    let marks: Vec<String> = (0..tags.len()).map(|i| format!("?{}", i + 3)).collect();
                    sql.push_str(&format!(
                        " AND {} IN ({})",
                        quote_ident(tag_column),
                        marks.join(", ")
                    ));
                    params.extend(tags.iter().cloned().map(SqlValue::Text));
                }
                (sql, params)
            }
        };
        let deleted = self.conn().execute(&sql, params_from_iter(params))?;
        debug!("Deleted {} rows from {} ({})", deleted, table, window);
        Ok(deleted as u64)
    }

    async fn append(&self, table: &str, schema: &[FieldSpec], batch: &[MappedRecord]) -> Result<u64> {
        let columns: Vec<String> = schema.iter().map(|f| quote_ident(&f.name)).collect();
        let marks: Vec<String> = (1..=schema.len()).map(|i| format!("?{}", i)).collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote_ident(table),
            columns.join(", "),
            marks.join(", ")
        );

        let mut conn = self.conn();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(&sql)?;
            for record in batch {
                let values = schema.iter().map(|f| encode(record.value(&f.name)));
                stmt.execute(params_from_iter(values))?;
            }
        }
        tx.commit()?;
        Ok(batch.len() as u64)
    }
}

#[async_trait]
impl ReferenceStore for SqliteWarehouse {
    async fn lookup(
        &self,
        table: &str,
        key_column: &str,
        columns: &[String],
        keys: &[String],
    ) -> Result<Vec<ReferenceRow>> {
        let selected: Vec<String> = std::iter::once(key_column.to_string())
            .chain(columns.iter().cloned())
            .map(|c| quote_ident(&c))
            .collect();
        let conn = self.conn();
        let mut out = Vec::new();
        for chunk in keys.chunks(LOOKUP_CHUNK) {
            let marks: Vec<String> = (1..=chunk.len()).map(|i| format!("?{}", i)).collect();
            let sql = format!(
                "SELECT {} FROM {} WHERE CAST({} AS TEXT) IN ({})",
                selected.join(", "),
                quote_ident(table),
                quote_ident(key_column),
                marks.join(", ")
            );
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query(params_from_iter(chunk.iter()))?;
            while let Some(row) = rows.next()? {
                let key = match decode(row.get_ref(0)?, None).key_text() {
                    Some(k) => k,
                    None => continue,
                };
                let mut attrs = BTreeMap::new();
                for (i, column) in columns.iter().enumerate() {
                    attrs.insert(column.clone(), decode(row.get_ref(i + 1)?, None));
                }
                out.push((key, attrs));
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn schema() -> Vec<FieldSpec> {
        serde_json::from_str(
            r#"[
            { "name": "id", "type": "integer" },
            { "name": "date", "type": "date" },
            { "name": "present", "type": "boolean" },
            { "name": "sy", "type": "string" }
        ]"#,
        )
        .unwrap()
    }

    fn rec(id: i64, day: u32, sy: &str) -> MappedRecord {
        let mut r = MappedRecord::new(id as usize);
        r.set("id", Value::Int(id));
        r.set("date", Value::Date(NaiveDate::from_ymd_opt(2023, 9, day).unwrap()));
        r.set("present", Value::Bool(true));
        r.set("sy", Value::text(sy));
        r
    }

    #[tokio::test]
    async fn test_append_and_read_back() {
        let wh = SqliteWarehouse::open_in_memory().unwrap();
        wh.ensure_table("attendance.daily", &schema()).await.unwrap();
        wh.append("attendance.daily", &schema(), &[rec(1, 5, "SY24"), rec(2, 6, "SY24")])
            .await
            .unwrap();
        let rows = wh.select_all("attendance.daily", &schema()).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].value("date"), &Value::Date(NaiveDate::from_ymd_opt(2023, 9, 5).unwrap()));
        assert_eq!(rows[0].value("present"), &Value::Bool(true));
    }

    #[tokio::test]
    async fn test_delete_window_with_tags() {
        let wh = SqliteWarehouse::open_in_memory().unwrap();
        wh.ensure_table("t", &schema()).await.unwrap();
        wh.append("t", &schema(), &[rec(1, 5, "SY24"), rec(2, 6, "SY23"), rec(3, 7, "SY24")])
            .await
            .unwrap();
        let window = ReplaceWindow::DateRange {
            column: "date".into(),
            start: NaiveDate::from_ymd_opt(2023, 9, 5).unwrap(),
            end: NaiveDate::from_ymd_opt(2023, 9, 6).unwrap(),
            tag_column: Some("sy".into()),
            tags: vec!["SY24".into()],
        };
        assert_eq!(wh.delete_window("t", &window).await.unwrap(), 1);
        assert_eq!(wh.count_rows("t").unwrap(), 2);
    }

    #[tokio::test]
    async fn test_lookup_by_text_key() {
        let wh = SqliteWarehouse::open_in_memory().unwrap();
        wh.execute_batch(
            "CREATE TABLE \"student_info.roster\" (id INTEGER, name TEXT, email TEXT);
             INSERT INTO \"student_info.roster\" VALUES (1001, 'Lovelace, Ada', 'ada@x.org');
             INSERT INTO \"student_info.roster\" VALUES (1002, 'Hopper, Grace', NULL);",
        )
        .unwrap();
        let rows = wh
            .lookup(
                "student_info.roster",
                "id",
                &["name".to_string(), "email".to_string()],
                &["1002".to_string(), "9999".to_string()],
            )
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].0, "1002");
        assert_eq!(rows[0].1["name"], Value::Text("Hopper, Grace".into()));
        assert!(rows[0].1["email"].is_null());
    }
}
