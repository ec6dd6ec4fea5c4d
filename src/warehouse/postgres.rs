//! PostgreSQL backend using sqlx.

use crate::error::Result;
use crate::feed::FieldSpec;
use crate::record::{FieldType, MappedRecord, Value};
use crate::resolver::{ReferenceRow, ReferenceStore};
use crate::warehouse::{cell_text, quote_ident, ReplaceWindow, Warehouse};
use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, QueryBuilder, Row};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info};

/// Postgres caps bind parameters per statement at 65535.
const MAX_BINDS: usize = 65_535;

pub struct PgWarehouse {
    pool: PgPool,
}

impl PgWarehouse {
    /// Connect and check the connection with a trivial query.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(4)
            .acquire_timeout(Duration::from_secs(30))
            .connect(database_url)
            .await?;

        sqlx::query("SELECT 1").execute(&pool).await?;
        info!("Connected to PostgreSQL warehouse");
        Ok(Self { pool })
    }
}

/// `attendance.at_report` -> `"attendance"."at_report"`
fn qualified(table: &str) -> String {
    table.split('.').map(quote_ident).collect::<Vec<_>>().join(".")
}

#[async_trait]
impl Warehouse for PgWarehouse {
    async fn ensure_table(&self, table: &str, schema: &[FieldSpec]) -> Result<()> {
        if let Some((schema_name, _)) = table.split_once('.') {
            let sql = format!("CREATE SCHEMA IF NOT EXISTS {}", quote_ident(schema_name));
            sqlx::query(&sql).execute(&self.pool).await?;
        }
        let columns: Vec<String> = schema
            .iter()
            .map(|f| {
                let null = if f.nullable { "" } else { " NOT NULL" };
                format!("{} {}{}", quote_ident(&f.name), f.field_type.sql_type(), null)
            })
            .collect();
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            qualified(table),
            columns.join(", ")
        );
        sqlx::query(&sql).execute(&self.pool).await?;
        Ok(())
    }

    async fn delete_window(&self, table: &str, window: &ReplaceWindow) -> Result<u64> {
        let result = match window {
            ReplaceWindow::All => {
                let sql = format!("DELETE FROM {}", qualified(table));
                sqlx::query(&sql).execute(&self.pool).await?
            }
            ReplaceWindow::DateRange {
                column,
                start,
                end,
                tag_column: None,
                ..
            } => {
                let sql = format!(
                    "DELETE FROM {} WHERE {} BETWEEN $1 AND $2",
                    qualified(table),
                    quote_ident(column)
                );
                sqlx::query(&sql)
                    .bind(*start)
                    .bind(*end)
                    .execute(&self.pool)
                    .await?
            }
            ReplaceWindow::DateRange {
                column,
                start,
                end,
                tag_column: Some(tag_column),
                tags,
            } => {
                let sql = format!(
                    "DELETE FROM {} WHERE {} BETWEEN $1 AND $2 AND {} = ANY($3)",
                    qualified(table),
                    quote_ident(column),
                    quote_ident(tag_column)
                );
                sqlx::query(&sql)
                    .bind(*start)
                    .bind(*end)
                    .bind(tags)
                    .execute(&self.pool)
                    .await?
            }
        };
        debug!("Deleted {} rows from {} ({})", result.rows_affected(), table, window);
        Ok(result.rows_affected())
    }

    async fn append(&self, table: &str, schema: &[FieldSpec], batch: &[MappedRecord]) -> Result<u64> {
        if batch.is_empty() || schema.is_empty() {
            return Ok(0);
        }
        let columns: Vec<String> = schema.iter().map(|f| quote_ident(&f.name)).collect();
        let rows_per_statement = (MAX_BINDS / schema.len()).max(1);

        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;
        for chunk in batch.chunks(rows_per_statement) {
            let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(format!(
                "INSERT INTO {} ({}) ",
                qualified(table),
                columns.join(", ")
            ));
            qb.push_values(chunk, |mut b, record| {
                for spec in schema {
                    let value = record.value(&spec.name);
                    match spec.field_type {
                        FieldType::String => {
                            b.push_bind(cell_text(value));
                        }
                        FieldType::Integer => {
                            b.push_bind(match value {
                                Value::Int(i) => Some(*i),
                                _ => None,
                            });
                        }
                        FieldType::Float => {
                            b.push_bind(value.as_f64());
                        }
                        FieldType::Date => {
                            b.push_bind(value.as_date());
                        }
                        FieldType::Boolean => {
                            b.push_bind(match value {
                                Value::Bool(v) => Some(*v),
                                _ => None,
                            });
                        }
                    }
                }
            });
            inserted += qb.build().execute(&mut *tx).await?.rows_affected();
        }
        tx.commit().await?;
        Ok(inserted)
    }
}

#[async_trait]
impl ReferenceStore for PgWarehouse {
    async fn lookup(
        &self,
        table: &str,
        key_column: &str,
        columns: &[String],
        keys: &[String],
    ) -> Result<Vec<ReferenceRow>> {
        let mut selected = vec![format!("CAST({} AS TEXT)", quote_ident(key_column))];
        selected.extend(columns.iter().map(|c| format!("CAST({} AS TEXT)", quote_ident(c))));
        let sql = format!(
            "SELECT {} FROM {} WHERE CAST({} AS TEXT) = ANY($1)",
            selected.join(", "),
            qualified(table),
            quote_ident(key_column)
        );
        let rows = sqlx::query(&sql).bind(keys).fetch_all(&self.pool).await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let key: Option<String> = row.try_get(0)?;
            let Some(key) = key.map(|k| k.trim().to_string()) else {
                continue;
            };
            let mut attrs = BTreeMap::new();
            for (i, column) in columns.iter().enumerate() {
                let cell: Option<String> = row.try_get(i + 1)?;
                attrs.insert(
                    column.clone(),
                    cell.map(|s| Value::text(&s)).unwrap_or(Value::Null),
                );
            }
            out.push((key, attrs));
        }
        Ok(out)
    }
}
