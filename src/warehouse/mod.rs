//! Destination and reference storage.
//!
//! Backends:
//! - SqliteWarehouse: local SQLite file (or in-memory for tests)
//! - PgWarehouse: PostgreSQL through a sqlx pool

pub mod postgres;
pub mod sqlite;

pub use postgres::PgWarehouse;
pub use sqlite::SqliteWarehouse;

use crate::error::{PipelineError, Result};
use crate::feed::{FieldSpec, ReplacePolicy, ReplaceSpec};
use crate::record::{MappedRecord, Value};
use crate::resolver::ReferenceStore;
use async_trait::async_trait;
use chrono::NaiveDate;
use itertools::{Itertools, MinMaxResult};
use serde::Serialize;

/// The slice of the destination a run replaces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReplaceWindow {
    /// Every row in the table
    All,
    /// Rows whose `column` falls in `start..=end`, optionally only those tagged
    /// with one of `tags` in `tag_column`
    DateRange {
        column: String,
        start: NaiveDate,
        end: NaiveDate,
        tag_column: Option<String>,
        tags: Vec<String>,
    },
}

impl ReplaceWindow {
    /// The window a batch replaces, or `None` when nothing should be deleted.
    pub fn for_batch(replace: &ReplaceSpec, batch: &[MappedRecord]) -> Option<Self> {
        match replace.policy {
            ReplacePolicy::None => None,
            ReplacePolicy::Full if batch.is_empty() => None,
            ReplacePolicy::Full => Some(ReplaceWindow::All),
            ReplacePolicy::DateRange => {
                let column = replace.date_field.clone()?;
                let (start, end) = match batch.iter().filter_map(|r| r.value(&column).as_date()).minmax() {
                    MinMaxResult::NoElements => return None,
                    MinMaxResult::OneElement(d) => (d, d),
                    MinMaxResult::MinMax(lo, hi) => (lo, hi),
                };
                let tags = match &replace.school_year_field {
                    Some(field) => batch
                        .iter()
                        .filter_map(|r| r.value(field).key_text())
                        .unique()
                        .sorted()
                        .collect(),
                    None => Vec::new(),
                };
                Some(ReplaceWindow::DateRange {
                    column,
                    start,
                    end,
                    tag_column: replace.school_year_field.clone(),
                    tags,
                })
            }
        }
    }
}

impl std::fmt::Display for ReplaceWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReplaceWindow::All => write!(f, "all rows"),
            ReplaceWindow::DateRange {
                column,
                start,
                end,
                tag_column,
                tags,
            } => {
                write!(f, "{} from {} to {}", column, start, end)?;
                if let Some(tag_column) = tag_column {
                    write!(f, " where {} in [{}]", tag_column, tags.join(", "))?;
                }
                Ok(())
            }
        }
    }
}

#[async_trait]
pub trait Warehouse: Send + Sync {
    /// Create the destination table when it does not exist yet.
    async fn ensure_table(&self, table: &str, schema: &[FieldSpec]) -> Result<()>;

    /// Delete the rows inside `window`, returning how many went.
    async fn delete_window(&self, table: &str, window: &ReplaceWindow) -> Result<u64>;

    /// Append every record in one transaction, columns in schema order.
    async fn append(&self, table: &str, schema: &[FieldSpec], batch: &[MappedRecord]) -> Result<u64>;
}

/// A connected backend, usable both as destination and as reference store.
pub enum Backend {
    Sqlite(SqliteWarehouse),
    Postgres(PgWarehouse),
}

impl Backend {
    /// `sqlite://<path>`, `sqlite::memory:` or `postgres://...`
    pub async fn connect(url: &str) -> Result<Self> {
        if url == "sqlite::memory:" {
            return Ok(Backend::Sqlite(SqliteWarehouse::open_in_memory()?));
        }
        if let Some(path) = url.strip_prefix("sqlite://") {
            return Ok(Backend::Sqlite(SqliteWarehouse::open(path)?));
        }
        if url.starts_with("postgres://") || url.starts_with("postgresql://") {
            return Ok(Backend::Postgres(PgWarehouse::connect(url).await?));
        }
        Err(PipelineError::Config(format!(
            "unsupported warehouse url '{}'",
            url
        )))
    }

    pub fn warehouse(&self) -> &dyn Warehouse {
        match self {
            Backend::Sqlite(w) => w,
            Backend::Postgres(w) => w,
        }
    }

    pub fn references(&self) -> &dyn ReferenceStore {
        match self {
            Backend::Sqlite(w) => w,
            Backend::Postgres(w) => w,
        }
    }
}

/// Double-quote one identifier.
pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Text of a cell as stored by text-typed backends.
pub(crate) fn cell_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        other => Some(other.to_string()),
    }
}
